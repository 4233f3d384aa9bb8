//! Lowers a pull-iterator plan into a tree of enumerators.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::aggregate::aggregate;
use super::calc::{CalcEnumerator, UnwindEnumerator};
use super::join::join;
use super::modify::modify;
use super::setop::{combine, ConcatEnumerator};
use super::sort::sort;
use super::{
    EmptyEnumerator, Enumerator, ExecContext, ForeignEnumerator, MaterializeEnumerator,
    RowsEnumerator,
};
use crate::config::CompilerOptions;
use crate::dialect::{ArtifactExecutor, EmitterRegistry};
use crate::error::{Error, Result};
use crate::plan::{pulled_up_predicates, Convention, ConventionKind, NodeKind, PlanNode, SetOpKind};
use crate::profile::{profile_timer, record_profile_timer, CompileProfileKind};
use crate::rex::{ExprProgram, Normalized, Simplifier};
use crate::value::Row;

const DEFAULT_MAX_SIMPLIFY_PASSES: usize = 16;

/// Compiles physical plans in the pull-iterator convention. Subtrees behind
/// a converter from a foreign convention are emitted as artifacts and run
/// through the executor registered for that convention.
#[derive(Clone)]
pub struct ExecutionCompiler {
    emitters: EmitterRegistry,
    executors: HashMap<ConventionKind, Arc<dyn ArtifactExecutor>>,
    simplify: bool,
    max_simplify_passes: usize,
}

impl fmt::Debug for ExecutionCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut executors: Vec<_> = self.executors.keys().collect();
        executors.sort();
        f.debug_struct("ExecutionCompiler")
            .field("emitters", &self.emitters)
            .field("executors", &executors)
            .field("simplify", &self.simplify)
            .field("max_simplify_passes", &self.max_simplify_passes)
            .finish()
    }
}

impl Default for ExecutionCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionCompiler {
    /// Compiler with the default emitters and no foreign executors.
    pub fn new() -> Self {
        Self {
            emitters: EmitterRegistry::new(),
            executors: HashMap::new(),
            simplify: true,
            max_simplify_passes: DEFAULT_MAX_SIMPLIFY_PASSES,
        }
    }

    /// Compiler configured from `options`, with every configured dialect
    /// registered on the SQL emitter.
    pub fn from_options(options: &CompilerOptions) -> Self {
        Self {
            emitters: options.emitter_registry(),
            executors: HashMap::new(),
            simplify: options.simplify,
            max_simplify_passes: options.max_simplify_passes,
        }
    }

    /// Registers the executor running artifacts of `kind`.
    pub fn with_executor(mut self, kind: ConventionKind, executor: Arc<dyn ArtifactExecutor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    /// Replaces the emitter registry.
    pub fn with_emitters(mut self, emitters: EmitterRegistry) -> Self {
        self.emitters = emitters;
        self
    }

    /// Turns program simplification on or off.
    pub fn with_simplify(mut self, simplify: bool) -> Self {
        self.simplify = simplify;
        self
    }

    /// Compiles `root` into an enumerator bound to `ctx`.
    pub fn compile(&self, root: &Arc<PlanNode>, ctx: &ExecContext) -> Result<Box<dyn Enumerator>> {
        let timer = profile_timer();
        let compiled = self.compile_node(root, ctx);
        record_profile_timer(CompileProfileKind::Compile, timer);
        if compiled.is_ok() {
            debug!(digest = format_args!("{:016x}", root.digest()), "compiled plan");
        }
        compiled
    }

    fn compile_node(&self, node: &Arc<PlanNode>, ctx: &ExecContext) -> Result<Box<dyn Enumerator>> {
        if node.convention() != &Convention::PullIterator {
            return Err(Error::contract(format!(
                "{} in convention {} reached the execution compiler",
                node.kind().name(),
                node.convention()
            )));
        }
        let compiled: Box<dyn Enumerator> = match node.kind() {
            NodeKind::Scan { table } => {
                let store = table.mem_table()?.clone();
                Box::new(MaterializeEnumerator::new("Scan", Vec::new(), move |_| Ok(store.rows())))
            }
            NodeKind::Values { rows } => Box::new(RowsEnumerator::new(rows.clone())),
            NodeKind::Calc { program } => return self.compile_calc(node, program, ctx),
            NodeKind::Aggregate { group, calls } => Box::new(aggregate(
                self.compile_node(node.input(0)?, ctx)?,
                group.clone(),
                calls.clone(),
            )),
            NodeKind::Join { kind, condition } => {
                let left = node.input(0)?;
                let right = node.input(1)?;
                Box::new(join(
                    self.compile_node(left, ctx)?,
                    self.compile_node(right, ctx)?,
                    *kind,
                    condition.clone(),
                    (left.row_type().len(), right.row_type().len()),
                    ctx.params.clone(),
                ))
            }
            NodeKind::SetOp { kind, all } => {
                let (kind, all) = (*kind, *all);
                return self.compile_chain(node, ctx, move |l, r| combine(kind, all, l, r));
            }
            NodeKind::ModifyCollect { all } => {
                let all = *all;
                return self.compile_chain(node, ctx, move |l, r| {
                    if all {
                        Box::new(ConcatEnumerator::new(l, r))
                    } else {
                        combine(SetOpKind::Union, false, l, r)
                    }
                });
            }
            NodeKind::Sort {
                collation,
                offset,
                fetch,
            } => Box::new(sort(
                self.compile_node(node.input(0)?, ctx)?,
                collation.clone(),
                *offset,
                *fetch,
            )),
            NodeKind::Modify { table, op } => Box::new(modify(
                self.compile_node(node.input(0)?, ctx)?,
                table.clone(),
                op.clone(),
                ctx.params.clone(),
            )),
            NodeKind::Converter { from } => return self.compile_converter(node, from, ctx),
        };
        debug!(operator = node.kind().name(), "compiled operator");
        Ok(compiled)
    }

    fn compile_calc(
        &self,
        node: &Arc<PlanNode>,
        program: &ExprProgram,
        ctx: &ExecContext,
    ) -> Result<Box<dyn Enumerator>> {
        let input = node.input(0)?;
        let program = if self.simplify {
            let simplifier = Simplifier::new(pulled_up_predicates(input))
                .with_max_passes(self.max_simplify_passes);
            match program.normalize(&simplifier) {
                Normalized::Program(program) => program,
                Normalized::Empty => {
                    debug!("calc condition is never true; emitting no rows");
                    return Ok(Box::new(EmptyEnumerator::new()));
                }
            }
        } else {
            program.clone()
        };
        let child = self.compile_node(input, ctx)?;
        if program.is_trivial() {
            return Ok(child);
        }
        if program.unwind_position().is_some() {
            debug!(program = %program, "compiled unwind");
            return Ok(Box::new(UnwindEnumerator::new(child, program, ctx.params.clone())?));
        }
        debug!(program = %program, "compiled calc");
        Ok(Box::new(CalcEnumerator::new(child, program, ctx.params.clone())))
    }

    /// Compiles every input and folds them left to right with `pair`; a
    /// single input is passed through.
    fn compile_chain(
        &self,
        node: &Arc<PlanNode>,
        ctx: &ExecContext,
        pair: impl Fn(Box<dyn Enumerator>, Box<dyn Enumerator>) -> Box<dyn Enumerator>,
    ) -> Result<Box<dyn Enumerator>> {
        let mut inputs = node.inputs().iter();
        let first = inputs
            .next()
            .ok_or_else(|| Error::contract(format!("{} without inputs", node.kind().name())))?;
        let mut chain = self.compile_node(first, ctx)?;
        for input in inputs {
            chain = pair(chain, self.compile_node(input, ctx)?);
        }
        debug!(operator = node.kind().name(), inputs = node.inputs().len(), "compiled chain");
        Ok(chain)
    }

    fn compile_converter(
        &self,
        node: &Arc<PlanNode>,
        from: &Convention,
        ctx: &ExecContext,
    ) -> Result<Box<dyn Enumerator>> {
        let input = node.input(0)?;
        match from {
            Convention::PullIterator => self.compile_node(input, ctx),
            Convention::None => Err(Error::contract(
                "converter from the logical convention reached the execution compiler",
            )),
            foreign => {
                let executor = self.executors.get(&foreign.kind()).ok_or_else(|| {
                    Error::unsupported(
                        foreign.to_string(),
                        "Converter",
                        format!("no executor registered for convention {foreign}"),
                    )
                })?;
                let artifact = self.emitters.emit(input)?;
                debug!(convention = %foreign, artifact = %artifact, "compiled foreign fragment");
                Ok(Box::new(ForeignEnumerator::new(
                    artifact,
                    executor.clone(),
                    ctx.clone(),
                )))
            }
        }
    }
}

/// Compiles and drains `root`, closing the enumerator afterwards.
pub fn execute(
    compiler: &ExecutionCompiler,
    root: &Arc<PlanNode>,
    ctx: &ExecContext,
) -> Result<Vec<Row>> {
    super::collect_rows(compiler.compile(root, ctx)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableDef;
    use crate::plan::ConventionPlanner;
    use crate::rex::{Expr, Op};
    use crate::types::{Field, RowType, SqlType};
    use crate::value::{ParamSet, Value};

    fn physical(node: &Arc<PlanNode>) -> Arc<PlanNode> {
        ConventionPlanner::new()
            .plan(node, &Convention::PullIterator)
            .unwrap()
    }

    fn numbers(values: &[i64]) -> Arc<PlanNode> {
        PlanNode::values(
            RowType::new(vec![Field::not_null("n", SqlType::Integer)]),
            values.iter().map(|v| vec![Value::Int(*v)]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn n_ary_union_all_yields_every_row() {
        let union = PlanNode::union(true, vec![numbers(&[1]), numbers(&[2]), numbers(&[3])]).unwrap();
        let rows = execute(&ExecutionCompiler::new(), &physical(&union), &ExecContext::default()).unwrap();
        assert_eq!(rows, vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]]);
    }

    #[test]
    fn filter_contradicting_its_input_compiles_to_nothing() {
        let n = Expr::field(0, SqlType::Integer, false);
        let below = PlanNode::filter(
            numbers(&[1, 2, 7]),
            Expr::binary(Op::Lt, n.clone(), Expr::lit(3i64)),
        )
        .unwrap();
        let above = PlanNode::filter(below, Expr::binary(Op::Gt, n, Expr::lit(5i64))).unwrap();
        let rows = execute(&ExecutionCompiler::new(), &physical(&above), &ExecContext::default()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn logical_plan_is_a_contract_violation() {
        let err = ExecutionCompiler::new()
            .compile(&numbers(&[1]), &ExecContext::default())
            .err()
            .unwrap();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn foreign_fragment_without_executor_is_unsupported() {
        let table = TableDef::new(
            "emp",
            RowType::new(vec![Field::not_null("id", SqlType::Integer)]),
        )
        .in_convention(Convention::sql("postgresql"));
        let plan = physical(&PlanNode::scan(Arc::new(table)));
        let err = ExecutionCompiler::new()
            .compile(&plan, &ExecContext::new(ParamSet::new()))
            .err()
            .unwrap();
        assert_eq!(err.code(), "Unsupported");
    }
}
