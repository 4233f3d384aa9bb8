//! Convention placement: rewrites a logical plan so every node lives in a
//! convention able to implement it, with explicit converters at the
//! boundaries.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::{NodeKind, PlanNode};
use crate::error::{Error, Result};
use crate::plan::traits::{Convention, ConventionKind};
use crate::profile::{profile_timer, record_profile_timer, CompileProfileKind};

/// Whether `convention` can implement `node` natively.
pub fn supports(convention: &Convention, node: &PlanNode) -> bool {
    let unwinds = matches!(node.kind(), NodeKind::Calc { program } if program.unwind_position().is_some());
    match convention {
        Convention::None => false,
        Convention::PullIterator => true,
        Convention::Sql(_) => {
            !unwinds
                && !matches!(
                    node.kind(),
                    NodeKind::Converter { .. } | NodeKind::ModifyCollect { .. }
                )
        }
        Convention::DocumentPipeline => match node.kind() {
            NodeKind::Calc { .. } => !unwinds,
            NodeKind::Scan { .. }
            | NodeKind::Aggregate { .. }
            | NodeKind::Sort { .. }
            | NodeKind::Values { .. }
            | NodeKind::Modify { .. } => true,
            NodeKind::Join { .. }
            | NodeKind::SetOp { .. }
            | NodeKind::ModifyCollect { .. }
            | NodeKind::Converter { .. } => false,
        },
    }
}

/// Places plans into conventions using a registry of available converters.
#[derive(Clone, Debug)]
pub struct ConventionPlanner {
    converters: HashSet<(ConventionKind, Convention)>,
}

impl Default for ConventionPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ConventionPlanner {
    /// Planner with the default converters: any SQL dialect and the document
    /// pipeline into pull iterators.
    pub fn new() -> Self {
        Self::empty()
            .with_converter(ConventionKind::Sql, Convention::PullIterator)
            .with_converter(ConventionKind::DocumentPipeline, Convention::PullIterator)
    }

    /// Planner without converters; only single-convention plans succeed.
    pub fn empty() -> Self {
        Self {
            converters: HashSet::new(),
        }
    }

    /// Registers a converter from every convention of kind `from` into `to`.
    pub fn with_converter(mut self, from: ConventionKind, to: Convention) -> Self {
        self.converters.insert((from, to));
        self
    }

    /// Whether a subtree in `from` can feed a parent in `to`.
    pub fn can_convert(&self, from: &Convention, to: &Convention) -> bool {
        from == to || self.converters.contains(&(from.kind(), to.clone()))
    }

    /// Rewrites `root` so that it is executable in `target`.
    pub fn plan(&self, root: &Arc<PlanNode>, target: &Convention) -> Result<Arc<PlanNode>> {
        if target.is_none() {
            return Err(Error::contract("cannot plan into the logical convention"));
        }
        let timer = profile_timer();
        let result = self
            .place(root, target)
            .and_then(|placed| self.ensure(placed, target));
        record_profile_timer(CompileProfileKind::Convert, timer);
        let planned = result?;
        debug!(
            target = %target,
            digest = planned.digest(),
            "placed plan conventions"
        );
        Ok(planned)
    }

    fn place(&self, node: &Arc<PlanNode>, target: &Convention) -> Result<Arc<PlanNode>> {
        match node.kind() {
            NodeKind::Scan { table } => {
                node.copy(node.traits().with_convention(table.convention.clone()), Vec::new())
            }
            NodeKind::Values { .. } => Ok(node.clone()),
            NodeKind::Modify { table, .. } => {
                let convention = table.convention.clone();
                if !supports(&convention, node) {
                    return Err(unsupported_here(&convention, node));
                }
                let input = self.place(node.input(0)?, target)?;
                let input = self.ensure(input, &convention)?;
                node.copy(node.traits().with_convention(convention), vec![input])
            }
            NodeKind::Converter { .. } => {
                let input = self.place(node.input(0)?, target)?;
                let to = if node.convention().is_none() {
                    target.clone()
                } else {
                    node.convention().clone()
                };
                self.ensure(input, &to)
            }
            _ => {
                let inputs = node
                    .inputs()
                    .iter()
                    .map(|input| self.place(input, target))
                    .collect::<Result<Vec<_>>>()?;
                let convention = self.choose(node, &inputs, target)?;
                let inputs = inputs
                    .into_iter()
                    .map(|input| self.ensure(input, &convention))
                    .collect::<Result<Vec<_>>>()?;
                node.copy(node.traits().with_convention(convention), inputs)
            }
        }
    }

    /// Keeps a node next to its data when every anchored input agrees on a
    /// capable convention; otherwise falls back to `target`.
    fn choose(
        &self,
        node: &PlanNode,
        inputs: &[Arc<PlanNode>],
        target: &Convention,
    ) -> Result<Convention> {
        let mut anchored = inputs
            .iter()
            .map(|input| input.convention())
            .filter(|convention| !convention.is_none());
        if let Some(first) = anchored.next() {
            if anchored.all(|other| other == first) && supports(first, node) {
                return Ok(first.clone());
            }
        }
        if supports(target, node) {
            Ok(target.clone())
        } else {
            Err(unsupported_here(target, node))
        }
    }

    fn ensure(&self, node: Arc<PlanNode>, to: &Convention) -> Result<Arc<PlanNode>> {
        let from = node.convention();
        if from == to {
            return Ok(node);
        }
        if from.is_none() {
            if !supports(to, &node) {
                return Err(unsupported_here(to, &node));
            }
            let inputs = node.inputs().to_vec();
            return node.copy(node.traits().with_convention(to.clone()), inputs);
        }
        if !self.can_convert(from, to) {
            return Err(Error::UnsupportedConversion {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        debug!(from = %from, to = %to, input = node.kind().name(), "inserting converter");
        let converter = PlanNode::converter(node, to.clone());
        let input = converter.input(0)?;
        if !converter.row_type().is_compatible(input.row_type()) {
            return Err(Error::contract(format!(
                "converter changed row type from {} to {}",
                input.row_type(),
                converter.row_type()
            )));
        }
        Ok(converter)
    }
}

fn unsupported_here(convention: &Convention, node: &PlanNode) -> Error {
    Error::unsupported(
        convention.to_string(),
        node.kind().name(),
        format!(
            "convention {convention} cannot implement {}",
            node.kind().name()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableDef;
    use crate::plan::JoinKind;
    use crate::rex::{Expr, Op};
    use crate::types::{Field, RowType, SqlType};
    use crate::value::Value;

    fn table(name: &str, convention: Convention) -> Arc<TableDef> {
        Arc::new(
            TableDef::new(
                name,
                RowType::new(vec![
                    Field::not_null("id", SqlType::Integer),
                    Field::new("tags", SqlType::Array(Box::new(SqlType::Varchar(None)))),
                ]),
            )
            .in_convention(convention),
        )
    }

    fn id_gt(n: i64) -> Expr {
        Expr::binary(Op::Gt, Expr::field(0, SqlType::Integer, false), Expr::lit(n))
    }

    #[test]
    fn filter_is_pushed_into_the_source() {
        let scan = PlanNode::scan(table("emp", Convention::sql("postgresql")));
        let filtered = PlanNode::filter(scan, id_gt(1)).unwrap();
        let planned = ConventionPlanner::new()
            .plan(&filtered, &Convention::PullIterator)
            .unwrap();
        assert!(matches!(planned.kind(), NodeKind::Converter { .. }));
        assert_eq!(planned.convention(), &Convention::PullIterator);
        let inner = planned.input(0).unwrap();
        assert_eq!(inner.convention(), &Convention::sql("postgresql"));
        assert!(inner.is_homogeneous(&Convention::sql("postgresql")));
    }

    #[test]
    fn cross_store_join_runs_in_target() {
        let left = PlanNode::scan(table("emp", Convention::sql("mysql")));
        let right = PlanNode::scan(table("docs", Convention::DocumentPipeline));
        let joined = PlanNode::join(
            left,
            right,
            JoinKind::Inner,
            Expr::binary(
                Op::Eq,
                Expr::field(0, SqlType::Integer, false),
                Expr::field(2, SqlType::Integer, false),
            ),
        )
        .unwrap();
        let planned = ConventionPlanner::new()
            .plan(&joined, &Convention::PullIterator)
            .unwrap();
        assert!(matches!(planned.kind(), NodeKind::Join { .. }));
        for input in planned.inputs() {
            assert!(matches!(input.kind(), NodeKind::Converter { .. }));
        }
    }

    #[test]
    fn unwind_leaves_the_document_store() {
        let scan = PlanNode::scan(table("docs", Convention::DocumentPipeline));
        let unwound = PlanNode::project(
            scan,
            vec![(
                Expr::unwind(Expr::field(1, SqlType::Array(Box::new(SqlType::Varchar(None))), true)),
                "tag".into(),
            )],
        )
        .unwrap();
        let planned = ConventionPlanner::new()
            .plan(&unwound, &Convention::PullIterator)
            .unwrap();
        assert_eq!(planned.convention(), &Convention::PullIterator);
        assert!(matches!(planned.input(0).unwrap().kind(), NodeKind::Converter { .. }));
    }

    #[test]
    fn missing_converter_is_reported() {
        let scan = PlanNode::scan(table("emp", Convention::sql("hive")));
        let err = ConventionPlanner::empty()
            .plan(&scan, &Convention::PullIterator)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported conversion from sql:hive to pull-iterator"
        );
    }

    #[test]
    fn values_float_into_parent_convention() {
        let values = PlanNode::values(
            RowType::new(vec![
                Field::not_null("id", SqlType::Integer),
                Field::new("tags", SqlType::Array(Box::new(SqlType::Varchar(None)))),
            ]),
            vec![vec![Value::Int(1), Value::Null]],
        )
        .unwrap();
        let scan = PlanNode::scan(table("emp", Convention::sql("postgresql")));
        let union = PlanNode::union(true, vec![scan, values]).unwrap();
        let planned = ConventionPlanner::new()
            .plan(&union, &Convention::PullIterator)
            .unwrap();
        let sql_union = planned.input(0).unwrap();
        assert!(matches!(sql_union.kind(), NodeKind::SetOp { .. }));
        assert!(sql_union.is_homogeneous(&Convention::sql("postgresql")));
    }
}
