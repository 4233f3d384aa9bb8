#![forbid(unsafe_code)]

//! Immutable relational operator trees.
//!
//! A [`PlanNode`] owns its kind, row type and traits; inputs are shared
//! `Arc`s so rewrites copy only the spine they touch. Constructors validate
//! field references and input compatibility and return a contract violation
//! when an upstream stage hands over an inconsistent tree.

use std::fmt;
use std::sync::Arc;

use crate::catalog::TableDef;
use crate::error::{Error, Result};
use crate::rex::{Expr, ExprProgram};
use crate::types::{uniquify, Field, RowType, SqlType};
use crate::value::Row;

pub mod convert;
pub mod explain;
pub mod predicates;
pub mod traits;

pub use convert::{supports, ConventionPlanner};
pub use explain::{ExplainNode, ExplainProp};
pub use predicates::pulled_up_predicates;
pub use traits::{
    Collation, Convention, ConventionKind, Direction, Distribution, FieldCollation,
    NullDirection, TraitSet,
};

/// Join flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinKind {
    /// Matching pairs only.
    Inner,
    /// Every left row, right side null-padded.
    Left,
    /// Every right row, left side null-padded.
    Right,
    /// Both sides preserved.
    Full,
    /// Left rows with at least one match.
    Semi,
    /// Left rows without a match.
    Anti,
}

impl JoinKind {
    /// Keyword used in explain output and SQL.
    pub fn name(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Full => "FULL",
            JoinKind::Semi => "SEMI",
            JoinKind::Anti => "ANTI",
        }
    }

    /// Whether only the left side's fields are emitted.
    pub fn projects_left_only(self) -> bool {
        matches!(self, JoinKind::Semi | JoinKind::Anti)
    }
}

/// Set operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SetOpKind {
    /// `UNION`
    Union,
    /// `INTERSECT`
    Intersect,
    /// `EXCEPT` / `MINUS`
    Minus,
}

impl SetOpKind {
    /// Operator name.
    pub fn name(self) -> &'static str {
        match self {
            SetOpKind::Union => "Union",
            SetOpKind::Intersect => "Intersect",
            SetOpKind::Minus => "Minus",
        }
    }
}

/// Aggregate function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggFunc {
    /// `COUNT`; no arguments means `COUNT(*)`.
    Count,
    /// `SUM`
    Sum,
    /// `MIN`
    Min,
    /// `MAX`
    Max,
    /// `AVG`
    Avg,
}

impl AggFunc {
    /// SQL name.
    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
            AggFunc::Avg => "AVG",
        }
    }
}

/// One aggregate call over input field positions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AggCall {
    /// Function.
    pub func: AggFunc,
    /// Argument field positions.
    pub args: Vec<usize>,
    /// Whether duplicates are eliminated before aggregation.
    pub distinct: bool,
    /// Output column name.
    pub name: String,
}

impl AggCall {
    /// `COUNT(*)`.
    pub fn count_star(name: impl Into<String>) -> Self {
        Self {
            func: AggFunc::Count,
            args: Vec::new(),
            distinct: false,
            name: name.into(),
        }
    }

    /// Single-argument call.
    pub fn new(func: AggFunc, arg: usize, name: impl Into<String>) -> Self {
        Self {
            func,
            args: vec![arg],
            distinct: false,
            name: name.into(),
        }
    }

    /// Same call with `DISTINCT`.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    fn output_field(&self, input: &RowType, global: bool) -> Result<Field> {
        if self.func != AggFunc::Count && self.args.len() != 1 {
            return Err(Error::contract(format!(
                "{} takes exactly one argument, got {}",
                self.func.name(),
                self.args.len()
            )));
        }
        let mut arg_fields = Vec::with_capacity(self.args.len());
        for &arg in &self.args {
            arg_fields.push(input.field(arg).ok_or_else(|| {
                Error::contract(format!(
                    "aggregate argument ${arg} out of range for input {input}"
                ))
            })?);
        }
        let field = match (self.func, arg_fields.first()) {
            (AggFunc::Count, _) => Field::not_null(self.name.clone(), SqlType::BigInt),
            (AggFunc::Avg, Some(arg)) => Field {
                name: self.name.clone(),
                ty: SqlType::Double,
                nullable: arg.nullable || global,
            },
            (AggFunc::Sum, Some(arg)) => Field {
                name: self.name.clone(),
                ty: if arg.ty.is_integral() {
                    SqlType::BigInt
                } else {
                    arg.ty.clone()
                },
                nullable: arg.nullable || global,
            },
            (_, Some(arg)) => Field {
                name: self.name.clone(),
                ty: arg.ty.clone(),
                nullable: arg.nullable || global,
            },
            (_, None) => return Err(Error::contract("aggregate without argument")),
        };
        Ok(field)
    }
}

impl fmt::Display for AggCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.func.name())?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "${arg}")?;
        }
        f.write_str(")")
    }
}

/// Data-modification operation.
#[derive(Clone, Debug, PartialEq)]
pub enum ModifyOp {
    /// Inserts the input rows.
    Insert,
    /// Rewrites `columns` of each input row with `sources`, evaluated over
    /// the input row.
    Update {
        /// Table field positions to assign.
        columns: Vec<usize>,
        /// New values, one per column.
        sources: Vec<Expr>,
    },
    /// Deletes the input rows.
    Delete,
}

impl ModifyOp {
    /// Operation name.
    pub fn name(&self) -> &'static str {
        match self {
            ModifyOp::Insert => "INSERT",
            ModifyOp::Update { .. } => "UPDATE",
            ModifyOp::Delete => "DELETE",
        }
    }
}

/// Closed set of operators.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Full scan of a table.
    Scan {
        /// Scanned table.
        table: Arc<TableDef>,
    },
    /// Literal rows.
    Values {
        /// Rows, each matching the node's row type.
        rows: Vec<Row>,
    },
    /// Filter and projection.
    Calc {
        /// Program over the input row.
        program: ExprProgram,
    },
    /// Grouping with aggregate calls; output is group keys then calls.
    Aggregate {
        /// Group key field positions.
        group: Vec<usize>,
        /// Aggregate calls.
        calls: Vec<AggCall>,
    },
    /// Binary join; the condition references the concatenated row.
    Join {
        /// Join flavor.
        kind: JoinKind,
        /// Join condition.
        condition: Expr,
    },
    /// N-ary set operation.
    SetOp {
        /// Operator.
        kind: SetOpKind,
        /// Whether duplicates are kept.
        all: bool,
    },
    /// Ordering with optional offset and fetch.
    Sort {
        /// Sort keys.
        collation: Collation,
        /// Rows to skip.
        offset: Option<u64>,
        /// Maximum rows to return.
        fetch: Option<u64>,
    },
    /// Insert, update or delete against a table; emits the affected count.
    Modify {
        /// Target table.
        table: Arc<TableDef>,
        /// Operation.
        op: ModifyOp,
    },
    /// Merge of several modify results.
    ModifyCollect {
        /// Whether counts are concatenated rather than merged distinctly.
        all: bool,
    },
    /// Convention boundary; the input lives in `from`, the node in its own
    /// trait convention.
    Converter {
        /// Input convention.
        from: Convention,
    },
}

impl NodeKind {
    /// Operator name used in explain output.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Scan { .. } => "Scan",
            NodeKind::Values { .. } => "Values",
            NodeKind::Calc { .. } => "Calc",
            NodeKind::Aggregate { .. } => "Aggregate",
            NodeKind::Join { .. } => "Join",
            NodeKind::SetOp { kind, .. } => kind.name(),
            NodeKind::Sort { .. } => "Sort",
            NodeKind::Modify { .. } => "Modify",
            NodeKind::ModifyCollect { .. } => "ModifyCollect",
            NodeKind::Converter { .. } => "Converter",
        }
    }
}

/// Operator node.
#[derive(Clone, Debug)]
pub struct PlanNode {
    kind: NodeKind,
    inputs: Vec<Arc<PlanNode>>,
    row_type: RowType,
    traits: TraitSet,
}

impl PlanNode {
    fn build(kind: NodeKind, inputs: Vec<Arc<PlanNode>>, row_type: RowType) -> Arc<PlanNode> {
        Arc::new(PlanNode {
            kind,
            inputs,
            row_type,
            traits: TraitSet::logical(),
        })
    }

    /// Scan of `table`.
    pub fn scan(table: Arc<TableDef>) -> Arc<PlanNode> {
        let row_type = table.row_type.clone();
        PlanNode::build(NodeKind::Scan { table }, Vec::new(), row_type)
    }

    /// Literal rows of `row_type`.
    pub fn values(row_type: RowType, rows: Vec<Row>) -> Result<Arc<PlanNode>> {
        if let Some(bad) = rows.iter().find(|row| row.len() != row_type.len()) {
            return Err(Error::contract(format!(
                "values row of arity {} does not match row type {row_type}",
                bad.len()
            )));
        }
        Ok(PlanNode::build(NodeKind::Values { rows }, Vec::new(), row_type))
    }

    /// Filter and projection over `input`.
    pub fn calc(input: Arc<PlanNode>, program: ExprProgram) -> Result<Arc<PlanNode>> {
        if !program.input().is_compatible(&input.row_type) {
            return Err(Error::contract(format!(
                "program input {} does not match {}",
                program.input(),
                input.row_type
            )));
        }
        let row_type = program.output().clone();
        Ok(PlanNode::build(NodeKind::Calc { program }, vec![input], row_type))
    }

    /// Filter over `input`.
    pub fn filter(input: Arc<PlanNode>, condition: Expr) -> Result<Arc<PlanNode>> {
        let program = ExprProgram::filter(&input.row_type, condition)?;
        PlanNode::calc(input, program)
    }

    /// Projection over `input`.
    pub fn project(input: Arc<PlanNode>, projects: Vec<(Expr, String)>) -> Result<Arc<PlanNode>> {
        let program = ExprProgram::project(&input.row_type, projects)?;
        PlanNode::calc(input, program)
    }

    /// Aggregation of `input` grouped by `group`.
    pub fn aggregate(
        input: Arc<PlanNode>,
        group: Vec<usize>,
        calls: Vec<AggCall>,
    ) -> Result<Arc<PlanNode>> {
        let mut fields = Vec::with_capacity(group.len() + calls.len());
        let mut names: Vec<String> = Vec::with_capacity(fields.capacity());
        for &key in &group {
            let field = input.row_type.field(key).ok_or_else(|| {
                Error::contract(format!(
                    "group key ${key} out of range for input {}",
                    input.row_type
                ))
            })?;
            let mut field = field.clone();
            field.name = uniquify(&field.name, &names);
            names.push(field.name.clone());
            fields.push(field);
        }
        for call in &calls {
            let mut field = call.output_field(&input.row_type, group.is_empty())?;
            field.name = uniquify(&field.name, &names);
            names.push(field.name.clone());
            fields.push(field);
        }
        Ok(PlanNode::build(
            NodeKind::Aggregate { group, calls },
            vec![input],
            RowType::new(fields),
        ))
    }

    /// Join of `left` and `right`.
    pub fn join(
        left: Arc<PlanNode>,
        right: Arc<PlanNode>,
        kind: JoinKind,
        condition: Expr,
    ) -> Result<Arc<PlanNode>> {
        let joined = left.row_type.join(
            &right.row_type,
            matches!(kind, JoinKind::Right | JoinKind::Full),
            matches!(kind, JoinKind::Left | JoinKind::Full),
        );
        condition.validate(joined.len())?;
        let row_type = if kind.projects_left_only() {
            left.row_type.clone()
        } else {
            joined
        };
        Ok(PlanNode::build(
            NodeKind::Join { kind, condition },
            vec![left, right],
            row_type,
        ))
    }

    /// Set operation over one or more compatible inputs.
    pub fn set_op(kind: SetOpKind, all: bool, inputs: Vec<Arc<PlanNode>>) -> Result<Arc<PlanNode>> {
        let first = inputs
            .first()
            .ok_or_else(|| Error::contract(format!("{} without inputs", kind.name())))?;
        let mut fields = first.row_type.fields().to_vec();
        for input in &inputs[1..] {
            if !input.row_type.is_compatible(&first.row_type) {
                return Err(Error::contract(format!(
                    "{} input {} is not compatible with {}",
                    kind.name(),
                    input.row_type,
                    first.row_type
                )));
            }
            for (field, other) in fields.iter_mut().zip(input.row_type.fields()) {
                field.nullable |= other.nullable;
            }
        }
        Ok(PlanNode::build(
            NodeKind::SetOp { kind, all },
            inputs,
            RowType::new(fields),
        ))
    }

    /// `UNION [ALL]` shorthand.
    pub fn union(all: bool, inputs: Vec<Arc<PlanNode>>) -> Result<Arc<PlanNode>> {
        PlanNode::set_op(SetOpKind::Union, all, inputs)
    }

    /// Ordering of `input`, optionally skipping `offset` rows and returning
    /// at most `fetch`.
    pub fn sort(
        input: Arc<PlanNode>,
        collation: Collation,
        offset: Option<u64>,
        fetch: Option<u64>,
    ) -> Result<Arc<PlanNode>> {
        if let Some(key) = collation
            .keys()
            .iter()
            .find(|key| key.field >= input.row_type.len())
        {
            return Err(Error::contract(format!(
                "sort key ${} out of range for input {}",
                key.field, input.row_type
            )));
        }
        let row_type = input.row_type.clone();
        let mut node = PlanNode {
            kind: NodeKind::Sort {
                collation: collation.clone(),
                offset,
                fetch,
            },
            inputs: vec![input],
            row_type,
            traits: TraitSet::logical(),
        };
        node.traits.collation = collation;
        Ok(Arc::new(node))
    }

    /// Data modification of `table` fed by `input`.
    pub fn modify(table: Arc<TableDef>, op: ModifyOp, input: Arc<PlanNode>) -> Result<Arc<PlanNode>> {
        if !input.row_type.is_compatible(&table.row_type) {
            return Err(Error::contract(format!(
                "{} input {} does not match table {} {}",
                op.name(),
                input.row_type,
                table.name,
                table.row_type
            )));
        }
        if let ModifyOp::Update { columns, sources } = &op {
            if columns.len() != sources.len() {
                return Err(Error::contract(format!(
                    "UPDATE assigns {} columns from {} sources",
                    columns.len(),
                    sources.len()
                )));
            }
            if let Some(column) = columns.iter().find(|c| **c >= table.row_type.len()) {
                return Err(Error::contract(format!(
                    "UPDATE column ${column} out of range for table {}",
                    table.name
                )));
            }
            for source in sources {
                source.validate(input.row_type.len())?;
            }
        }
        Ok(PlanNode::build(
            NodeKind::Modify { table, op },
            vec![input],
            RowType::row_count(),
        ))
    }

    /// Merge of modify results.
    pub fn modify_collect(all: bool, inputs: Vec<Arc<PlanNode>>) -> Result<Arc<PlanNode>> {
        if inputs.is_empty() {
            return Err(Error::contract("ModifyCollect without inputs"));
        }
        if let Some(bad) = inputs
            .iter()
            .find(|input| !input.row_type.is_compatible(&RowType::row_count()))
        {
            return Err(Error::contract(format!(
                "ModifyCollect input {} is not a row count",
                bad.row_type
            )));
        }
        Ok(PlanNode::build(
            NodeKind::ModifyCollect { all },
            inputs,
            RowType::row_count(),
        ))
    }

    /// Convention boundary turning `input` into `to`.
    pub fn converter(input: Arc<PlanNode>, to: Convention) -> Arc<PlanNode> {
        let from = input.convention().clone();
        let row_type = input.row_type.clone();
        let traits = input.traits.with_convention(to);
        Arc::new(PlanNode {
            kind: NodeKind::Converter { from },
            inputs: vec![input],
            row_type,
            traits,
        })
    }

    /// Copy of this node with other traits and inputs. Inputs must keep
    /// compatible row types.
    pub fn copy(&self, traits: TraitSet, inputs: Vec<Arc<PlanNode>>) -> Result<Arc<PlanNode>> {
        if inputs.len() != self.inputs.len() {
            return Err(Error::contract(format!(
                "{} copied with {} inputs, expected {}",
                self.kind.name(),
                inputs.len(),
                self.inputs.len()
            )));
        }
        for (old, new) in self.inputs.iter().zip(&inputs) {
            if !old.row_type.is_compatible(&new.row_type) {
                return Err(Error::contract(format!(
                    "{} input changed row type from {} to {}",
                    self.kind.name(),
                    old.row_type,
                    new.row_type
                )));
            }
        }
        let kind = match &self.kind {
            NodeKind::Converter { .. } => NodeKind::Converter {
                from: inputs[0].convention().clone(),
            },
            other => other.clone(),
        };
        Ok(Arc::new(PlanNode {
            kind,
            inputs,
            row_type: self.row_type.clone(),
            traits,
        }))
    }

    /// Operator kind.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Inputs in order.
    pub fn inputs(&self) -> &[Arc<PlanNode>] {
        &self.inputs
    }

    /// Input `index`.
    pub fn input(&self, index: usize) -> Result<&Arc<PlanNode>> {
        self.inputs.get(index).ok_or_else(|| {
            Error::contract(format!("{} has no input {index}", self.kind.name()))
        })
    }

    /// Output row type.
    pub fn row_type(&self) -> &RowType {
        &self.row_type
    }

    /// Trait set.
    pub fn traits(&self) -> &TraitSet {
        &self.traits
    }

    /// Calling convention.
    pub fn convention(&self) -> &Convention {
        &self.traits.convention
    }

    /// Whether every node in the tree lives in `convention`, stopping at
    /// converter boundaries (whose inputs are separate fragments).
    pub fn is_homogeneous(&self, convention: &Convention) -> bool {
        if self.convention() != convention {
            return false;
        }
        match self.kind {
            NodeKind::Converter { .. } => true,
            _ => self
                .inputs
                .iter()
                .all(|input| input.is_homogeneous(convention)),
        }
    }
}
