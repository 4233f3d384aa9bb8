//! SQL emission: plan fragment to syntax tree to dialect text.

pub mod ast;
pub mod render;
pub mod unparse;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use self::ast::Statement;
use self::unparse::SqlUnparser;
use super::descriptor::{SqlDialect, PRESET_NAMES};
use super::{Artifact, FragmentEmitter};
use crate::error::{Error, Result};
use crate::plan::{Convention, ConventionKind, PlanNode};
use crate::profile::{profile_timer, record_profile_timer, CompileProfileKind};
use crate::types::RowType;
use crate::value::{ParamSet, Value};

/// Statement family of an emitted query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatementKind {
    /// Row-returning query.
    Query,
    /// `INSERT`
    Insert,
    /// `UPDATE`
    Update,
    /// `DELETE`
    Delete,
}

impl StatementKind {
    /// Whether the statement returns an affected-row count rather than rows.
    pub fn is_dml(self) -> bool {
        !matches!(self, StatementKind::Query)
    }
}

/// Rendered SQL text ready for a driver.
#[derive(Clone, Debug, PartialEq)]
pub struct SqlQuery {
    /// Statement text; dynamic parameters appear as `?`.
    pub text: String,
    /// Dialect the text was rendered for.
    pub dialect: String,
    /// Parameter ordinal of each `?` marker, in text order.
    pub params: Vec<usize>,
    /// Row type of the fragment the text computes.
    pub row_type: RowType,
    /// Statement family.
    pub kind: StatementKind,
}

impl SqlQuery {
    /// Driver arguments for one parameter set, one per marker.
    pub fn bind(&self, params: &ParamSet) -> Result<Vec<Value>> {
        self.params
            .iter()
            .map(|index| {
                params
                    .get(index)
                    .cloned()
                    .ok_or(Error::UnboundParameter(*index))
            })
            .collect()
    }
}

/// Emits SQL text for `sql:<dialect>` fragments.
#[derive(Clone, Debug)]
pub struct SqlEmitter {
    dialects: BTreeMap<String, Arc<SqlDialect>>,
}

impl Default for SqlEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlEmitter {
    /// Emitter knowing every preset dialect.
    pub fn new() -> Self {
        let dialects = PRESET_NAMES
            .iter()
            .filter_map(|name| SqlDialect::preset(name, None))
            .map(|dialect| (dialect.name.clone(), Arc::new(dialect)))
            .collect();
        Self { dialects }
    }

    /// Registers (or replaces) a dialect under its name.
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialects
            .insert(dialect.name.clone(), Arc::new(dialect));
        self
    }

    /// Looks up a registered dialect.
    pub fn dialect(&self, name: &str) -> Option<&Arc<SqlDialect>> {
        self.dialects.get(name)
    }

    /// Emits `fragment` as a query for the dialect its convention names.
    pub fn emit_sql(&self, fragment: &PlanNode) -> Result<SqlQuery> {
        let Convention::Sql(name) = fragment.convention() else {
            return Err(Error::contract(format!(
                "SQL emitter handed a {} fragment",
                fragment.convention()
            )));
        };
        let dialect = self.dialects.get(name).ok_or_else(|| {
            Error::unsupported(
                name.as_str(),
                "dialect",
                format!("no SQL dialect registered under '{name}'"),
            )
        })?;
        to_sql(fragment, dialect)
    }
}

impl FragmentEmitter for SqlEmitter {
    fn convention_kind(&self) -> ConventionKind {
        ConventionKind::Sql
    }

    fn emit(&self, fragment: &PlanNode) -> Result<Artifact> {
        self.emit_sql(fragment).map(Artifact::Sql)
    }
}

/// Unparses and renders `node` for `dialect`, regardless of the node's
/// convention.
pub fn to_sql(node: &PlanNode, dialect: &SqlDialect) -> Result<SqlQuery> {
    let timer = profile_timer();
    let result = SqlUnparser::new(dialect).statement(node);
    let query = result.map(|statement| {
        let kind = match &statement {
            Statement::Query(_) => StatementKind::Query,
            Statement::Insert { .. } => StatementKind::Insert,
            Statement::Update { .. } => StatementKind::Update,
            Statement::Delete { .. } => StatementKind::Delete,
        };
        let (text, params) = render::render(&statement, dialect);
        SqlQuery {
            text,
            dialect: dialect.name.clone(),
            params,
            row_type: node.row_type().clone(),
            kind,
        }
    });
    record_profile_timer(CompileProfileKind::SqlEmit, timer);
    let query = query?;
    debug!(dialect = %query.dialect, params = ?query.params, sql = %query.text, "emitted SQL");
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableDef;
    use crate::plan::ConventionPlanner;
    use crate::rex::{Expr, Op};
    use crate::types::{Field, SqlType};

    fn scan(convention: Convention) -> Arc<PlanNode> {
        let table = TableDef::new(
            "emp",
            RowType::new(vec![Field::not_null("id", SqlType::Integer)]),
        )
        .in_convention(convention);
        PlanNode::scan(Arc::new(table))
    }

    fn fragment(node: &Arc<PlanNode>) -> Arc<PlanNode> {
        let planned = ConventionPlanner::new()
            .plan(node, &Convention::PullIterator)
            .unwrap();
        planned.input(0).unwrap().clone()
    }

    #[test]
    fn parameters_bind_in_marker_order() {
        let filtered = PlanNode::filter(
            scan(Convention::sql("postgresql")),
            Expr::and([
                Expr::binary(
                    Op::Gt,
                    Expr::field(0, SqlType::Integer, false),
                    Expr::param(2, SqlType::Integer),
                ),
                Expr::binary(
                    Op::Lt,
                    Expr::field(0, SqlType::Integer, false),
                    Expr::param(0, SqlType::Integer),
                ),
            ]),
        )
        .unwrap();
        let query = SqlEmitter::new().emit_sql(&fragment(&filtered)).unwrap();
        assert_eq!(query.params, vec![2, 0]);
        let params = ParamSet::from([(0, Value::Int(9)), (2, Value::Int(1))]);
        assert_eq!(
            query.bind(&params).unwrap(),
            vec![Value::Int(1), Value::Int(9)]
        );
        let missing = query.bind(&ParamSet::from([(0, Value::Int(9))])).unwrap_err();
        assert!(matches!(missing, Error::UnboundParameter(2)));
    }

    #[test]
    fn unknown_dialect_is_rejected() {
        let err = SqlEmitter::new()
            .emit_sql(&fragment(&scan(Convention::sql("teradata"))))
            .unwrap_err();
        assert_eq!(err.code(), "Unsupported");
    }

    #[test]
    fn custom_dialect_is_used() {
        let emitter = SqlEmitter::new().with_dialect(SqlDialect::mysql().renamed("warehouse"));
        let query = emitter.emit_sql(&fragment(&scan(Convention::sql("warehouse")))).unwrap();
        assert_eq!(query.text, "SELECT *\nFROM `emp`");
        assert_eq!(query.dialect, "warehouse");
        assert_eq!(query.kind, StatementKind::Query);
    }
}
