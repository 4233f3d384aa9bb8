//! SQL syntax tree produced by the unparser and consumed by the renderer.
//!
//! The tree is dialect-neutral except for names the unparser already looked
//! up in the descriptor (function renames, cast type names).

use crate::plan::{JoinKind, SetOpKind};
use crate::types::SqlType;
use crate::value::Value;

/// Scalar expression.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlExpr {
    /// Column, optionally qualified by a table name or alias.
    Column {
        /// Table name or alias.
        qualifier: Option<String>,
        /// Column name.
        name: String,
    },
    /// Literal value.
    Literal(Value),
    /// Dynamic parameter `?`.
    Param {
        /// Parameter ordinal.
        index: usize,
        /// Declared type, used when the dialect casts parameters.
        ty: SqlType,
    },
    /// Infix operator.
    Binary {
        /// Operator text.
        op: &'static str,
        /// Left operand.
        left: Box<SqlExpr>,
        /// Right operand.
        right: Box<SqlExpr>,
    },
    /// Prefix operator (`NOT`, `-`).
    Unary {
        /// Operator text.
        op: &'static str,
        /// Operand.
        expr: Box<SqlExpr>,
    },
    /// Postfix operator (`IS NULL`, ...).
    Postfix {
        /// Operand.
        expr: Box<SqlExpr>,
        /// Operator text.
        op: &'static str,
    },
    /// Function call.
    Function {
        /// Function name, already mapped for the dialect.
        name: String,
        /// Arguments.
        args: Vec<SqlExpr>,
        /// Whether `DISTINCT` precedes the arguments.
        distinct: bool,
    },
    /// `*`, as in `COUNT(*)`.
    Star,
    /// `CASE WHEN ... THEN ... [ELSE ...] END`
    Case {
        /// Condition and result pairs.
        whens: Vec<(SqlExpr, SqlExpr)>,
        /// Fallback.
        otherwise: Option<Box<SqlExpr>>,
    },
    /// `CAST(x AS type)`
    Cast {
        /// Operand.
        expr: Box<SqlExpr>,
        /// Target type spelling.
        type_name: String,
    },
    /// Substring in the dialect's spelling.
    Substring {
        /// String operand.
        expr: Box<SqlExpr>,
        /// 1-based start.
        from: Box<SqlExpr>,
        /// Length.
        len: Option<Box<SqlExpr>>,
    },
    /// `ARRAY[...]`
    Array(Vec<SqlExpr>),
    /// `x[i]`
    Item {
        /// Array operand.
        array: Box<SqlExpr>,
        /// 1-based index.
        index: Box<SqlExpr>,
    },
    /// `[NOT] EXISTS (subquery)`
    Exists {
        /// Whether the test is negated.
        negated: bool,
        /// Subquery.
        query: Box<Query>,
    },
    /// Parenthesized scalar subquery.
    Subquery(Box<Query>),
}

impl SqlExpr {
    /// Unqualified column.
    pub fn column(name: impl Into<String>) -> Self {
        SqlExpr::Column {
            qualifier: None,
            name: name.into(),
        }
    }

    /// Qualified column.
    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        SqlExpr::Column {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }

    /// Infix operation.
    pub fn binary(op: &'static str, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Postfix operation.
    pub fn postfix(expr: SqlExpr, op: &'static str) -> Self {
        SqlExpr::Postfix {
            expr: Box::new(expr),
            op,
        }
    }

    /// Function call without `DISTINCT`.
    pub fn function(name: impl Into<String>, args: Vec<SqlExpr>) -> Self {
        SqlExpr::Function {
            name: name.into(),
            args,
            distinct: false,
        }
    }

    /// Column name when the expression is a bare column.
    pub fn column_name(&self) -> Option<&str> {
        match self {
            SqlExpr::Column { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Whether the expression contains an aggregate function call.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            SqlExpr::Function { name, args, .. } => {
                is_aggregate_name(name) || args.iter().any(SqlExpr::contains_aggregate)
            }
            SqlExpr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            SqlExpr::Unary { expr, .. }
            | SqlExpr::Postfix { expr, .. }
            | SqlExpr::Cast { expr, .. } => expr.contains_aggregate(),
            SqlExpr::Case { whens, otherwise } => {
                whens
                    .iter()
                    .any(|(c, v)| c.contains_aggregate() || v.contains_aggregate())
                    || otherwise.as_ref().is_some_and(|e| e.contains_aggregate())
            }
            SqlExpr::Substring { expr, from, len } => {
                expr.contains_aggregate()
                    || from.contains_aggregate()
                    || len.as_ref().is_some_and(|e| e.contains_aggregate())
            }
            SqlExpr::Array(items) => items.iter().any(SqlExpr::contains_aggregate),
            SqlExpr::Item { array, index } => {
                array.contains_aggregate() || index.contains_aggregate()
            }
            SqlExpr::Column { .. }
            | SqlExpr::Literal(_)
            | SqlExpr::Param { .. }
            | SqlExpr::Star
            | SqlExpr::Exists { .. }
            | SqlExpr::Subquery(_) => false,
        }
    }
}

fn is_aggregate_name(name: &str) -> bool {
    matches!(name, "COUNT" | "SUM" | "MIN" | "MAX" | "AVG")
}

/// Entry of a select list.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectItem {
    /// Expression.
    pub expr: SqlExpr,
    /// Output alias.
    pub alias: Option<String>,
}

/// Entry of an `ORDER BY` list.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderItem {
    /// Sort expression.
    pub expr: SqlExpr,
    /// Whether the key is descending.
    pub descending: bool,
    /// Explicit `NULLS FIRST` (`true`) or `NULLS LAST` (`false`).
    pub nulls_first: Option<bool>,
}

/// `FROM` clause item.
#[derive(Clone, Debug, PartialEq)]
pub enum FromItem {
    /// Named table.
    Table {
        /// Qualified path.
        path: Vec<String>,
        /// Alias.
        alias: Option<String>,
    },
    /// Derived table.
    Subquery {
        /// Inner query.
        query: Box<Query>,
        /// Alias.
        alias: String,
    },
    /// `(VALUES ...) AS alias (columns)`
    Values {
        /// Literal rows.
        rows: Vec<Vec<SqlExpr>>,
        /// Alias.
        alias: String,
        /// Column names.
        columns: Vec<String>,
    },
    /// Binary join.
    Join {
        /// Left side.
        left: Box<FromItem>,
        /// Right side.
        right: Box<FromItem>,
        /// Join flavor; never semi or anti.
        kind: JoinKind,
        /// Join condition.
        on: SqlExpr,
    },
}

/// `SELECT` block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Select {
    /// Select list; empty means `*`.
    pub projection: Vec<SelectItem>,
    /// `FROM` clause.
    pub from: Option<FromItem>,
    /// `WHERE` clause.
    pub selection: Option<SqlExpr>,
    /// `GROUP BY` keys.
    pub group_by: Vec<SqlExpr>,
    /// `HAVING` clause.
    pub having: Option<SqlExpr>,
    /// `ORDER BY` keys.
    pub order_by: Vec<OrderItem>,
    /// Rows to skip.
    pub offset: Option<u64>,
    /// Rows to return.
    pub fetch: Option<u64>,
}

/// Query expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    /// Single select block.
    Select(Box<Select>),
    /// N-ary set operation.
    SetOp {
        /// Operator.
        op: SetOpKind,
        /// Whether duplicates are kept.
        all: bool,
        /// Operands, at least two.
        inputs: Vec<Query>,
    },
}

/// Top-level statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// Query.
    Query(Query),
    /// `INSERT INTO t (columns) source`
    Insert {
        /// Target path.
        table: Vec<String>,
        /// Target columns.
        columns: Vec<String>,
        /// Rows to insert.
        source: InsertSource,
    },
    /// `UPDATE t SET ... [WHERE ...]`
    Update {
        /// Target path.
        table: Vec<String>,
        /// Column assignments.
        assignments: Vec<(String, SqlExpr)>,
        /// Row filter.
        selection: Option<SqlExpr>,
    },
    /// `DELETE FROM t [WHERE ...]`
    Delete {
        /// Target path.
        table: Vec<String>,
        /// Row filter.
        selection: Option<SqlExpr>,
    },
}

/// Source rows of an `INSERT`.
#[derive(Clone, Debug, PartialEq)]
pub enum InsertSource {
    /// Literal tuples.
    Values(Vec<Vec<SqlExpr>>),
    /// Query result.
    Query(Query),
}
