//! Text rendering of the SQL syntax tree.
//!
//! Clauses go on separate lines; parentheses are inserted by operator
//! precedence only. Parameter ordinals are recorded in the order their
//! markers appear in the text.

use super::ast::{FromItem, InsertSource, OrderItem, Query, Select, SelectItem, SqlExpr, Statement};
use crate::dialect::descriptor::{OffsetFetchStyle, SqlDialect, SubstringStyle};
use crate::plan::{JoinKind, SetOpKind};
use crate::types::SqlType;
use crate::value::Value;

/// Largest row count accepted by every `LIMIT` dialect; stands in for "all
/// rows" when only an offset is requested.
const LIMIT_ALL: u64 = i64::MAX as u64;

/// Renders `statement` for `dialect`, returning the text and the parameter
/// ordinals in marker order.
pub fn render(statement: &Statement, dialect: &SqlDialect) -> (String, Vec<usize>) {
    let mut writer = SqlWriter::new(dialect);
    writer.statement(statement);
    (writer.out, writer.params)
}

struct SqlWriter<'d> {
    dialect: &'d SqlDialect,
    out: String,
    params: Vec<usize>,
}

impl<'d> SqlWriter<'d> {
    fn new(dialect: &'d SqlDialect) -> Self {
        Self {
            dialect,
            out: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn ident(&mut self, name: &str) {
        let quoted = self.dialect.quote_identifier(name);
        self.out.push_str(&quoted);
    }

    fn path(&mut self, path: &[String]) {
        for (i, part) in path.iter().enumerate() {
            if i > 0 {
                self.push(".");
            }
            self.ident(part);
        }
    }

    fn alias(&mut self, alias: &str) {
        self.push(if self.dialect.alias_with_as { " AS " } else { " " });
        self.ident(alias);
    }

    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Query(query) => self.query(query),
            Statement::Insert {
                table,
                columns,
                source,
            } => {
                self.push("INSERT INTO ");
                self.path(table);
                self.push(" (");
                self.ident_list(columns);
                self.push(")\n");
                match source {
                    InsertSource::Values(rows) => {
                        self.push("VALUES ");
                        self.tuples(rows);
                    }
                    InsertSource::Query(query) => self.query(query),
                }
            }
            Statement::Update {
                table,
                assignments,
                selection,
            } => {
                self.push("UPDATE ");
                self.path(table);
                self.push(" SET ");
                for (i, (column, value)) in assignments.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.ident(column);
                    self.push(" = ");
                    self.expr(value);
                }
                self.where_clause(selection.as_ref());
            }
            Statement::Delete { table, selection } => {
                self.push("DELETE FROM ");
                self.path(table);
                self.where_clause(selection.as_ref());
            }
        }
    }

    fn where_clause(&mut self, selection: Option<&SqlExpr>) {
        if let Some(selection) = selection {
            self.push("\nWHERE ");
            self.expr(selection);
        }
    }

    fn ident_list(&mut self, names: &[String]) {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(name);
        }
    }

    fn tuples(&mut self, rows: &[Vec<SqlExpr>]) {
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                self.push(",\n");
            }
            self.push("(");
            self.expr_list(row);
            self.push(")");
        }
    }

    fn expr_list(&mut self, exprs: &[SqlExpr]) {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(expr);
        }
    }

    fn query(&mut self, query: &Query) {
        match query {
            Query::Select(select) => self.select(select),
            Query::SetOp { op, all, inputs } => {
                let keyword = self.set_op_keyword(*op, *all);
                for (i, input) in inputs.iter().enumerate() {
                    if i > 0 {
                        self.push("\n");
                        self.push(&keyword);
                        self.push("\n");
                    }
                    let nested = match input {
                        Query::SetOp { .. } => true,
                        Query::Select(select) => {
                            !select.order_by.is_empty()
                                || select.offset.is_some()
                                || select.fetch.is_some()
                        }
                    };
                    if nested && !self.dialect.parenthesized_set_operands {
                        self.push("SELECT *\nFROM (");
                        self.query(input);
                        self.push(")");
                    } else if nested {
                        self.push("(");
                        self.query(input);
                        self.push(")");
                    } else {
                        self.query(input);
                    }
                }
            }
        }
    }

    fn set_op_keyword(&self, op: SetOpKind, all: bool) -> String {
        let base = match op {
            SetOpKind::Union => "UNION",
            SetOpKind::Intersect => "INTERSECT",
            SetOpKind::Minus => self.dialect.minus_keyword.as_str(),
        };
        if all {
            format!("{base} ALL")
        } else if self.dialect.set_op_distinct_keyword {
            format!("{base} DISTINCT")
        } else {
            base.to_owned()
        }
    }

    fn select(&mut self, select: &Select) {
        self.push("SELECT ");
        if select.projection.is_empty() {
            self.push("*");
        } else {
            for (i, SelectItem { expr, alias }) in select.projection.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(expr);
                if let Some(alias) = alias {
                    self.alias(alias);
                }
            }
        }
        if let Some(from) = &select.from {
            self.push("\nFROM ");
            self.from_item(from);
        }
        self.where_clause(select.selection.as_ref());
        if !select.group_by.is_empty() {
            self.push("\nGROUP BY ");
            self.expr_list(&select.group_by);
        }
        if let Some(having) = &select.having {
            self.push("\nHAVING ");
            self.expr(having);
        }
        if !select.order_by.is_empty() {
            self.push("\nORDER BY ");
            for (i, item) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.order_item(item);
            }
        }
        self.offset_fetch(select.offset, select.fetch);
    }

    fn order_item(&mut self, item: &OrderItem) {
        self.expr(&item.expr);
        if item.descending {
            self.push(" DESC");
        }
        match item.nulls_first {
            Some(true) => self.push(" NULLS FIRST"),
            Some(false) => self.push(" NULLS LAST"),
            None => {}
        }
    }

    fn offset_fetch(&mut self, offset: Option<u64>, fetch: Option<u64>) {
        match self.dialect.offset_fetch {
            OffsetFetchStyle::LimitOffset => {
                match (offset, fetch) {
                    (_, Some(fetch)) => self.push(&format!("\nLIMIT {fetch}")),
                    (Some(_), None) => self.push(&format!("\nLIMIT {LIMIT_ALL}")),
                    (None, None) => {}
                }
                if let Some(offset) = offset {
                    self.push(&format!("\nOFFSET {offset}"));
                }
            }
            OffsetFetchStyle::OffsetFetch => {
                let offset = match (offset, fetch) {
                    (None, Some(_)) if self.dialect.offset_fetch_needs_order_by => Some(0),
                    _ => offset,
                };
                if let Some(offset) = offset {
                    self.push(&format!("\nOFFSET {offset} ROWS"));
                }
                if let Some(fetch) = fetch {
                    self.push(&format!("\nFETCH NEXT {fetch} ROWS ONLY"));
                }
            }
        }
    }

    fn from_item(&mut self, item: &FromItem) {
        match item {
            FromItem::Table { path, alias } => {
                self.path(path);
                if let Some(alias) = alias {
                    self.alias(alias);
                }
            }
            FromItem::Subquery { query, alias } => {
                self.push("(");
                self.query(query);
                self.push(")");
                self.alias(alias);
            }
            FromItem::Values {
                rows,
                alias,
                columns,
            } => {
                self.push("(VALUES ");
                self.tuples(rows);
                self.push(")");
                self.alias(alias);
                self.push(" (");
                self.ident_list(columns);
                self.push(")");
            }
            FromItem::Join {
                left,
                right,
                kind,
                on,
            } => {
                self.from_item(left);
                self.push("\n");
                self.push(match kind {
                    JoinKind::Left => "LEFT JOIN ",
                    JoinKind::Right => "RIGHT JOIN ",
                    JoinKind::Full => "FULL JOIN ",
                    JoinKind::Inner | JoinKind::Semi | JoinKind::Anti => "INNER JOIN ",
                });
                if matches!(**right, FromItem::Join { .. }) {
                    self.push("(");
                    self.from_item(right);
                    self.push(")");
                } else {
                    self.from_item(right);
                }
                self.push(" ON ");
                self.expr(on);
            }
        }
    }

    fn operand(&mut self, expr: &SqlExpr, min_precedence: u8) {
        if precedence(expr) < min_precedence {
            self.push("(");
            self.expr(expr);
            self.push(")");
        } else {
            self.expr(expr);
        }
    }

    fn expr(&mut self, expr: &SqlExpr) {
        match expr {
            SqlExpr::Column { qualifier, name } => {
                if let Some(qualifier) = qualifier {
                    self.ident(qualifier);
                    self.push(".");
                }
                self.ident(name);
            }
            SqlExpr::Literal(value) => self.literal(value),
            SqlExpr::Param { index, ty } => {
                self.params.push(*index);
                if self.dialect.cast_params && !matches!(ty, SqlType::Any | SqlType::Null) {
                    let type_name = self.dialect.cast_type_name(ty);
                    self.push(&format!("CAST(? AS {type_name})"));
                } else {
                    self.push("?");
                }
            }
            SqlExpr::Binary { op, left, right } => {
                let own = binary_precedence(op);
                let associative = matches!(*op, "AND" | "OR" | "+" | "*" | "||");
                self.operand(left, if is_comparison(op) { own + 1 } else { own });
                self.push(" ");
                self.push(op);
                self.push(" ");
                self.operand(right, if associative { own } else { own + 1 });
            }
            SqlExpr::Unary { op, expr } => {
                if *op == "NOT" {
                    self.push("NOT ");
                    self.operand(expr, 3);
                } else {
                    self.push(op);
                    self.operand(expr, 8);
                }
            }
            SqlExpr::Postfix { expr, op } => {
                self.operand(expr, 6);
                self.push(" ");
                self.push(op);
            }
            SqlExpr::Function {
                name,
                args,
                distinct,
            } => {
                self.push(name);
                self.push("(");
                if *distinct {
                    self.push("DISTINCT ");
                }
                self.expr_list(args);
                self.push(")");
            }
            SqlExpr::Star => self.push("*"),
            SqlExpr::Case { whens, otherwise } => {
                self.push("CASE");
                for (condition, value) in whens {
                    self.push(" WHEN ");
                    self.expr(condition);
                    self.push(" THEN ");
                    self.expr(value);
                }
                if let Some(otherwise) = otherwise {
                    self.push(" ELSE ");
                    self.expr(otherwise);
                }
                self.push(" END");
            }
            SqlExpr::Cast { expr, type_name } => {
                self.push("CAST(");
                self.expr(expr);
                self.push(" AS ");
                self.push(type_name);
                self.push(")");
            }
            SqlExpr::Substring { expr, from, len } => match self.dialect.substring {
                SubstringStyle::FromFor => {
                    self.push("SUBSTRING(");
                    self.expr(expr);
                    self.push(" FROM ");
                    self.expr(from);
                    if let Some(len) = len {
                        self.push(" FOR ");
                        self.expr(len);
                    }
                    self.push(")");
                }
                SubstringStyle::Substr | SubstringStyle::Mssql => {
                    self.push(if self.dialect.substring == SubstringStyle::Substr {
                        "SUBSTR("
                    } else {
                        "SUBSTRING("
                    });
                    self.expr(expr);
                    self.push(", ");
                    self.expr(from);
                    if let Some(len) = len {
                        self.push(", ");
                        self.expr(len);
                    }
                    self.push(")");
                }
            },
            SqlExpr::Array(items) => {
                let prefix = self.dialect.function_name("ARRAY").to_owned();
                self.push(&prefix);
                self.push("[");
                self.expr_list(items);
                self.push("]");
            }
            SqlExpr::Item { array, index } => {
                self.operand(array, 9);
                self.push("[");
                match self.dialect.functions.get("ITEM").cloned() {
                    Some(wrapper) => {
                        self.push(&wrapper);
                        self.push("(");
                        self.expr(index);
                        self.push(")");
                    }
                    None => self.expr(index),
                }
                self.push("]");
            }
            SqlExpr::Exists { negated, query } => {
                self.push(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
                self.query(query);
                self.push(")");
            }
            SqlExpr::Subquery(query) => {
                self.push("(");
                self.query(query);
                self.push(")");
            }
        }
    }

    fn literal(&mut self, value: &Value) {
        match value {
            Value::Array(items) => {
                let items = items.iter().cloned().map(SqlExpr::Literal).collect::<Vec<_>>();
                self.expr(&SqlExpr::Array(items));
            }
            other => self.push(&other.to_string()),
        }
    }
}

fn is_comparison(op: &str) -> bool {
    matches!(op, "=" | "<>" | "<" | "<=" | ">" | ">=")
}

fn binary_precedence(op: &str) -> u8 {
    match op {
        "OR" => 1,
        "AND" => 2,
        "+" | "-" | "||" => 6,
        "*" | "/" | "%" => 7,
        _ => 4,
    }
}

fn precedence(expr: &SqlExpr) -> u8 {
    match expr {
        SqlExpr::Binary { op, .. } => binary_precedence(op),
        SqlExpr::Unary { op, .. } if *op == "NOT" => 3,
        SqlExpr::Unary { .. } => 8,
        SqlExpr::Postfix { .. } => 5,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a() -> SqlExpr {
        SqlExpr::column("a")
    }

    fn lit(i: i64) -> SqlExpr {
        SqlExpr::Literal(Value::Int(i))
    }

    fn text(expr: SqlExpr, dialect: &SqlDialect) -> String {
        let select = Select {
            projection: vec![SelectItem { expr, alias: None }],
            ..Select::default()
        };
        render(&Statement::Query(Query::Select(Box::new(select))), dialect).0
    }

    #[test]
    fn precedence_adds_only_needed_parentheses() {
        let ansi = SqlDialect::ansi();
        let sum = SqlExpr::binary("+", a(), lit(1));
        assert_eq!(
            text(SqlExpr::binary("*", sum.clone(), lit(2)), &ansi),
            "SELECT (\"a\" + 1) * 2"
        );
        assert_eq!(
            text(SqlExpr::binary("-", lit(5), sum), &ansi),
            "SELECT 5 - (\"a\" + 1)"
        );
        let or = SqlExpr::binary("OR", a(), SqlExpr::column("b"));
        assert_eq!(
            text(SqlExpr::binary("AND", or, SqlExpr::column("c")), &ansi),
            "SELECT (\"a\" OR \"b\") AND \"c\""
        );
    }

    #[test]
    fn params_are_cast_when_the_dialect_asks() {
        let param = SqlExpr::Param {
            index: 0,
            ty: SqlType::Integer,
        };
        let (text, params) = render(
            &Statement::Delete {
                table: vec!["t".into()],
                selection: Some(SqlExpr::binary("=", a(), param)),
            },
            &SqlDialect::ansi(),
        );
        assert_eq!(text, "DELETE FROM \"t\"\nWHERE \"a\" = CAST(? AS INTEGER)");
        assert_eq!(params, vec![0]);
    }

    #[test]
    fn limit_style_renders_offset_only() {
        let select = Select {
            from: Some(FromItem::Table {
                path: vec!["t".into()],
                alias: None,
            }),
            offset: Some(5),
            ..Select::default()
        };
        let (text, _) = render(
            &Statement::Query(Query::Select(Box::new(select))),
            &SqlDialect::sqlite(),
        );
        assert_eq!(text, "SELECT *\nFROM \"t\"\nLIMIT 9223372036854775807\nOFFSET 5");
    }
}
