//! Relational tree to SQL syntax tree.
//!
//! Each operator extends the fragment produced by its input. A fragment
//! records which clauses its select block already uses; an operator whose
//! clause would land before (or on) an occupied clause wraps the fragment in
//! a derived table first. Derived-table aliases `tN` come from a counter
//! threaded through the traversal by value.

use std::collections::BTreeSet;

use super::ast::{
    FromItem, InsertSource, OrderItem, Query, Select, SelectItem, SqlExpr, Statement,
};
use crate::catalog::TableDef;
use crate::dialect::descriptor::{NullsRendering, SqlDialect, SubstringStyle};
use crate::error::{Error, Result};
use crate::plan::{AggCall, AggFunc, Collation, JoinKind, ModifyOp, NodeKind, PlanNode, SetOpKind};
use crate::rex::{Expr, ExprProgram, Op};
use crate::types::SqlType;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Clause {
    From,
    Where,
    GroupBy,
    Having,
    Select,
    SetOp,
    OrderBy,
    Fetch,
}

enum Body {
    Select(Select),
    /// Finished query; anything added on top wraps it.
    Query(Query),
}

struct Fragment {
    body: Body,
    clauses: BTreeSet<Clause>,
    /// Expression computing each output field inside the select block.
    fields: Vec<SqlExpr>,
    /// Output field names.
    names: Vec<String>,
    /// Qualifiers of the sources in the `FROM` clause.
    sources: Vec<String>,
}

impl Fragment {
    fn single(from: FromItem, qualifier: String, fields: Vec<SqlExpr>, names: Vec<String>) -> Self {
        Fragment {
            body: Body::Select(Select {
                from: Some(from),
                ..Select::default()
            }),
            clauses: BTreeSet::from([Clause::From]),
            fields,
            names,
            sources: vec![qualifier],
        }
    }

    fn finished(query: Query, names: Vec<String>) -> Self {
        Fragment {
            body: Body::Query(query),
            clauses: BTreeSet::from([Clause::SetOp]),
            fields: names.iter().map(|name| SqlExpr::column(name.as_str())).collect(),
            names,
            sources: Vec::new(),
        }
    }

    fn needs_wrap(&self, clause: Clause) -> bool {
        matches!(self.body, Body::Query(_)) || self.clauses.iter().any(|c| *c >= clause)
    }

    fn is_bare(&self) -> bool {
        matches!(self.body, Body::Select(_)) && self.clauses.len() == 1
    }

    fn select_mut(&mut self) -> Result<&mut Select> {
        match &mut self.body {
            Body::Select(select) => Ok(select),
            Body::Query(_) => Err(Error::contract("finished SQL query extended in place")),
        }
    }

    fn into_query(self) -> Query {
        match self.body {
            Body::Query(query) => query,
            Body::Select(mut select) => {
                let star = !self.clauses.contains(&Clause::Select)
                    && !self.clauses.contains(&Clause::GroupBy)
                    && self
                        .fields
                        .iter()
                        .zip(&self.names)
                        .all(|(field, name)| field.column_name() == Some(name.as_str()));
                if !star {
                    select.projection = self
                        .fields
                        .into_iter()
                        .zip(self.names)
                        .map(|(expr, name)| {
                            let alias = if expr.column_name() == Some(name.as_str()) {
                                None
                            } else {
                                Some(name)
                            };
                            SelectItem { expr, alias }
                        })
                        .collect();
                }
                Query::Select(Box::new(select))
            }
        }
    }

    /// Turns the fragment into a derived table `tN`.
    fn wrap(self, next_alias: usize) -> (Fragment, usize) {
        let alias = format!("t{next_alias}");
        let names = self.names.clone();
        let fields = names.iter().map(|name| SqlExpr::column(name.as_str())).collect();
        let from = FromItem::Subquery {
            query: Box::new(self.into_query()),
            alias: alias.clone(),
        };
        (Fragment::single(from, alias, fields, names), next_alias + 1)
    }

    fn wrap_if(self, clause: Clause, next_alias: usize) -> (Fragment, usize) {
        if self.needs_wrap(clause) {
            self.wrap(next_alias)
        } else {
            (self, next_alias)
        }
    }

    /// `FROM` item for one side of a join plus qualified field expressions.
    fn into_join_side(self, taken: &[String], next_alias: usize) -> JoinSide {
        let (fragment, next_alias) = if self.is_bare() {
            (self, next_alias)
        } else {
            self.wrap(next_alias)
        };
        let Fragment {
            body,
            fields,
            sources,
            ..
        } = fragment;
        let Body::Select(Select {
            from: Some(from), ..
        }) = body
        else {
            return JoinSide::empty(next_alias);
        };
        if matches!(from, FromItem::Join { .. }) {
            return JoinSide {
                item: from,
                fields,
                sources,
                next_alias,
            };
        }
        let mut qualifier = sources.into_iter().next().unwrap_or_default();
        let mut next_alias = next_alias;
        let item = match from {
            FromItem::Table { path, .. } if taken.contains(&qualifier) => {
                qualifier = format!("t{next_alias}");
                next_alias += 1;
                FromItem::Table {
                    path,
                    alias: Some(qualifier.clone()),
                }
            }
            other => other,
        };
        let fields = fields
            .into_iter()
            .map(|field| match field {
                SqlExpr::Column {
                    qualifier: None,
                    name,
                } => SqlExpr::qualified(qualifier.as_str(), name),
                other => other,
            })
            .collect();
        JoinSide {
            item,
            fields,
            sources: vec![qualifier],
            next_alias,
        }
    }
}

struct JoinSide {
    item: FromItem,
    fields: Vec<SqlExpr>,
    sources: Vec<String>,
    next_alias: usize,
}

impl JoinSide {
    fn empty(next_alias: usize) -> Self {
        JoinSide {
            item: FromItem::Table {
                path: Vec::new(),
                alias: None,
            },
            fields: Vec::new(),
            sources: Vec::new(),
            next_alias,
        }
    }
}

/// Translates convention-homogeneous SQL fragments into statements for one
/// dialect.
pub struct SqlUnparser<'d> {
    dialect: &'d SqlDialect,
}

impl<'d> SqlUnparser<'d> {
    /// Unparser for `dialect`.
    pub fn new(dialect: &'d SqlDialect) -> Self {
        Self { dialect }
    }

    /// Statement for the tree rooted at `root`.
    pub fn statement(&self, root: &PlanNode) -> Result<Statement> {
        match root.kind() {
            NodeKind::Modify { table, op } => self.modify(table, op, root.input(0)?),
            _ => {
                let (fragment, _) = self.visit(root, 0)?;
                Ok(Statement::Query(fragment.into_query()))
            }
        }
    }

    fn unsupported(&self, construct: impl Into<String>, reason: impl Into<String>) -> Error {
        Error::unsupported(self.dialect.name.clone(), construct, reason)
    }

    fn visit(&self, node: &PlanNode, next_alias: usize) -> Result<(Fragment, usize)> {
        let names: Vec<String> = node.row_type().names().map(str::to_owned).collect();
        match node.kind() {
            NodeKind::Scan { table } => Ok((self.scan(table), next_alias)),
            NodeKind::Values { rows } => self.values(node, rows, names, next_alias),
            NodeKind::Calc { program } => {
                let (input, next_alias) = self.visit(node.input(0)?, next_alias)?;
                let is_aggregate = matches!(node.input(0)?.kind(), NodeKind::Aggregate { .. });
                self.calc(input, program, is_aggregate, names, next_alias)
            }
            NodeKind::Aggregate { group, calls } => {
                let inner = node.input(0)?;
                let (input, next_alias) = self.visit(inner, next_alias)?;
                self.aggregate(input, inner, group, calls, names, next_alias)
            }
            NodeKind::Join { kind, condition } => {
                let (left, next_alias) = self.visit(node.input(0)?, next_alias)?;
                let (right, next_alias) = self.visit(node.input(1)?, next_alias)?;
                self.join(left, right, *kind, condition, names, next_alias)
            }
            NodeKind::SetOp { kind, all } => self.set_op(node, *kind, *all, names, next_alias),
            NodeKind::Sort {
                collation,
                offset,
                fetch,
            } => {
                let (input, next_alias) = self.visit(node.input(0)?, next_alias)?;
                self.sort(input, collation, *offset, *fetch, next_alias)
            }
            NodeKind::Modify { .. } => Err(self.unsupported(
                "Modify",
                "data modification can only be the root of a SQL statement",
            )),
            NodeKind::ModifyCollect { .. } => Err(self.unsupported(
                "ModifyCollect",
                format!(
                    "dialect {} cannot merge several modifications into one statement",
                    self.dialect.name
                ),
            )),
            NodeKind::Converter { from } => Err(self.unsupported(
                "Converter",
                format!(
                    "dialect {} cannot embed a fragment in convention {from}",
                    self.dialect.name
                ),
            )),
        }
    }

    fn scan(&self, table: &TableDef) -> Fragment {
        let fields = (0..table.row_type.len())
            .map(|i| SqlExpr::column(table.physical_name(i).unwrap_or_default()))
            .collect();
        let names = table.row_type.names().map(str::to_owned).collect();
        let from = FromItem::Table {
            path: table.path.clone(),
            alias: None,
        };
        Fragment::single(from, table.physical_table().to_owned(), fields, names)
    }

    fn values(
        &self,
        node: &PlanNode,
        rows: &[Vec<Value>],
        names: Vec<String>,
        next_alias: usize,
    ) -> Result<(Fragment, usize)> {
        let literals = rows
            .iter()
            .map(|row| row.iter().map(|value| self.literal(value)).collect())
            .collect::<Result<Vec<Vec<SqlExpr>>>>()?;
        if self.dialect.values_in_from && !literals.is_empty() {
            let alias = format!("t{next_alias}");
            let from = FromItem::Values {
                rows: literals,
                alias: alias.clone(),
                columns: names.clone(),
            };
            let fields = names.iter().map(|name| SqlExpr::column(name.as_str())).collect();
            return Ok((Fragment::single(from, alias, fields, names), next_alias + 1));
        }
        let dual = self.dialect.dual_table.as_ref().map(|dual| FromItem::Table {
            path: vec![dual.clone()],
            alias: None,
        });
        let literal_select = |row: Vec<SqlExpr>| {
            Query::Select(Box::new(Select {
                projection: row
                    .into_iter()
                    .zip(&names)
                    .map(|(expr, name)| SelectItem {
                        expr,
                        alias: Some(name.clone()),
                    })
                    .collect(),
                from: dual.clone(),
                ..Select::default()
            }))
        };
        let query = if literals.is_empty() {
            let nulls = node
                .row_type()
                .fields()
                .iter()
                .map(|field| SqlExpr::Cast {
                    expr: Box::new(SqlExpr::Literal(Value::Null)),
                    type_name: self.dialect.cast_type_name(&field.ty),
                })
                .collect();
            let mut query = literal_select(nulls);
            if let Query::Select(select) = &mut query {
                select.selection = Some(SqlExpr::binary(
                    "=",
                    SqlExpr::Literal(Value::Int(1)),
                    SqlExpr::Literal(Value::Int(0)),
                ));
            }
            query
        } else if literals.len() == 1 {
            literals
                .into_iter()
                .map(literal_select)
                .next()
                .ok_or_else(|| Error::contract("values row vanished"))?
        } else {
            Query::SetOp {
                op: SetOpKind::Union,
                all: true,
                inputs: literals.into_iter().map(literal_select).collect(),
            }
        };
        Ok((Fragment::finished(query, names), next_alias))
    }

    fn calc(
        &self,
        input: Fragment,
        program: &ExprProgram,
        over_aggregate: bool,
        names: Vec<String>,
        next_alias: usize,
    ) -> Result<(Fragment, usize)> {
        if program.unwind_position().is_some() {
            return Err(self.unsupported(
                "UNWIND",
                format!(
                    "dialect {} cannot expand a multi-valued projection",
                    self.dialect.name
                ),
            ));
        }
        let (mut fragment, next_alias) = match program.condition() {
            None => (input, next_alias),
            Some(condition) => {
                let having = over_aggregate
                    && matches!(input.body, Body::Select(_))
                    && input.clauses.iter().all(|c| *c <= Clause::GroupBy);
                if having {
                    let mut input = input;
                    let condition = self.translate(condition, &input.fields)?;
                    input.select_mut()?.having = Some(condition);
                    input.clauses.insert(Clause::Having);
                    (input, next_alias)
                } else {
                    let (mut input, next_alias) = input.wrap_if(Clause::Where, next_alias);
                    let condition = self.translate(condition, &input.fields)?;
                    input.select_mut()?.selection = Some(condition);
                    input.clauses.insert(Clause::Where);
                    (input, next_alias)
                }
            }
        };
        if program.is_identity_projection() {
            fragment.names = names;
            return Ok((fragment, next_alias));
        }
        let (mut fragment, next_alias) = fragment.wrap_if(Clause::Select, next_alias);
        fragment.fields = program
            .projects()
            .iter()
            .map(|project| self.translate(project, &fragment.fields))
            .collect::<Result<Vec<_>>>()?;
        fragment.names = names;
        fragment.clauses.insert(Clause::Select);
        Ok((fragment, next_alias))
    }

    fn aggregate(
        &self,
        input: Fragment,
        inner: &PlanNode,
        group: &[usize],
        calls: &[AggCall],
        names: Vec<String>,
        next_alias: usize,
    ) -> Result<(Fragment, usize)> {
        if let NodeKind::Aggregate {
            group: inner_group, ..
        } = inner.kind()
        {
            let mergeable = self.dialect.supports_nested_aggregations
                && group.is_empty()
                && matches!(input.body, Body::Select(_))
                && input.clauses.iter().all(|c| *c <= Clause::GroupBy)
                && calls.iter().all(|call| {
                    // COUNT(*) over groups counts groups, not rows.
                    !call.args.is_empty() && call.args.iter().all(|arg| *arg >= inner_group.len())
                });
            if mergeable {
                let mut fragment = input;
                fragment.fields = calls
                    .iter()
                    .map(|call| self.agg_call(call, &fragment.fields))
                    .collect::<Result<Vec<_>>>()?;
                fragment.names = names;
                fragment.clauses.insert(Clause::Select);
                return Ok((fragment, next_alias));
            }
        }
        let (mut fragment, next_alias) = input.wrap_if(Clause::GroupBy, next_alias);
        let keys = group
            .iter()
            .map(|key| self.field(&fragment.fields, *key))
            .collect::<Result<Vec<_>>>()?;
        let mut fields = keys.clone();
        for call in calls {
            fields.push(self.agg_call(call, &fragment.fields)?);
        }
        fragment.select_mut()?.group_by = keys;
        fragment.fields = fields;
        fragment.names = names;
        fragment.clauses.insert(Clause::GroupBy);
        Ok((fragment, next_alias))
    }

    fn agg_call(&self, call: &AggCall, fields: &[SqlExpr]) -> Result<SqlExpr> {
        let args = if call.func == AggFunc::Count && call.args.is_empty() {
            vec![SqlExpr::Star]
        } else {
            call.args
                .iter()
                .map(|arg| self.field(fields, *arg))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(SqlExpr::Function {
            name: call.func.name().to_owned(),
            args,
            distinct: call.distinct,
        })
    }

    fn join(
        &self,
        left: Fragment,
        right: Fragment,
        kind: JoinKind,
        condition: &Expr,
        names: Vec<String>,
        next_alias: usize,
    ) -> Result<(Fragment, usize)> {
        let left = left.into_join_side(&[], next_alias);
        let right = right.into_join_side(&left.sources, left.next_alias);
        let next_alias = right.next_alias;
        let mut joined_fields = left.fields.clone();
        joined_fields.extend(right.fields.iter().cloned());
        let on = self.translate(condition, &joined_fields)?;
        let mut sources = left.sources;
        if kind.projects_left_only() {
            let exists = Query::Select(Box::new(Select {
                from: Some(right.item),
                selection: Some(on),
                ..Select::default()
            }));
            let select = Select {
                from: Some(left.item),
                selection: Some(SqlExpr::Exists {
                    negated: kind == JoinKind::Anti,
                    query: Box::new(exists),
                }),
                ..Select::default()
            };
            let fragment = Fragment {
                body: Body::Select(select),
                clauses: BTreeSet::from([Clause::From, Clause::Where]),
                fields: left.fields,
                names,
                sources,
            };
            return Ok((fragment, next_alias));
        }
        sources.extend(right.sources);
        let from = FromItem::Join {
            left: Box::new(left.item),
            right: Box::new(right.item),
            kind,
            on,
        };
        let fragment = Fragment {
            body: Body::Select(Select {
                from: Some(from),
                ..Select::default()
            }),
            clauses: BTreeSet::from([Clause::From]),
            fields: joined_fields,
            names,
            sources,
        };
        Ok((fragment, next_alias))
    }

    fn set_op(
        &self,
        node: &PlanNode,
        kind: SetOpKind,
        all: bool,
        names: Vec<String>,
        mut next_alias: usize,
    ) -> Result<(Fragment, usize)> {
        let mut inputs = Vec::with_capacity(node.inputs().len());
        for input in node.inputs() {
            let (fragment, next) = self.visit(input, next_alias)?;
            next_alias = next;
            inputs.push(fragment);
        }
        if inputs.len() == 1 {
            if let Some(only) = inputs.pop() {
                return Ok((only, next_alias));
            }
        }
        let mut queries = Vec::with_capacity(inputs.len());
        for (position, fragment) in inputs.into_iter().enumerate() {
            match fragment.into_query() {
                Query::SetOp {
                    op,
                    all: nested_all,
                    inputs: nested,
                } if op == kind
                    && nested_all == all
                    && (kind != SetOpKind::Minus || position == 0) =>
                {
                    queries.extend(nested)
                }
                query => queries.push(query),
            }
        }
        let query = Query::SetOp {
            op: kind,
            all,
            inputs: queries,
        };
        Ok((Fragment::finished(query, names), next_alias))
    }

    fn sort(
        &self,
        input: Fragment,
        collation: &Collation,
        offset: Option<u64>,
        fetch: Option<u64>,
        next_alias: usize,
    ) -> Result<(Fragment, usize)> {
        let limits = offset.is_some() || fetch.is_some();
        let first = if collation.is_empty() {
            Clause::Fetch
        } else {
            Clause::OrderBy
        };
        let (mut fragment, next_alias) = input.wrap_if(first, next_alias);
        let mut order_by = Vec::with_capacity(collation.keys().len());
        for key in collation.keys() {
            let expr = self.field(&fragment.fields, key.field)?;
            let descending = key.is_descending();
            let nulls_first = match self.dialect.nulls_rendering(key.nulls, descending) {
                NullsRendering::Native => None,
                NullsRendering::Syntax(first) => Some(first),
                NullsRendering::Emulate(first) => {
                    let is_null = SqlExpr::postfix(expr.clone(), "IS NULL");
                    // Without a boolean type a predicate is not a sort key.
                    let key = if self.dialect.boolean_literals {
                        is_null
                    } else {
                        SqlExpr::Case {
                            whens: vec![(is_null, SqlExpr::Literal(Value::Int(1)))],
                            otherwise: Some(Box::new(SqlExpr::Literal(Value::Int(0)))),
                        }
                    };
                    order_by.push(OrderItem {
                        expr: key,
                        descending: first,
                        nulls_first: None,
                    });
                    None
                }
            };
            order_by.push(OrderItem {
                expr,
                descending,
                nulls_first,
            });
        }
        if order_by.is_empty() && limits && self.dialect.offset_fetch_needs_order_by {
            let null_select = Select {
                projection: vec![SelectItem {
                    expr: SqlExpr::Literal(Value::Null),
                    alias: None,
                }],
                ..Select::default()
            };
            order_by.push(OrderItem {
                expr: SqlExpr::Subquery(Box::new(Query::Select(Box::new(null_select)))),
                descending: false,
                nulls_first: None,
            });
        }
        let has_order = !order_by.is_empty();
        let select = fragment.select_mut()?;
        select.order_by = order_by;
        select.offset = offset;
        select.fetch = fetch;
        if has_order {
            fragment.clauses.insert(Clause::OrderBy);
        }
        if limits {
            fragment.clauses.insert(Clause::Fetch);
        }
        Ok((fragment, next_alias))
    }

    fn modify(&self, table: &TableDef, op: &ModifyOp, input: &PlanNode) -> Result<Statement> {
        let columns = (0..table.row_type.len())
            .map(|i| table.physical_name(i).unwrap_or_default().to_owned())
            .collect::<Vec<_>>();
        match op {
            ModifyOp::Insert => {
                let source = match input.kind() {
                    NodeKind::Values { rows } if !rows.is_empty() => InsertSource::Values(
                        rows.iter()
                            .map(|row| row.iter().map(|value| self.literal(value)).collect())
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    _ => InsertSource::Query(self.visit(input, 0)?.0.into_query()),
                };
                Ok(Statement::Insert {
                    table: table.path.clone(),
                    columns,
                    source,
                })
            }
            ModifyOp::Update {
                columns: targets,
                sources,
            } => {
                let condition = self.dml_condition(table, input, "UPDATE")?;
                let fields = columns.iter().map(|c| SqlExpr::column(c.as_str())).collect::<Vec<_>>();
                let mut assignments = Vec::with_capacity(targets.len());
                for (target, source) in targets.iter().zip(sources) {
                    let column = columns
                        .get(*target)
                        .cloned()
                        .ok_or_else(|| Error::contract(format!("UPDATE column ${target} out of range")))?;
                    assignments.push((column, self.translate(source, &fields)?));
                }
                let selection = condition
                    .map(|condition| self.translate(&condition, &fields))
                    .transpose()?;
                Ok(Statement::Update {
                    table: table.path.clone(),
                    assignments,
                    selection,
                })
            }
            ModifyOp::Delete => {
                let condition = self.dml_condition(table, input, "DELETE")?;
                let fields = columns.iter().map(|c| SqlExpr::column(c.as_str())).collect::<Vec<_>>();
                let selection = condition
                    .map(|condition| self.translate(&condition, &fields))
                    .transpose()?;
                Ok(Statement::Delete {
                    table: table.path.clone(),
                    selection,
                })
            }
        }
    }

    /// Row filter of an UPDATE or DELETE, whose input must be the target
    /// table, optionally filtered.
    fn dml_condition(&self, table: &TableDef, input: &PlanNode, op: &str) -> Result<Option<Expr>> {
        let same_table =
            |node: &PlanNode| matches!(node.kind(), NodeKind::Scan { table: scanned } if scanned.path == table.path);
        if same_table(input) {
            return Ok(None);
        }
        if let NodeKind::Calc { program } = input.kind() {
            if program.is_identity_projection() && same_table(input.input(0)?) {
                return Ok(program.condition().cloned());
            }
        }
        Err(self.unsupported(
            op,
            format!(
                "{op} on {} must read from the target table",
                table.path.join(".")
            ),
        ))
    }

    fn field(&self, fields: &[SqlExpr], index: usize) -> Result<SqlExpr> {
        fields
            .get(index)
            .cloned()
            .ok_or_else(|| Error::contract(format!("field ${index} out of range in SQL fragment")))
    }

    fn literal(&self, value: &Value) -> Result<SqlExpr> {
        match value {
            Value::Bool(b) if !self.dialect.boolean_literals => Ok(SqlExpr::binary(
                "=",
                SqlExpr::Literal(Value::Int(1)),
                SqlExpr::Literal(Value::Int(if *b { 1 } else { 0 })),
            )),
            Value::Float(x) if !x.is_finite() => Err(self.unsupported(
                "FLOAT",
                format!("{x} has no SQL literal form"),
            )),
            Value::Array(_) if !self.dialect.array_literals => Err(self.unsupported(
                "ARRAY",
                format!("dialect {} does not support array literals", self.dialect.name),
            )),
            other => Ok(SqlExpr::Literal(other.clone())),
        }
    }

    /// SQL form of `expr`, whose input references resolve through `fields`.
    fn translate(&self, expr: &Expr, fields: &[SqlExpr]) -> Result<SqlExpr> {
        match expr {
            Expr::InputRef { index, .. } => self.field(fields, *index),
            Expr::Literal(value) => self.literal(value),
            Expr::Param { index, ty } => Ok(SqlExpr::Param {
                index: *index,
                ty: ty.clone(),
            }),
            Expr::Call { op, operands, ty } => {
                let args = operands
                    .iter()
                    .map(|operand| self.translate(operand, fields))
                    .collect::<Result<Vec<_>>>()?;
                self.call(*op, args, ty)
            }
        }
    }

    fn call(&self, op: Op, args: Vec<SqlExpr>, ty: &SqlType) -> Result<SqlExpr> {
        let binary = |symbol: &'static str, args: Vec<SqlExpr>| -> Result<SqlExpr> {
            let mut args = args.into_iter();
            let first = args
                .next()
                .ok_or_else(|| Error::contract(format!("{symbol} without operands")))?;
            Ok(args.fold(first, |acc, next| SqlExpr::binary(symbol, acc, next)))
        };
        let unary = |args: Vec<SqlExpr>| -> Result<Box<SqlExpr>> {
            args.into_iter()
                .next()
                .map(Box::new)
                .ok_or_else(|| Error::contract(format!("{} without operand", op.name())))
        };
        match op {
            Op::Eq => binary("=", args),
            Op::Ne => binary("<>", args),
            Op::Lt => binary("<", args),
            Op::Le => binary("<=", args),
            Op::Gt => binary(">", args),
            Op::Ge => binary(">=", args),
            Op::And if args.is_empty() => self.literal(&Value::Bool(true)),
            Op::Or if args.is_empty() => self.literal(&Value::Bool(false)),
            Op::And => binary("AND", args),
            Op::Or => binary("OR", args),
            Op::Not => Ok(SqlExpr::Unary {
                op: "NOT",
                expr: unary(args)?,
            }),
            Op::IsNull => Ok(SqlExpr::Postfix {
                expr: unary(args)?,
                op: "IS NULL",
            }),
            Op::IsNotNull => Ok(SqlExpr::Postfix {
                expr: unary(args)?,
                op: "IS NOT NULL",
            }),
            Op::IsTrue => Ok(SqlExpr::Postfix {
                expr: unary(args)?,
                op: "IS TRUE",
            }),
            Op::IsFalse => Ok(SqlExpr::Postfix {
                expr: unary(args)?,
                op: "IS FALSE",
            }),
            Op::Plus => binary("+", args),
            Op::Minus => binary("-", args),
            Op::Times => binary("*", args),
            Op::Divide => binary("/", args),
            Op::Mod => match self.dialect.function_name("MOD") {
                "%" => binary("%", args),
                name => Ok(SqlExpr::function(name, args)),
            },
            Op::Negate => Ok(SqlExpr::Unary {
                op: "-",
                expr: unary(args)?,
            }),
            Op::Concat => match self.dialect.function_name("||") {
                "||" => binary("||", args),
                name => Ok(SqlExpr::function(name, args)),
            },
            Op::Upper => Ok(SqlExpr::function(self.dialect.function_name("UPPER"), args)),
            Op::Lower => Ok(SqlExpr::function(self.dialect.function_name("LOWER"), args)),
            Op::CharLength => Ok(SqlExpr::function(
                self.dialect.function_name("CHAR_LENGTH"),
                args,
            )),
            Op::Substring => {
                let mut args = args.into_iter();
                let (Some(expr), Some(from)) = (args.next(), args.next()) else {
                    return Err(Error::contract("SUBSTRING needs a string and a start"));
                };
                let len = args.next();
                if len.is_none() && self.dialect.substring == SubstringStyle::Mssql {
                    return Err(self.unsupported(
                        "SUBSTRING",
                        "MSSQL SUBSTRING requires FROM and FOR arguments",
                    ));
                }
                Ok(SqlExpr::Substring {
                    expr: Box::new(expr),
                    from: Box::new(from),
                    len: len.map(Box::new),
                })
            }
            Op::Cast => Ok(SqlExpr::Cast {
                expr: unary(args)?,
                type_name: self.dialect.cast_type_name(ty),
            }),
            Op::Case => {
                let mut args = args;
                let otherwise = if args.len() % 2 == 1 {
                    args.pop().map(Box::new)
                } else {
                    None
                };
                let mut whens = Vec::with_capacity(args.len() / 2);
                let mut args = args.into_iter();
                while let (Some(condition), Some(value)) = (args.next(), args.next()) {
                    whens.push((condition, value));
                }
                Ok(SqlExpr::Case { whens, otherwise })
            }
            Op::Coalesce => Ok(SqlExpr::function("COALESCE", args)),
            Op::Item | Op::ArrayValue if !self.dialect.array_literals => Err(self.unsupported(
                op.name(),
                format!("dialect {} does not support arrays", self.dialect.name),
            )),
            Op::Item => {
                let mut args = args.into_iter();
                let (Some(array), Some(index)) = (args.next(), args.next()) else {
                    return Err(Error::contract("ITEM needs an array and an index"));
                };
                Ok(SqlExpr::Item {
                    array: Box::new(array),
                    index: Box::new(index),
                })
            }
            Op::ArrayValue => Ok(SqlExpr::Array(args)),
            Op::Unwind => Err(self.unsupported(
                "UNWIND",
                format!(
                    "dialect {} cannot expand a multi-valued projection",
                    self.dialect.name
                ),
            )),
        }
    }
}
