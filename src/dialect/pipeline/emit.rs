//! Lowering of scan, calc, aggregate, sort and values nodes into
//! aggregation-pipeline stages, plus the expression translation shared with
//! the write path.
//!
//! Documents flowing between stages carry the logical field names of the
//! node that produced them, so every stage refers to its input fields as
//! `"$<name>"`.

use serde_json::{json, Map, Value as Json};

use super::params::{marker, to_json};
use crate::catalog::TableDef;
use crate::error::{Error, Result};
use crate::plan::{AggCall, AggFunc, Collation, NodeKind, NullDirection, PlanNode};
use crate::rex::{Expr, ExprProgram, Op};
use crate::types::SqlType;
use crate::value::{Row, Value};

/// Target named in errors raised by the pipeline emitter.
pub const TARGET: &str = "document-pipeline";

/// Prefix of the temporary fields that emulate null ordering.
const NULLS_KEY_PREFIX: &str = "__nulls_";

pub(super) fn unsupported(construct: impl Into<String>, reason: impl Into<String>) -> Error {
    Error::unsupported(TARGET, construct, reason)
}

/// Stage list against one collection; an empty collection means the
/// pipeline starts from `$documents`.
pub(super) struct Lowered {
    pub(super) collection: String,
    pub(super) stages: Vec<Json>,
}

fn names_of(node: &PlanNode) -> Vec<String> {
    node.row_type().names().map(str::to_owned).collect()
}

pub(super) fn lower(node: &PlanNode) -> Result<Lowered> {
    match node.kind() {
        NodeKind::Scan { table } => Ok(Lowered {
            collection: table.physical_table().to_owned(),
            stages: scan_stages(table),
        }),
        NodeKind::Values { rows } => {
            let names = names_of(node);
            let documents = rows
                .iter()
                .map(|row| document(&names, row))
                .collect::<Result<Vec<_>>>()?;
            Ok(Lowered {
                collection: String::new(),
                stages: vec![json!({ "$documents": documents })],
            })
        }
        NodeKind::Calc { program } => {
            let input = node.input(0)?;
            let mut lowered = lower(input)?;
            calc_stages(program, &names_of(input), &mut lowered.stages)?;
            Ok(lowered)
        }
        NodeKind::Aggregate { group, calls } => {
            let input = node.input(0)?;
            let mut lowered = lower(input)?;
            aggregate_stages(group, calls, &names_of(input), &names_of(node), &mut lowered.stages)?;
            Ok(lowered)
        }
        NodeKind::Sort {
            collation,
            offset,
            fetch,
        } => {
            let mut lowered = lower(node.input(0)?)?;
            sort_stages(collation, *offset, *fetch, &names_of(node), &mut lowered.stages)?;
            Ok(lowered)
        }
        NodeKind::Join { .. }
        | NodeKind::SetOp { .. }
        | NodeKind::Modify { .. }
        | NodeKind::ModifyCollect { .. }
        | NodeKind::Converter { .. } => Err(unsupported(
            node.kind().name(),
            format!(
                "a document pipeline cannot express {} inside a query",
                node.kind().name()
            ),
        )),
    }
}

/// Leading `$project` mapping physical field names to logical ones.
fn scan_stages(table: &TableDef) -> Vec<Json> {
    if !table.has_physical_mapping() {
        return Vec::new();
    }
    let mut projection = Map::new();
    for (i, field) in table.row_type.fields().iter().enumerate() {
        let physical = table.physical_name(i).unwrap_or(field.name.as_str());
        projection.insert(field.name.clone(), Json::String(format!("${physical}")));
    }
    hide_id(&mut projection);
    vec![json!({ "$project": projection })]
}

fn hide_id(projection: &mut Map<String, Json>) {
    if !projection.contains_key("_id") {
        projection.insert("_id".to_owned(), json!(0));
    }
}

/// Literal document with one entry per field.
pub(super) fn document(names: &[String], row: &Row) -> Result<Json> {
    let mut doc = Map::with_capacity(names.len());
    for (name, value) in names.iter().zip(row) {
        doc.insert(name.clone(), to_json(value)?);
    }
    Ok(Json::Object(doc))
}

fn calc_stages(program: &ExprProgram, input: &[String], stages: &mut Vec<Json>) -> Result<()> {
    if program.unwind_position().is_some() {
        return Err(unsupported(
            "UNWIND",
            "multi-valued projections are expanded outside the document store",
        ));
    }
    let exprs = DocExprs::new(input);
    if let Some(condition) = program.condition() {
        stages.push(json!({ "$match": exprs.filter(condition)? }));
    }
    let output: Vec<&str> = program.output().names().collect();
    let renamed = output.iter().zip(input).any(|(out, name)| *out != name.as_str());
    if program.is_identity_projection() && !renamed {
        return Ok(());
    }
    let mut projection = Map::new();
    for (expr, name) in program.projects().iter().zip(&output) {
        projection.insert((*name).to_owned(), exprs.expr(expr)?);
    }
    hide_id(&mut projection);
    stages.push(json!({ "$project": projection }));
    Ok(())
}

fn aggregate_stages(
    group: &[usize],
    calls: &[AggCall],
    input: &[String],
    output: &[String],
    stages: &mut Vec<Json>,
) -> Result<()> {
    let field = |index: usize| -> Result<Json> {
        input
            .get(index)
            .map(|name| Json::String(format!("${name}")))
            .ok_or_else(|| Error::contract(format!("aggregate references missing field ${index}")))
    };
    let mut grouping = Map::new();
    let mut flatten = Map::new();
    if group.is_empty() {
        grouping.insert("_id".to_owned(), Json::Null);
    } else {
        let mut id = Map::new();
        for (key, name) in group.iter().zip(output) {
            id.insert(name.clone(), field(*key)?);
            flatten.insert(name.clone(), Json::String(format!("$_id.{name}")));
        }
        grouping.insert("_id".to_owned(), Json::Object(id));
    }
    for (call, name) in calls.iter().zip(&output[group.len()..]) {
        let args = call
            .args
            .iter()
            .map(|arg| field(*arg))
            .collect::<Result<Vec<_>>>()?;
        grouping.insert(name.clone(), accumulator(call, args)?);
        flatten.insert(name.clone(), finalizer(call, name));
    }
    flatten.insert("_id".to_owned(), json!(0));
    stages.push(json!({ "$group": grouping }));
    stages.push(json!({ "$project": flatten }));
    Ok(())
}

fn accumulator(call: &AggCall, mut args: Vec<Json>) -> Result<Json> {
    if call.distinct {
        return match args.pop() {
            Some(arg) if args.is_empty() => Ok(json!({ "$addToSet": arg })),
            _ => Err(unsupported(
                call.to_string(),
                "DISTINCT aggregates take exactly one argument in a document pipeline",
            )),
        };
    }
    if call.func == AggFunc::Count {
        if args.is_empty() {
            return Ok(json!({ "$sum": 1 }));
        }
        let present: Vec<Json> = args
            .into_iter()
            .map(|arg| json!({ "$gt": [arg, null] }))
            .collect();
        return Ok(json!({ "$sum": { "$cond": [{ "$and": present }, 1, 0] } }));
    }
    let arg = args
        .pop()
        .ok_or_else(|| Error::contract(format!("{} without argument", call.func.name())))?;
    Ok(match call.func {
        AggFunc::Sum => json!({ "$sum": arg }),
        AggFunc::Min => json!({ "$min": arg }),
        AggFunc::Max => json!({ "$max": arg }),
        AggFunc::Avg => json!({ "$avg": arg }),
        AggFunc::Count => json!({ "$sum": 1 }),
    })
}

fn finalizer(call: &AggCall, name: &str) -> Json {
    let field = Json::String(format!("${name}"));
    if !call.distinct {
        return field;
    }
    match call.func {
        AggFunc::Count => json!({
            "$size": {
                "$filter": { "input": field, "as": "v", "cond": { "$gt": ["$$v", null] } }
            }
        }),
        AggFunc::Sum => json!({ "$sum": field }),
        AggFunc::Min => json!({ "$min": field }),
        AggFunc::Max => json!({ "$max": field }),
        AggFunc::Avg => json!({ "$avg": field }),
    }
}

/// Document stores order nulls low; a key asking for the opposite gets a
/// temporary `$addFields` flag sorted ahead of it.
fn sort_stages(
    collation: &Collation,
    offset: Option<u64>,
    fetch: Option<u64>,
    names: &[String],
    stages: &mut Vec<Json>,
) -> Result<()> {
    let mut keys = Map::new();
    let mut flags = Map::new();
    for key in collation.keys() {
        let name = names.get(key.field).ok_or_else(|| {
            Error::contract(format!("sort key ${} out of range", key.field))
        })?;
        let descending = key.is_descending();
        let wanted_first = match key.nulls {
            NullDirection::First => Some(true),
            NullDirection::Last => Some(false),
            NullDirection::Unspecified => None,
        };
        if let Some(first) = wanted_first.filter(|first| *first == descending) {
            let flag = format!("{NULLS_KEY_PREFIX}{name}");
            flags.insert(flag.clone(), json!({ "$lte": [format!("${name}"), null] }));
            keys.insert(flag, json!(if first { -1 } else { 1 }));
        }
        keys.insert(name.clone(), json!(if descending { -1 } else { 1 }));
    }
    if !flags.is_empty() {
        stages.push(json!({ "$addFields": flags.clone() }));
    }
    if !keys.is_empty() {
        stages.push(json!({ "$sort": keys }));
    }
    if !flags.is_empty() {
        let hidden: Map<String, Json> = flags.keys().map(|flag| (flag.clone(), json!(0))).collect();
        stages.push(json!({ "$project": hidden }));
    }
    if let Some(offset) = offset {
        stages.push(json!({ "$skip": offset }));
    }
    if let Some(fetch) = fetch {
        stages.push(json!({ "$limit": fetch }));
    }
    Ok(())
}

/// Translates row expressions over fields called `names`.
pub(super) struct DocExprs<'a> {
    names: &'a [String],
}

impl<'a> DocExprs<'a> {
    pub(super) fn new(names: &'a [String]) -> Self {
        Self { names }
    }

    fn name(&self, index: usize) -> Result<&'a str> {
        self.names
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| Error::contract(format!("field reference ${index} out of range")))
    }

    /// `$match` document: query-language form for field-versus-constant
    /// conjuncts, `$expr` for the rest.
    pub(super) fn filter(&self, condition: &Expr) -> Result<Json> {
        let mut clauses = condition
            .conjuncts()
            .into_iter()
            .map(|conjunct| match self.query_form(conjunct)? {
                Some(clause) => Ok(clause),
                None => Ok(json!({ "$expr": self.expr(conjunct)? })),
            })
            .collect::<Result<Vec<_>>>()?;
        if clauses.len() == 1 {
            if let Some(clause) = clauses.pop() {
                return Ok(clause);
            }
        }
        Ok(json!({ "$and": clauses }))
    }

    /// Field pinned to a constant by an equality conjunct.
    pub(super) fn equality(&self, conjunct: &Expr) -> Option<usize> {
        let Expr::Call {
            op: Op::Eq,
            operands,
            ..
        } = conjunct
        else {
            return None;
        };
        match operands.as_slice() {
            [Expr::InputRef { index, .. }, other] | [other, Expr::InputRef { index, .. }]
                if is_bindable_constant(other) =>
            {
                Some(*index)
            }
            _ => None,
        }
    }

    fn query_form(&self, expr: &Expr) -> Result<Option<Json>> {
        let Expr::Call { op, operands, .. } = expr else {
            return Ok(None);
        };
        let single = |name: &str, clause: Json| {
            let mut doc = Map::new();
            doc.insert(name.to_owned(), clause);
            Json::Object(doc)
        };
        match (*op, operands.as_slice()) {
            (Op::IsNull, [Expr::InputRef { index, .. }]) => {
                Ok(Some(single(self.name(*index)?, Json::Null)))
            }
            (Op::IsNotNull, [Expr::InputRef { index, .. }]) => Ok(Some(single(
                self.name(*index)?,
                json!({ "$ne": null }),
            ))),
            (op, [left, right]) if op.is_comparison() => {
                let (index, constant, op) = match (left, right) {
                    (Expr::InputRef { index, .. }, other) if is_bindable_constant(other) => {
                        (*index, other, op)
                    }
                    (other, Expr::InputRef { index, .. }) if is_bindable_constant(other) => {
                        (*index, other, op.reverse().unwrap_or(op))
                    }
                    _ => return Ok(None),
                };
                let value = self.constant(constant)?;
                let clause = match op {
                    Op::Eq => json!({ "$eq": value }),
                    Op::Ne => json!({ "$nin": [value, null] }),
                    Op::Lt => json!({ "$lt": value }),
                    Op::Le => json!({ "$lte": value }),
                    Op::Gt => json!({ "$gt": value }),
                    _ => json!({ "$gte": value }),
                };
                Ok(Some(single(self.name(index)?, clause)))
            }
            _ => Ok(None),
        }
    }

    /// Raw JSON of a literal or parameter marker.
    pub(super) fn constant(&self, expr: &Expr) -> Result<Json> {
        match expr {
            Expr::Literal(value) => to_json(value),
            Expr::Param { index, .. } => Ok(marker(*index)),
            other => Err(Error::contract(format!("{other} is not a constant"))),
        }
    }

    /// Aggregation-expression form.
    pub(super) fn expr(&self, expr: &Expr) -> Result<Json> {
        match expr {
            Expr::InputRef { index, .. } => Ok(Json::String(format!("${}", self.name(*index)?))),
            Expr::Literal(value) => Ok(json!({ "$literal": to_json(value)? })),
            Expr::Param { index, .. } => Ok(json!({ "$literal": marker(*index) })),
            Expr::Call { op, operands, ty } => self.call(*op, operands, ty),
        }
    }

    fn call(&self, op: Op, operands: &[Expr], ty: &SqlType) -> Result<Json> {
        let args = || {
            operands
                .iter()
                .map(|operand| self.expr(operand))
                .collect::<Result<Vec<_>>>()
        };
        let first = || {
            operands
                .first()
                .ok_or_else(|| Error::contract(format!("{} without operands", op.name())))
                .and_then(|operand| self.expr(operand))
        };
        Ok(match op {
            Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                if operands.iter().any(Expr::is_null_lit) {
                    Json::Null
                } else {
                    let mut doc = Map::new();
                    doc.insert(comparison_operator(op).to_owned(), Json::Array(args()?));
                    Json::Object(doc)
                }
            }
            Op::And => json!({ "$and": args()? }),
            Op::Or => json!({ "$or": args()? }),
            Op::Not => json!({ "$not": [first()?] }),
            Op::IsNull => json!({ "$lte": [first()?, null] }),
            Op::IsNotNull => json!({ "$gt": [first()?, null] }),
            Op::IsTrue => json!({ "$eq": [first()?, true] }),
            Op::IsFalse => json!({ "$eq": [first()?, false] }),
            Op::Plus => json!({ "$add": args()? }),
            Op::Minus => json!({ "$subtract": args()? }),
            Op::Times => json!({ "$multiply": args()? }),
            Op::Divide => json!({ "$divide": args()? }),
            Op::Mod => json!({ "$mod": args()? }),
            Op::Negate => json!({ "$multiply": [first()?, -1] }),
            Op::Concat => json!({ "$concat": args()? }),
            Op::Upper => json!({ "$toUpper": first()? }),
            Op::Lower => json!({ "$toLower": first()? }),
            Op::CharLength => json!({ "$strLenCP": first()? }),
            Op::Substring => {
                let string = first()?;
                let start = match operands.get(1) {
                    Some(Expr::Literal(Value::Int(start))) => json!(start - 1),
                    Some(start) => json!({ "$subtract": [self.expr(start)?, 1] }),
                    None => return Err(Error::contract("SUBSTRING without start")),
                };
                let length = match operands.get(2) {
                    Some(length) => self.expr(length)?,
                    None => json!({ "$strLenCP": string.clone() }),
                };
                json!({ "$substrCP": [string, start, length] })
            }
            Op::Cast => json!({
                "$convert": { "input": first()?, "to": convert_target(ty)? }
            }),
            Op::Case => {
                let mut args = args()?;
                let otherwise = if args.len() % 2 == 1 {
                    args.pop().unwrap_or(Json::Null)
                } else {
                    Json::Null
                };
                let mut branches = Vec::with_capacity(args.len() / 2);
                let mut args = args.into_iter();
                while let (Some(case), Some(then)) = (args.next(), args.next()) {
                    branches.push(json!({ "case": case, "then": then }));
                }
                json!({ "$switch": { "branches": branches, "default": otherwise } })
            }
            Op::Coalesce => json!({ "$ifNull": args()? }),
            Op::Item => {
                let array = first()?;
                let index = match operands.get(1) {
                    Some(Expr::Literal(Value::Int(index))) => json!(index - 1),
                    Some(index) => json!({ "$subtract": [self.expr(index)?, 1] }),
                    None => return Err(Error::contract("ITEM without index")),
                };
                json!({ "$arrayElemAt": [array, index] })
            }
            Op::ArrayValue => Json::Array(args()?),
            Op::Unwind => {
                return Err(unsupported(
                    "UNWIND",
                    "multi-valued expressions are expanded outside the document store",
                ))
            }
        })
    }
}

fn is_bindable_constant(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(value) => !value.is_null(),
        Expr::Param { .. } => true,
        _ => false,
    }
}

fn comparison_operator(op: Op) -> &'static str {
    match op {
        Op::Eq => "$eq",
        Op::Ne => "$ne",
        Op::Lt => "$lt",
        Op::Le => "$lte",
        Op::Gt => "$gt",
        _ => "$gte",
    }
}

fn convert_target(ty: &SqlType) -> Result<&'static str> {
    Ok(match ty {
        SqlType::Boolean => "bool",
        SqlType::Integer => "int",
        SqlType::BigInt => "long",
        SqlType::Double => "double",
        SqlType::Decimal { .. } => "decimal",
        SqlType::Varchar(_) => "string",
        SqlType::Binary => "binData",
        SqlType::Date | SqlType::Timestamp => "date",
        SqlType::Array(_) | SqlType::Any | SqlType::Null => {
            return Err(unsupported(
                "CAST",
                format!("a document pipeline cannot convert to {ty}"),
            ))
        }
    })
}
