//! Document-store writes derived from modify nodes.
//!
//! Writes address physical field names directly. A write whose filter pins
//! every primary-key field with an equality uses the single-document
//! operation.

use serde_json::{json, Map, Value as Json};

use super::emit::{document, unsupported, DocExprs};
use super::params::{bind, has_markers, marker, to_json};
use super::ExecutionMode;
use crate::catalog::TableDef;
use crate::error::{Error, Result};
use crate::plan::{ModifyOp, NodeKind, PlanNode};
use crate::rex::Expr;
use crate::value::ParamSet;

/// Write against one collection.
#[derive(Clone, Debug, PartialEq)]
pub enum DmlPlan {
    /// Bulk insert. Prepared inserts hold a single template document.
    Insert {
        /// Target collection.
        collection: String,
        /// Documents, or the template bound once per parameter set.
        documents: Vec<Json>,
    },
    /// Update of the documents matching `filter`.
    Update {
        /// Target collection.
        collection: String,
        /// Query-language filter.
        filter: Json,
        /// Update document (`{"$set": ..}`) or, for computed values, an
        /// update pipeline (a JSON array).
        update: Json,
        /// Whether at most one document can match.
        one: bool,
    },
    /// Removal of the documents matching `filter`.
    Delete {
        /// Target collection.
        collection: String,
        /// Query-language filter.
        filter: Json,
        /// Whether at most one document can match.
        one: bool,
    },
}

impl DmlPlan {
    /// Collection written to.
    pub fn collection(&self) -> &str {
        match self {
            DmlPlan::Insert { collection, .. }
            | DmlPlan::Update { collection, .. }
            | DmlPlan::Delete { collection, .. } => collection,
        }
    }

    fn has_markers(&self) -> bool {
        match self {
            DmlPlan::Insert { documents, .. } => documents.iter().any(has_markers),
            DmlPlan::Update { filter, update, .. } => has_markers(filter) || has_markers(update),
            DmlPlan::Delete { filter, .. } => has_markers(filter),
        }
    }
}

/// Emitted write with its execution mode.
#[derive(Clone, Debug, PartialEq)]
pub struct DmlQuery {
    /// Write, possibly holding parameter markers.
    pub plan: DmlPlan,
    /// Direct writes carry literals only.
    pub mode: ExecutionMode,
}

impl DmlQuery {
    fn new(plan: DmlPlan) -> Self {
        let mode = if plan.has_markers() {
            ExecutionMode::Prepared
        } else {
            ExecutionMode::Direct
        };
        Self { plan, mode }
    }

    /// Write with every marker replaced by values from `params`.
    pub fn bind(&self, params: &ParamSet) -> Result<DmlPlan> {
        if self.mode == ExecutionMode::Direct {
            return Ok(self.plan.clone());
        }
        Ok(match &self.plan {
            DmlPlan::Insert {
                collection,
                documents,
            } => DmlPlan::Insert {
                collection: collection.clone(),
                documents: documents
                    .iter()
                    .map(|doc| bind(doc, params))
                    .collect::<Result<_>>()?,
            },
            DmlPlan::Update {
                collection,
                filter,
                update,
                one,
            } => DmlPlan::Update {
                collection: collection.clone(),
                filter: bind(filter, params)?,
                update: bind(update, params)?,
                one: *one,
            },
            DmlPlan::Delete {
                collection,
                filter,
                one,
            } => DmlPlan::Delete {
                collection: collection.clone(),
                filter: bind(filter, params)?,
                one: *one,
            },
        })
    }
}

fn physical_names(table: &TableDef) -> Vec<String> {
    table
        .row_type
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| {
            table
                .physical_name(i)
                .unwrap_or(field.name.as_str())
                .to_owned()
        })
        .collect()
}

pub(super) fn emit(table: &TableDef, op: &ModifyOp, input: &PlanNode) -> Result<DmlQuery> {
    let physical = physical_names(table);
    let collection = table.physical_table().to_owned();
    let plan = match op {
        ModifyOp::Insert => DmlPlan::Insert {
            collection,
            documents: insert_documents(&physical, input)?,
        },
        ModifyOp::Update { columns, sources } => {
            let condition = target_condition(table, input, "UPDATE")?;
            let exprs = DocExprs::new(&physical);
            let constant = sources
                .iter()
                .all(|source| matches!(source, Expr::Literal(_) | Expr::Param { .. }));
            let mut assignments = Map::new();
            for (column, source) in columns.iter().zip(sources) {
                let name = physical.get(*column).ok_or_else(|| {
                    Error::contract(format!("update assigns missing column ${column}"))
                })?;
                let value = if constant {
                    exprs.constant(source)?
                } else {
                    exprs.expr(source)?
                };
                assignments.insert(name.clone(), value);
            }
            let update = if constant {
                json!({ "$set": assignments })
            } else {
                json!([{ "$set": assignments }])
            };
            DmlPlan::Update {
                collection,
                filter: filter_document(&exprs, condition)?,
                update,
                one: pins_primary_key(table, &exprs, condition),
            }
        }
        ModifyOp::Delete => {
            let condition = target_condition(table, input, "DELETE")?;
            let exprs = DocExprs::new(&physical);
            DmlPlan::Delete {
                collection,
                filter: filter_document(&exprs, condition)?,
                one: pins_primary_key(table, &exprs, condition),
            }
        }
    };
    Ok(DmlQuery::new(plan))
}

fn insert_documents(physical: &[String], input: &PlanNode) -> Result<Vec<Json>> {
    match input.kind() {
        NodeKind::Values { rows } => rows.iter().map(|row| document(physical, row)).collect(),
        NodeKind::Calc { program } if program.condition().is_none() => {
            let NodeKind::Values { rows } = input.input(0)?.kind() else {
                return Err(insert_from_query());
            };
            let [row] = rows.as_slice() else {
                return Err(insert_from_query());
            };
            let mut template = Map::new();
            for (name, expr) in physical.iter().zip(program.projects()) {
                let value = match expr {
                    Expr::Literal(value) => to_json(value)?,
                    Expr::Param { index, .. } => marker(*index),
                    Expr::InputRef { index, .. } => to_json(row.get(*index).ok_or_else(|| {
                        Error::contract(format!("insert template references missing ${index}"))
                    })?)?,
                    other => {
                        return Err(unsupported(
                            "INSERT",
                            format!("cannot compute {other} while inserting documents"),
                        ))
                    }
                };
                template.insert(name.clone(), value);
            }
            Ok(vec![Json::Object(template)])
        }
        _ => Err(insert_from_query()),
    }
}

fn insert_from_query() -> Error {
    unsupported(
        "INSERT",
        "documents can only be inserted from literal rows or a parameter template",
    )
}

/// Condition selecting the rows to write; the input must read the target
/// table directly.
fn target_condition<'a>(
    table: &TableDef,
    input: &'a PlanNode,
    statement: &str,
) -> Result<Option<&'a Expr>> {
    let reads_target =
        |node: &PlanNode| matches!(node.kind(), NodeKind::Scan { table: scanned } if scanned.path == table.path);
    match input.kind() {
        NodeKind::Scan { .. } if reads_target(input) => Ok(None),
        NodeKind::Calc { program }
            if program.is_identity_projection()
                && input.inputs().first().is_some_and(|scan| reads_target(scan)) =>
        {
            Ok(program.condition())
        }
        _ => Err(unsupported(
            statement,
            format!(
                "{statement} must filter the target collection directly, found {}",
                input.kind().name()
            ),
        )),
    }
}

fn filter_document(exprs: &DocExprs<'_>, condition: Option<&Expr>) -> Result<Json> {
    match condition {
        Some(condition) => exprs.filter(condition),
        None => Ok(json!({})),
    }
}

fn pins_primary_key(table: &TableDef, exprs: &DocExprs<'_>, condition: Option<&Expr>) -> bool {
    let Some(condition) = condition else {
        return false;
    };
    let pinned: Vec<usize> = condition
        .conjuncts()
        .into_iter()
        .filter_map(|conjunct| exprs.equality(conjunct))
        .collect();
    !table.primary_key.is_empty() && table.primary_key.iter().all(|key| pinned.contains(key))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::rex::Op;
    use crate::types::{Field, RowType, SqlType};
    use crate::value::Value;

    fn users() -> Arc<TableDef> {
        Arc::new(
            TableDef::new(
                "users",
                RowType::new(vec![
                    Field::not_null("id", SqlType::Integer),
                    Field::new("name", SqlType::Varchar(None)),
                    Field::new("visits", SqlType::Integer),
                ]),
            )
            .with_primary_key(vec![0])
            .with_physical_names(["_id", "name", "visits"]),
        )
    }

    fn id_eq(value: Expr) -> Expr {
        Expr::binary(Op::Eq, Expr::field(0, SqlType::Integer, false), value)
    }

    #[test]
    fn prepared_delete_by_key_removes_one() {
        let table = users();
        let input = PlanNode::filter(
            PlanNode::scan(table.clone()),
            id_eq(Expr::param(0, SqlType::Integer)),
        )
        .unwrap();
        let query = emit(&table, &ModifyOp::Delete, &input).unwrap();
        assert_eq!(query.mode, ExecutionMode::Prepared);
        assert_eq!(
            query.plan,
            DmlPlan::Delete {
                collection: "users".into(),
                filter: json!({ "_id": { "$eq": { "$dynamic": 0 } } }),
                one: true,
            }
        );
        let bound = query.bind(&ParamSet::from([(0, Value::Int(4))])).unwrap();
        assert_eq!(
            bound,
            DmlPlan::Delete {
                collection: "users".into(),
                filter: json!({ "_id": { "$eq": 4 } }),
                one: true,
            }
        );
    }

    #[test]
    fn computed_update_uses_pipeline() {
        let table = users();
        let input = PlanNode::filter(
            PlanNode::scan(table.clone()),
            Expr::binary(
                Op::Gt,
                Expr::field(2, SqlType::Integer, true),
                Expr::lit(3),
            ),
        )
        .unwrap();
        let op = ModifyOp::Update {
            columns: vec![2],
            sources: vec![Expr::binary(
                Op::Plus,
                Expr::field(2, SqlType::Integer, true),
                Expr::lit(1),
            )],
        };
        let query = emit(&table, &op, &input).unwrap();
        assert_eq!(query.mode, ExecutionMode::Direct);
        assert_eq!(
            query.plan,
            DmlPlan::Update {
                collection: "users".into(),
                filter: json!({ "visits": { "$gt": 3 } }),
                update: json!([{ "$set": { "visits": { "$add": ["$visits", { "$literal": 1 }] } } }]),
                one: false,
            }
        );
    }

    #[test]
    fn literal_update_uses_set_document() {
        let table = users();
        let op = ModifyOp::Update {
            columns: vec![1],
            sources: vec![Expr::lit("anon")],
        };
        let query = emit(&table, &op, &PlanNode::scan(table.clone())).unwrap();
        assert_eq!(
            query.plan,
            DmlPlan::Update {
                collection: "users".into(),
                filter: json!({}),
                update: json!({ "$set": { "name": "anon" } }),
                one: false,
            }
        );
    }

    #[test]
    fn insert_template_binds_per_parameter_set() {
        let table = users();
        let one_row = PlanNode::values(RowType::empty(), vec![Vec::new()]).unwrap();
        let template = PlanNode::project(
            one_row,
            vec![
                (Expr::param(0, SqlType::Integer), "id".into()),
                (Expr::param(1, SqlType::Varchar(None)), "name".into()),
                (Expr::lit(0), "visits".into()),
            ],
        )
        .unwrap();
        let query = emit(&table, &ModifyOp::Insert, &template).unwrap();
        assert_eq!(query.mode, ExecutionMode::Prepared);
        let bound = query
            .bind(&ParamSet::from([
                (0, Value::Int(1)),
                (1, Value::String("ada".into())),
            ]))
            .unwrap();
        assert_eq!(
            bound,
            DmlPlan::Insert {
                collection: "users".into(),
                documents: vec![json!({ "_id": 1, "name": "ada", "visits": 0 })],
            }
        );
    }

    #[test]
    fn insert_from_query_is_rejected() {
        let table = users();
        let err = emit(&table, &ModifyOp::Insert, &PlanNode::scan(table.clone())).unwrap_err();
        assert!(matches!(err, Error::Unsupported { ref construct, .. } if construct == "INSERT"));
    }
}
