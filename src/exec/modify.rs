//! Writes against in-process tables.
//!
//! Update and delete inputs carry whole table rows (a scan, possibly
//! filtered); each input row consumes one matching stored row.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::{drain, Enumerator, MaterializeEnumerator};
use crate::catalog::TableDef;
use crate::error::{Error, Result};
use crate::plan::ModifyOp;
use crate::value::{ParamSet, Row, RowKey, Value};

/// Applies `op` to `table` with `rows` as input and returns the number of
/// affected rows.
pub fn apply(table: &TableDef, op: &ModifyOp, rows: Vec<Row>, params: &ParamSet) -> Result<usize> {
    let store = table.mem_table()?;
    let changed = match op {
        ModifyOp::Insert => store.insert(rows),
        ModifyOp::Update { columns, sources } => {
            let mut pending: FxHashMap<RowKey, VecDeque<Row>> = FxHashMap::default();
            for row in rows {
                let mut next = row.clone();
                for (&column, source) in columns.iter().zip(sources) {
                    let slot = next.get_mut(column).ok_or_else(|| {
                        Error::contract(format!("update column ${column} out of range"))
                    })?;
                    *slot = source.eval(&row, params)?;
                }
                pending.entry(RowKey(row)).or_default().push_back(next);
            }
            store.update_where(|row| {
                Ok(pending
                    .get_mut(&RowKey(row.clone()))
                    .and_then(VecDeque::pop_front))
            })?
        }
        ModifyOp::Delete => {
            let mut pending: FxHashMap<RowKey, usize> = FxHashMap::default();
            for row in rows {
                *pending.entry(RowKey(row)).or_insert(0) += 1;
            }
            store.delete_where(|row| {
                Ok(match pending.get_mut(&RowKey(row.clone())) {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        true
                    }
                    _ => false,
                })
            })?
        }
    };
    debug!(table = %table.name, op = op.name(), changed, "applied modification");
    Ok(changed)
}

/// Enumerator emitting the single affected-count row of a modification.
pub fn modify(
    input: Box<dyn Enumerator>,
    table: Arc<TableDef>,
    op: ModifyOp,
    params: Arc<ParamSet>,
) -> MaterializeEnumerator {
    MaterializeEnumerator::new("Modify", vec![input], move |children| {
        let rows = match children.first_mut() {
            Some(input) => drain(input.as_mut())?,
            None => return Err(Error::contract("modify without input")),
        };
        let changed = apply(&table, &op, rows, &params)?;
        Ok(vec![vec![Value::Int(
            i64::try_from(changed).unwrap_or(i64::MAX),
        )]])
    })
}
