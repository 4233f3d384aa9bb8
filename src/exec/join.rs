//! Nested-loop join over materialized inputs.

use std::sync::Arc;

use super::{drain, Enumerator, MaterializeEnumerator};
use crate::error::{Error, Result};
use crate::plan::JoinKind;
use crate::rex::Expr;
use crate::value::{ParamSet, Row, Value};

/// Joins `left` with `right` on `condition`, evaluated over the
/// concatenated row. Outer sides are padded with nulls.
pub fn join_rows(
    kind: JoinKind,
    condition: &Expr,
    left: Vec<Row>,
    right: Vec<Row>,
    arities: (usize, usize),
    params: &ParamSet,
) -> Result<Vec<Row>> {
    let (left_arity, right_arity) = arities;
    let mut out = Vec::new();
    let mut right_matched = vec![false; right.len()];
    for l in &left {
        let mut matched = false;
        for (j, r) in right.iter().enumerate() {
            let mut joined = l.clone();
            joined.extend(r.iter().cloned());
            if !condition.eval_predicate(&joined, params)? {
                continue;
            }
            matched = true;
            right_matched[j] = true;
            match kind {
                JoinKind::Semi | JoinKind::Anti => break,
                _ => out.push(joined),
            }
        }
        match kind {
            JoinKind::Semi if matched => out.push(l.clone()),
            JoinKind::Anti if !matched => out.push(l.clone()),
            JoinKind::Left | JoinKind::Full if !matched => {
                let mut padded = l.clone();
                padded.extend(std::iter::repeat(Value::Null).take(right_arity));
                out.push(padded);
            }
            _ => {}
        }
    }
    if matches!(kind, JoinKind::Right | JoinKind::Full) {
        for (r, _) in right.iter().zip(&right_matched).filter(|(_, matched)| !**matched) {
            let mut padded: Row = std::iter::repeat(Value::Null).take(left_arity).collect();
            padded.extend(r.iter().cloned());
            out.push(padded);
        }
    }
    Ok(out)
}

/// Materializing join of two compiled inputs.
pub fn join(
    left: Box<dyn Enumerator>,
    right: Box<dyn Enumerator>,
    kind: JoinKind,
    condition: Expr,
    arities: (usize, usize),
    params: Arc<ParamSet>,
) -> MaterializeEnumerator {
    MaterializeEnumerator::new("Join", vec![left, right], move |children| {
        let [left, right] = children else {
            return Err(Error::contract("join needs two inputs"));
        };
        let left = drain(left.as_mut())?;
        let right = drain(right.as_mut())?;
        join_rows(kind, &condition, left, right, arities, &params)
    })
}
