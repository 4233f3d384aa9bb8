//! Hash aggregation.
//!
//! Groups come out in order of first appearance. A global aggregate (no
//! group keys) over empty input yields exactly one row.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{drain, Enumerator, MaterializeEnumerator};
use crate::error::{Error, Result};
use crate::plan::{AggCall, AggFunc};
use crate::value::{Row, RowKey, Value};

#[derive(Clone, Debug)]
enum Accumulator {
    Count(i64),
    Sum(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: f64, count: i64 },
}

impl Accumulator {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Count => Accumulator::Count(0),
            AggFunc::Sum => Accumulator::Sum(None),
            AggFunc::Min => Accumulator::Min(None),
            AggFunc::Max => Accumulator::Max(None),
            AggFunc::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
        }
    }

    /// Folds one argument value in; `None` is `COUNT(*)`.
    fn add(&mut self, value: Option<&Value>) -> Result<()> {
        let value = match value {
            None => {
                if let Accumulator::Count(n) = self {
                    *n += 1;
                }
                return Ok(());
            }
            Some(Value::Null) => return Ok(()),
            Some(value) => value,
        };
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Sum(sum) => {
                *sum = Some(match sum.take() {
                    None => value.clone(),
                    Some(acc) => add_values(&acc, value)?,
                });
            }
            Accumulator::Min(min) => {
                if min.as_ref().map_or(true, |m| value.total_cmp(m).is_lt()) {
                    *min = Some(value.clone());
                }
            }
            Accumulator::Max(max) => {
                if max.as_ref().map_or(true, |m| value.total_cmp(m).is_gt()) {
                    *max = Some(value.clone());
                }
            }
            Accumulator::Avg { sum, count } => {
                *sum += value
                    .as_f64()
                    .ok_or_else(|| Error::eval(format!("AVG over non-numeric {value}")))?;
                *count += 1;
            }
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Int(n),
            Accumulator::Sum(value) | Accumulator::Min(value) | Accumulator::Max(value) => {
                value.unwrap_or(Value::Null)
            }
            Accumulator::Avg { count: 0, .. } => Value::Null,
            Accumulator::Avg { sum, count } => Value::Float(sum / count as f64),
        }
    }
}

fn add_values(acc: &Value, value: &Value) -> Result<Value> {
    match (acc, value) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(*b)
            .map(Value::Int)
            .ok_or_else(|| Error::eval("SUM overflowed BIGINT")),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(a + b)),
            _ => Err(Error::eval(format!("SUM over non-numeric {b}"))),
        },
    }
}

struct CallState {
    acc: Accumulator,
    seen: Option<FxHashSet<RowKey>>,
}

impl CallState {
    fn new(call: &AggCall) -> Self {
        Self {
            acc: Accumulator::new(call.func),
            seen: call.distinct.then(FxHashSet::default),
        }
    }

    fn add(&mut self, call: &AggCall, row: &Row) -> Result<()> {
        let args = call
            .args
            .iter()
            .map(|&arg| {
                row.get(arg)
                    .cloned()
                    .ok_or_else(|| Error::contract(format!("aggregate argument ${arg} out of range")))
            })
            .collect::<Result<Row>>()?;
        // COUNT(a, b) counts rows where every argument is non-null.
        if args.iter().any(Value::is_null) {
            return Ok(());
        }
        if let Some(seen) = self.seen.as_mut() {
            if !seen.insert(RowKey(args.clone())) {
                return Ok(());
            }
        }
        self.acc.add(args.first())
    }
}

/// Groups `rows` by `group` and evaluates `calls` per group.
pub fn aggregate_rows(group: &[usize], calls: &[AggCall], rows: Vec<Row>) -> Result<Vec<Row>> {
    let mut index: FxHashMap<RowKey, usize> = FxHashMap::default();
    let mut groups: Vec<(Row, Vec<CallState>)> = Vec::new();
    for row in rows {
        let key = group
            .iter()
            .map(|&g| {
                row.get(g)
                    .cloned()
                    .ok_or_else(|| Error::contract(format!("group key ${g} out of range")))
            })
            .collect::<Result<Row>>()?;
        let slot = match index.get(&RowKey(key.clone())) {
            Some(&slot) => slot,
            None => {
                index.insert(RowKey(key.clone()), groups.len());
                groups.push((key, calls.iter().map(CallState::new).collect()));
                groups.len() - 1
            }
        };
        let (_, states) = &mut groups[slot];
        for (state, call) in states.iter_mut().zip(calls) {
            state.add(call, &row)?;
        }
    }
    if groups.is_empty() && group.is_empty() {
        groups.push((Vec::new(), calls.iter().map(CallState::new).collect()));
    }
    Ok(groups
        .into_iter()
        .map(|(mut key, states)| {
            key.extend(states.into_iter().map(|state| state.acc.finish()));
            key
        })
        .collect())
}

/// Materializing aggregation over `input`.
pub fn aggregate(
    input: Box<dyn Enumerator>,
    group: Vec<usize>,
    calls: Vec<AggCall>,
) -> MaterializeEnumerator {
    MaterializeEnumerator::new("Aggregate", vec![input], move |children| {
        let rows = match children.first_mut() {
            Some(input) => drain(input.as_mut())?,
            None => return Err(Error::contract("aggregate without input")),
        };
        aggregate_rows(&group, &calls, rows)
    })
}
