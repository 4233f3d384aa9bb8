//! Materializing stable sort with offset and fetch.

use std::cmp::Ordering;

use super::{drain, Enumerator, MaterializeEnumerator};
use crate::error::{Error, Result};
use crate::plan::{Collation, FieldCollation};
use crate::value::{Row, Value};

fn compare_key(key: &FieldCollation, a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) if key.nulls_first_effective() => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, true) if key.nulls_first_effective() => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ordering = a.total_cmp(b);
            if key.is_descending() {
                ordering.reverse()
            } else {
                ordering
            }
        }
    }
}

fn compare_rows(collation: &Collation, a: &Row, b: &Row) -> Ordering {
    for key in collation.keys() {
        let ordering = match (a.get(key.field), b.get(key.field)) {
            (Some(x), Some(y)) => compare_key(key, x, y),
            _ => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Sorts `rows` and applies `offset` and `fetch`.
pub fn sort_rows(
    collation: &Collation,
    offset: Option<u64>,
    fetch: Option<u64>,
    mut rows: Vec<Row>,
) -> Result<Vec<Row>> {
    if let Some(key) = collation.keys().iter().find(|key| {
        rows.first().is_some_and(|row| key.field >= row.len())
    }) {
        return Err(Error::contract(format!("sort key ${} out of range", key.field)));
    }
    rows.sort_by(|a, b| compare_rows(collation, a, b));
    let skip = usize::try_from(offset.unwrap_or(0)).unwrap_or(usize::MAX);
    let take = fetch.map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
    Ok(rows.into_iter().skip(skip).take(take).collect())
}

/// Materializing sort over `input`.
pub fn sort(
    input: Box<dyn Enumerator>,
    collation: Collation,
    offset: Option<u64>,
    fetch: Option<u64>,
) -> MaterializeEnumerator {
    MaterializeEnumerator::new("Sort", vec![input], move |children| {
        let rows = match children.first_mut() {
            Some(input) => drain(input.as_mut())?,
            None => return Err(Error::contract("sort without input")),
        };
        sort_rows(&collation, offset, fetch, rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(values: &[Option<i64>]) -> Vec<Row> {
        values
            .iter()
            .map(|v| vec![v.map_or(Value::Null, Value::Int)])
            .collect()
    }

    #[test]
    fn unspecified_nulls_sort_high() {
        let rows = col(&[Some(2), None, Some(1)]);
        let asc = sort_rows(&Collation::new(vec![FieldCollation::asc(0)]), None, None, rows.clone());
        assert_eq!(asc.unwrap(), col(&[Some(1), Some(2), None]));
        let desc = sort_rows(&Collation::new(vec![FieldCollation::desc(0)]), None, None, rows);
        assert_eq!(desc.unwrap(), col(&[None, Some(2), Some(1)]));
    }

    #[test]
    fn explicit_null_direction_and_offset_fetch() {
        let rows = col(&[Some(3), None, Some(1), Some(2)]);
        let sorted = sort_rows(
            &Collation::new(vec![FieldCollation::asc(0).nulls_first()]),
            Some(1),
            Some(2),
            rows,
        )
        .unwrap();
        assert_eq!(sorted, col(&[Some(1), Some(2)]));
    }

    #[test]
    fn sort_is_stable() {
        let rows = vec![
            vec![Value::Int(1), Value::from("x")],
            vec![Value::Int(0), Value::from("y")],
            vec![Value::Int(1), Value::from("z")],
        ];
        let sorted = sort_rows(&Collation::new(vec![FieldCollation::asc(0)]), None, None, rows).unwrap();
        assert_eq!(sorted[1][1], Value::from("x"));
        assert_eq!(sorted[2][1], Value::from("z"));
    }
}
