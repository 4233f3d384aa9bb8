//! Runtime values, rows and dynamic parameter bindings shared by the
//! evaluator, the pull-iterator runtime and the dialect emitters.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::error::{Error, Result};
use crate::types::SqlType;

/// Julian day number of 1970-01-01.
const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

/// Typed value tagged with explicit type information so the wire format stays
/// unambiguous across adapters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
    /// Arbitrary binary payload.
    Bytes(Vec<u8>),
    /// Days since Unix epoch.
    Date(i32),
    /// Milliseconds since Unix epoch, UTC.
    Timestamp(i64),
    /// Multi-valued payload; the input of an unwind.
    Array(Vec<Value>),
}

/// Single row: one value per field of the producing operator's row type.
pub type Row = Vec<Value>;

/// Dynamic parameter values keyed by parameter ordinal.
pub type ParamSet = BTreeMap<usize, Value>;

impl Value {
    /// Whether the value is `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Semantic type of the value.
    pub fn sql_type(&self) -> SqlType {
        match self {
            Value::Null => SqlType::Null,
            Value::Bool(_) => SqlType::Boolean,
            Value::Int(_) => SqlType::BigInt,
            Value::Float(_) => SqlType::Double,
            Value::String(_) => SqlType::Varchar(None),
            Value::Bytes(_) => SqlType::Binary,
            Value::Date(_) => SqlType::Date,
            Value::Timestamp(_) => SqlType::Timestamp,
            Value::Array(items) => SqlType::Array(Box::new(
                items
                    .iter()
                    .find(|item| !item.is_null())
                    .map(Value::sql_type)
                    .unwrap_or(SqlType::Any),
            )),
        }
    }

    /// Interprets the value as a three-valued boolean.
    pub fn as_bool(&self) -> Result<Option<bool>> {
        match self {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            other => Err(Error::eval(format!("expected boolean, found {other}"))),
        }
    }

    /// Numeric view as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Compares two values with SQL semantics: `None` when either side is
    /// null, an error when the types are not comparable.
    pub fn sql_cmp(&self, other: &Value) -> Result<Option<Ordering>> {
        if self.is_null() || other.is_null() {
            return Ok(None);
        }
        if rank(self) != rank(other) {
            return Err(Error::eval(format!("cannot compare {self} with {other}")));
        }
        Ok(Some(self.total_cmp(other)))
    }

    /// Total order used for sorting, grouping and duplicate elimination:
    /// nulls first, then booleans, numbers, strings, bytes, dates,
    /// timestamps and arrays.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => cmp_int_float(*a, *b),
            (Value::Float(a), Value::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => cmp_rows(a, b),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// ISO rendering of a date value.
    pub fn format_date(days: i32) -> Result<String> {
        let julian = UNIX_EPOCH_JULIAN_DAY
            .checked_add(days)
            .ok_or_else(|| Error::eval(format!("date out of range: {days} days from epoch")))?;
        let date = Date::from_julian_day(julian)
            .map_err(|err| Error::eval(format!("date out of range: {err}")))?;
        date.format(format_description!("[year]-[month]-[day]"))
            .map_err(|err| Error::eval(format!("cannot format date: {err}")))
    }

    /// ISO rendering of a timestamp value.
    pub fn format_timestamp(millis: i64) -> Result<String> {
        let ts = OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
            .map_err(|err| Error::eval(format!("timestamp out of range: {err}")))?;
        ts.format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .map_err(|err| Error::eval(format!("cannot format timestamp: {err}")))
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
        Value::Bytes(_) => 4,
        Value::Date(_) => 5,
        Value::Timestamp(_) => 6,
        Value::Array(_) => 7,
    }
}

fn cmp_int_float(i: i64, f: f64) -> Ordering {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        i.cmp(&(f as i64))
    } else {
        (i as f64).total_cmp(&f)
    }
}

/// Lexicographic comparison of two rows under [`Value::total_cmp`].
pub fn cmp_rows(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.total_cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// Row wrapper whose equality, ordering and hash follow
/// [`Value::total_cmp`]; used as grouping and duplicate-elimination key.
#[derive(Clone, Debug)]
pub struct RowKey(pub Row);

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        cmp_rows(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for RowKey {}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_rows(&self.0, &other.0)
    }
}

impl Hash for RowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.0.len());
        for value in &self.0 {
            hash_value(value, state);
        }
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    state.write_u8(rank(value));
    match value {
        Value::Null => {}
        Value::Bool(b) => b.hash(state),
        Value::Int(i) => i.hash(state),
        Value::Float(f) => {
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                (*f as i64).hash(state);
            } else {
                f.to_bits().hash(state);
            }
        }
        Value::String(s) => s.hash(state),
        Value::Bytes(b) => b.hash(state),
        Value::Date(d) => d.hash(state),
        Value::Timestamp(t) => t.hash(state),
        Value::Array(items) => {
            state.write_usize(items.len());
            for item in items {
                hash_value(item, state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => {
                f.write_str("X'")?;
                for byte in b {
                    write!(f, "{byte:02X}")?;
                }
                f.write_str("'")
            }
            Value::Date(d) => match Value::format_date(*d) {
                Ok(text) => write!(f, "DATE '{text}'"),
                Err(_) => write!(f, "DATE({d})"),
            },
            Value::Timestamp(t) => match Value::format_timestamp(*t) {
                Ok(text) => write!(f, "TIMESTAMP '{text}'"),
                Err(_) => write!(f, "TIMESTAMP({t})"),
            },
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
