//! JSON encoding of values and `{"$dynamic": n}` parameter markers.
//!
//! Values use the extended-JSON spellings a document store accepts for the
//! types plain JSON lacks: `{"$date": {"$numberLong": ..}}` for dates and
//! timestamps and `{"$binary": {..}}` for byte strings.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Number, Value as Json};

use crate::error::{Error, Result};
use crate::rex::eval::cast;
use crate::types::SqlType;
use crate::value::{ParamSet, Value};

/// Key of a parameter marker object.
pub const DYNAMIC_KEY: &str = "$dynamic";

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Marker standing for dynamic parameter `index`.
pub fn marker(index: usize) -> Json {
    json!({ DYNAMIC_KEY: index })
}

/// Parameter index when `json` is a marker.
pub fn marker_index(json: &Json) -> Option<usize> {
    let object = json.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object
        .get(DYNAMIC_KEY)?
        .as_u64()
        .and_then(|index| usize::try_from(index).ok())
}

/// Whether any marker occurs inside `json`.
pub fn has_markers(json: &Json) -> bool {
    if marker_index(json).is_some() {
        return true;
    }
    match json {
        Json::Array(items) => items.iter().any(has_markers),
        Json::Object(object) => object.values().any(has_markers),
        _ => false,
    }
}

/// Copy of `template` with every marker replaced by its bound value.
pub fn bind(template: &Json, params: &ParamSet) -> Result<Json> {
    if let Some(index) = marker_index(template) {
        let value = params.get(&index).ok_or(Error::UnboundParameter(index))?;
        return to_json(value);
    }
    Ok(match template {
        Json::Array(items) => Json::Array(
            items
                .iter()
                .map(|item| bind(item, params))
                .collect::<Result<_>>()?,
        ),
        Json::Object(object) => {
            let mut bound = Map::with_capacity(object.len());
            for (key, value) in object {
                bound.insert(key.clone(), bind(value, params)?);
            }
            Json::Object(bound)
        }
        other => other.clone(),
    })
}

/// Document-store encoding of `value`.
pub fn to_json(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => Json::Number(
            Number::from_f64(*f)
                .ok_or_else(|| Error::eval(format!("{f} has no JSON representation")))?,
        ),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(bytes) => json!({
            "$binary": { "base64": STANDARD.encode(bytes), "subType": "00" }
        }),
        Value::Date(days) => date_json(i64::from(*days) * MILLIS_PER_DAY),
        Value::Timestamp(millis) => date_json(*millis),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect::<Result<_>>()?),
    })
}

fn date_json(millis: i64) -> Json {
    json!({ "$date": { "$numberLong": millis.to_string() } })
}

/// Decodes a document field into a value of type `ty`. Missing fields come
/// in as `Json::Null`.
pub fn from_json(json: &Json, ty: &SqlType) -> Result<Value> {
    cast(&decode(json, ty)?, ty)
}

fn decode(json: &Json, ty: &SqlType) -> Result<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(
                n.as_f64()
                    .ok_or_else(|| Error::eval(format!("number {n} out of range")))?,
            ),
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => {
            let element = match ty {
                SqlType::Array(element) => element.as_ref().clone(),
                _ => SqlType::Any,
            };
            Value::Array(
                items
                    .iter()
                    .map(|item| from_json(item, &element))
                    .collect::<Result<_>>()?,
            )
        }
        Json::Object(object) => decode_extended(object)?,
    })
}

fn decode_extended(object: &Map<String, Json>) -> Result<Value> {
    if let Some(date) = object.get("$date") {
        let millis = match date {
            Json::Number(n) => n.as_i64(),
            Json::Object(inner) => inner
                .get("$numberLong")
                .and_then(Json::as_str)
                .and_then(|s| s.parse().ok()),
            _ => None,
        };
        return millis
            .map(Value::Timestamp)
            .ok_or_else(|| Error::eval(format!("malformed $date value {date}")));
    }
    if let Some(binary) = object.get("$binary") {
        let encoded = binary
            .get("base64")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::eval(format!("malformed $binary value {binary}")))?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|err| Error::eval(format!("invalid base64 payload: {err}")))?;
        return Ok(Value::Bytes(bytes));
    }
    Err(Error::eval(format!(
        "cannot decode nested document {}",
        Json::Object(object.clone())
    )))
}
