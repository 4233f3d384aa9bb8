//! Row-at-a-time interpretation of expressions with SQL three-valued logic.

use std::cmp::Ordering;

use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

use super::{Expr, Op};
use crate::error::{Error, Result};
use crate::types::SqlType;
use crate::value::{ParamSet, Value};

const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

impl Expr {
    /// Evaluates the expression against `row`.
    pub fn eval(&self, row: &[Value], params: &ParamSet) -> Result<Value> {
        match self {
            Expr::InputRef { index, .. } => row.get(*index).cloned().ok_or_else(|| {
                Error::contract(format!(
                    "field reference ${index} out of range for row of arity {}",
                    row.len()
                ))
            }),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Param { index, .. } => params
                .get(index)
                .cloned()
                .ok_or(Error::UnboundParameter(*index)),
            Expr::Call { op, operands, ty } => eval_call(*op, operands, ty, row, params),
        }
    }

    /// Evaluates a condition; `NULL` counts as false.
    pub fn eval_predicate(&self, row: &[Value], params: &ParamSet) -> Result<bool> {
        Ok(self.eval(row, params)?.as_bool()?.unwrap_or(false))
    }
}

fn eval_call(
    op: Op,
    operands: &[Expr],
    ty: &SqlType,
    row: &[Value],
    params: &ParamSet,
) -> Result<Value> {
    match op {
        Op::And => {
            let mut saw_null = false;
            for operand in operands {
                match operand.eval(row, params)?.as_bool()? {
                    Some(false) => return Ok(Value::Bool(false)),
                    None => saw_null = true,
                    Some(true) => {}
                }
            }
            Ok(if saw_null { Value::Null } else { Value::Bool(true) })
        }
        Op::Or => {
            let mut saw_null = false;
            for operand in operands {
                match operand.eval(row, params)?.as_bool()? {
                    Some(true) => return Ok(Value::Bool(true)),
                    None => saw_null = true,
                    Some(false) => {}
                }
            }
            Ok(if saw_null { Value::Null } else { Value::Bool(false) })
        }
        Op::Case => {
            let mut pairs = operands.chunks_exact(2);
            for pair in pairs.by_ref() {
                if pair[0].eval_predicate(row, params)? {
                    return pair[1].eval(row, params);
                }
            }
            match pairs.remainder() {
                [otherwise] => otherwise.eval(row, params),
                _ => Ok(Value::Null),
            }
        }
        Op::Coalesce => {
            for operand in operands {
                let value = operand.eval(row, params)?;
                if !value.is_null() {
                    return Ok(value);
                }
            }
            Ok(Value::Null)
        }
        _ => {
            let args = operands
                .iter()
                .map(|operand| operand.eval(row, params))
                .collect::<Result<Vec<_>>>()?;
            apply(op, &args, ty)
        }
    }
}

fn arity(op: Op, args: &[Value], expected: usize) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(Error::contract(format!(
            "{} expects {expected} operand(s), got {}",
            op.name(),
            args.len()
        )))
    }
}

fn apply(op: Op, args: &[Value], ty: &SqlType) -> Result<Value> {
    match op {
        Op::IsNull => {
            arity(op, args, 1)?;
            return Ok(Value::Bool(args[0].is_null()));
        }
        Op::IsNotNull => {
            arity(op, args, 1)?;
            return Ok(Value::Bool(!args[0].is_null()));
        }
        Op::IsTrue => {
            arity(op, args, 1)?;
            return Ok(Value::Bool(args[0].as_bool()? == Some(true)));
        }
        Op::IsFalse => {
            arity(op, args, 1)?;
            return Ok(Value::Bool(args[0].as_bool()? == Some(false)));
        }
        Op::ArrayValue => return Ok(Value::Array(args.to_vec())),
        Op::Unwind => {
            arity(op, args, 1)?;
            return match &args[0] {
                Value::Null | Value::Array(_) => Ok(args[0].clone()),
                other => Err(Error::eval(format!("cannot unwind non-array value {other}"))),
            };
        }
        Op::Item => {
            arity(op, args, 2)?;
            return match (&args[0], &args[1]) {
                (Value::Array(items), Value::Int(i)) if *i >= 1 => {
                    Ok(items.get(*i as usize - 1).cloned().unwrap_or(Value::Null))
                }
                (Value::Array(_), Value::Int(_)) | (Value::Null, _) | (_, Value::Null) => {
                    Ok(Value::Null)
                }
                (a, i) => Err(Error::eval(format!("cannot index {a} by {i}"))),
            };
        }
        _ => {}
    }
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    match op {
        Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            arity(op, args, 2)?;
            Ok(match args[0].sql_cmp(&args[1])? {
                None => Value::Null,
                Some(ord) => Value::Bool(match op {
                    Op::Eq => ord == Ordering::Equal,
                    Op::Ne => ord != Ordering::Equal,
                    Op::Lt => ord == Ordering::Less,
                    Op::Le => ord != Ordering::Greater,
                    Op::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }),
            })
        }
        Op::Not => {
            arity(op, args, 1)?;
            Ok(args[0].as_bool()?.map_or(Value::Null, |b| Value::Bool(!b)))
        }
        Op::Plus | Op::Minus | Op::Times | Op::Divide | Op::Mod => {
            arity(op, args, 2)?;
            arithmetic(op, &args[0], &args[1])
        }
        Op::Negate => {
            arity(op, args, 1)?;
            match &args[0] {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| Error::eval("integer overflow in negation")),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(Error::eval(format!("cannot negate {other}"))),
            }
        }
        Op::Concat => {
            let mut out = String::new();
            for arg in args {
                out.push_str(as_str(op, arg)?);
            }
            Ok(Value::String(out))
        }
        Op::Upper => {
            arity(op, args, 1)?;
            Ok(Value::String(as_str(op, &args[0])?.to_uppercase()))
        }
        Op::Lower => {
            arity(op, args, 1)?;
            Ok(Value::String(as_str(op, &args[0])?.to_lowercase()))
        }
        Op::CharLength => {
            arity(op, args, 1)?;
            Ok(Value::Int(as_str(op, &args[0])?.chars().count() as i64))
        }
        Op::Substring => substring(args),
        Op::Cast => {
            arity(op, args, 1)?;
            cast(&args[0], ty)
        }
        other => Err(Error::contract(format!(
            "operator {} is not evaluable here",
            other.name()
        ))),
    }
}

fn as_str(op: Op, value: &Value) -> Result<&str> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(Error::eval(format!(
            "{} expects a string, found {other}",
            op.name()
        ))),
    }
}

fn arithmetic(op: Op, left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                Op::Plus => a.checked_add(b),
                Op::Minus => a.checked_sub(b),
                Op::Times => a.checked_mul(b),
                Op::Divide | Op::Mod if b == 0 => {
                    return Err(Error::eval("division by zero"));
                }
                Op::Divide => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result
                .map(Value::Int)
                .ok_or_else(|| Error::eval(format!("integer overflow in {}", op.name())))
        }
        _ => {
            let (a, b) = match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(Error::eval(format!(
                        "cannot apply {} to {left} and {right}",
                        op.name()
                    )))
                }
            };
            Ok(Value::Float(match op {
                Op::Plus => a + b,
                Op::Minus => a - b,
                Op::Times => a * b,
                Op::Divide => a / b,
                _ => a % b,
            }))
        }
    }
}

fn substring(args: &[Value]) -> Result<Value> {
    let (text, start, len) = match args {
        [Value::String(s), Value::Int(start)] => (s, *start, None),
        [Value::String(s), Value::Int(start), Value::Int(len)] => (s, *start, Some(*len)),
        _ => {
            return Err(Error::eval(
                "SUBSTRING expects (string, integer[, integer])",
            ))
        }
    };
    if matches!(len, Some(l) if l < 0) {
        return Err(Error::eval("negative substring length"));
    }
    let chars: Vec<char> = text.chars().collect();
    let end = match len {
        Some(l) => start.saturating_add(l),
        None => i64::MAX,
    };
    let from = start.max(1);
    if end <= from {
        return Ok(Value::String(String::new()));
    }
    let lo = ((from - 1) as usize).min(chars.len());
    let hi = ((end - 1).min(chars.len() as i64)) as usize;
    Ok(Value::String(chars[lo..hi.max(lo)].iter().collect()))
}

/// Converts `value` to `target`.
pub fn cast(value: &Value, target: &SqlType) -> Result<Value> {
    let fail = || Error::eval(format!("cannot cast {value} to {target}"));
    if value.is_null() {
        return Ok(Value::Null);
    }
    Ok(match target {
        SqlType::Any | SqlType::Null => value.clone(),
        SqlType::Boolean => match value {
            Value::Bool(_) => value.clone(),
            Value::Int(i) => Value::Bool(*i != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => return Err(fail()),
            },
            _ => return Err(fail()),
        },
        SqlType::Integer | SqlType::BigInt => {
            let i = match value {
                Value::Int(i) => *i,
                Value::Bool(b) => *b as i64,
                Value::Float(f) if f.is_finite() => f.trunc() as i64,
                Value::String(s) => s.trim().parse::<i64>().map_err(|_| fail())?,
                _ => return Err(fail()),
            };
            if *target == SqlType::Integer && i32::try_from(i).is_err() {
                return Err(Error::eval(format!("{i} out of range for INTEGER")));
            }
            Value::Int(i)
        }
        SqlType::Double | SqlType::Decimal { .. } => match value {
            Value::Int(i) => Value::Float(*i as f64),
            Value::Float(_) => value.clone(),
            Value::String(s) => Value::Float(s.trim().parse::<f64>().map_err(|_| fail())?),
            _ => return Err(fail()),
        },
        SqlType::Varchar(max) => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_owned(),
                Value::Int(i) => i.to_string(),
                Value::Float(f) => f.to_string(),
                Value::Date(d) => Value::format_date(*d)?,
                Value::Timestamp(t) => Value::format_timestamp(*t)?,
                _ => return Err(fail()),
            };
            match max {
                Some(max) => Value::String(text.chars().take(*max as usize).collect()),
                None => Value::String(text),
            }
        }
        SqlType::Binary => match value {
            Value::Bytes(_) => value.clone(),
            Value::String(s) => Value::Bytes(s.as_bytes().to_vec()),
            _ => return Err(fail()),
        },
        SqlType::Date => match value {
            Value::Date(_) => value.clone(),
            Value::Timestamp(t) => Value::Date(t.div_euclid(86_400_000) as i32),
            Value::String(s) => {
                let date = Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
                    .map_err(|_| fail())?;
                Value::Date(date.to_julian_day() - UNIX_EPOCH_JULIAN_DAY)
            }
            _ => return Err(fail()),
        },
        SqlType::Timestamp => match value {
            Value::Timestamp(_) => value.clone(),
            Value::Date(d) => Value::Timestamp(*d as i64 * 86_400_000),
            Value::String(s) => {
                let ts = PrimitiveDateTime::parse(
                    s.trim(),
                    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
                )
                .map_err(|_| fail())?;
                Value::Timestamp((ts.assume_utc().unix_timestamp_nanos() / 1_000_000) as i64)
            }
            _ => return Err(fail()),
        },
        SqlType::Array(_) => match value {
            Value::Array(_) => value.clone(),
            _ => return Err(fail()),
        },
    })
}
