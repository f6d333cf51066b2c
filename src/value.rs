//! Stored session values and the coercions behind the typed getters.

use std::{collections::HashMap, str::FromStr};

pub use serde_json::Value;

use crate::error::{Error, Result};

/// A snapshot of every key stored in a session.
pub type Values = HashMap<String, Value>;

pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() => "i64",
        Value::Number(n) if n.is_u64() => "u64",
        Value::Number(_) => "f64",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn coercion_error(expected: &'static str, key: &str, value: &Value) -> Error {
    Error::TypeCoercion {
        expected,
        key: key.to_owned(),
        found: kind(value).to_owned(),
    }
}

fn truncate(float: f64) -> Option<i64> {
    (float.is_finite() && float >= i64::MIN as f64 && float < i64::MAX as f64)
        .then(|| float.trunc() as i64)
}

/// Integers accept any in-range number (floats truncate) and numeric strings.
pub(crate) fn integer<T>(expected: &'static str, key: &str, value: &Value) -> Result<T>
where
    T: TryFrom<i64> + TryFrom<u64> + FromStr,
{
    let coerced = match value {
        Value::Number(n) => {
            if let Some(signed) = n.as_i64() {
                <T as TryFrom<i64>>::try_from(signed).ok()
            } else if let Some(unsigned) = n.as_u64() {
                <T as TryFrom<u64>>::try_from(unsigned).ok()
            } else {
                n.as_f64()
                    .and_then(truncate)
                    .and_then(|signed| <T as TryFrom<i64>>::try_from(signed).ok())
            }
        }
        Value::String(s) => s.trim().parse::<T>().ok(),
        _ => None,
    };

    coerced.ok_or_else(|| coercion_error(expected, key, value))
}

pub(crate) fn float(expected: &'static str, key: &str, value: &Value) -> Result<f64> {
    let coerced = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    coerced.ok_or_else(|| coercion_error(expected, key, value))
}

/// Only a stored boolean converts; strings such as `"true"` are rejected.
pub(crate) fn boolean(key: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| coercion_error("bool", key, value))
}

pub(crate) fn string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(coercion_error("string", key, other)),
    }
}
