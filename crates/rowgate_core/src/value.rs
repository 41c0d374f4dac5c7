//! Dynamic column values.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamic scalar column value.
///
/// Values are always carried as bound parameters and never rendered into
/// statement text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
}

impl Value {
    /// Returns true for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the text if this is a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an `Integer` value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Converts a JSON scalar into a value.
    ///
    /// Arrays and objects are rejected; `column` is only used for the error.
    pub fn from_json(column: &str, json: serde_json::Value) -> CoreResult<Self> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(CoreError::UnsupportedValue {
                        column: column.to_string(),
                        reason: format!("number {n} is out of range"),
                    })
                }
            }
            serde_json::Value::String(s) => Ok(Value::Text(s)),
            serde_json::Value::Array(_) => Err(CoreError::UnsupportedValue {
                column: column.to_string(),
                reason: "arrays are not scalar".to_string(),
            }),
            serde_json::Value::Object(_) => Err(CoreError::UnsupportedValue {
                column: column.to_string(),
                reason: "objects are not scalar".to_string(),
            }),
        }
    }

    /// Converts this value to JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Converts a JSON object into an ordered column map.
pub fn columns_from_json(
    object: serde_json::Map<String, serde_json::Value>,
) -> CoreResult<Vec<(String, Value)>> {
    object
        .into_iter()
        .map(|(column, json)| {
            let value = Value::from_json(&column, json)?;
            Ok((column, value))
        })
        .collect()
}

/// Renders the value the way it appears in a CSV field; `Null` is empty.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
