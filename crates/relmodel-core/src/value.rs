//! Dynamic attribute values.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, TypeError};

/// A dynamically-typed attribute value.
///
/// Row sources produce the scalar variants (`Null`, `Bool`, `Int`, `Double`,
/// `Text`). The remaining variants only appear as the output of a cast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer
    Int(i64),

    /// 64-bit floating point
    Double(f64),

    /// Fixed-point decimal rendered with its declared scale
    Decimal(String),

    /// Text string
    Text(String),

    /// Date-time without timezone (dates are midnight-truncated)
    DateTime(NaiveDateTime),

    /// Decoded JSON document
    Json(serde_json::Value),

    /// Decoded JSON object wrapped as a keyed container
    Object(serde_json::Map<String, serde_json::Value>),

    /// Ordered collection of values
    Array(Vec<Value>),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::DateTime(_) => "DATETIME",
            Value::Json(_) => "JSON",
            Value::Object(_) => "OBJECT",
            Value::Array(_) => "ARRAY",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Scalar string rendering, following the loose conventions of the
    /// stored form: `true` is `"1"`, `false` and NULL are empty, integral
    /// doubles drop their fraction.
    ///
    /// Returns `None` for container values.
    pub fn to_loose_string(&self) -> Option<String> {
        match self {
            Value::Null => Some(String::new()),
            Value::Bool(true) => Some("1".to_string()),
            Value::Bool(false) => Some(String::new()),
            Value::Int(v) => Some(v.to_string()),
            Value::Double(v) => Some(format_double(*v)),
            Value::Decimal(s) | Value::Text(s) => Some(s.clone()),
            Value::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            Value::Json(serde_json::Value::String(s)) => Some(s.clone()),
            Value::Json(_) | Value::Object(_) | Value::Array(_) => None,
        }
    }

    /// Normalized key used to bucket rows in a matching dictionary.
    ///
    /// Integers and numeric strings collapse to the same key so that a
    /// foreign key stored as text still matches an integer primary key.
    /// NULL never produces a key.
    pub fn dictionary_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Value::Double(v) if v.fract() == 0.0 && v.is_finite() => {
                Some(format!("{}", *v as i64))
            }
            other => other.to_loose_string(),
        }
    }

    /// Convert to a plain JSON value for serialization.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Double(v) => serde_json::Number::from_f64(*v).map_or_else(
                || serde_json::Value::String(format_double(*v)),
                serde_json::Value::Number,
            ),
            Value::Decimal(s) | Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string())
            }
            Value::Json(v) => v.clone(),
            Value::Object(map) => serde_json::Value::Object(map.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

fn format_double(v: f64) -> String {
    if v.is_nan() {
        "NAN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "INF" } else { "-INF" }.to_string()
    } else {
        v.to_string()
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Converts a decoded JSON scalar into the matching row-level value.
///
/// Arrays and objects stay wrapped as `Json`.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Value::Double(n.as_f64().unwrap_or(f64::NAN)), Value::Int),
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }
}

// TryFrom implementations for extracting values

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::Int(v) => Ok(v != 0),
            other => Err(Error::Type(TypeError {
                expected: "bool",
                actual: other.type_name().to_string(),
                column: None,
            })),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Int(v) => Ok(v),
            Value::Bool(v) => Ok(i64::from(v)),
            other => Err(Error::Type(TypeError {
                expected: "i64",
                actual: other.type_name().to_string(),
                column: None,
            })),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Double(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            other => Err(Error::Type(TypeError {
                expected: "f64",
                actual: other.type_name().to_string(),
                column: None,
            })),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(v) | Value::Decimal(v) => Ok(v),
            other => Err(Error::Type(TypeError {
                expected: "string",
                actual: other.type_name().to_string(),
                column: None,
            })),
        }
    }
}

impl TryFrom<Value> for NaiveDateTime {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::DateTime(v) => Ok(v),
            other => Err(Error::Type(TypeError {
                expected: "datetime",
                actual: other.type_name().to_string(),
                column: None,
            })),
        }
    }
}

impl<T> TryFrom<Value> for Option<T>
where
    T: TryFrom<Value, Error = Error>,
{
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(None),
            v => T::try_from(v).map(Some),
        }
    }
}
