//! Scalar field types and runtime values.
//!
//! [`FieldType`] is the logical type tag a schema declares for a column;
//! [`Value`] is the runtime shape that flows through specs, statements and
//! rows. Drivers hand back storage-level values (for SQLite: NULL, INTEGER,
//! REAL, TEXT, BLOB) and [`FieldType::decode`] lifts them into the declared
//! logical type.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::errors::GraphSqlError;

/// Logical type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Bool,
    Int,
    Uint,
    Float,
    String,
    Enum,
    Bytes,
    Json,
    Time,
    Uuid,
}

impl FieldType {
    /// Reports whether the type is numeric (and thus eligible for `ADD`
    /// updates and `LAST_INSERT_ID` style key capture).
    pub fn numeric(self) -> bool {
        matches!(self, FieldType::Int | FieldType::Uint | FieldType::Float)
    }

    /// Reports whether `value` has the runtime shape this tag declares.
    /// `NULL` is accepted by every type; nullability is a schema concern.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Int, Value::Int(_)) => true,
            (FieldType::Uint, Value::Int(v)) => *v >= 0,
            (FieldType::Float, Value::Float(_) | Value::Int(_)) => true,
            (FieldType::String | FieldType::Enum, Value::String(_)) => true,
            (FieldType::Bytes, Value::Bytes(_)) => true,
            (FieldType::Json, _) => true,
            (FieldType::Time, Value::Time(_)) => true,
            (FieldType::Uuid, Value::Uuid(_)) => true,
            _ => false,
        }
    }

    /// Converts a storage-level value into this logical type.
    pub fn decode(self, raw: Value) -> Result<Value, GraphSqlError> {
        let decoded = match (self, raw) {
            (_, Value::Null) => Value::Null,
            (FieldType::Bool, Value::Int(v)) => Value::Bool(v != 0),
            (FieldType::Float, Value::Int(v)) => Value::Float(v as f64),
            (FieldType::Int | FieldType::Uint, Value::Float(v)) if v.fract() == 0.0 => {
                Value::Int(v as i64)
            }
            (FieldType::Time, Value::String(text)) => {
                let parsed = OffsetDateTime::parse(&text, &Rfc3339).map_err(|e| {
                    GraphSqlError::serialization(format!("decode time {text:?}: {e}"))
                })?;
                Value::Time(parsed)
            }
            (FieldType::Uuid, Value::String(text)) => {
                let parsed = Uuid::parse_str(&text).map_err(|e| {
                    GraphSqlError::serialization(format!("decode uuid {text:?}: {e}"))
                })?;
                Value::Uuid(parsed)
            }
            (FieldType::Uuid, Value::Bytes(bytes)) => {
                let parsed = Uuid::from_slice(&bytes)
                    .map_err(|e| GraphSqlError::serialization(format!("decode uuid: {e}")))?;
                Value::Uuid(parsed)
            }
            (FieldType::Json, Value::String(text)) => {
                let parsed = serde_json::from_str(&text).map_err(|e| {
                    GraphSqlError::serialization(format!("decode json {text:?}: {e}"))
                })?;
                Value::Json(parsed)
            }
            (FieldType::Json, Value::Bytes(bytes)) => {
                let parsed = serde_json::from_slice(&bytes)
                    .map_err(|e| GraphSqlError::serialization(format!("decode json: {e}")))?;
                Value::Json(parsed)
            }
            (FieldType::String | FieldType::Enum, Value::Bytes(bytes)) => {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            }
            (ty, other) => {
                if !ty.accepts(&other) {
                    return Err(GraphSqlError::serialization(format!(
                        "cannot decode {other} as {ty:?}"
                    )));
                }
                other
            }
        };
        Ok(decoded)
    }
}

/// Runtime value of a field, an id, or a statement argument.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Time(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Json(v) => v.to_string().hash(state),
            Value::Time(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Json(v) => write!(f, "{v}"),
            Value::Time(v) => match v.format(&Rfc3339) {
                Ok(text) => f.write_str(&text),
                Err(_) => write!(f, "{v:?}"),
            },
            Value::Uuid(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(v: OffsetDateTime) -> Self {
        Value::Time(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
