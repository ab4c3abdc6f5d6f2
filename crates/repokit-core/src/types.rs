//! Field type definitions and value compatibility.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Storage type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Text,
    Blob,
    Json,
}

impl FieldType {
    /// Get the SQL type name for this type.
    pub const fn sql_name(&self) -> &'static str {
        match self {
            FieldType::Boolean => "BOOLEAN",
            FieldType::Integer => "INTEGER",
            FieldType::BigInt => "BIGINT",
            FieldType::Double => "DOUBLE PRECISION",
            FieldType::Text => "TEXT",
            FieldType::Blob => "BLOB",
            FieldType::Json => "JSON",
        }
    }

    /// Can a value of this kind be stored in a field of this type?
    ///
    /// NULL is accepted here; nullability is checked by the field.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Integer | FieldType::BigInt, Value::Int(_) | Value::BigInt(_)) => true,
            (FieldType::Double, v) => v.is_numeric(),
            (FieldType::Text, Value::Text(_)) => true,
            (FieldType::Blob, Value::Bytes(_)) => true,
            (FieldType::Json, _) => true,
            _ => false,
        }
    }

    /// Is this an integer or floating point type?
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::BigInt | FieldType::Double
        )
    }

    /// Coerce a compatible value into this type's canonical variant.
    ///
    /// `Integer` stays `Int` when it fits; other integers widen to `BigInt`.
    pub fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (FieldType::BigInt, Value::Int(v)) => Value::BigInt(i64::from(v)),
            (FieldType::Integer, Value::BigInt(v)) => {
                i32::try_from(v).map_or(Value::BigInt(v), Value::Int)
            }
            (FieldType::Double, Value::Int(v)) => Value::Double(f64::from(v)),
            (FieldType::Double, Value::BigInt(v)) => Value::Double(v as f64),
            (_, v) => v,
        }
    }
}
