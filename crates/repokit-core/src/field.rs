//! Field definitions.

use serde::{Deserialize, Serialize};

use crate::types::FieldType;

/// How an entity's identity is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// The store assigns the next value of a sequence on first persist.
    #[default]
    Sequence,
    /// The caller supplies the identity before persisting.
    Assigned,
}

/// Metadata about an entity field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
}

impl FieldInfo {
    /// Create a non-nullable field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
        }
    }

    /// Set whether the field accepts NULL.
    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }
}
