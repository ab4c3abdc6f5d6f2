//! Write statements.

use std::fmt;

use repokit_core::Value;

use crate::expr::Predicate;

/// One assignment of a set-based update.
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum Assignment {
    /// `field = value`
    Set { field: String, value: Value },
    /// `field = field + delta`
    Add { field: String, delta: Value },
}

impl Assignment {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Assignment::Set {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn add(field: impl Into<String>, delta: impl Into<Value>) -> Self {
        Assignment::Add {
            field: field.into(),
            delta: delta.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Assignment::Set { field, .. } | Assignment::Add { field, .. } => field,
        }
    }

    /// Apply to the current value of the field.
    pub fn apply(&self, current: &Value) -> repokit_core::Result<Value> {
        match self {
            Assignment::Set { value, .. } => Ok(value.clone()),
            Assignment::Add { delta, .. } => current.checked_add(delta),
        }
    }

    /// Parse `field=value` or `field+=delta`, with the right-hand side as JSON
    /// (bare words are taken as text).
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some((field, delta)) = raw.split_once("+=") {
            return Some(Assignment::add(field.trim(), parse_scalar(delta.trim())));
        }
        let (field, value) = raw.split_once('=')?;
        Some(Assignment::set(field.trim(), parse_scalar(value.trim())))
    }
}

/// Parse a command-line scalar: JSON if it parses, otherwise text.
pub fn parse_scalar(raw: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(raw)
        .map_or_else(|_| Value::Text(raw.to_string()), Value::from_json)
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assignment::Set { field, value } => write!(f, "{} = {}", field, value),
            Assignment::Add { field, delta } => write!(f, "{} = {} + {}", field, field, delta),
        }
    }
}

/// A validated write, as executed by a store.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteStatement {
    Insert {
        entity: String,
        values: Vec<(String, Value)>,
    },
    Update {
        entity: String,
        identity_field: String,
        identity: Value,
        values: Vec<(String, Value)>,
    },
    Delete {
        entity: String,
        identity_field: String,
        identity: Value,
    },
    BulkUpdate {
        entity: String,
        predicate: Predicate,
        assignments: Vec<Assignment>,
    },
    BulkDelete {
        entity: String,
        predicate: Predicate,
    },
}

impl WriteStatement {
    pub fn entity(&self) -> &str {
        match self {
            WriteStatement::Insert { entity, .. }
            | WriteStatement::Update { entity, .. }
            | WriteStatement::Delete { entity, .. }
            | WriteStatement::BulkUpdate { entity, .. }
            | WriteStatement::BulkDelete { entity, .. } => entity,
        }
    }

    pub fn is_bulk(&self) -> bool {
        matches!(
            self,
            WriteStatement::BulkUpdate { .. } | WriteStatement::BulkDelete { .. }
        )
    }
}

impl fmt::Display for WriteStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteStatement::Insert { entity, values } => {
                write!(f, "insert {} ({} fields)", entity, values.len())
            }
            WriteStatement::Update {
                entity, identity, ..
            } => write!(f, "update {} {}", entity, identity),
            WriteStatement::Delete {
                entity, identity, ..
            } => write!(f, "delete {} {}", entity, identity),
            WriteStatement::BulkUpdate {
                entity,
                predicate,
                assignments,
            } => {
                let sets: Vec<String> = assignments.iter().map(ToString::to_string).collect();
                write!(f, "bulk update {} set {} where {}", entity, sets.join(", "), predicate)
            }
            WriteStatement::BulkDelete { entity, predicate } => {
                write!(f, "bulk delete {} where {}", entity, predicate)
            }
        }
    }
}
