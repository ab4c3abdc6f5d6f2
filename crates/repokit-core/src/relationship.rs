//! Association metadata.
//!
//! Associations are declared on the owning entity's shape and drive both
//! join planning in the query builder and lazy resolution in the session.

use serde::{Deserialize, Serialize};

/// How many targets an association yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Many-to-one / one-to-one: the owner carries the target's identity in
    /// its foreign-key field.
    One,
    /// One-to-many: each target carries the owner's identity in its
    /// foreign-key field.
    Many,
}

/// When an association's targets are loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Joined into every read of the owner.
    Eager,
    /// Loaded on first access unless a fetch hint asks for it.
    #[default]
    Lazy,
}

/// Information about an association from one entity type to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationInfo {
    pub name: String,
    /// Target entity type
    pub target: String,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub fetch: FetchMode,
    /// Foreign-key field: on the owner for `One`, on the target for `Many`.
    pub foreign_key: String,
}

impl AssociationInfo {
    /// A lazy to-one association through `foreign_key` on the owner.
    pub fn one(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::One,
            fetch: FetchMode::Lazy,
            foreign_key: foreign_key.into(),
        }
    }

    /// A lazy to-many association through `foreign_key` on the target.
    pub fn many(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::Many,
            fetch: FetchMode::Lazy,
            foreign_key: foreign_key.into(),
        }
    }

    /// Set the fetch mode.
    pub fn fetch(mut self, mode: FetchMode) -> Self {
        self.fetch = mode;
        self
    }

    /// Shorthand for `fetch(FetchMode::Eager)`.
    pub fn eager(self) -> Self {
        self.fetch(FetchMode::Eager)
    }

    pub const fn is_eager(&self) -> bool {
        matches!(self.fetch, FetchMode::Eager)
    }

    pub const fn is_many(&self) -> bool {
        matches!(self.cardinality, Cardinality::Many)
    }
}
