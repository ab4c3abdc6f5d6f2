//! Identity Map pattern for tracking unique entity instances per identity.
//!
//! The identity map ensures that each stored record corresponds to exactly
//! one instance within a session:
//!
//! - **Uniqueness**: the same identity always yields the same `EntityRef`
//! - **Cache**: `Session::find` answers from the map without a store read
//! - **Consistency**: changes through one handle are visible through all
//!
//! # Example
//!
//! ```ignore
//! let mut map = IdentityMap::new();
//! let key = EntityKey::new("Member", Key::Int(1));
//!
//! let first = map.insert(key.clone(), member_ref);
//! let second = map.get(&key).unwrap();
//!
//! assert!(Arc::ptr_eq(&first, &second));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use repokit_core::{Entity, EntityRef, Key};

/// Identity of a tracked instance: entity type plus identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub entity: String,
    pub key: Key,
}

impl EntityKey {
    pub fn new(entity: impl Into<String>, key: Key) -> Self {
        Self {
            entity: entity.into(),
            key,
        }
    }

    /// Key of an instance that already has an identity.
    pub fn of(entity: &Entity) -> Option<Self> {
        entity
            .identity()
            .map(|key| Self::new(entity.entity_type(), key.clone()))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.key)
    }
}

/// Identity map for tracking unique instances.
///
/// Keyed by (entity type, identity), so every entity type has its own
/// namespace.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<EntityKey, EntityRef>,
}

impl IdentityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an instance into the identity map.
    ///
    /// If an instance with the same key already exists, returns the existing
    /// reference (the new one is ignored). Otherwise stores and returns the
    /// given reference.
    pub fn insert(&mut self, key: EntityKey, entity: EntityRef) -> EntityRef {
        Arc::clone(self.entries.entry(key).or_insert(entity))
    }

    /// Get a clone of the tracked handle.
    pub fn get(&self, key: &EntityKey) -> Option<EntityRef> {
        self.entries.get(key).map(Arc::clone)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// True if `entity` is the very instance tracked under `key`.
    pub fn tracks(&self, key: &EntityKey, entity: &EntityRef) -> bool {
        self.entries
            .get(key)
            .is_some_and(|tracked| Arc::ptr_eq(tracked, entity))
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<EntityRef> {
        self.entries.remove(key)
    }

    /// Tracked instances of one entity type.
    pub fn of_type<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a EntityRef> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.entity == entity)
            .map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
