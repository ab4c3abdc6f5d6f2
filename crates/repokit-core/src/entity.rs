//! Dynamic entity instances and their association state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Error;
use crate::relationship::Cardinality;
use crate::value::{Key, Value};

/// Shared handle to a tracked entity.
///
/// Within one session every load of the same identity yields the same
/// handle, so `Arc::ptr_eq` is the identity test.
pub type EntityRef = Arc<RwLock<Entity>>;

/// Lock an entity for reading, recovering from a poisoned lock.
pub fn read(entity: &EntityRef) -> RwLockReadGuard<'_, Entity> {
    entity.read().unwrap_or_else(|e| e.into_inner())
}

/// Lock an entity for writing, recovering from a poisoned lock.
pub fn write(entity: &EntityRef) -> RwLockWriteGuard<'_, Entity> {
    entity.write().unwrap_or_else(|e| e.into_inner())
}

/// Which session state an instance belongs to.
///
/// `epoch` changes whenever the owning session is cleared; `generation` is
/// the entity type's bulk-mutation counter at the time the instance was
/// loaded or last refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub session: u64,
    pub epoch: u64,
    pub generation: u64,
}

/// A record of a registered entity type.
#[derive(Debug, Clone)]
pub struct Entity {
    entity_type: String,
    identity: Option<Key>,
    values: BTreeMap<String, Value>,
    associations: BTreeMap<String, Association>,
    binding: Option<Binding>,
}

impl Entity {
    /// Create an empty, untracked entity.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            identity: None,
            values: BTreeMap::new(),
            associations: BTreeMap::new(),
            binding: None,
        }
    }

    /// Builder-style field assignment.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// The identity, once assigned by persist or load.
    pub fn identity(&self) -> Option<&Key> {
        self.identity.as_ref()
    }

    pub fn set_identity(&mut self, key: Key) {
        self.identity = Some(key);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Typed field access; a missing field reads as NULL.
    pub fn get_as<T>(&self, field: &str) -> crate::Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self.values.get(field).cloned().unwrap_or(Value::Null);
        T::try_from(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(field.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    /// Set a field value, returning the previous one.
    ///
    /// Changes to a tracked instance are written on flush after
    /// `Session::mark_dirty`.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(field.into(), value.into())
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Replace every scalar field at once (used when refreshing from the store).
    pub fn replace_values(&mut self, values: BTreeMap<String, Value>) {
        self.values = values;
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.get(name)
    }

    pub fn association_mut(&mut self, name: &str) -> Option<&mut Association> {
        self.associations.get_mut(name)
    }

    /// The named slot, inserting `default` if there is none.
    pub fn association_or_insert(&mut self, name: &str, default: Association) -> &mut Association {
        self.associations.entry(name.to_string()).or_insert(default)
    }

    pub fn set_association(&mut self, name: impl Into<String>, association: Association) {
        self.associations.insert(name.into(), association);
    }

    pub fn associations(&self) -> impl Iterator<Item = (&str, &Association)> {
        self.associations.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn binding(&self) -> Option<Binding> {
        self.binding
    }

    pub fn bind(&mut self, binding: Binding) {
        self.binding = Some(binding);
    }

    /// Drop the session binding; the instance becomes detached.
    pub fn unbind(&mut self) {
        self.binding = None;
    }

    /// Scalar fields as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Short `Type#identity` label for logs and errors.
    pub fn label(&self) -> String {
        match &self.identity {
            Some(key) => format!("{}#{}", self.entity_type, key),
            None => format!("{}#<new>", self.entity_type),
        }
    }
}

/// Target(s) of a resolved association.
#[derive(Clone)]
pub enum Related {
    One(Option<EntityRef>),
    Many(Vec<EntityRef>),
}

impl Related {
    /// The single target of a to-one association.
    pub fn as_one(&self) -> Option<&EntityRef> {
        match self {
            Related::One(target) => target.as_ref(),
            Related::Many(_) => None,
        }
    }

    /// Targets of a to-many association (empty for to-one).
    pub fn as_many(&self) -> &[EntityRef] {
        match self {
            Related::One(_) => &[],
            Related::Many(targets) => targets,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::One(target) => usize::from(target.is_some()),
            Related::Many(targets) => targets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Associations can form cycles (member -> team -> members), so Debug prints
// target labels instead of recursing.
impl fmt::Debug for Related {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = |e: &EntityRef| match e.try_read() {
            Ok(guard) => guard.label(),
            Err(_) => "<locked>".to_string(),
        };
        match self {
            Related::One(None) => f.write_str("One(None)"),
            Related::One(Some(e)) => write!(f, "One({})", label(e)),
            Related::Many(items) => f
                .debug_tuple("Many")
                .field(&items.iter().map(label).collect::<Vec<_>>())
                .finish(),
        }
    }
}

/// Resolution state of one association on one instance.
#[derive(Debug, Clone)]
pub enum AssociationState {
    /// Placeholder holding the identity to resolve with: the target's
    /// identity for `One`, the owner's identity for `Many`.
    Unresolved(Value),
    /// A resolution is running for this reference.
    Resolving,
    /// Resolution finished. Failures are kept until `Association::reset`.
    Resolved(Result<Related, Arc<Error>>),
}

/// An association slot on an entity instance.
#[derive(Debug, Clone)]
pub struct Association {
    cardinality: Cardinality,
    key: Value,
    state: AssociationState,
}

impl Association {
    /// A lazy placeholder for `key`.
    ///
    /// A NULL to-one key has nothing to load and starts resolved as `None`.
    pub fn unresolved(cardinality: Cardinality, key: Value) -> Self {
        let state = if key.is_null() && cardinality == Cardinality::One {
            AssociationState::Resolved(Ok(Related::One(None)))
        } else {
            AssociationState::Unresolved(key.clone())
        };
        Self {
            cardinality,
            key,
            state,
        }
    }

    /// An association loaded together with its owner.
    pub fn resolved(key: Value, related: Related) -> Self {
        let cardinality = match related {
            Related::One(_) => Cardinality::One,
            Related::Many(_) => Cardinality::Many,
        };
        Self {
            cardinality,
            key,
            state: AssociationState::Resolved(Ok(related)),
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Identity used to resolve this association.
    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn state(&self) -> &AssociationState {
        &self.state
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, AssociationState::Resolved(_))
    }

    /// The loaded target(s), if resolution succeeded.
    pub fn get(&self) -> Option<&Related> {
        match &self.state {
            AssociationState::Resolved(Ok(related)) => Some(related),
            _ => None,
        }
    }

    /// Enter `Resolving`. Fails if a resolution is already running.
    pub fn begin_resolve(&mut self, entity: &str, association: &str) -> crate::Result<()> {
        if matches!(self.state, AssociationState::Resolving) {
            return Err(Error::ResolutionInProgress {
                entity: entity.to_string(),
                association: association.to_string(),
            });
        }
        self.state = AssociationState::Resolving;
        Ok(())
    }

    /// Record the outcome of a resolution.
    pub fn finish(&mut self, outcome: crate::Result<Related>) {
        self.state = AssociationState::Resolved(outcome.map_err(Arc::new));
    }

    /// Forget any loaded target or cached failure so the next access
    /// resolves again.
    pub fn reset(&mut self) {
        *self = Self::unresolved(self.cardinality, self.key.clone());
    }
}
