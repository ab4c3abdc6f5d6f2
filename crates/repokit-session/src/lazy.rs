//! Lazy association resolution.
//!
//! Each association slot moves through `Unresolved(key)` → `Resolving` →
//! `Resolved(outcome)`. A resolved slot is never fetched again until
//! `Association::reset`; failures are kept as the outcome.

use std::collections::HashMap;

use repokit_core::{
    Association, AssociationInfo, AssociationState, Cardinality, Entity, EntityRef, Key, Related,
    Result, Value, entity,
};
use repokit_query::Store;

use crate::Session;
use crate::identity_map::EntityKey;

impl<S: Store> Session<S> {
    /// Resolve `association` on `owner`, reading through this session.
    ///
    /// Answers from the slot if it is already resolved. Otherwise a to-one
    /// target is looked up with `find` (identity map first) and a to-many
    /// collection with one keyed read.
    ///
    /// Lazy loads are attributed to the caller's location in N+1 reports.
    #[track_caller]
    #[tracing::instrument(level = "debug", skip(self, owner))]
    pub fn resolve(&mut self, owner: &EntityRef, association: &str) -> Result<Related> {
        let info = self.association_info(owner, association)?;
        let key = {
            let mut guard = entity::write(owner);
            let label = guard.label();
            let entity_type = guard.entity_type().to_string();
            let slot = slot_mut(&mut guard, &info);
            match slot.state() {
                AssociationState::Resolved(Ok(related)) => return Ok(related.clone()),
                AssociationState::Resolved(Err(e)) => return Err(e.replay()),
                AssociationState::Resolving | AssociationState::Unresolved(_) => {}
            }
            slot.begin_resolve(&entity_type, association)?;
            tracing::trace!(owner = %label, association, "Resolving association");
            slot.key().clone()
        };

        let owner_type = entity::read(owner).entity_type().to_string();
        if let Some(tracker) = &mut self.n1_tracker {
            tracker.record_load(&owner_type, association);
        }

        let outcome = self.fetch_related(&info, &key);
        let mut guard = entity::write(owner);
        let slot = slot_mut(&mut guard, &info);
        match outcome {
            Ok(related) => {
                slot.finish(Ok(related.clone()));
                Ok(related)
            }
            Err(e) => {
                let replay = e.replay();
                slot.finish(Err(e));
                Err(replay)
            }
        }
    }

    /// Resolve `association` on every owner with a single read.
    ///
    /// Owners whose slot is already resolved are skipped; nothing is read
    /// when no slot is unresolved.
    #[tracing::instrument(level = "debug", skip(self, owners), fields(owners = owners.len()))]
    pub fn resolve_all(&mut self, owners: &[EntityRef], association: &str) -> Result<()> {
        let mut pending: Vec<(&EntityRef, Value)> = Vec::new();
        let mut info = None;
        for owner in owners {
            let owner_info = self.association_info(owner, association)?;
            let mut guard = entity::write(owner);
            let slot = slot_mut(&mut guard, &owner_info);
            if let AssociationState::Unresolved(key) = slot.state() {
                pending.push((owner, key.clone()));
            }
            info = Some(owner_info);
        }
        let Some(info) = info else {
            return Ok(());
        };
        if pending.is_empty() {
            return Ok(());
        }

        let mut keys: Vec<Value> = Vec::new();
        for (_, key) in &pending {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }

        let outcome = match info.cardinality {
            Cardinality::One => self.fetch_targets_by_identity(&info.target, keys),
            Cardinality::Many => self.fetch_collections(&info, keys),
        };
        let grouped = match outcome {
            Ok(grouped) => grouped,
            Err(e) => {
                for (owner, _) in &pending {
                    slot_mut(&mut entity::write(owner), &info).finish(Err(e.replay()));
                }
                return Err(e);
            }
        };

        for (owner, key) in &pending {
            let found = key
                .as_key()
                .and_then(|k| grouped.get(&k))
                .cloned()
                .unwrap_or_default();
            let related = match info.cardinality {
                Cardinality::One => Related::One(found.into_iter().next()),
                Cardinality::Many => Related::Many(found),
            };
            slot_mut(&mut entity::write(owner), &info).finish(Ok(related));
        }
        tracing::debug!(
            association,
            resolved = pending.len(),
            "Batch-resolved association"
        );
        Ok(())
    }

    /// Check the owner is attached and look up its association metadata.
    fn association_info(&self, owner: &EntityRef, association: &str) -> Result<AssociationInfo> {
        let guard = entity::read(owner);
        self.check_attached(&guard)?;
        let shape = self.registry.describe(guard.entity_type())?;
        Ok(shape.require_association(association)?.clone())
    }

    fn fetch_related(&mut self, info: &AssociationInfo, key: &Value) -> Result<Related> {
        match info.cardinality {
            Cardinality::One => Ok(Related::One(self.find(&info.target, key.clone())?)),
            Cardinality::Many => {
                let plan = self
                    .builder
                    .build_keyed(&info.target, &info.foreign_key, vec![key.clone()])?;
                let rows = self.store.execute_read(&plan)?;
                Ok(Related::Many(self.materialize(&plan, rows)?))
            }
        }
    }

    /// Targets by identity, answering tracked ones from the identity map.
    fn fetch_targets_by_identity(
        &mut self,
        target: &str,
        keys: Vec<Value>,
    ) -> Result<HashMap<Key, Vec<EntityRef>>> {
        let mut found: HashMap<Key, Vec<EntityRef>> = HashMap::new();
        let mut missing = Vec::new();
        for value in keys {
            let Some(key) = value.as_key() else { continue };
            match self.identity_map.get(&EntityKey::new(target, key.clone())) {
                Some(tracked) if !self.is_stale(&tracked) => {
                    found.insert(key, vec![tracked]);
                }
                _ => missing.push(value),
            }
        }
        if !missing.is_empty() {
            let shape = self.registry.describe(target)?;
            let plan = self.builder.build_keyed(target, &shape.identity, missing)?;
            let rows = self.store.execute_read(&plan)?;
            for target in self.materialize(&plan, rows)? {
                let key = entity::read(&target).identity().cloned();
                if let Some(key) = key {
                    found.insert(key, vec![target]);
                }
            }
        }
        Ok(found)
    }

    /// Collections keyed by owner identity, in one read.
    fn fetch_collections(
        &mut self,
        info: &AssociationInfo,
        owner_keys: Vec<Value>,
    ) -> Result<HashMap<Key, Vec<EntityRef>>> {
        let plan = self
            .builder
            .build_keyed(&info.target, &info.foreign_key, owner_keys)?;
        let rows = self.store.execute_read(&plan)?;
        let mut grouped: HashMap<Key, Vec<EntityRef>> = HashMap::new();
        for target in self.materialize(&plan, rows)? {
            let owner_key = entity::read(&target)
                .get(&info.foreign_key)
                .and_then(Value::as_key);
            if let Some(owner_key) = owner_key {
                grouped.entry(owner_key).or_default().push(target);
            }
        }
        Ok(grouped)
    }
}

/// The owner's slot for `info`, created as a placeholder if missing.
fn slot_mut<'a>(owner: &'a mut Entity, info: &AssociationInfo) -> &'a mut Association {
    let placeholder = Association::unresolved(info.cardinality, placeholder_key(owner, info));
    owner.association_or_insert(&info.name, placeholder)
}

/// Key a fresh placeholder resolves with: the foreign key for to-one, the
/// owner identity for to-many.
pub(crate) fn placeholder_key(owner: &Entity, info: &AssociationInfo) -> Value {
    match info.cardinality {
        Cardinality::One => owner.get(&info.foreign_key).cloned().unwrap_or(Value::Null),
        Cardinality::Many => owner
            .identity()
            .cloned()
            .map_or(Value::Null, Value::from),
    }
}
