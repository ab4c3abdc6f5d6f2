//! Session and unit of work for repokit.
//!
//! `repokit-session` is the **unit-of-work layer**. It coordinates instance
//! identity, buffered writes, paging, bulk mutation and lazy association
//! resolution on top of a [`Store`].
//!
//! # Role In The Architecture
//!
//! - **Identity map**: a single in-memory instance per (type, identity).
//! - **Pending buffer**: inserts, updates and deletes written in order on flush.
//! - **Pagination**: [`Page`] (with count) and [`Slice`] (probe row) reads.
//! - **Bulk mutation**: set-based writes with generation-based staleness.
//! - **Lazy resolution**: per-slot `Unresolved → Resolving → Resolved` state.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: no autoflush by default.
//! - **Ownership clarity**: the session owns its store handle and is used
//!   through `&mut self` by one thread.
//! - **Fail loudly**: structural errors surface before any store access;
//!   store errors propagate unchanged.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(store, registry);
//!
//! // Persist a new instance (inserted on flush)
//! let team = session.persist(Entity::new("Team").with("name", "teamA"))?;
//!
//! // Find by identity (answered from the identity map)
//! let again = session.find("Team", 1)?.unwrap();
//! assert!(Arc::ptr_eq(&team, &again));
//!
//! // Write pending changes and finish the unit of work
//! session.commit()?;
//! ```

pub mod bulk;
pub mod flush;
pub mod identity_map;
pub mod lazy;
pub mod n1_detection;
pub mod pagination;

pub use bulk::BulkOptions;
pub use flush::{PendingCounts, PendingOp, PendingOps};
pub use identity_map::{EntityKey, IdentityMap};
pub use n1_detection::{CallSite, N1QueryTracker, N1Stats};
pub use pagination::{Page, PageInfo, Slice, SliceInfo};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use repokit_core::{
    Association, Binding, Entity, EntityRef, EntityShape, Error, IdentityStrategy, Registry,
    Related, Result, Row, Value, entity,
};
use repokit_query::{COUNT_COLUMN, QueryBuilder, QueryPlan, QueryRequest, Store};

// ============================================================================
// Session Configuration
// ============================================================================

/// How reads treat instances made stale by a bulk mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReadPolicy {
    /// Reload stale instances in place.
    #[default]
    Refresh,
    /// Fail with `StaleWriteConflict`.
    Strict,
}

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether to flush before queries (not recommended for performance).
    pub auto_flush: bool,
    /// Treatment of instances a bulk write made stale.
    pub stale_reads: StaleReadPolicy,
    /// Lazy resolutions per association before an N+1 warning; `None`
    /// disables detection.
    pub n1_threshold: Option<usize>,
    /// Capacity of the plan cache; 0 disables it.
    pub plan_cache: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_flush: false,
            stale_reads: StaleReadPolicy::Refresh,
            n1_threshold: Some(3),
            plan_cache: 128,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn auto_flush(mut self, value: bool) -> Self {
        self.auto_flush = value;
        self
    }

    #[must_use]
    pub fn stale_reads(mut self, policy: StaleReadPolicy) -> Self {
        self.stale_reads = policy;
        self
    }

    #[must_use]
    pub fn n1_threshold(mut self, threshold: Option<usize>) -> Self {
        self.n1_threshold = threshold;
        self
    }

    #[must_use]
    pub fn plan_cache(mut self, capacity: usize) -> Self {
        self.plan_cache = capacity;
        self
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Session
// ============================================================================

/// The Session is the central unit-of-work manager.
///
/// It tracks instances loaded from or persisted to the store and
/// coordinates writing changes back.
pub struct Session<S: Store> {
    store: S,
    registry: Arc<Registry>,
    builder: QueryBuilder,
    config: SessionConfig,
    /// Distinguishes instances of this session from those of others.
    id: u64,
    /// Bumped by `clear`; instances bound to an older epoch are detached.
    epoch: u64,
    /// Bulk-mutation counter per entity type.
    generations: HashMap<String, u64>,
    identity_map: IdentityMap,
    pending: PendingOps,
    in_unit_of_work: bool,
    n1_tracker: Option<N1QueryTracker>,
}

impl<S: Store> Session<S> {
    pub fn new(store: S, registry: Arc<Registry>) -> Self {
        Self::with_config(store, registry, SessionConfig::default())
    }

    pub fn with_config(store: S, registry: Arc<Registry>, config: SessionConfig) -> Self {
        let mut builder = QueryBuilder::new(Arc::clone(&registry));
        if config.plan_cache > 0 {
            builder = builder.with_cache(config.plan_cache);
        }
        let n1_tracker = config
            .n1_threshold
            .map(|t| N1QueryTracker::new().with_threshold(t));
        Self {
            store,
            registry,
            builder,
            config,
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            epoch: 0,
            generations: HashMap::new(),
            identity_map: IdentityMap::new(),
            pending: PendingOps::new(),
            in_unit_of_work: false,
            n1_tracker,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ========================================================================
    // Tracking
    // ========================================================================

    /// Track a new instance; it is inserted on the next flush.
    ///
    /// Fields are validated and coerced against the registry. A missing
    /// identity is taken from the store's sequence. Returns the tracked
    /// handle.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = entity.entity_type()))]
    pub fn persist(&mut self, mut entity: Entity) -> Result<EntityRef> {
        let registry = Arc::clone(&self.registry);
        let shape = registry.describe(entity.entity_type())?;

        let mut values = BTreeMap::new();
        for (name, value) in entity.values() {
            values.insert(name.to_string(), shape.check_value(name, value.clone())?);
        }
        for field in &shape.fields {
            if !values.contains_key(&field.name) {
                values.insert(field.name.clone(), shape.check_value(&field.name, Value::Null)?);
            }
        }

        let mut identity = values.get(&shape.identity).cloned().unwrap_or(Value::Null);
        if identity.is_null() {
            if shape.strategy == IdentityStrategy::Assigned {
                return Err(Error::InvalidRequest(format!(
                    "{} identities are assigned; set '{}' before persisting",
                    shape.name, shape.identity
                )));
            }
            let next = self.store.next_identity(&shape.name)?;
            identity = shape.check_value(&shape.identity, next)?;
            values.insert(shape.identity.clone(), identity.clone());
        }
        let key = identity.as_key().ok_or_else(|| {
            Error::InvalidRequest(format!("{} is not a valid identity", identity))
        })?;
        let entity_key = EntityKey::new(&shape.name, key.clone());
        if self.identity_map.contains(&entity_key) {
            return Err(Error::DuplicateIdentity {
                entity: shape.name.clone(),
                identity: key.to_string(),
            });
        }

        entity.set_identity(key);
        self.install(shape, &mut entity, values);
        let entity_ref = Arc::new(RwLock::new(entity));
        self.identity_map
            .insert(entity_key.clone(), Arc::clone(&entity_ref));
        self.pending.push(PendingOp::Insert {
            key: entity_key,
            entity: Arc::clone(&entity_ref),
        });
        Ok(entity_ref)
    }

    /// Look up by identity: identity map first, then a single-row read.
    #[tracing::instrument(level = "debug", skip(self, identity))]
    pub fn find(&mut self, entity: &str, identity: impl Into<Value>) -> Result<Option<EntityRef>> {
        let registry = Arc::clone(&self.registry);
        let shape = registry.describe(entity)?;
        let identity = shape.check_value(&shape.identity, identity.into())?;
        let key = identity.as_key().ok_or_else(|| {
            Error::InvalidRequest(format!("{} is not a valid identity", identity))
        })?;
        let entity_key = EntityKey::new(&shape.name, key);

        if let Some(tracked) = self.identity_map.get(&entity_key) {
            if !self.is_stale(&tracked) {
                tracing::trace!(entity = %entity_key, "Identity map hit");
                return Ok(Some(tracked));
            }
            if self.config.stale_reads == StaleReadPolicy::Strict {
                return Err(stale_conflict(&entity_key));
            }
        } else if self.pending.has_delete(&entity_key) {
            return Ok(None);
        }

        self.auto_flush()?;
        let plan = self.builder.build_find(&shape.name, &identity)?;
        let rows = self.store.execute_read(&plan)?;
        let found = self.materialize(&plan, rows)?.into_iter().next();
        if found.is_none() {
            // Deleted behind the session's back (e.g. by a bulk delete).
            if let Some(gone) = self.identity_map.remove(&entity_key) {
                entity::write(&gone).unbind();
            }
        }
        Ok(found)
    }

    /// Schedule deletion. Removing an unflushed persist cancels it.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn remove(&mut self, entity: &EntityRef) -> Result<()> {
        let key = self.tracked_key(entity)?;
        self.identity_map.remove(&key);
        if self.pending.cancel(&key) {
            tracing::debug!(entity = %key, "Cancelled pending insert");
        } else {
            let identity = Value::from(key.key.clone());
            self.pending.push(PendingOp::Delete { key, identity });
        }
        entity::write(entity).unbind();
        Ok(())
    }

    /// Schedule an update of a tracked instance's current fields.
    pub fn mark_dirty(&mut self, entity: &EntityRef) -> Result<()> {
        let key = self.tracked_key(entity)?;
        if !self.pending.has_insert(&key) && !self.pending.has_update(&key) {
            self.pending.push(PendingOp::Update {
                key,
                entity: Arc::clone(entity),
            });
        }
        Ok(())
    }

    /// True if `entity` is the instance this session tracks for its identity.
    pub fn contains(&self, entity: &EntityRef) -> bool {
        let guard = entity::read(entity);
        self.check_attached(&guard).is_ok()
            && EntityKey::of(&guard).is_some_and(|key| self.identity_map.tracks(&key, entity))
    }

    /// True if a bulk write touched the instance's type after it was loaded.
    pub fn is_stale(&self, entity: &EntityRef) -> bool {
        let guard = entity::read(entity);
        guard
            .binding()
            .is_some_and(|b| b.generation < self.generation(guard.entity_type()))
    }

    /// Write pending operations in buffering order.
    ///
    /// On failure the failed operation and everything after it stay pending.
    #[tracing::instrument(level = "debug", skip(self), fields(pending = self.pending.len()))]
    pub fn flush(&mut self) -> Result<()> {
        let mut written = 0usize;
        while let Some(op) = self.pending.front() {
            let is_update = matches!(op, PendingOp::Update { .. });
            if let PendingOp::Update { key, entity } = op {
                if self.config.stale_reads == StaleReadPolicy::Strict && self.is_stale(entity) {
                    return Err(stale_conflict(key));
                }
            }
            let statement = op.statement(&self.builder)?;
            let affected = self.store.execute_write(&statement)?;
            if is_update && affected == 0 {
                return Err(stale_conflict(op.key()));
            }
            self.pending.pop_front();
            written += 1;
        }
        if written > 0 {
            tracing::debug!(written, "Flushed pending writes");
        }
        Ok(())
    }

    /// Discard the identity map and pending writes without flushing.
    ///
    /// Every previously returned instance becomes detached.
    pub fn clear(&mut self) {
        let tracked = self.identity_map.len();
        let discarded = self.pending.len();
        self.identity_map.clear();
        self.pending.clear();
        self.epoch += 1;
        tracing::debug!(tracked, discarded, epoch = self.epoch, "Session cleared");
    }

    pub fn tracked_count(&self) -> usize {
        self.identity_map.len()
    }

    pub fn pending_counts(&self) -> PendingCounts {
        self.pending.counts()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Run a request and materialize tracked instances.
    ///
    /// Unflushed writes are not visible unless `auto_flush` is set.
    #[tracing::instrument(level = "debug", skip(self, request), fields(entity = request.entity()))]
    pub fn query(&mut self, request: &QueryRequest) -> Result<Vec<EntityRef>> {
        if request.get_projection().is_some() {
            return Err(Error::InvalidRequest(
                "projected requests return rows; use Session::project".to_string(),
            ));
        }
        self.auto_flush()?;
        let plan = self.builder.build(request)?;
        let rows = self.store.execute_read(&plan)?;
        let found = self.materialize(&plan, rows)?;
        tracing::debug!(plan = %plan, results = found.len(), "Query executed");
        Ok(found)
    }

    /// At most one result; more than one is `NonUniqueResult`.
    pub fn find_one(&mut self, request: &QueryRequest) -> Result<Option<EntityRef>> {
        let mut found = self.query(request)?;
        if found.len() > 1 {
            return Err(Error::NonUniqueResult {
                entity: request.entity().to_string(),
                count: found.len(),
            });
        }
        Ok(found.pop())
    }

    /// Exactly one result; none is `NotFound`.
    pub fn get_one(&mut self, request: &QueryRequest) -> Result<EntityRef> {
        self.find_one(request)?.ok_or_else(|| Error::NotFound {
            entity: request.entity().to_string(),
            detail: request.get_predicate().to_string(),
        })
    }

    /// Count of stored rows matching the request's predicate.
    pub fn count(&mut self, request: &QueryRequest) -> Result<u64> {
        self.auto_flush()?;
        let plan = self.builder.build_count(request)?;
        let rows = self.store.execute_read(&plan)?;
        let row = rows.first().ok_or_else(|| {
            Error::Custom(format!("count of {} returned no rows", request.entity()))
        })?;
        let count: i64 = row.get_named(COUNT_COLUMN)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Rows of the projected columns (`field` or `association.field`).
    #[tracing::instrument(level = "debug", skip(self, request), fields(entity = request.entity()))]
    pub fn project(&mut self, request: &QueryRequest) -> Result<Vec<Row>> {
        if request.get_projection().is_none() {
            return Err(Error::InvalidRequest(format!(
                "projection of {} names no columns",
                request.entity()
            )));
        }
        self.auto_flush()?;
        let plan = self.builder.build(request)?;
        self.store.execute_read(&plan)
    }

    pub fn find_all(&mut self, entity: &str) -> Result<Vec<EntityRef>> {
        self.query(&QueryRequest::new(entity))
    }

    // ========================================================================
    // Unit of Work
    // ========================================================================

    /// Begin a unit of work on the store.
    pub fn begin(&mut self) -> Result<()> {
        if self.in_unit_of_work {
            return Ok(());
        }
        self.store.begin_unit_of_work()?;
        self.in_unit_of_work = true;
        Ok(())
    }

    /// Flush, then make the unit of work durable.
    pub fn commit(&mut self) -> Result<()> {
        self.flush()?;
        if self.in_unit_of_work {
            self.store.commit()?;
            self.in_unit_of_work = false;
        }
        Ok(())
    }

    /// Discard the unit of work and clear the session.
    pub fn rollback(&mut self) -> Result<()> {
        let result = if self.in_unit_of_work {
            self.in_unit_of_work = false;
            self.store.rollback()
        } else {
            Ok(())
        };
        self.clear();
        result
    }

    pub fn in_unit_of_work(&self) -> bool {
        self.in_unit_of_work
    }

    // ========================================================================
    // N+1 Detection
    // ========================================================================

    pub fn enable_n1_detection(&mut self, threshold: usize) {
        self.n1_tracker = Some(N1QueryTracker::new().with_threshold(threshold));
    }

    pub fn disable_n1_detection(&mut self) {
        self.n1_tracker = None;
    }

    pub fn n1_tracker(&self) -> Option<&N1QueryTracker> {
        self.n1_tracker.as_ref()
    }

    #[must_use]
    pub fn n1_stats(&self) -> Option<N1Stats> {
        self.n1_tracker.as_ref().map(N1QueryTracker::stats)
    }

    pub fn reset_n1_tracking(&mut self) {
        if let Some(tracker) = &mut self.n1_tracker {
            tracker.reset();
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn auto_flush(&mut self) -> Result<()> {
        if self.config.auto_flush && !self.pending.is_empty() {
            self.flush()?;
        }
        Ok(())
    }

    fn generation(&self, entity: &str) -> u64 {
        self.generations.get(entity).copied().unwrap_or(0)
    }

    fn bump_generation(&mut self, entity: &str) -> u64 {
        let generation = self.generations.entry(entity.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn binding(&self, entity: &str) -> Binding {
        Binding {
            session: self.id,
            epoch: self.epoch,
            generation: self.generation(entity),
        }
    }

    fn check_attached(&self, entity: &Entity) -> Result<()> {
        match entity.binding() {
            Some(b) if b.session == self.id && b.epoch == self.epoch => Ok(()),
            _ => Err(Error::Detached {
                entity: entity.entity_type().to_string(),
                identity: entity
                    .identity()
                    .map_or_else(|| "<new>".to_string(), ToString::to_string),
            }),
        }
    }

    /// Key of an attached instance that this session actually tracks.
    fn tracked_key(&self, entity: &EntityRef) -> Result<EntityKey> {
        let guard = entity::read(entity);
        self.check_attached(&guard)?;
        match EntityKey::of(&guard) {
            Some(key) if self.identity_map.tracks(&key, entity) => Ok(key),
            _ => Err(Error::Detached {
                entity: guard.entity_type().to_string(),
                identity: guard
                    .identity()
                    .map_or_else(|| "<new>".to_string(), ToString::to_string),
            }),
        }
    }

    /// Set fields, fresh association placeholders and the current binding.
    fn install(&self, shape: &EntityShape, entity: &mut Entity, values: BTreeMap<String, Value>) {
        entity.replace_values(values);
        for assoc in &shape.associations {
            let key = lazy::placeholder_key(entity, assoc);
            entity.set_association(&assoc.name, Association::unresolved(assoc.cardinality, key));
        }
        entity.bind(self.binding(&shape.name));
    }

    /// Resolve one stored row to its tracked instance.
    ///
    /// Rows for an already tracked identity return that instance; stale
    /// instances are refreshed in place (or rejected under `Strict`).
    /// Rows whose identity has a pending delete yield `None`.
    ///
    /// A stale instance with a pending update is never refreshed; the read
    /// fails with `StaleWriteConflict` instead.
    fn track(
        &mut self,
        shape: &EntityShape,
        values: BTreeMap<String, Value>,
    ) -> Result<Option<EntityRef>> {
        let identity = values.get(&shape.identity).cloned().unwrap_or(Value::Null);
        let key = identity.as_key().ok_or_else(|| {
            Error::InvalidRequest(format!("{} row without identity", shape.name))
        })?;
        let entity_key = EntityKey::new(&shape.name, key.clone());

        if self.pending.has_delete(&entity_key) {
            tracing::trace!(entity = %entity_key, "Skipped row pending deletion");
            return Ok(None);
        }

        if let Some(existing) = self.identity_map.get(&entity_key) {
            if self.is_stale(&existing) {
                if self.config.stale_reads == StaleReadPolicy::Strict
                    || self.pending.has_update(&entity_key)
                {
                    return Err(stale_conflict(&entity_key));
                }
                self.install(shape, &mut entity::write(&existing), values);
                tracing::debug!(entity = %entity_key, "Refreshed stale instance");
            }
            return Ok(Some(existing));
        }

        let mut entity = Entity::new(&shape.name);
        entity.set_identity(key);
        self.install(shape, &mut entity, values);
        Ok(Some(
            self.identity_map
                .insert(entity_key, Arc::new(RwLock::new(entity))),
        ))
    }

    /// Turn the rows of an entity plan into tracked instances, filling
    /// fetched joins and running batched follow-ups.
    fn materialize(&mut self, plan: &QueryPlan, rows: Vec<Row>) -> Result<Vec<EntityRef>> {
        let registry = Arc::clone(&self.registry);
        let shape = registry.describe(&plan.entity)?;
        let mut found = Vec::with_capacity(rows.len());

        for row in &rows {
            let values = plan
                .fields
                .iter()
                .map(|f| (f.clone(), row.get_by_name(f).cloned().unwrap_or(Value::Null)))
                .collect();
            let Some(owner) = self.track(shape, values)? else {
                continue;
            };

            for join in plan.fetched_joins() {
                let target_shape = registry.describe(&join.target)?;
                let target_values: BTreeMap<String, Value> = row
                    .prefixed(&join.association)
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect();
                let target = match target_values.get(&join.target_identity) {
                    Some(id) if !id.is_null() => self.track(target_shape, target_values)?,
                    _ => None,
                };
                let key = row
                    .get_by_name(&join.foreign_key)
                    .cloned()
                    .unwrap_or(Value::Null);
                entity::write(&owner).set_association(
                    &join.association,
                    Association::resolved(key, Related::One(target)),
                );
            }
            found.push(owner);
        }

        for follow_up in &plan.follow_ups {
            self.resolve_all(&found, &follow_up.association)?;
        }
        Ok(found)
    }
}

fn stale_conflict(key: &EntityKey) -> Error {
    Error::StaleWriteConflict {
        entity: key.entity.clone(),
        identity: key.key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repokit_core::{AssociationInfo, ErrorKind, FieldInfo, FieldType};
    use repokit_memory::MemoryStore;
    use repokit_query::{Assignment, OrderBy, Window, field};

    fn registry() -> Arc<Registry> {
        Arc::new(
            Registry::builder()
                .entity(
                    EntityShape::new("Team", "id", FieldType::BigInt)
                        .field(FieldInfo::new("name", FieldType::Text))
                        .association(AssociationInfo::many("members", "Member", "team_id")),
                )
                .entity(
                    EntityShape::new("Member", "id", FieldType::BigInt)
                        .field(FieldInfo::new("username", FieldType::Text))
                        .field(FieldInfo::new("age", FieldType::Integer))
                        .field(FieldInfo::new("team_id", FieldType::BigInt).nullable(true))
                        .association(AssociationInfo::one("team", "Team", "team_id")),
                )
                .build()
                .unwrap(),
        )
    }

    const SEED: &str = r#"{
        "Team": [{"id": 1, "name": "teamA"}, {"id": 2, "name": "teamB"}],
        "Member": [
            {"id": 1, "username": "member1", "age": 10, "team_id": 1},
            {"id": 2, "username": "member2", "age": 20, "team_id": 1},
            {"id": 3, "username": "member3", "age": 30, "team_id": 2},
            {"id": 4, "username": "member4", "age": 40}
        ]
    }"#;

    fn seeded(config: SessionConfig) -> (Arc<MemoryStore>, Session<Arc<MemoryStore>>) {
        let registry = registry();
        let store = Arc::new(MemoryStore::from_json(Arc::clone(&registry), SEED).unwrap());
        let session = Session::with_config(Arc::clone(&store), registry, config);
        (store, session)
    }

    fn empty() -> (Arc<MemoryStore>, Session<Arc<MemoryStore>>) {
        let registry = registry();
        let store = Arc::new(MemoryStore::new(Arc::clone(&registry)));
        let session = Session::new(Arc::clone(&store), registry);
        (store, session)
    }

    fn username(e: &EntityRef) -> String {
        entity::read(e).get_as("username").unwrap()
    }

    #[test]
    fn persist_then_find_returns_same_instance() {
        let (store, mut session) = empty();
        let member = session
            .persist(Entity::new("Member").with("username", "memberA").with("age", 10))
            .unwrap();
        let id = entity::read(&member).get("id").cloned().unwrap();
        assert_eq!(id, Value::BigInt(1));

        let found = session.find("Member", id).unwrap().unwrap();
        assert!(Arc::ptr_eq(&member, &found));
        assert_eq!(store.stats().reads, 0);
        assert_eq!(store.row_count("Member"), 0);

        session.flush().unwrap();
        assert_eq!(store.row_count("Member"), 1);
        assert_eq!(session.pending_counts().total(), 0);
    }

    #[test]
    fn persist_validates_fields() {
        let (_, mut session) = empty();
        let err = session
            .persist(Entity::new("Member").with("nickname", "x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownField);

        let err = session
            .persist(Entity::new("Member").with("username", "x").with("age", "ten"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);

        // `age` is not nullable
        let err = session
            .persist(Entity::new("Member").with("username", "x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);

        let err = session.persist(Entity::new("Order")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownEntityType);
        assert_eq!(session.tracked_count(), 0);
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let (_, mut session) = seeded(SessionConfig::default());
        session.find("Team", 1).unwrap().unwrap();
        let err = session
            .persist(Entity::new("Team").with("id", 1).with("name", "teamC"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateIdentity);
    }

    #[test]
    fn find_missing_is_none() {
        let (store, mut session) = seeded(SessionConfig::default());
        assert!(session.find("Member", 99).unwrap().is_none());
        assert_eq!(store.stats().reads, 1);
        let err = session.find("Member", "abc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn remove_cancels_pending_persist() {
        let (store, mut session) = empty();
        let team = session.persist(Entity::new("Team").with("name", "teamA")).unwrap();
        session.remove(&team).unwrap();
        assert_eq!(session.pending_counts().total(), 0);
        session.flush().unwrap();
        assert_eq!(store.stats().writes, 0);

        let err = session.remove(&team).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Detached);
    }

    #[test]
    fn remove_tracked_deletes_on_flush() {
        let (store, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 4).unwrap().unwrap();
        session.remove(&member).unwrap();
        assert!(session.find("Member", 4).unwrap().is_none());
        assert_eq!(store.row_count("Member"), 4);
        session.flush().unwrap();
        assert_eq!(store.row_count("Member"), 3);
    }

    #[test]
    fn removed_instance_is_not_tracked_again_by_queries() {
        let (store, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 1).unwrap().unwrap();
        session.remove(&member).unwrap();

        let all = session.find_all("Member").unwrap();
        assert_eq!(all.iter().map(username).collect::<Vec<_>>(), ["member2", "member3", "member4"]);
        assert!(session.find("Member", 1).unwrap().is_none());
        assert_eq!(session.tracked_count(), 3);

        session.flush().unwrap();
        assert_eq!(store.row_count("Member"), 3);
        assert!(session.find("Member", 1).unwrap().is_none());
    }

    #[test]
    fn stale_instance_with_pending_edit_is_not_refreshed() {
        let (store, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 2).unwrap().unwrap();
        session
            .bulk_update(
                "Member",
                &field("age").ge(20).into(),
                &[Assignment::add("age", 1)],
                BulkOptions::default(),
            )
            .unwrap();
        entity::write(&member).set("username", "renamed");
        session.mark_dirty(&member).unwrap();

        assert_eq!(
            session.find_all("Member").unwrap_err().kind(),
            ErrorKind::StaleWriteConflict
        );
        assert_eq!(
            session.find("Member", 2).unwrap_err().kind(),
            ErrorKind::StaleWriteConflict
        );
        assert_eq!(username(&member), "renamed");

        session.flush().unwrap();
        assert_eq!(
            store.peek("Member", &Value::BigInt(2), "username"),
            Some(Value::Text("renamed".to_string()))
        );
    }

    #[test]
    fn mark_dirty_writes_current_fields() {
        let (store, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 1).unwrap().unwrap();
        entity::write(&member).set("age", 11);
        session.mark_dirty(&member).unwrap();
        session.mark_dirty(&member).unwrap();
        assert_eq!(session.pending_counts().updates, 1);
        session.flush().unwrap();
        assert_eq!(store.peek("Member", &Value::BigInt(1), "age"), Some(Value::Int(11)));
    }

    #[test]
    fn failed_flush_keeps_remaining_ops() {
        let (store, mut session) = empty();
        for name in ["teamA", "teamB", "teamC"] {
            session.persist(Entity::new("Team").with("name", name)).unwrap();
        }
        store.fail_after_writes(Some(1));
        let err = session.flush().unwrap_err();
        assert!(err.is_store_error());
        assert_eq!(store.row_count("Team"), 1);
        assert_eq!(session.pending_counts().inserts, 2);

        store.fail_after_writes(None);
        session.flush().unwrap();
        assert_eq!(store.row_count("Team"), 3);
    }

    #[test]
    fn clear_detaches_instances() {
        let (_, mut session) = seeded(SessionConfig::default());
        let before = session.find("Member", 1).unwrap().unwrap();
        session.clear();
        assert!(!session.contains(&before));
        let err = session.resolve(&before, "team").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Detached);

        let after = session.find("Member", 1).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(session.contains(&after));
    }

    #[test]
    fn instances_from_another_session_are_detached() {
        let registry = registry();
        let store = Arc::new(MemoryStore::from_json(Arc::clone(&registry), SEED).unwrap());
        let mut first = Session::new(Arc::clone(&store), Arc::clone(&registry));
        let mut second = Session::new(Arc::clone(&store), registry);
        let member = first.find("Member", 1).unwrap().unwrap();
        assert_eq!(
            second.resolve(&member, "team").unwrap_err().kind(),
            ErrorKind::Detached
        );
    }

    #[test]
    fn query_rows_resolve_to_tracked_instances() {
        let (_, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 2).unwrap().unwrap();
        let found = session
            .query(&QueryRequest::new("Member").filter(field("age").ge(20)))
            .unwrap();
        assert_eq!(found.len(), 3);
        assert!(Arc::ptr_eq(&found[0], &member));
    }

    #[test]
    fn unflushed_writes_need_auto_flush() {
        let (_, mut session) = seeded(SessionConfig::default());
        session
            .persist(Entity::new("Team").with("name", "teamC"))
            .unwrap();
        assert_eq!(session.count(&QueryRequest::new("Team")).unwrap(), 2);

        let (_, mut session) = seeded(SessionConfig::default().auto_flush(true));
        session
            .persist(Entity::new("Team").with("name", "teamC"))
            .unwrap();
        assert_eq!(session.count(&QueryRequest::new("Team")).unwrap(), 3);
    }

    #[test]
    fn single_result_shapes() {
        let (_, mut session) = seeded(SessionConfig::default());
        let none = QueryRequest::new("Member").filter(field("username").eq("nobody"));
        assert!(session.find_one(&none).unwrap().is_none());
        assert_eq!(session.get_one(&none).unwrap_err().kind(), ErrorKind::NotFound);

        let many = QueryRequest::new("Member").filter(field("team_id").eq(1));
        assert_eq!(
            session.find_one(&many).unwrap_err().kind(),
            ErrorKind::NonUniqueResult
        );

        let one = QueryRequest::new("Member").filter(field("username").eq("member3"));
        assert_eq!(username(&session.get_one(&one).unwrap()), "member3");
    }

    #[test]
    fn projection_rows() {
        let (_, mut session) = seeded(SessionConfig::default());
        let rows = session
            .project(
                &QueryRequest::new("Member")
                    .filter(field("team_id").is_not_null())
                    .project(["username", "team.name"]),
            )
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].get_named::<String>("team.name").unwrap(), "teamB");
        assert_eq!(session.tracked_count(), 0);

        let err = session.project(&QueryRequest::new("Member")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn bulk_update_marks_instances_stale() {
        let (store, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 4).unwrap().unwrap();
        let affected = session
            .bulk_update(
                "Member",
                &field("age").ge(20).into(),
                &[Assignment::add("age", 1)],
                BulkOptions::default(),
            )
            .unwrap();
        assert_eq!(affected, 3);
        assert!(session.is_stale(&member));
        assert_eq!(entity::read(&member).get_as::<i64>("age").unwrap(), 40);

        let reads = store.stats().reads;
        let refreshed = session.find("Member", 4).unwrap().unwrap();
        assert!(Arc::ptr_eq(&member, &refreshed));
        assert_eq!(entity::read(&member).get_as::<i64>("age").unwrap(), 41);
        assert!(!session.is_stale(&member));
        assert_eq!(store.stats().reads, reads + 1);
    }

    #[test]
    fn strict_policy_rejects_stale_reads_and_writes() {
        let (_, mut session) =
            seeded(SessionConfig::default().stale_reads(StaleReadPolicy::Strict));
        let member = session.find("Member", 4).unwrap().unwrap();
        entity::write(&member).set("username", "renamed");
        session
            .bulk_update(
                "Member",
                &field("age").ge(20).into(),
                &[Assignment::add("age", 1)],
                BulkOptions::default(),
            )
            .unwrap();

        assert_eq!(
            session.find("Member", 4).unwrap_err().kind(),
            ErrorKind::StaleWriteConflict
        );
        session.mark_dirty(&member).unwrap();
        assert_eq!(session.flush().unwrap_err().kind(), ErrorKind::StaleWriteConflict);
    }

    #[test]
    fn auto_reconcile_clears_the_session() {
        let (_, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 2).unwrap().unwrap();
        session
            .bulk_update(
                "Member",
                &field("age").ge(20).into(),
                &[Assignment::add("age", 1)],
                BulkOptions::new().auto_reconcile(true),
            )
            .unwrap();
        assert_eq!(session.tracked_count(), 0);
        assert!(!session.contains(&member));
        let fresh = session.find("Member", 2).unwrap().unwrap();
        assert_eq!(entity::read(&fresh).get_as::<i64>("age").unwrap(), 21);
    }

    #[test]
    fn bulk_update_flushes_pending_writes_first() {
        let (store, mut session) = seeded(SessionConfig::default());
        session
            .persist(Entity::new("Member").with("username", "member5").with("age", 50))
            .unwrap();
        let affected = session
            .bulk_update(
                "Member",
                &field("age").ge(20).into(),
                &[Assignment::add("age", 1)],
                BulkOptions::default(),
            )
            .unwrap();
        assert_eq!(affected, 4);
        assert_eq!(store.peek("Member", &Value::BigInt(5), "age"), Some(Value::Int(51)));
    }

    #[test]
    fn bulk_delete_then_find_drops_tracked_instance() {
        let (_, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 1).unwrap().unwrap();
        let affected = session
            .bulk_delete("Member", &field("age").lt(15).into(), BulkOptions::default())
            .unwrap();
        assert_eq!(affected, 1);
        assert!(session.find("Member", 1).unwrap().is_none());
        assert!(!session.contains(&member));
    }

    #[test]
    fn lazy_resolution_happens_once() {
        let (store, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 1).unwrap().unwrap();
        assert!(!entity::read(&member).association("team").unwrap().is_resolved());

        store.reset_stats();
        let team = session.resolve(&member, "team").unwrap();
        let team = team.as_one().unwrap();
        assert_eq!(entity::read(team).get_as::<String>("name").unwrap(), "teamA");
        session.resolve(&member, "team").unwrap();
        assert_eq!(store.stats().reads_of("Team"), 1);

        let same = session.find("Team", 1).unwrap().unwrap();
        assert!(Arc::ptr_eq(team, &same));
    }

    #[test]
    fn null_foreign_key_resolves_to_none() {
        let (store, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 4).unwrap().unwrap();
        store.reset_stats();
        assert!(session.resolve(&member, "team").unwrap().as_one().is_none());
        assert_eq!(store.stats().reads, 0);
    }

    #[test]
    fn collection_resolution() {
        let (_, mut session) = seeded(SessionConfig::default());
        let team = session.find("Team", 1).unwrap().unwrap();
        let members = session.resolve(&team, "members").unwrap();
        let names: Vec<String> = members.as_many().iter().map(username).collect();
        assert_eq!(names, vec!["member1", "member2"]);
    }

    #[test]
    fn resolution_in_progress_is_rejected() {
        let (_, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 1).unwrap().unwrap();
        entity::write(&member)
            .association_mut("team")
            .unwrap()
            .begin_resolve("Member", "team")
            .unwrap();
        assert_eq!(
            session.resolve(&member, "team").unwrap_err().kind(),
            ErrorKind::ResolutionInProgress
        );
    }

    #[test]
    fn failures_are_cached_until_reset() {
        let (store, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 1).unwrap().unwrap();
        store.set_available(false);
        assert!(session.resolve(&member, "team").unwrap_err().is_store_error());
        store.set_available(true);
        assert!(session.resolve(&member, "team").unwrap_err().is_store_error());

        entity::write(&member).association_mut("team").unwrap().reset();
        assert!(session.resolve(&member, "team").unwrap().as_one().is_some());
    }

    #[test]
    fn unknown_association() {
        let (_, mut session) = seeded(SessionConfig::default());
        let member = session.find("Member", 1).unwrap().unwrap();
        assert_eq!(
            session.resolve(&member, "orders").unwrap_err().kind(),
            ErrorKind::UnknownField
        );
    }

    #[test]
    fn resolve_all_uses_one_read() {
        let (store, mut session) = seeded(SessionConfig::default());
        let members = session
            .query(&QueryRequest::new("Member").filter(field("team_id").is_not_null()))
            .unwrap();
        store.reset_stats();
        session.resolve_all(&members, "team").unwrap();
        assert_eq!(store.stats().reads, 1);
        for m in &members {
            assert!(entity::read(m).association("team").unwrap().is_resolved());
        }
        session.resolve_all(&members, "team").unwrap();
        assert_eq!(store.stats().reads, 1);
    }

    #[test]
    fn fetch_hints_avoid_secondary_reads() {
        let (store, mut session) = seeded(SessionConfig::default());
        let members = session
            .query(
                &QueryRequest::new("Member")
                    .filter(field("team_id").is_not_null())
                    .fetch("team"),
            )
            .unwrap();
        for m in &members {
            session.resolve(m, "team").unwrap();
        }
        assert_eq!(store.stats().reads, 1);

        session.clear();
        store.reset_stats();
        let teams = session
            .query(&QueryRequest::new("Team").fetch("members"))
            .unwrap();
        assert_eq!(store.stats().reads, 2);
        assert_eq!(session.resolve(&teams[1], "members").unwrap().len(), 1);
        assert_eq!(store.stats().reads, 2);
    }

    #[test]
    fn n1_tracker_counts_lazy_loads() {
        let (_, mut session) = seeded(SessionConfig::default());
        let members = session
            .query(&QueryRequest::new("Member").filter(field("team_id").is_not_null()))
            .unwrap();
        for m in &members {
            session.resolve(m, "team").unwrap();
        }
        let stats = session.n1_stats().unwrap();
        assert_eq!(stats.total_loads, 3);
        assert_eq!(stats.potential_n1, 1);

        let sites = session.n1_tracker().unwrap().call_sites();
        assert_eq!(sites.len(), 3);
        assert!(sites.iter().all(|site| site.file.ends_with("lib.rs")));

        session.disable_n1_detection();
        assert!(session.n1_stats().is_none());
    }

    #[test]
    fn page_and_slice() {
        let (_, mut session) = empty();
        for i in 1..=5 {
            session
                .persist(
                    Entity::new("Member")
                        .with("username", format!("member{i}"))
                        .with("age", 10),
                )
                .unwrap();
        }
        session.flush().unwrap();

        let request = QueryRequest::new("Member")
            .filter(field("age").eq(10))
            .order_by(OrderBy::desc("username"))
            .window(0, 3);
        let page = session.page(&request).unwrap();
        assert_eq!(page.number_of_elements(), 3);
        assert_eq!(page.total_elements(), 5);
        assert_eq!(page.total_pages(), 2);
        assert!(page.is_first());
        assert!(page.has_next());
        assert_eq!(username(&page.content()[0]), "member5");

        let slice = session.slice(&request).unwrap();
        assert_eq!(slice.number_of_elements(), 3);
        assert!(slice.has_next());
        let slice = session.slice(&request.with_window(Some(Window::new(3, 3)))).unwrap();
        assert_eq!(slice.number_of_elements(), 2);
        assert!(!slice.has_next());

        let err = session.page(&request.with_window(Some(Window::new(0, 0))));
        assert_eq!(err.unwrap_err().kind(), ErrorKind::InvalidRequest);
        let err = session.slice(&QueryRequest::new("Member"));
        assert_eq!(err.unwrap_err().kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn rollback_discards_unit_of_work() {
        let (store, mut session) = seeded(SessionConfig::default());
        session.begin().unwrap();
        assert!(session.in_unit_of_work());
        session.persist(Entity::new("Team").with("name", "teamC")).unwrap();
        session.flush().unwrap();
        assert_eq!(store.row_count("Team"), 3);
        session.rollback().unwrap();
        assert_eq!(store.row_count("Team"), 2);
        assert_eq!(session.tracked_count(), 0);

        session.begin().unwrap();
        session.persist(Entity::new("Team").with("name", "teamD")).unwrap();
        session.commit().unwrap();
        assert!(!session.in_unit_of_work());
        assert_eq!(store.row_count("Team"), 3);
    }
}
