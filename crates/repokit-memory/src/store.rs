//! The in-memory `Store` implementation.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use repokit_core::{
    ColumnInfo, Error, Key, Registry, Result, Row, StoreError, StoreErrorKind, Value,
};
use repokit_query::{
    COUNT_COLUMN, Dialect, QueryPlan, Selection, Store, WriteStatement, render_read, render_write,
};

use crate::table::{Record, Table};

/// Seed records per entity type, as raw JSON objects.
pub type SeedRecords = BTreeMap<String, Vec<serde_json::Map<String, serde_json::Value>>>;

/// Read/write counters, used to observe round trips.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// `execute_read` calls
    pub reads: u64,
    /// Successful `execute_write` calls
    pub writes: u64,
    /// `execute_read` calls per root entity type
    pub reads_by_entity: BTreeMap<String, u64>,
}

impl StoreStats {
    /// Reads whose root entity was `entity`.
    pub fn reads_of(&self, entity: &str) -> u64 {
        self.reads_by_entity.get(entity).copied().unwrap_or(0)
    }
}

/// Inner state, protected by a mutex.
#[derive(Debug, Default)]
struct MemoryInner {
    tables: HashMap<String, Table>,
    /// Tables as of `begin_unit_of_work`, restored on rollback.
    snapshot: Option<HashMap<String, Table>>,
    stats: StoreStats,
    /// Writes still allowed before every write fails.
    writes_left: Option<u64>,
    available: bool,
}

/// An in-memory store over registry-described tables.
///
/// Reads evaluate plans directly: predicate filtering (with `LIKE`), left
/// joins, sorting, windowing, projections and counts. Units of work are
/// snapshot-based. Fault injection simulates an unreachable store.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    registry: Arc<Registry>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                available: true,
                ..MemoryInner::default()
            }),
            registry,
        }
    }

    /// Create a store seeded from JSON: `{"Entity": [{field: value, ...}, ...]}`.
    pub fn from_json(registry: Arc<Registry>, json: &str) -> Result<Self> {
        let store = Self::new(registry);
        store.seed(serde_json::from_str(json)?)?;
        Ok(store)
    }

    /// Insert seed records, checked against the registry.
    ///
    /// Records without an identity get the next sequence value.
    pub fn seed(&self, records: SeedRecords) -> Result<()> {
        let mut inner = self.lock();
        for (entity, rows) in records {
            let shape = self.registry.describe(&entity)?;
            let table = inner.tables.entry(shape.name.clone()).or_default();
            for raw in rows {
                let mut record = Record::new();
                for (name, json) in raw {
                    let value = shape.check_value(&name, Value::from_json(json))?;
                    record.insert(name, value);
                }
                for f in &shape.fields {
                    if !record.contains_key(&f.name) {
                        let value = shape.check_value(&f.name, Value::Null)?;
                        record.insert(f.name.clone(), value);
                    }
                }
                let key = match record.get(&shape.identity).and_then(Value::as_key) {
                    Some(key) => key,
                    None => {
                        let id = table.next_identity();
                        record.insert(shape.identity.clone(), Value::BigInt(id));
                        Key::Int(id)
                    }
                };
                if !table.insert(key.clone(), record) {
                    return Err(constraint(format!(
                        "duplicate {} identity {} in seed data",
                        entity, key
                    )));
                }
            }
        }
        tracing::debug!(tables = inner.tables.len(), "Seeded memory store");
        Ok(())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current counters.
    pub fn stats(&self) -> StoreStats {
        self.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.lock().stats = StoreStats::default();
    }

    /// Allow `n` more successful writes, then fail every write with
    /// `StoreUnavailable`. `None` lifts the limit.
    pub fn fail_after_writes(&self, n: Option<u64>) {
        self.lock().writes_left = n;
    }

    /// Make every operation fail (`false`) or succeed again (`true`).
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Number of rows stored for `entity`.
    pub fn row_count(&self, entity: &str) -> usize {
        self.lock().tables.get(entity).map_or(0, Table::len)
    }

    /// Stored value of one field, bypassing any session.
    pub fn peek(&self, entity: &str, identity: &Value, field: &str) -> Option<Value> {
        let key = identity.as_key()?;
        self.lock()
            .tables
            .get(entity)?
            .get(&key)?
            .get(field)
            .cloned()
    }
}

fn unavailable() -> Error {
    Error::Store(StoreError::unavailable("memory store is unavailable"))
}

fn constraint(message: String) -> Error {
    Error::Store(StoreError::new(StoreErrorKind::Constraint, message))
}

fn identity_key(entity: &str, identity: &Value) -> Result<Key> {
    identity.as_key().ok_or_else(|| {
        Error::InvalidRequest(format!(
            "{} identity {} is not a valid key",
            entity, identity
        ))
    })
}

/// A root record widened with `association.field` columns from its joins.
type Wide<'a> = HashMap<String, &'a Value>;

fn widen<'a>(
    plan: &QueryPlan,
    record: &'a Record,
    tables: &'a HashMap<String, Table>,
) -> Wide<'a> {
    static NULL: Value = Value::Null;
    let mut wide: Wide<'a> = record.iter().map(|(k, v)| (k.clone(), v)).collect();
    for join in &plan.joins {
        let target = record
            .get(&join.foreign_key)
            .and_then(Value::as_key)
            .and_then(|key| tables.get(&join.target)?.get(&key));
        for f in &join.fields {
            let value = target.and_then(|r| r.get(f)).unwrap_or(&NULL);
            wide.insert(format!("{}.{}", join.association, f), value);
        }
    }
    wide
}

fn compare_rows(plan: &QueryPlan, a: &Wide<'_>, b: &Wide<'_>) -> Ordering {
    static NULL: Value = Value::Null;
    for key in &plan.order {
        let left = a.get(&key.field).copied().unwrap_or(&NULL);
        let right = b.get(&key.field).copied().unwrap_or(&NULL);
        let ord = left.sort_cmp(right);
        let ord = if key.is_desc() { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl MemoryInner {
    fn check_available(&self) -> Result<()> {
        if self.available { Ok(()) } else { Err(unavailable()) }
    }

    fn read(&mut self, plan: &QueryPlan) -> Result<Vec<Row>> {
        self.check_available()?;
        self.stats.reads += 1;
        *self
            .stats
            .reads_by_entity
            .entry(plan.entity.clone())
            .or_insert(0) += 1;

        let empty = Table::new();
        let table = self.tables.get(&plan.entity).unwrap_or(&empty);
        let mut matched: Vec<Wide<'_>> = table
            .iter()
            .map(|(_, record)| widen(plan, record, &self.tables))
            .filter(|wide| plan.predicate.matches(|f| wide.get(f).copied()))
            .collect();

        if plan.is_count() {
            let columns = Arc::new(ColumnInfo::new(vec![COUNT_COLUMN.to_string()]));
            return Ok(vec![Row::with_columns(
                columns,
                vec![Value::BigInt(matched.len() as i64)],
            )]);
        }

        matched.sort_by(|a, b| compare_rows(plan, a, b));
        let (skip, take) = match plan.window {
            Some(w) => (w.offset as usize, w.limit as usize),
            None => (0, usize::MAX),
        };

        let names = match &plan.selection {
            Selection::Columns(paths) => paths.clone(),
            Selection::Entities | Selection::Count => plan.output_columns(),
        };
        let columns = Arc::new(ColumnInfo::new(names));
        Ok(matched
            .iter()
            .skip(skip)
            .take(take)
            .map(|wide| {
                let values = columns
                    .names()
                    .iter()
                    .map(|c| wide.get(c).map_or(Value::Null, |v| (*v).clone()))
                    .collect();
                Row::with_columns(Arc::clone(&columns), values)
            })
            .collect())
    }

    fn write(&mut self, registry: &Registry, statement: &WriteStatement) -> Result<u64> {
        self.check_available()?;
        match self.writes_left {
            Some(0) => return Err(unavailable()),
            Some(ref mut n) => *n -= 1,
            None => {}
        }

        let affected = match statement {
            WriteStatement::Insert { entity, values } => {
                let shape = registry.describe(entity)?;
                let record: Record = values.iter().cloned().collect();
                let identity = record.get(&shape.identity).cloned().unwrap_or(Value::Null);
                let key = identity_key(entity, &identity)?;
                let table = self.tables.entry(entity.clone()).or_default();
                if !table.insert(key, record) {
                    return Err(constraint(format!(
                        "{} with identity {} already exists",
                        entity, identity
                    )));
                }
                1
            }
            WriteStatement::Update {
                entity,
                identity,
                values,
                ..
            } => {
                let key = identity_key(entity, identity)?;
                let table = self.tables.entry(entity.clone()).or_default();
                u64::from(table.update(&key, values.iter().cloned()))
            }
            WriteStatement::Delete {
                entity, identity, ..
            } => {
                let key = identity_key(entity, identity)?;
                let table = self.tables.entry(entity.clone()).or_default();
                u64::from(table.remove(&key))
            }
            WriteStatement::BulkUpdate {
                entity,
                predicate,
                assignments,
            } => {
                // Apply to a copy so a failing assignment leaves nothing behind.
                let mut table = self.tables.get(entity).cloned().unwrap_or_default();
                let mut affected = 0;
                for (_, record) in table.iter_mut() {
                    if !predicate.matches(|f| record.get(f)) {
                        continue;
                    }
                    for assignment in assignments {
                        let current = record
                            .get(assignment.field())
                            .cloned()
                            .unwrap_or(Value::Null);
                        let next = assignment.apply(&current)?;
                        record.insert(assignment.field().to_string(), next);
                    }
                    affected += 1;
                }
                self.tables.insert(entity.clone(), table);
                affected
            }
            WriteStatement::BulkDelete { entity, predicate } => {
                let table = self.tables.entry(entity.clone()).or_default();
                let before = table.len();
                table.retain(|_, record| !predicate.matches(|f| record.get(f)));
                (before - table.len()) as u64
            }
        };
        self.stats.writes += 1;
        Ok(affected)
    }
}

impl Store for MemoryStore {
    fn execute_read(&self, plan: &QueryPlan) -> Result<Vec<Row>> {
        if tracing::enabled!(tracing::Level::TRACE) {
            let (sql, params) = render_read(plan, Dialect::Sqlite);
            tracing::trace!(sql = %sql, params = params.len(), "memory read");
        }
        let rows = self.lock().read(plan)?;
        tracing::debug!(plan = %plan, rows = rows.len(), "Executed read");
        Ok(rows)
    }

    fn execute_write(&self, statement: &WriteStatement) -> Result<u64> {
        if tracing::enabled!(tracing::Level::TRACE) {
            let (sql, params) = render_write(statement, Dialect::Sqlite);
            tracing::trace!(sql = %sql, params = params.len(), "memory write");
        }
        let affected = self.lock().write(&self.registry, statement)?;
        tracing::debug!(statement = %statement, affected, "Executed write");
        Ok(affected)
    }

    fn next_identity(&self, entity: &str) -> Result<Value> {
        let shape = self.registry.describe(entity)?;
        let mut inner = self.lock();
        inner.check_available()?;
        let id = inner.tables.entry(shape.name.clone()).or_default().next_identity();
        Ok(Value::BigInt(id))
    }

    fn begin_unit_of_work(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.check_available()?;
        if inner.snapshot.is_some() {
            return Err(Error::Store(StoreError::new(
                StoreErrorKind::Transaction,
                "Already in a unit of work",
            )));
        }
        inner.snapshot = Some(inner.tables.clone());
        tracing::debug!("BEGIN");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.check_available()?;
        if inner.snapshot.take().is_none() {
            return Err(Error::Store(StoreError::new(
                StoreErrorKind::Transaction,
                "Not in a unit of work",
            )));
        }
        tracing::debug!("COMMIT");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.snapshot.take() {
            Some(tables) => {
                inner.tables = tables;
                tracing::debug!("ROLLBACK");
                Ok(())
            }
            None => Err(Error::Store(StoreError::new(
                StoreErrorKind::Transaction,
                "Not in a unit of work",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repokit_core::{AssociationInfo, EntityShape, ErrorKind, FieldInfo, FieldType};
    use repokit_query::{Assignment, OrderBy, QueryBuilder, QueryRequest, field};

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

    fn seeded() -> (MemoryStore, QueryBuilder) {
        let registry = registry();
        let store = MemoryStore::from_json(Arc::clone(&registry), SEED).unwrap();
        (store, QueryBuilder::new(registry))
    }

    fn usernames(rows: &[Row]) -> Vec<String> {
        rows.iter()
            .map(|r| r.get_named::<String>("username").unwrap())
            .collect()
    }

    #[test]
    fn filters_sorts_and_windows() {
        let (store, builder) = seeded();
        let plan = builder
            .build(
                &QueryRequest::new("Member")
                    .filter(field("age").ge(20))
                    .order_by(OrderBy::desc("age"))
                    .window(1, 5),
            )
            .unwrap();
        let rows = store.execute_read(&plan).unwrap();
        assert_eq!(usernames(&rows), vec!["member3", "member2"]);
        assert_eq!(store.stats().reads_of("Member"), 1);
    }

    #[test]
    fn left_join_fills_missing_targets_with_null() {
        let (store, builder) = seeded();
        let plan = builder
            .build(&QueryRequest::new("Member").fetch("team"))
            .unwrap();
        let rows = store.execute_read(&plan).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[0].get_by_name("team.name"),
            Some(&Value::Text("teamA".to_string()))
        );
        assert_eq!(rows[3].get_by_name("team.name"), Some(&Value::Null));

        let plan = builder
            .build(&QueryRequest::new("Member").filter(field("team.name").eq("teamB")))
            .unwrap();
        assert_eq!(usernames(&store.execute_read(&plan).unwrap()), vec!["member3"]);
    }

    #[test]
    fn count_and_like() {
        let (store, builder) = seeded();
        let plan = builder
            .build_count(&QueryRequest::new("Member").filter(field("username").like("member%")))
            .unwrap();
        let rows = store.execute_read(&plan).unwrap();
        assert_eq!(rows[0].get_named::<i64>(COUNT_COLUMN).unwrap(), 4);
    }

    #[test]
    fn bulk_update_is_all_or_nothing() {
        let (store, builder) = seeded();
        let stmt = builder
            .bulk_update("Member", &field("age").ge(20).into(), &[Assignment::add("age", 1)])
            .unwrap();
        assert_eq!(store.execute_write(&stmt).unwrap(), 3);
        assert_eq!(store.peek("Member", &Value::BigInt(4), "age"), Some(Value::Int(41)));

        // Incrementing a text column fails for the first row and leaves the rest.
        let bad = WriteStatement::BulkUpdate {
            entity: "Member".to_string(),
            predicate: field("age").ge(0).into(),
            assignments: vec![Assignment::add("username", 1)],
        };
        assert!(store.execute_write(&bad).is_err());
        assert_eq!(store.peek("Member", &Value::BigInt(4), "age"), Some(Value::Int(41)));
        assert_eq!(
            store.peek("Member", &Value::BigInt(1), "username"),
            Some(Value::Text("member1".to_string()))
        );
    }

    #[test]
    fn duplicate_insert_is_a_constraint_violation() {
        let (store, builder) = seeded();
        let name = Value::Text("teamC".to_string());
        let id = Value::BigInt(1);
        let stmt = builder
            .insert("Team", [("id", &id), ("name", &name)])
            .unwrap();
        let err = store.execute_write(&stmt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreRejected);
        assert_eq!(store.row_count("Team"), 2);
        assert_eq!(store.next_identity("Team").unwrap(), Value::BigInt(3));
    }

    #[test]
    fn rollback_restores_snapshot() {
        let (store, builder) = seeded();
        store.begin_unit_of_work().unwrap();
        assert!(store.begin_unit_of_work().is_err());
        let stmt = builder.delete("Member", &Value::BigInt(1)).unwrap();
        assert_eq!(store.execute_write(&stmt).unwrap(), 1);
        assert_eq!(store.row_count("Member"), 3);
        store.rollback().unwrap();
        assert_eq!(store.row_count("Member"), 4);
        assert!(store.commit().is_err());
    }

    #[test]
    fn injected_failures() {
        let (store, builder) = seeded();
        store.fail_after_writes(Some(1));
        let stmt = builder.delete("Member", &Value::BigInt(1)).unwrap();
        assert_eq!(store.execute_write(&stmt).unwrap(), 1);
        let stmt = builder.delete("Member", &Value::BigInt(2)).unwrap();
        let err = store.execute_write(&stmt).unwrap_err();
        assert!(err.is_store_error());
        assert_eq!(err.kind().as_str(), "StoreUnavailable");

        store.set_available(false);
        let plan = builder.build(&QueryRequest::new("Team")).unwrap();
        assert!(store.execute_read(&plan).is_err());
        store.set_available(true);
        assert_eq!(store.execute_read(&plan).unwrap().len(), 2);
    }
}
