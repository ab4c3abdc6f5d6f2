//! Resolution of requests into plans and write statements.

use std::sync::{Arc, Mutex};

use repokit_core::{
    AssociationInfo, Cardinality, EntityShape, Error, Registry, Result, Value,
};

use crate::cache::{PlanCache, cache_key};
use crate::clause::OrderBy;
use crate::expr::{Condition, Predicate, field};
use crate::plan::{BatchFetch, Join, QueryPlan, Selection};
use crate::request::QueryRequest;
use crate::statement::{Assignment, WriteStatement};

/// Turns requests into plans using registry metadata.
///
/// Eager associations and fetch hints become joins: to-one associations
/// are left-joined into the same read, to-many associations become one
/// batched follow-up read keyed by every owner identity. The identity field
/// is always the last sort key, so every plan has a total order.
#[derive(Debug)]
pub struct QueryBuilder {
    registry: Arc<Registry>,
    cache: Option<Mutex<PlanCache>>,
}

impl QueryBuilder {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            cache: None,
        }
    }

    /// Cache up to `max_size` built plans.
    pub fn with_cache(mut self, max_size: usize) -> Self {
        self.cache = Some(Mutex::new(PlanCache::new(max_size)));
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Plan cache (hits, misses), if caching is enabled.
    pub fn cache_stats(&self) -> Option<(u64, u64)> {
        self.cache
            .as_ref()
            .map(|c| c.lock().unwrap_or_else(|e| e.into_inner()).stats())
    }

    /// Resolve a request into a read plan.
    pub fn build(&self, request: &QueryRequest) -> Result<Arc<QueryPlan>> {
        match &self.cache {
            Some(cache) => {
                let key = cache_key(request);
                let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
                cache.get_or_try_insert(key, || self.build_uncached(request))
            }
            None => self.build_uncached(request).map(Arc::new),
        }
    }

    fn build_uncached(&self, request: &QueryRequest) -> Result<QueryPlan> {
        let shape = self.registry.describe(request.entity())?;
        if let Some(window) = request.get_window() {
            if window.limit == 0 {
                return Err(Error::InvalidRequest(
                    "window limit must be greater than zero".to_string(),
                ));
            }
        }

        let mut joins = JoinSet::new(&self.registry, shape);
        let predicate = joins.resolve_predicate(request.get_predicate())?;
        let mut order = Vec::with_capacity(request.get_sort().len() + 1);
        for key in request.get_sort() {
            joins.resolve_path(&key.field)?;
            order.push(key.clone());
        }
        append_identity_order(&mut order, shape);

        let selection = match request.get_projection() {
            Some(paths) => {
                if paths.is_empty() {
                    return Err(Error::InvalidRequest("empty projection".to_string()));
                }
                for path in paths {
                    joins.resolve_path(path)?;
                }
                Selection::Columns(paths.to_vec())
            }
            None => Selection::Entities,
        };

        let mut follow_ups = Vec::new();
        if selection == Selection::Entities {
            let hinted = request
                .get_fetch()
                .iter()
                .map(|name| shape.require_association(name))
                .collect::<Result<Vec<_>>>()?;
            for assoc in shape.eager_associations().chain(hinted) {
                match assoc.cardinality {
                    Cardinality::One => joins.fetch(assoc)?,
                    Cardinality::Many => push_follow_up(&mut follow_ups, assoc),
                }
            }
        }

        let plan = QueryPlan {
            entity: shape.name.clone(),
            identity: shape.identity.clone(),
            fields: shape.field_names().map(str::to_string).collect(),
            joins: joins.into_joins(),
            predicate,
            order,
            window: request.get_window(),
            selection,
            follow_ups,
        };
        tracing::trace!(plan = %plan, "Built query plan");
        Ok(plan)
    }

    /// Count plan for a request: its predicate only, no order, window or
    /// fetch joins.
    pub fn build_count(&self, request: &QueryRequest) -> Result<QueryPlan> {
        let shape = self.registry.describe(request.entity())?;
        let mut joins = JoinSet::new(&self.registry, shape);
        let predicate = joins.resolve_predicate(request.get_predicate())?;
        Ok(QueryPlan {
            entity: shape.name.clone(),
            identity: shape.identity.clone(),
            fields: Vec::new(),
            joins: joins.into_joins(),
            predicate,
            order: Vec::new(),
            window: None,
            selection: Selection::Count,
            follow_ups: Vec::new(),
        })
    }

    /// Single-row fetch by identity with eager associations.
    pub fn build_find(&self, entity: &str, identity: &Value) -> Result<Arc<QueryPlan>> {
        let shape = self.registry.describe(entity)?;
        let request = QueryRequest::new(entity).filter(field(&shape.identity).eq(identity.clone()));
        self.build(&request)
    }

    /// Read of `entity` rows whose `key_field` is one of `keys`.
    ///
    /// Serves batched to-many follow-ups (`key_field` is the foreign key on
    /// the target) and batched to-one lookups (`key_field` is the identity).
    pub fn build_keyed(&self, entity: &str, key_field: &str, keys: Vec<Value>) -> Result<QueryPlan> {
        let shape = self.registry.describe(entity)?;
        shape.require_field(key_field)?;
        let mut joins = JoinSet::new(&self.registry, shape);
        for assoc in shape.eager_associations() {
            if assoc.cardinality == Cardinality::One {
                joins.fetch(assoc)?;
            }
        }
        let mut order = vec![OrderBy::asc(key_field)];
        append_identity_order(&mut order, shape);
        Ok(QueryPlan {
            entity: shape.name.clone(),
            identity: shape.identity.clone(),
            fields: shape.field_names().map(str::to_string).collect(),
            joins: joins.into_joins(),
            predicate: Predicate::from(field(key_field).is_in(keys)),
            order,
            window: None,
            selection: Selection::Entities,
            follow_ups: Vec::new(),
        })
    }

    /// Validated insert of every declared field (absent fields are NULL).
    pub fn insert<'a>(
        &self,
        entity: &str,
        values: impl IntoIterator<Item = (&'a str, &'a Value)>,
    ) -> Result<WriteStatement> {
        let shape = self.registry.describe(entity)?;
        Ok(WriteStatement::Insert {
            entity: shape.name.clone(),
            values: full_row(shape, values)?,
        })
    }

    /// Validated full-row update of one instance.
    pub fn update<'a>(
        &self,
        entity: &str,
        identity: &Value,
        values: impl IntoIterator<Item = (&'a str, &'a Value)>,
    ) -> Result<WriteStatement> {
        let shape = self.registry.describe(entity)?;
        let values = full_row(shape, values)?
            .into_iter()
            .filter(|(name, _)| *name != shape.identity)
            .collect();
        Ok(WriteStatement::Update {
            entity: shape.name.clone(),
            identity_field: shape.identity.clone(),
            identity: identity.clone(),
            values,
        })
    }

    pub fn delete(&self, entity: &str, identity: &Value) -> Result<WriteStatement> {
        let shape = self.registry.describe(entity)?;
        Ok(WriteStatement::Delete {
            entity: shape.name.clone(),
            identity_field: shape.identity.clone(),
            identity: identity.clone(),
        })
    }

    /// Validated set-based update.
    ///
    /// Predicates must name root fields; assignments may not touch the
    /// identity, and increments need numeric fields and deltas.
    pub fn bulk_update(
        &self,
        entity: &str,
        predicate: &Predicate,
        assignments: &[Assignment],
    ) -> Result<WriteStatement> {
        let shape = self.registry.describe(entity)?;
        let predicate = root_predicate(shape, predicate)?;
        if assignments.is_empty() {
            return Err(Error::InvalidRequest(
                "bulk update needs at least one assignment".to_string(),
            ));
        }
        let mut checked = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let name = assignment.field();
            let info = shape.require_field(name)?;
            if name == shape.identity {
                return Err(Error::InvalidRequest(format!(
                    "bulk update cannot assign identity field '{}'",
                    name
                )));
            }
            checked.push(match assignment {
                Assignment::Set { field, value } => Assignment::Set {
                    field: field.clone(),
                    value: shape.check_value(field, value.clone())?,
                },
                Assignment::Add { field, delta } => {
                    if !info.field_type.is_numeric() || !delta.is_numeric() {
                        return Err(Error::InvalidRequest(format!(
                            "cannot increment {} field '{}' by {}",
                            info.field_type.sql_name(),
                            field,
                            delta.type_name()
                        )));
                    }
                    assignment.clone()
                }
            });
        }
        Ok(WriteStatement::BulkUpdate {
            entity: shape.name.clone(),
            predicate,
            assignments: checked,
        })
    }

    pub fn bulk_delete(&self, entity: &str, predicate: &Predicate) -> Result<WriteStatement> {
        let shape = self.registry.describe(entity)?;
        Ok(WriteStatement::BulkDelete {
            entity: shape.name.clone(),
            predicate: root_predicate(shape, predicate)?,
        })
    }
}

fn append_identity_order(order: &mut Vec<OrderBy>, shape: &EntityShape) {
    if !order.iter().any(|o| o.field == shape.identity) {
        order.push(OrderBy::asc(&shape.identity));
    }
}

fn push_follow_up(follow_ups: &mut Vec<BatchFetch>, assoc: &AssociationInfo) {
    if follow_ups.iter().all(|f| f.association != assoc.name) {
        follow_ups.push(BatchFetch {
            association: assoc.name.clone(),
            target: assoc.target.clone(),
            foreign_key: assoc.foreign_key.clone(),
        });
    }
}

fn full_row<'a>(
    shape: &EntityShape,
    values: impl IntoIterator<Item = (&'a str, &'a Value)>,
) -> Result<Vec<(String, Value)>> {
    let mut provided: Vec<(&str, &Value)> = Vec::new();
    for (name, value) in values {
        shape.require_field(name)?;
        provided.push((name, value));
    }
    shape
        .fields
        .iter()
        .map(|f| {
            let value = provided
                .iter()
                .find(|(name, _)| *name == f.name)
                .map_or(Value::Null, |(_, v)| (*v).clone());
            Ok((f.name.clone(), shape.check_value(&f.name, value)?))
        })
        .collect()
}

fn root_predicate(shape: &EntityShape, predicate: &Predicate) -> Result<Predicate> {
    for condition in predicate.conditions() {
        let name = condition.field();
        if name.contains('.') {
            return Err(Error::InvalidRequest(format!(
                "set-based writes cannot filter through association path '{}'",
                name
            )));
        }
        shape.require_field(name)?;
    }
    Ok(predicate.clone())
}

/// Joins accumulated while resolving one request, in first-use order.
struct JoinSet<'r> {
    registry: &'r Registry,
    shape: &'r EntityShape,
    joins: Vec<Join>,
}

impl<'r> JoinSet<'r> {
    fn new(registry: &'r Registry, shape: &'r EntityShape) -> Self {
        Self {
            registry,
            shape,
            joins: Vec::new(),
        }
    }

    fn resolve_predicate(&mut self, predicate: &Predicate) -> Result<Predicate> {
        for condition in predicate.conditions() {
            self.resolve_path(condition.field())?;
            if let Condition::In { values, .. } = condition {
                if values.is_empty() {
                    tracing::debug!(field = condition.field(), "Empty IN list matches nothing");
                }
            }
        }
        Ok(predicate.clone())
    }

    /// Check a `field` or `association.field` path, joining as needed.
    fn resolve_path(&mut self, path: &str) -> Result<()> {
        let Some((assoc_name, target_field)) = path.split_once('.') else {
            self.shape.require_field(path)?;
            return Ok(());
        };
        let assoc = self.shape.require_association(assoc_name)?;
        if assoc.cardinality == Cardinality::Many {
            return Err(Error::InvalidRequest(format!(
                "path '{}' navigates to-many association '{}'",
                path, assoc_name
            )));
        }
        let target = self.registry.describe(&assoc.target)?;
        target.require_field(target_field)?;
        self.join(assoc, false)
    }

    fn fetch(&mut self, assoc: &AssociationInfo) -> Result<()> {
        self.join(assoc, true)
    }

    fn join(&mut self, assoc: &AssociationInfo, fetch: bool) -> Result<()> {
        if let Some(existing) = self.joins.iter_mut().find(|j| j.association == assoc.name) {
            existing.fetch |= fetch;
            return Ok(());
        }
        let target = self.registry.describe(&assoc.target)?;
        self.joins.push(Join {
            association: assoc.name.clone(),
            target: target.name.clone(),
            foreign_key: assoc.foreign_key.clone(),
            target_identity: target.identity.clone(),
            fields: target.field_names().map(str::to_string).collect(),
            fetch,
        });
        Ok(())
    }

    fn into_joins(self) -> Vec<Join> {
        self.joins
    }
}
