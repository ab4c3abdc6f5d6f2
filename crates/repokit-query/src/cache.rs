//! Plan caching for resolved query requests.
//!
//! Caches built plans keyed by a hash of the request, so repeated requests
//! skip registry resolution.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use crate::plan::QueryPlan;

/// A cached plan.
#[derive(Debug, Clone)]
pub struct CachedPlan {
    pub plan: Arc<QueryPlan>,
    /// When this entry was last accessed.
    pub last_used: Instant,
    /// Number of times this plan has been served.
    pub hit_count: u64,
}

/// LRU-style cache for built plans.
///
/// When the cache exceeds `max_size`, the least-recently-used entry is
/// evicted.
///
/// ```
/// use repokit_query::cache::PlanCache;
///
/// let cache = PlanCache::new(16);
/// assert!(cache.is_empty());
/// ```
#[derive(Debug)]
pub struct PlanCache {
    cache: HashMap<u64, CachedPlan>,
    max_size: usize,
    hits: u64,
    misses: u64,
}

impl PlanCache {
    /// Create a new cache with the given maximum number of entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::with_capacity(max_size.min(256)),
            max_size,
            hits: 0,
            misses: 0,
        }
    }

    /// Get a cached plan or build and insert it.
    ///
    /// The `builder` closure is only called on a miss; a failing build is
    /// not cached.
    pub fn get_or_try_insert<E>(
        &mut self,
        key: u64,
        builder: impl FnOnce() -> Result<QueryPlan, E>,
    ) -> Result<Arc<QueryPlan>, E> {
        if let Some(entry) = self.cache.get_mut(&key) {
            entry.last_used = Instant::now();
            entry.hit_count += 1;
            self.hits += 1;
            return Ok(Arc::clone(&entry.plan));
        }

        let plan = Arc::new(builder()?);
        self.misses += 1;
        if self.max_size == 0 {
            return Ok(plan);
        }
        if self.cache.len() >= self.max_size {
            self.evict_lru();
        }
        self.cache.insert(
            key,
            CachedPlan {
                plan: Arc::clone(&plan),
                last_used: Instant::now(),
                hit_count: 0,
            },
        );
        Ok(plan)
    }

    pub fn contains(&self, key: u64) -> bool {
        self.cache.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    fn evict_lru(&mut self) {
        if let Some((&lru_key, _)) = self.cache.iter().min_by_key(|(_, entry)| entry.last_used) {
            self.cache.remove(&lru_key);
        }
    }
}

/// Compute a hash key for caching from any hashable value.
pub fn cache_key(value: &impl Hash) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(256)
    }
}
