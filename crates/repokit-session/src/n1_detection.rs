//! N+1 query detection.
//!
//! The N+1 pattern occurs when code loads N owners and then lazily resolves
//! an association on each, issuing N+1 reads instead of 2. The tracker counts
//! lazy resolutions per (entity type, association) and warns once a pair
//! reaches the threshold.
//!
//! # Example
//!
//! ```ignore
//! // This triggers a warning with the default threshold:
//! for member in &members {
//!     session.resolve(member, "team")?;
//! }
//!
//! // The fix: one batched read, or a fetch hint on the query.
//! session.resolve_all(&members, "team")?;
//! ```

use std::collections::HashMap;

/// Tracks lazy resolutions for N+1 detection.
#[derive(Debug)]
pub struct N1QueryTracker {
    /// (owner type, association) -> resolution count
    counts: HashMap<(String, String), usize>,
    threshold: usize,
    /// Recent call sites, for the debug output that follows a warning
    call_sites: Vec<CallSite>,
}

impl Default for N1QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a lazy resolution was triggered.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub entity: String,
    pub association: String,
    pub file: &'static str,
    pub line: u32,
}

/// Statistics about N+1 detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct N1Stats {
    /// Total number of lazy resolutions recorded
    pub total_loads: usize,
    /// Number of distinct associations resolved
    pub associations_loaded: usize,
    /// Number of associations that reached the threshold
    pub potential_n1: usize,
}

const MAX_CALL_SITES: usize = 64;

impl N1QueryTracker {
    /// Create a tracker with the default threshold (3).
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            threshold: 3,
            call_sites: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Record one lazy resolution. Warns when the count for the pair
    /// reaches the threshold.
    #[track_caller]
    pub fn record_load(&mut self, entity: &str, association: &str) {
        let count = {
            let slot = self
                .counts
                .entry((entity.to_string(), association.to_string()))
                .or_insert(0);
            *slot += 1;
            *slot
        };

        let caller = std::panic::Location::caller();
        if self.call_sites.len() < MAX_CALL_SITES {
            self.call_sites.push(CallSite {
                entity: entity.to_string(),
                association: association.to_string(),
                file: caller.file(),
                line: caller.line(),
            });
        }

        if count == self.threshold {
            self.emit_warning(entity, association, count);
        }
    }

    fn emit_warning(&self, entity: &str, association: &str, count: usize) {
        tracing::warn!(
            target: "repokit::n1",
            entity,
            association,
            queries = count,
            threshold = self.threshold,
            "N+1 query pattern detected; add a fetch hint for '{}' or use Session::resolve_all",
            association
        );

        let sites = self
            .call_sites
            .iter()
            .filter(|s| s.entity == entity && s.association == association)
            .take(5);
        for (i, site) in sites.enumerate() {
            tracing::debug!(
                target: "repokit::n1",
                index = i,
                file = site.file,
                line = site.line,
                "  [{}] {}:{}",
                i,
                site.file,
                site.line
            );
        }
    }

    /// Reset all counts and call sites.
    pub fn reset(&mut self) {
        self.counts.clear();
        self.call_sites.clear();
    }

    #[must_use]
    pub fn count_for(&self, entity: &str, association: &str) -> usize {
        self.counts
            .get(&(entity.to_string(), association.to_string()))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn stats(&self) -> N1Stats {
        N1Stats {
            total_loads: self.counts.values().sum(),
            associations_loaded: self.counts.len(),
            potential_n1: self
                .counts
                .values()
                .filter(|c| **c >= self.threshold)
                .count(),
        }
    }

    #[must_use]
    pub fn call_sites(&self) -> &[CallSite] {
        &self.call_sites
    }
}
