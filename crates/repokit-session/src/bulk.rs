//! Set-based writes that bypass the identity map.

use repokit_core::Result;
use repokit_query::{Assignment, Predicate, Store, WriteStatement};

use crate::Session;

/// Options for `Session::bulk_update` and `Session::bulk_delete`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOptions {
    /// Clear the session after the write so later reads see stored values.
    pub auto_reconcile: bool,
}

impl BulkOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn auto_reconcile(mut self, value: bool) -> Self {
        self.auto_reconcile = value;
        self
    }
}

impl<S: Store> Session<S> {
    /// Apply `assignments` to every stored row of `entity` matching
    /// `predicate`, returning the affected row count.
    ///
    /// Pending writes are flushed first. Tracked instances of the type
    /// become stale unless `auto_reconcile` clears the session.
    #[tracing::instrument(level = "debug", skip(self, predicate, assignments), fields(predicate = %predicate))]
    pub fn bulk_update(
        &mut self,
        entity: &str,
        predicate: &Predicate,
        assignments: &[Assignment],
        options: BulkOptions,
    ) -> Result<u64> {
        let statement = self.builder.bulk_update(entity, predicate, assignments)?;
        self.execute_bulk(entity, &statement, options)
    }

    /// Delete every stored row of `entity` matching `predicate`.
    #[tracing::instrument(level = "debug", skip(self, predicate), fields(predicate = %predicate))]
    pub fn bulk_delete(
        &mut self,
        entity: &str,
        predicate: &Predicate,
        options: BulkOptions,
    ) -> Result<u64> {
        let statement = self.builder.bulk_delete(entity, predicate)?;
        self.execute_bulk(entity, &statement, options)
    }

    fn execute_bulk(
        &mut self,
        entity: &str,
        statement: &WriteStatement,
        options: BulkOptions,
    ) -> Result<u64> {
        self.flush()?;
        let affected = self.store.execute_write(statement)?;
        let generation = self.bump_generation(statement.entity());
        tracing::debug!(entity, affected, generation, "Bulk write applied");
        if options.auto_reconcile {
            self.clear();
        }
        Ok(affected)
    }
}
