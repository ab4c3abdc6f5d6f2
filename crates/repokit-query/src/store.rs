//! The store interface the engine executes against.

use std::sync::Arc;

use repokit_core::{Result, Row, Value};

use crate::plan::QueryPlan;
use crate::statement::WriteStatement;

/// A backing store reachable synchronously.
///
/// Methods take `&self`; implementations use interior mutability. Transport
/// failures are reported as `Error::Store` and propagate unchanged through
/// the engine.
pub trait Store {
    /// Execute a read plan. Count plans return one row with a `count` column.
    fn execute_read(&self, plan: &QueryPlan) -> Result<Vec<Row>>;

    /// Execute a write, returning the number of affected rows.
    fn execute_write(&self, statement: &WriteStatement) -> Result<u64>;

    /// Next identity for an entity type using a sequence strategy.
    fn next_identity(&self, entity: &str) -> Result<Value>;

    /// Start a unit of work.
    fn begin_unit_of_work(&self) -> Result<()>;

    /// Make the current unit of work durable.
    fn commit(&self) -> Result<()>;

    /// Discard the current unit of work.
    fn rollback(&self) -> Result<()>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn execute_read(&self, plan: &QueryPlan) -> Result<Vec<Row>> {
        (**self).execute_read(plan)
    }

    fn execute_write(&self, statement: &WriteStatement) -> Result<u64> {
        (**self).execute_write(statement)
    }

    fn next_identity(&self, entity: &str) -> Result<Value> {
        (**self).next_identity(entity)
    }

    fn begin_unit_of_work(&self) -> Result<()> {
        (**self).begin_unit_of_work()
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<()> {
        (**self).rollback()
    }
}

impl<S: Store + ?Sized> Store for &S {
    fn execute_read(&self, plan: &QueryPlan) -> Result<Vec<Row>> {
        (**self).execute_read(plan)
    }

    fn execute_write(&self, statement: &WriteStatement) -> Result<u64> {
        (**self).execute_write(statement)
    }

    fn next_identity(&self, entity: &str) -> Result<Value> {
        (**self).next_identity(entity)
    }

    fn begin_unit_of_work(&self) -> Result<()> {
        (**self).begin_unit_of_work()
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<()> {
        (**self).rollback()
    }
}
