//! Query construction layer for repokit.
//!
//! `repokit-query` turns logical requests into executable plans.
//!
//! # Role In The Architecture
//!
//! - **Predicate DSL**: [`field`] and [`Predicate`] build conjunctive filters.
//! - **Requests**: [`QueryRequest`] names an entity type, filter, order,
//!   window, fetch hints and an optional projection.
//! - **Builder**: [`QueryBuilder`] resolves requests against the entity
//!   registry into deterministic [`QueryPlan`]s and validated
//!   [`WriteStatement`]s.
//! - **Rendering**: plans and statements render to parameterized SQL for
//!   Postgres, MySQL and SQLite.
//!
//! Plans execute through the [`Store`] trait. Most users reach this crate
//! through the `repokit` facade.

pub mod builder;
pub mod cache;
pub mod clause;
pub mod expr;
pub mod plan;
pub mod render;
pub mod request;
pub mod statement;
pub mod store;

pub use builder::QueryBuilder;
pub use cache::{PlanCache, cache_key};
pub use clause::{OrderBy, OrderDirection, PageRequest, Window};
pub use expr::{CompareOp, Condition, FieldRef, Predicate, field};
pub use plan::{BatchFetch, COUNT_COLUMN, Join, QueryPlan, Selection};
pub use render::{Dialect, render_read, render_write};
pub use request::QueryRequest;
pub use statement::{Assignment, WriteStatement, parse_scalar};
pub use store::Store;
