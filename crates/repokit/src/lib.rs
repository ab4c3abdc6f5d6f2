//! repokit - registry-driven entity queries with sessions, paging and bulk
//! mutation.
//!
//! repokit resolves declarative requests against an entity [`Registry`]:
//!
//! - Predicates, sorting and windows over registered entity types
//! - Association paths (`team.name`) and fetch hints turned into joins
//! - A [`Session`] with an identity map and a buffered unit of work
//! - [`Page`] / [`Slice`] reads and set-based bulk mutation
//! - Lazy association resolution, batched where possible
//!
//! # Quick Start
//!
//! ```ignore
//! use repokit::prelude::*;
//!
//! let dataset = Dataset::from_json(include_str!("../../../demos/teams.json"))?;
//! let (registry, store) = dataset.into_store()?;
//! let mut session = Session::new(store, registry);
//!
//! // Members of teamA older than 15, with their team loaded in the same read
//! let request = QueryRequest::new("Member")
//!     .filter(field("team.name").eq("teamA"))
//!     .filter(field("age").gt(15))
//!     .order_by(OrderBy::desc("username"))
//!     .fetch("team");
//! let members = session.query(&request)?;
//!
//! // Page of three, with totals
//! let page = session.page(&request.clone().window(0, 3))?;
//! println!("{} of {}", page.number_of_elements(), page.total_elements());
//!
//! // Everyone aged 20 or more gets a year older
//! let affected = session.bulk_update(
//!     "Member",
//!     &field("age").ge(20).into(),
//!     &[Assignment::add("age", 1)],
//!     BulkOptions::new().auto_reconcile(true),
//! )?;
//! ```
//!
//! # Crates
//!
//! - `repokit-core`: values, rows, errors, the registry and entity instances
//! - `repokit-query`: requests, predicates, plans and the `Store` trait
//! - `repokit-session`: the session, paging, bulk writes, lazy resolution
//! - `repokit-memory`: an in-memory `Store`

pub mod cli;
pub mod dataset;

pub use dataset::Dataset;

pub use repokit_core::{
    Association, AssociationInfo, AssociationState, Cardinality, Entity, EntityRef, EntityShape,
    Error, ErrorKind, FetchMode, FieldInfo, FieldType, IdentityStrategy, Key, Registry,
    RegistryBuilder, Related, Result, Row, StoreError, StoreErrorKind, Value, entity,
};

pub use repokit_query::{
    Assignment, CompareOp, Condition, Dialect, OrderBy, PageRequest, Predicate, QueryBuilder,
    QueryPlan, QueryRequest, Store, Window, WriteStatement, field, render_read, render_write,
};

pub use repokit_session::{
    BulkOptions, EntityKey, N1Stats, Page, PageInfo, Session, SessionConfig, Slice, SliceInfo,
    StaleReadPolicy,
};

pub use repokit_memory::{MemoryStore, StoreStats};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Assignment, BulkOptions, Dataset, Entity, EntityRef, Error, MemoryStore, OrderBy, Page,
        PageRequest, Predicate, QueryRequest, Registry, Related, Result, Session, SessionConfig,
        Slice, StaleReadPolicy, Store, Value, entity, field,
    };
}
