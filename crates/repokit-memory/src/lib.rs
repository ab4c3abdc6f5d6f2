//! In-memory store for repokit.
//!
//! [`MemoryStore`] implements the `Store` trait over plain tables held in
//! memory. It evaluates query plans directly (filters, left joins, sorting,
//! windows, projections and counts), supports snapshot-based units of work
//! and can simulate an unreachable store for failure testing.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use repokit_memory::MemoryStore;
//!
//! let store = MemoryStore::from_json(Arc::new(registry), r#"{"Team": [{"id": 1, "name": "teamA"}]}"#)?;
//! assert_eq!(store.row_count("Team"), 1);
//! ```

pub mod store;
pub mod table;

pub use store::{MemoryStore, SeedRecords, StoreStats};
pub use table::{Record, Table};
