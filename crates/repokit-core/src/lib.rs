//! Core types for repokit.
//!
//! This crate provides the foundations every other layer builds on:
//!
//! - `Value` and `Row` for dynamically typed data
//! - `Error` with a stable `ErrorKind` classification
//! - the entity `Registry` describing fields, identities and associations
//! - `Entity` instances with per-association resolution state

pub mod entity;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod pattern;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod types;
pub mod value;

pub use entity::{Association, AssociationState, Binding, Entity, EntityRef, Related};
pub use error::{
    ConfigError, Error, ErrorKind, Result, StoreError, StoreErrorKind, TypeError,
};
pub use field::{FieldInfo, IdentityStrategy};
pub use identifiers::{is_identifier, quote_ident, quote_ident_mysql};
pub use pattern::like_matches;
pub use registry::{EntityShape, Registry, RegistryBuilder};
pub use relationship::{AssociationInfo, Cardinality, FetchMode};
pub use row::{ColumnInfo, Row};
pub use types::FieldType;
pub use value::{Key, Value};
