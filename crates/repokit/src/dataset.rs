//! A registry and its seed records in one JSON document.
//!
//! ```json
//! {
//!   "entities": [
//!     {"name": "Team", "identity": "id",
//!      "fields": [{"name": "id", "type": "big_int"}, {"name": "name", "type": "text"}]}
//!   ],
//!   "data": {"Team": [{"id": 1, "name": "teamA"}]}
//! }
//! ```

use std::sync::Arc;

use serde::Deserialize;

use repokit_core::{EntityShape, Registry, RegistryBuilder, Result};
use repokit_memory::{MemoryStore, SeedRecords};

/// Entity shapes plus the records a [`MemoryStore`] starts with.
#[derive(Debug, Clone, Deserialize)]
pub struct Dataset {
    pub entities: Vec<EntityShape>,
    #[serde(default)]
    pub data: SeedRecords,
}

impl Dataset {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validate the registry and load the records into a fresh store.
    pub fn into_store(self) -> Result<(Arc<Registry>, Arc<MemoryStore>)> {
        let registry = Arc::new(
            self.entities
                .into_iter()
                .fold(Registry::builder(), RegistryBuilder::entity)
                .build()?,
        );
        let store = MemoryStore::new(Arc::clone(&registry));
        store.seed(self.data)?;
        tracing::debug!(
            entities = registry.entity_types().count(),
            "Loaded dataset"
        );
        Ok((registry, Arc::new(store)))
    }
}
