//! Mapping definition stores
//!
//! The resolver fetches child-table mappings by name through the
//! [`DefinitionStore`] trait. [`InMemoryStore`] holds definitions built in
//! code; [`MappingLoader`] reads them from YAML files.

mod loader;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::domain::MappingDefinition;
use crate::error::MappingError;

pub use loader::MappingLoader;

/// Looks up mapping definitions by name
pub trait DefinitionStore: Send + Sync {
    /// Fetch a definition; unknown names are [`MappingError::DefinitionNotFound`]
    fn load_mapping_by_name(&self, name: &str) -> Result<Arc<MappingDefinition>, MappingError>;
}

/// Definitions held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    definitions: HashMap<String, Arc<MappingDefinition>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition under its `mapping_name`, replacing any previous one
    pub fn insert(&mut self, definition: MappingDefinition) -> Option<Arc<MappingDefinition>> {
        debug!(name = %definition.mapping_name, "InMemoryStore::insert: called");
        self.definitions
            .insert(definition.mapping_name.clone(), Arc::new(definition))
    }

    /// Builder-style insert
    pub fn with(mut self, definition: MappingDefinition) -> Self {
        self.insert(definition);
        self
    }

    /// Names of stored definitions, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Number of stored definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl FromIterator<MappingDefinition> for InMemoryStore {
    fn from_iter<T: IntoIterator<Item = MappingDefinition>>(iter: T) -> Self {
        let mut store = Self::new();
        for definition in iter {
            store.insert(definition);
        }
        store
    }
}

impl DefinitionStore for InMemoryStore {
    fn load_mapping_by_name(&self, name: &str) -> Result<Arc<MappingDefinition>, MappingError> {
        debug!(%name, "InMemoryStore::load_mapping_by_name: called");
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| MappingError::DefinitionNotFound { name: name.to_string() })
    }
}
