//! Migration Definition Registry
//!
//! This module keeps the declarative migration definitions the engine can run.
//! Definitions are data, not code: registering a new schema evolution means
//! registering a new `(name, version)` definition.
//!
//! ## Architecture
//!
//! - **Versioned**: definitions are keyed by `(name, version)`; bumping the
//!   version starts a fresh identity mapping (new run key)
//! - **Validated on registration**: an inconsistent definition never reaches
//!   the engine
//! - **Built-ins**: `migrations::register_definitions` adds the shipped ones
//!
//! ## Example Usage
//!
//! ```no_run
//! # use threadgraph_core::services::migration_registry::DefinitionRegistry;
//! # use threadgraph_core::services::migrations;
//! # fn main() -> Result<(), threadgraph_core::services::GraphError> {
//! let mut registry = DefinitionRegistry::new();
//! migrations::register_definitions(&mut registry)?;
//!
//! let comments = registry.latest("comment-threads").expect("built-in");
//! assert_eq!(comments.run_key(), "comment-threads@v1");
//! # Ok(())
//! # }
//! ```

use crate::models::MigrationDefinition;
use crate::services::error::{GraphError, GraphResult};
use std::collections::BTreeMap;

/// Registry of migration definitions
///
/// Stores definitions keyed by (name, version). Iteration over one name's
/// versions is ordered, so `latest` is a range lookup.
pub struct DefinitionRegistry {
    definitions: BTreeMap<(String, u32), MigrationDefinition>,
}

impl DefinitionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            definitions: BTreeMap::new(),
        }
    }

    /// Register a definition
    ///
    /// Re-registering the same `(name, version)` replaces the earlier entry.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` if the definition fails validation
    pub fn register(&mut self, definition: MigrationDefinition) -> GraphResult<()> {
        definition
            .validate()
            .map_err(GraphError::InvalidDefinition)?;

        let key = (definition.name.clone(), definition.version);
        if self.definitions.insert(key, definition).is_some() {
            tracing::debug!("Replaced existing migration definition");
        }
        Ok(())
    }

    pub fn get(&self, name: &str, version: u32) -> Option<&MigrationDefinition> {
        self.definitions.get(&(name.to_string(), version))
    }

    /// Highest registered version of `name`
    pub fn latest(&self, name: &str) -> Option<&MigrationDefinition> {
        self.definitions
            .range((name.to_string(), 0)..=(name.to_string(), u32::MAX))
            .next_back()
            .map(|(_, definition)| definition)
    }

    /// Registered versions of `name`, ascending
    pub fn versions(&self, name: &str) -> Vec<u32> {
        self.definitions
            .range((name.to_string(), 0)..=(name.to_string(), u32::MAX))
            .map(|((_, version), _)| *version)
            .collect()
    }

    /// Get the number of registered definitions
    pub fn definition_count(&self) -> usize {
        self.definitions.len()
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
