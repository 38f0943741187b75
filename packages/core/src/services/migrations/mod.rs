//! Built-in Migration Definitions
//!
//! Each submodule describes one reshaping of the forum data as a declarative
//! definition the engine interprets.
//!
//! ## Available Definitions
//!
//! - `comment_threads` - flatten reply chains (v1)
//! - `media_blocks` - post attachments to ordered media-block nodes (v1)
//! - `game_beads` - game beads to post subtype `bead` (v1)
//!
//! ## Example Usage
//!
//! ```no_run
//! # use threadgraph_core::services::migration_registry::DefinitionRegistry;
//! # use threadgraph_core::services::migrations;
//! let mut registry = DefinitionRegistry::new();
//!
//! // Register every built-in definition
//! migrations::register_definitions(&mut registry).unwrap();
//! assert_eq!(registry.definition_count(), 3);
//! ```

pub mod comment_threads;
pub mod game_beads;
pub mod media_blocks;

use crate::services::error::GraphResult;
use crate::services::migration_registry::DefinitionRegistry;

/// Register all built-in definitions
pub fn register_definitions(registry: &mut DefinitionRegistry) -> GraphResult<()> {
    comment_threads::register_definitions(registry)?;
    media_blocks::register_definitions(registry)?;
    game_beads::register_definitions(registry)?;
    Ok(())
}
