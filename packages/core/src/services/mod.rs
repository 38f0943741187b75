//! Graph Services
//!
//! This module contains the services that maintain the content graph and the
//! engine that migrates legacy data into it:
//!
//! - `NodeRegistry` - classification, canonical identity and reclassification
//! - `EdgeStore` - edge creation, soft delete and dense reindexing
//! - `ClosureMaintainer` - transitive-ancestor relation per closure domain
//! - `CounterMaintainer` - single-writer task for denormalized counters
//! - `MigrationEngine` - staged, resumable execution of migration definitions
//! - `DefinitionRegistry` - versioned migration definitions and the built-ins
//!
//! Services coordinate through the `GraphStore` trait only; none of them holds
//! graph state of its own.

pub mod closure_maintainer;
pub mod counter_maintainer;
pub mod edge_store;
pub mod error;
pub mod hooks;
pub mod migration_engine;
pub mod migration_registry;
pub mod migrations;
pub mod node_registry;
pub mod retry;

pub use closure_maintainer::ClosureMaintainer;
pub use counter_maintainer::CounterMaintainer;
pub use edge_store::{EdgeStore, ReindexSummary};
pub use error::{GraphError, GraphResult};
pub use hooks::{MentionRewriter, ReactionRetargeter, RetargetHook};
pub use migration_engine::{CancelHandle, MigrationEngine};
pub use migration_registry::DefinitionRegistry;
pub use node_registry::{NodeRegistry, Resolved};
pub use retry::{with_storage_retry, RetryPolicy};
