//! Persistence Layer
//!
//! This module holds the persistence seam of the content graph:
//!
//! - `GraphStore` - async trait over the transactional store (point lookups,
//!   group scans, insert-if-absent primitives)
//! - `MemoryStore` - in-memory reference implementation with fault injection
//! - `GraphEvent` - change events broadcast by the store
//! - `DenseOrderCalculator` - renumbering of ordered edge groups
//!
//! Connection and transaction management of a production backend is outside
//! this crate; any backend that implements `GraphStore` can drive the engine.

mod error;
pub mod events;
mod graph_store;
mod memory_store;
pub mod ordering;

pub use error::{StoreError, StoreResult};
pub use events::GraphEvent;
pub use graph_store::{GraphStore, Inserted};
pub use memory_store::MemoryStore;
pub use ordering::{DenseOrderCalculator, OrderKey};
