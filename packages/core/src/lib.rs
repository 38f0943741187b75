//! ThreadGraph Core
//!
//! This crate provides the polymorphic content graph of the forum platform and
//! the engine that migrates legacy rows into it.
//!
//! # Architecture
//!
//! - **Tagged-union endpoints**: an edge points at `{node_type, id}`, resolved
//!   through one node registry instead of a nullable foreign key per type
//! - **Flattened threads**: reply chains become `parent`, `root` and `ancestor`
//!   edges plus a materialized closure for O(1) descendant checks
//! - **Event-applied counters**: denormalized aggregates are written by a
//!   single maintainer task
//! - **Declarative migrations**: versioned definitions interpreted by one
//!   engine, idempotent across re-runs
//!
//! # Modules
//!
//! - [`models`] - Data structures (Node, Edge, SourceRecord, RunReport, etc.)
//! - [`db`] - Persistence seam (`GraphStore`) and the in-memory store
//! - [`services`] - Registry, edge store, maintainers, hooks and the engine
//! - [`config`] - Engine configuration

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::EngineConfig;
pub use models::*;
pub use services::*;
