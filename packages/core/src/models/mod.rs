//! Data Models
//!
//! This module contains the data structures of the content graph and of the
//! migration runs that reshape it:
//!
//! - `Node`, `Edge`, `ClosureEntry` - the graph itself
//! - `Reaction` - dependent records behind the like/rating counters
//! - `SourceRecord` - rows handed to the engine by external readers
//! - `MigrationDefinition` - declarative, versioned description of a migration
//! - `RunReport` - structured outcome of a migration run

pub mod closure;
pub mod counters;
pub mod definition;
pub mod edge;
pub mod node;
pub mod reaction;
pub mod run;
pub mod source;

pub use closure::ClosureEntry;
pub use counters::{CounterName, NodeCounters};
pub use definition::{
    Classification, ClassificationRule, EdgeShape, Marker, MigrationDefinition, OrderSource,
};
pub use edge::{Edge, EdgeId, EdgeKey, EdgeState, GroupKey, RelationshipKind};
pub use node::{ClosureDomain, Endpoint, LegacyKey, Node, NodeId, NodeState, NodeType};
pub use reaction::{Reaction, ReactionKind, ReactionState, ReactionTarget};
pub use run::{FailureReason, MappingEntry, RecordFailure, RunOutcome, RunReport, RunStage};
pub use source::SourceRecord;
