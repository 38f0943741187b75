//! Graph Events
//!
//! This module defines the change events emitted by `MemoryStore` when graph
//! data changes. Observers (progress displays, audit logs, tests) subscribe to
//! them without coupling to the store implementation.
//!
//! # Architecture
//!
//! Events are emitted using tokio's broadcast channel, allowing multiple
//! subscribers to receive notifications asynchronously. A store with no
//! subscribers drops events silently.

use crate::models::{
    ClosureDomain, CounterName, EdgeId, Endpoint, NodeId, NodeType, RelationshipKind,
};
use serde::{Deserialize, Serialize};

/// Change events emitted by a graph store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GraphEvent {
    /// A node was inserted
    #[serde(rename_all = "camelCase")]
    NodeCreated { id: NodeId, node_type: NodeType },

    /// A node changed state, counters or properties
    #[serde(rename_all = "camelCase")]
    NodeUpdated { id: NodeId },

    /// An edge was inserted
    #[serde(rename_all = "camelCase")]
    EdgeCreated {
        id: EdgeId,
        from: Endpoint,
        to: Endpoint,
        kind: RelationshipKind,
    },

    /// An edge changed state, order index or counters
    #[serde(rename_all = "camelCase")]
    EdgeUpdated { id: EdgeId },

    /// A closure pair was materialized
    #[serde(rename_all = "camelCase")]
    ClosureInserted {
        domain: ClosureDomain,
        ancestor: NodeId,
        descendant: NodeId,
    },

    /// A counter was written
    #[serde(rename_all = "camelCase")]
    CounterChanged {
        id: NodeId,
        counter: CounterName,
        value: u64,
    },
}

impl GraphEvent {
    /// Get a string representation of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            GraphEvent::NodeCreated { .. } => "node:created",
            GraphEvent::NodeUpdated { .. } => "node:updated",
            GraphEvent::EdgeCreated { .. } => "edge:created",
            GraphEvent::EdgeUpdated { .. } => "edge:updated",
            GraphEvent::ClosureInserted { .. } => "closure:inserted",
            GraphEvent::CounterChanged { .. } => "counter:changed",
        }
    }
}
