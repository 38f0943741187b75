//! Node Data Structures
//!
//! This module defines the canonical `Node` struct of the content graph and the
//! small identity types used to reference nodes from edges, closures and the
//! identity mapping.
//!
//! # Architecture
//!
//! - **Typed nodes**: every node carries an immutable [`NodeType`] plus an optional
//!   free-form `subtype` (e.g. `image`, `audio`, `bead`)
//! - **Tagged endpoints**: edges reference nodes through [`Endpoint`] rather than one
//!   nullable foreign key per possible target type
//! - **Legacy keys**: nodes produced by a migration remember the `(table, id)` row
//!   they came from, which is how re-runs find them again
//!
//! # Examples
//!
//! ```rust
//! use threadgraph_core::models::{LegacyKey, Node, NodeType};
//! use serde_json::json;
//!
//! let post = Node::new(NodeType::Post, None, json!({"title": "Hello"}))
//!     .with_legacy_key(LegacyKey::new("posts", 1));
//! assert!(post.is_active());
//! ```

use crate::models::counters::NodeCounters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Canonical node identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Allocate a fresh canonical id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Content node types known to the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Post,
    Comment,
    MediaBlock,
    Space,
    User,
    PollAnswer,
    GameBead,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Post => "post",
            NodeType::Comment => "comment",
            NodeType::MediaBlock => "media-block",
            NodeType::Space => "space",
            NodeType::User => "user",
            NodeType::PollAnswer => "poll-answer",
            NodeType::GameBead => "game-bead",
        }
    }

    /// Closure domain this node type participates in, if any
    ///
    /// Users are referenced by `link` edges only and never get closure rows.
    pub fn closure_domain(&self) -> Option<ClosureDomain> {
        match self {
            NodeType::User => None,
            NodeType::Space => Some(ClosureDomain::Space),
            _ => Some(ClosureDomain::Content),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two containment hierarchies that keep a materialized closure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClosureDomain {
    Content,
    Space,
}

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NodeState {
    #[default]
    Active,
    Deleted,
    Unclaimed,
}

/// `(origin table, origin id)` of a row in the pre-migration shape
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LegacyKey {
    pub table: String,
    pub id: i64,
}

impl LegacyKey {
    pub fn new(table: impl Into<String>, id: i64) -> Self {
        Self {
            table: table.into(),
            id,
        }
    }
}

impl fmt::Display for LegacyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.id)
    }
}

/// One side of an edge: a node id tagged with its type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub node_type: NodeType,
    pub id: NodeId,
}

impl Endpoint {
    pub fn new(node_type: NodeType, id: NodeId) -> Self {
        Self { node_type, id }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_type, self.id)
    }
}

/// Canonical content node
///
/// # Fields
///
/// - `id`: canonical identity, allocated by the node registry
/// - `node_type`: immutable type; reclassification creates a new node
/// - `subtype`: optional refinement (`image`, `audio`, `bead`, ...)
/// - `legacy_key`: origin row, present for migrated nodes
/// - `state`: active, deleted (soft) or unclaimed
/// - `counters`: denormalized aggregates maintained by the counter maintainer
/// - `properties`: the source payload
/// - `superseded_by`: replacement claimed by a reclassification of this node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,

    pub node_type: NodeType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_key: Option<LegacyKey>,

    #[serde(default)]
    pub state: NodeState,

    #[serde(default)]
    pub counters: NodeCounters,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub properties: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<NodeId>,
}

impl Node {
    /// Create an active node with a fresh id
    pub fn new(node_type: NodeType, subtype: Option<String>, properties: serde_json::Value) -> Self {
        Self {
            id: NodeId::new(),
            node_type,
            subtype,
            legacy_key: None,
            state: NodeState::Active,
            counters: NodeCounters::default(),
            created_at: Utc::now(),
            properties,
            superseded_by: None,
        }
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    pub fn with_legacy_key(mut self, key: LegacyKey) -> Self {
        self.legacy_key = Some(key);
        self
    }

    pub fn with_state(mut self, state: NodeState) -> Self {
        self.state = state;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.node_type, self.id)
    }

    pub fn is_active(&self) -> bool {
        self.state == NodeState::Active
    }

    /// Whether any aggregate has been attached, which freezes `node_type`
    pub fn has_aggregates(&self) -> bool {
        !self.counters.is_zero()
    }

    /// Text body used for mention rewriting, if the payload has one
    pub fn body(&self) -> Option<&str> {
        self.properties.get("body").and_then(|v| v.as_str())
    }
}
