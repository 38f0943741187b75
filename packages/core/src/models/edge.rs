//! Edge (link) data structures
//!
//! An edge is a directed, typed relationship between two [`Endpoint`]s. The
//! endpoints are deliberately heterogeneous: a post may point at a media block,
//! a comment, a user or another post through the same edge table.

use crate::models::counters::NodeCounters;
use crate::models::node::{Endpoint, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Relationship kind of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    /// Symmetric user-authored reference
    Link,
    /// Structural containment (`from` contains `to`)
    Parent,
    /// Shortcut from the top-level ancestor to a descendant
    Root,
    /// One row per transitive ancestor of `to`
    Ancestor,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::Link => "link",
            RelationshipKind::Parent => "parent",
            RelationshipKind::Root => "root",
            RelationshipKind::Ancestor => "ancestor",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum EdgeState {
    #[default]
    Active,
    Deleted,
}

/// Uniqueness key among active edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub from: Endpoint,
    pub to: Endpoint,
    pub kind: RelationshipKind,
}

/// Ordering group: all parent-style edges leaving one endpoint with one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKey {
    pub parent: Endpoint,
    pub kind: RelationshipKind,
}

impl GroupKey {
    pub fn new(parent: Endpoint, kind: RelationshipKind) -> Self {
        Self { parent, kind }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.parent, self.kind)
    }
}

/// Directed, typed, optionally ordered edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub from: Endpoint,
    pub to: Endpoint,
    pub kind: RelationshipKind,

    /// Modifier such as `prompt` marking a special parent edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Position inside the `(from, kind)` group; `None` for unordered edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i64>,

    #[serde(default)]
    pub state: EdgeState,

    /// Mirrored from the `to` node
    #[serde(default)]
    pub counters: NodeCounters,

    /// Creation time of the content the edge represents
    pub created_at: DateTime<Utc>,

    /// Insertion sequence assigned by the store, last-resort tie-break
    #[serde(default)]
    pub seq: u64,
}

impl Edge {
    pub fn new(from: Endpoint, to: Endpoint, kind: RelationshipKind) -> Self {
        Self {
            id: EdgeId::new(),
            from,
            to,
            kind,
            role: None,
            order_index: None,
            state: EdgeState::Active,
            counters: NodeCounters::default(),
            created_at: Utc::now(),
            seq: 0,
        }
    }

    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }

    pub fn with_order_index(mut self, order_index: Option<i64>) -> Self {
        self.order_index = order_index;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            from: self.from,
            to: self.to,
            kind: self.kind,
        }
    }

    pub fn group(&self) -> GroupKey {
        GroupKey::new(self.from, self.kind)
    }

    pub fn is_active(&self) -> bool {
        self.state == EdgeState::Active
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.from.id == node || self.to.id == node
    }
}
