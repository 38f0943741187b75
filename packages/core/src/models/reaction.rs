use crate::models::node::{Endpoint, LegacyKey, NodeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReactionKind {
    Like,
    Rating { score: u8 },
}

/// What a reaction points at: the old row before retargeting, a node after
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReactionTarget {
    Legacy(LegacyKey),
    Node(Endpoint),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ReactionState {
    #[default]
    Active,
    Deleted,
}

/// Dependent record behind the like/rating counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: u64,
    pub kind: ReactionKind,
    pub target: ReactionTarget,
    #[serde(default)]
    pub state: ReactionState,
}

impl Reaction {
    pub fn like(id: u64, target: ReactionTarget) -> Self {
        Self {
            id,
            kind: ReactionKind::Like,
            target,
            state: ReactionState::Active,
        }
    }

    pub fn rating(id: u64, score: u8, target: ReactionTarget) -> Self {
        Self {
            id,
            kind: ReactionKind::Rating { score },
            target,
            state: ReactionState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ReactionState::Active
    }

    pub fn targets_node(&self, node: NodeId) -> bool {
        matches!(&self.target, ReactionTarget::Node(endpoint) if endpoint.id == node)
    }
}
