//! Denormalized aggregate counters carried by nodes and mirrored onto edges.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a denormalized counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CounterName {
    /// Active `parent` edges out of the node whose target is active
    TotalChildren,
    /// Active `ancestor` edges out of the node whose target is an active comment
    TotalReplies,
    /// Active like reactions on the node
    TotalLikes,
    /// Active rating reactions on the node
    TotalRatings,
}

impl CounterName {
    pub const ALL: [CounterName; 4] = [
        CounterName::TotalChildren,
        CounterName::TotalReplies,
        CounterName::TotalLikes,
        CounterName::TotalRatings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CounterName::TotalChildren => "totalChildren",
            CounterName::TotalReplies => "totalReplies",
            CounterName::TotalLikes => "totalLikes",
            CounterName::TotalRatings => "totalRatings",
        }
    }
}

impl fmt::Display for CounterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCounters {
    #[serde(default)]
    pub total_children: u64,
    #[serde(default)]
    pub total_replies: u64,
    #[serde(default)]
    pub total_likes: u64,
    #[serde(default)]
    pub total_ratings: u64,
}

impl NodeCounters {
    pub fn get(&self, name: CounterName) -> u64 {
        match name {
            CounterName::TotalChildren => self.total_children,
            CounterName::TotalReplies => self.total_replies,
            CounterName::TotalLikes => self.total_likes,
            CounterName::TotalRatings => self.total_ratings,
        }
    }

    pub fn set(&mut self, name: CounterName, value: u64) {
        match name {
            CounterName::TotalChildren => self.total_children = value,
            CounterName::TotalReplies => self.total_replies = value,
            CounterName::TotalLikes => self.total_likes = value,
            CounterName::TotalRatings => self.total_ratings = value,
        }
    }

    /// Apply a signed delta, saturating at zero
    pub fn apply(&mut self, name: CounterName, delta: i64) -> u64 {
        let current = self.get(name);
        let next = if delta.is_negative() {
            current.saturating_sub(delta.unsigned_abs())
        } else {
            current.saturating_add(delta as u64)
        };
        self.set(name, next);
        next
    }

    pub fn is_zero(&self) -> bool {
        CounterName::ALL.iter().all(|name| self.get(*name) == 0)
    }
}
