use crate::models::node::{ClosureDomain, NodeId};
use serde::{Deserialize, Serialize};

/// One materialized `(ancestor, descendant)` pair of a closure domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureEntry {
    pub domain: ClosureDomain,
    pub ancestor: NodeId,
    pub descendant: NodeId,
}

impl ClosureEntry {
    pub fn new(domain: ClosureDomain, ancestor: NodeId, descendant: NodeId) -> Self {
        Self {
            domain,
            ancestor,
            descendant,
        }
    }
}
