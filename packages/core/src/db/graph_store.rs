//! GraphStore Trait - Persistence Abstraction Layer
//!
//! This module defines the `GraphStore` trait, the seam between the graph
//! services (registry, edge store, closure and counter maintainers, migration
//! engine) and whatever transactional store backs them.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: every method is async; each call is a suspension point
//!    of a record task and nothing else is.
//! 2. **Insert-if-absent primitives**: node creation by legacy key, active-edge
//!    creation and identity-mapping writes are compare-and-set so concurrent
//!    record tasks never produce two rows for one key.
//! 3. **Typed errors**: `StoreError::Unavailable` is the only error the engine
//!    treats as a stage-level outage.
//! 4. **No hard deletes**: the trait only offers state transitions for nodes,
//!    edges and reactions. Closure compaction is the single removal path.
//!
//! # Method Categories
//!
//! - **Nodes**: 9 methods (legacy-key CAS, lookups, counters, state, replacement claim, properties)
//! - **Edges**: 6 methods (CAS insert, lookups, group scan, updates)
//! - **Closure**: 5 methods (CAS insert, O(1) membership, ancestor scan, removal)
//! - **Identity mapping**: 5 methods (CAS insert, rebind, lookup, scan, discard)
//! - **Reactions**: 4 methods (insert, lookups by legacy key / node, update)

use crate::db::error::StoreResult;
use crate::models::{
    ClosureDomain, ClosureEntry, CounterName, Edge, EdgeId, GroupKey, LegacyKey, Node,
    NodeCounters, NodeId, NodeState, Reaction, RelationshipKind,
};
use async_trait::async_trait;

/// Result of an insert-if-absent write
#[derive(Debug, Clone, PartialEq)]
pub enum Inserted<T> {
    /// The row did not exist and was written
    New(T),
    /// A row with the same key already existed; it is returned unchanged
    Existing(T),
}

impl<T> Inserted<T> {
    pub fn is_new(&self) -> bool {
        matches!(self, Inserted::New(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Inserted::New(value) | Inserted::Existing(value) => value,
        }
    }
}

/// Persistence operations required by the content graph
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; record tasks call into the store
/// concurrently from the engine's bounded fan-out.
#[async_trait]
pub trait GraphStore: Send + Sync {
    //
    // NODES
    //

    /// Insert a node unless one with the same legacy key exists
    ///
    /// Nodes without a legacy key are inserted unless their id is taken.
    async fn insert_node_if_absent(&self, node: Node) -> StoreResult<Inserted<Node>>;

    async fn get_node(&self, id: NodeId) -> StoreResult<Option<Node>>;

    async fn find_node_by_legacy_key(&self, key: &LegacyKey) -> StoreResult<Option<Node>>;

    /// Point the legacy-key index at a different node (reclassification)
    async fn rebind_legacy_key(&self, key: &LegacyKey, id: NodeId) -> StoreResult<()>;

    async fn set_node_state(&self, id: NodeId, state: NodeState) -> StoreResult<()>;

    /// Record `replacement` as superseding `id` unless a replacement is already recorded
    ///
    /// Returns the recorded replacement after the call.
    async fn claim_replacement(&self, id: NodeId, replacement: NodeId) -> StoreResult<NodeId>;

    async fn set_node_counter(&self, id: NodeId, counter: CounterName, value: u64)
        -> StoreResult<NodeCounters>;

    async fn update_node_properties(
        &self,
        id: NodeId,
        properties: serde_json::Value,
    ) -> StoreResult<()>;

    async fn list_nodes(&self) -> StoreResult<Vec<Node>>;

    //
    // EDGES
    //

    /// Insert an edge unless an active edge with the same `(from, to, kind)` exists
    ///
    /// The store assigns `seq` on insert.
    async fn insert_edge_if_absent(&self, edge: Edge) -> StoreResult<Inserted<Edge>>;

    async fn get_edge(&self, id: EdgeId) -> StoreResult<Option<Edge>>;

    /// Active edges of one ordering group, in insertion order
    async fn scan_group(&self, group: &GroupKey) -> StoreResult<Vec<Edge>>;

    /// Active edges leaving `node`, optionally restricted to one kind
    async fn edges_from(
        &self,
        node: NodeId,
        kind: Option<RelationshipKind>,
    ) -> StoreResult<Vec<Edge>>;

    /// Active edges arriving at `node`, optionally restricted to one kind
    async fn edges_to(&self, node: NodeId, kind: Option<RelationshipKind>)
        -> StoreResult<Vec<Edge>>;

    /// Overwrite an edge's mutable fields (state, order index, counters)
    async fn update_edge(&self, edge: Edge) -> StoreResult<()>;

    //
    // CLOSURE
    //

    /// Returns `true` if the entry was new
    async fn insert_closure_if_absent(&self, entry: ClosureEntry) -> StoreResult<bool>;

    async fn closure_contains(
        &self,
        domain: ClosureDomain,
        ancestor: NodeId,
        descendant: NodeId,
    ) -> StoreResult<bool>;

    async fn closure_ancestors(
        &self,
        domain: ClosureDomain,
        descendant: NodeId,
    ) -> StoreResult<Vec<NodeId>>;

    async fn closure_entries(&self, domain: ClosureDomain) -> StoreResult<Vec<ClosureEntry>>;

    /// Returns `true` if the entry existed
    async fn remove_closure(&self, entry: ClosureEntry) -> StoreResult<bool>;

    //
    // IDENTITY MAPPING
    //

    /// Record `key → id` for `run` unless the key is already mapped
    ///
    /// Returns the id the key is mapped to after the call, which is the
    /// existing one if another task won the race.
    async fn map_insert_if_absent(
        &self,
        run: &str,
        key: &LegacyKey,
        id: NodeId,
    ) -> StoreResult<NodeId>;

    /// Overwrite the mapping of `key` (reclassification replaced its node)
    async fn map_rebind(&self, run: &str, key: &LegacyKey, id: NodeId) -> StoreResult<()>;

    async fn map_get(&self, run: &str, key: &LegacyKey) -> StoreResult<Option<NodeId>>;

    async fn map_entries(&self, run: &str) -> StoreResult<Vec<(LegacyKey, NodeId)>>;

    /// Drop the mapping of a run, returning how many entries it held
    async fn discard_mapping(&self, run: &str) -> StoreResult<usize>;

    //
    // REACTIONS
    //

    async fn insert_reaction(&self, reaction: Reaction) -> StoreResult<()>;

    async fn reactions_for_legacy_target(&self, key: &LegacyKey) -> StoreResult<Vec<Reaction>>;

    async fn reactions_for_node(&self, node: NodeId) -> StoreResult<Vec<Reaction>>;

    async fn update_reaction(&self, reaction: Reaction) -> StoreResult<()>;
}
