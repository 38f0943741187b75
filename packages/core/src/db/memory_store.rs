//! In-memory `GraphStore`
//!
//! Reference implementation of the persistence seam. All tables live behind a
//! single `tokio::sync::RwLock`, which makes every trait method atomic and every
//! insert-if-absent a true compare-and-set.
//!
//! The store also carries fault injection used to exercise the engine's outage
//! handling: [`MemoryStore::set_available`] flips the store offline and
//! [`MemoryStore::fail_after`] lets a fixed number of operations succeed before
//! it goes offline by itself.

use crate::db::error::{StoreError, StoreResult};
use crate::db::events::GraphEvent;
use crate::db::graph_store::{GraphStore, Inserted};
use crate::models::{
    ClosureDomain, ClosureEntry, CounterName, Edge, EdgeId, EdgeKey, EdgeState, GroupKey,
    LegacyKey, Node, NodeCounters, NodeId, NodeState, Reaction, ReactionTarget,
    RelationshipKind,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::{broadcast, RwLock};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct Tables {
    nodes: HashMap<NodeId, Node>,
    legacy_index: HashMap<LegacyKey, NodeId>,

    edges: HashMap<EdgeId, Edge>,
    active_edges: HashMap<EdgeKey, EdgeId>,
    groups: HashMap<GroupKey, Vec<EdgeId>>,
    outgoing: HashMap<NodeId, Vec<EdgeId>>,
    incoming: HashMap<NodeId, Vec<EdgeId>>,
    next_seq: u64,

    closure: HashSet<ClosureEntry>,
    ancestors: HashMap<(ClosureDomain, NodeId), BTreeSet<NodeId>>,

    mappings: HashMap<String, HashMap<LegacyKey, NodeId>>,

    reactions: BTreeMap<u64, Reaction>,
}

impl Tables {
    fn active_edges_in(&self, ids: Option<&Vec<EdgeId>>, kind: Option<RelationshipKind>) -> Vec<Edge> {
        let mut edges: Vec<Edge> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
            .filter(|edge| edge.is_active() && kind.map_or(true, |k| edge.kind == k))
            .cloned()
            .collect();
        edges.sort_by_key(|edge| edge.seq);
        edges
    }
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    events: broadcast::Sender<GraphEvent>,
    available: AtomicBool,
    /// Operations left before the store goes offline; negative disables the budget
    fail_budget: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tables: RwLock::new(Tables::default()),
            events,
            available: AtomicBool::new(true),
            fail_budget: AtomicI64::new(-1),
        }
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    /// Bring the store on or offline; going online also clears any budget
    pub fn set_available(&self, available: bool) {
        if available {
            self.fail_budget.store(-1, Ordering::Release);
        }
        self.available.store(available, Ordering::Release);
    }

    /// Let `operations` more calls succeed, then go offline
    pub fn fail_after(&self, operations: u64) {
        let budget = i64::try_from(operations).unwrap_or(i64::MAX);
        self.fail_budget.store(budget, Ordering::Release);
    }

    /// Every edge, active or deleted, in insertion order
    pub async fn all_edges(&self) -> Vec<Edge> {
        let tables = self.tables.read().await;
        let mut edges: Vec<Edge> = tables.edges.values().cloned().collect();
        edges.sort_by_key(|edge| edge.seq);
        edges
    }

    pub async fn node_count(&self) -> usize {
        self.tables.read().await.nodes.len()
    }

    pub async fn closure_count(&self) -> usize {
        self.tables.read().await.closure.len()
    }

    fn check(&self, operation: &str) -> StoreResult<()> {
        if !self.available.load(Ordering::Acquire) {
            return Err(StoreError::unavailable(format!("{} rejected: store offline", operation)));
        }

        match self
            .fail_budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| (b > 0).then(|| b - 1))
        {
            Err(0) => {
                self.available.store(false, Ordering::Release);
                Err(StoreError::unavailable(format!(
                    "{} rejected: store went offline",
                    operation
                )))
            }
            _ => Ok(()),
        }
    }

    fn emit(&self, event: GraphEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn insert_node_if_absent(&self, node: Node) -> StoreResult<Inserted<Node>> {
        self.check("insert_node_if_absent")?;
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables.nodes.get(&node.id) {
            return Ok(Inserted::Existing(existing.clone()));
        }

        if let Some(key) = &node.legacy_key {
            if let Some(existing) = tables
                .legacy_index
                .get(key)
                .and_then(|id| tables.nodes.get(id))
            {
                return Ok(Inserted::Existing(existing.clone()));
            }
            tables.legacy_index.insert(key.clone(), node.id);
        }

        tables.nodes.insert(node.id, node.clone());
        drop(tables);

        self.emit(GraphEvent::NodeCreated {
            id: node.id,
            node_type: node.node_type,
        });
        Ok(Inserted::New(node))
    }

    async fn get_node(&self, id: NodeId) -> StoreResult<Option<Node>> {
        self.check("get_node")?;
        Ok(self.tables.read().await.nodes.get(&id).cloned())
    }

    async fn find_node_by_legacy_key(&self, key: &LegacyKey) -> StoreResult<Option<Node>> {
        self.check("find_node_by_legacy_key")?;
        let tables = self.tables.read().await;
        Ok(tables
            .legacy_index
            .get(key)
            .and_then(|id| tables.nodes.get(id))
            .cloned())
    }

    async fn rebind_legacy_key(&self, key: &LegacyKey, id: NodeId) -> StoreResult<()> {
        self.check("rebind_legacy_key")?;
        let mut tables = self.tables.write().await;
        if !tables.nodes.contains_key(&id) {
            return Err(StoreError::conflict(format!(
                "cannot bind {} to missing node {}",
                key, id
            )));
        }
        tables.legacy_index.insert(key.clone(), id);
        if let Some(node) = tables.nodes.get_mut(&id) {
            node.legacy_key = Some(key.clone());
        }
        Ok(())
    }

    async fn set_node_state(&self, id: NodeId, state: NodeState) -> StoreResult<()> {
        self.check("set_node_state")?;
        let mut tables = self.tables.write().await;
        let node = tables
            .nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("node", id))?;
        node.state = state;
        drop(tables);

        self.emit(GraphEvent::NodeUpdated { id });
        Ok(())
    }

    async fn claim_replacement(&self, id: NodeId, replacement: NodeId) -> StoreResult<NodeId> {
        self.check("claim_replacement")?;
        let mut tables = self.tables.write().await;
        let node = tables
            .nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("node", id))?;
        Ok(*node.superseded_by.get_or_insert(replacement))
    }

    async fn set_node_counter(
        &self,
        id: NodeId,
        counter: CounterName,
        value: u64,
    ) -> StoreResult<NodeCounters> {
        self.check("set_node_counter")?;
        let mut tables = self.tables.write().await;
        let node = tables
            .nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("node", id))?;
        node.counters.set(counter, value);
        let counters = node.counters;
        drop(tables);

        self.emit(GraphEvent::CounterChanged { id, counter, value });
        Ok(counters)
    }

    async fn update_node_properties(
        &self,
        id: NodeId,
        properties: serde_json::Value,
    ) -> StoreResult<()> {
        self.check("update_node_properties")?;
        let mut tables = self.tables.write().await;
        let node = tables
            .nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("node", id))?;
        node.properties = properties;
        drop(tables);

        self.emit(GraphEvent::NodeUpdated { id });
        Ok(())
    }

    async fn list_nodes(&self) -> StoreResult<Vec<Node>> {
        self.check("list_nodes")?;
        let tables = self.tables.read().await;
        let mut nodes: Vec<Node> = tables.nodes.values().cloned().collect();
        nodes.sort_by_key(|node| (node.created_at, node.id));
        Ok(nodes)
    }

    async fn insert_edge_if_absent(&self, mut edge: Edge) -> StoreResult<Inserted<Edge>> {
        self.check("insert_edge_if_absent")?;
        let mut tables = self.tables.write().await;

        let key = edge.key();
        if let Some(existing) = tables
            .active_edges
            .get(&key)
            .and_then(|id| tables.edges.get(id))
        {
            return Ok(Inserted::Existing(existing.clone()));
        }

        tables.next_seq += 1;
        edge.seq = tables.next_seq;
        edge.state = EdgeState::Active;

        tables.active_edges.insert(key, edge.id);
        tables.groups.entry(edge.group()).or_default().push(edge.id);
        tables.outgoing.entry(edge.from.id).or_default().push(edge.id);
        tables.incoming.entry(edge.to.id).or_default().push(edge.id);
        tables.edges.insert(edge.id, edge.clone());
        drop(tables);

        self.emit(GraphEvent::EdgeCreated {
            id: edge.id,
            from: edge.from,
            to: edge.to,
            kind: edge.kind,
        });
        Ok(Inserted::New(edge))
    }

    async fn get_edge(&self, id: EdgeId) -> StoreResult<Option<Edge>> {
        self.check("get_edge")?;
        Ok(self.tables.read().await.edges.get(&id).cloned())
    }

    async fn scan_group(&self, group: &GroupKey) -> StoreResult<Vec<Edge>> {
        self.check("scan_group")?;
        let tables = self.tables.read().await;
        Ok(tables.active_edges_in(tables.groups.get(group), None))
    }

    async fn edges_from(
        &self,
        node: NodeId,
        kind: Option<RelationshipKind>,
    ) -> StoreResult<Vec<Edge>> {
        self.check("edges_from")?;
        let tables = self.tables.read().await;
        Ok(tables.active_edges_in(tables.outgoing.get(&node), kind))
    }

    async fn edges_to(
        &self,
        node: NodeId,
        kind: Option<RelationshipKind>,
    ) -> StoreResult<Vec<Edge>> {
        self.check("edges_to")?;
        let tables = self.tables.read().await;
        Ok(tables.active_edges_in(tables.incoming.get(&node), kind))
    }

    async fn update_edge(&self, edge: Edge) -> StoreResult<()> {
        self.check("update_edge")?;
        let mut tables = self.tables.write().await;

        let previous = tables
            .edges
            .get(&edge.id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("edge", edge.id))?;
        if previous.key() != edge.key() {
            return Err(StoreError::conflict(format!(
                "edge {} endpoints and kind are immutable",
                edge.id
            )));
        }

        let key = edge.key();
        match (previous.state, edge.state) {
            (EdgeState::Active, EdgeState::Deleted) => {
                if tables.active_edges.get(&key) == Some(&edge.id) {
                    tables.active_edges.remove(&key);
                }
            }
            (EdgeState::Deleted, EdgeState::Active) => {
                if tables.active_edges.contains_key(&key) {
                    return Err(StoreError::conflict(format!(
                        "another active edge already links {} -> {} ({})",
                        key.from, key.to, key.kind
                    )));
                }
                tables.active_edges.insert(key, edge.id);
            }
            _ => {}
        }

        let id = edge.id;
        let stored = Edge {
            seq: previous.seq,
            ..edge
        };
        tables.edges.insert(id, stored);
        drop(tables);

        self.emit(GraphEvent::EdgeUpdated { id });
        Ok(())
    }

    async fn insert_closure_if_absent(&self, entry: ClosureEntry) -> StoreResult<bool> {
        self.check("insert_closure_if_absent")?;
        let mut tables = self.tables.write().await;
        if !tables.closure.insert(entry) {
            return Ok(false);
        }
        tables
            .ancestors
            .entry((entry.domain, entry.descendant))
            .or_default()
            .insert(entry.ancestor);
        drop(tables);

        self.emit(GraphEvent::ClosureInserted {
            domain: entry.domain,
            ancestor: entry.ancestor,
            descendant: entry.descendant,
        });
        Ok(true)
    }

    async fn closure_contains(
        &self,
        domain: ClosureDomain,
        ancestor: NodeId,
        descendant: NodeId,
    ) -> StoreResult<bool> {
        self.check("closure_contains")?;
        let entry = ClosureEntry::new(domain, ancestor, descendant);
        Ok(self.tables.read().await.closure.contains(&entry))
    }

    async fn closure_ancestors(
        &self,
        domain: ClosureDomain,
        descendant: NodeId,
    ) -> StoreResult<Vec<NodeId>> {
        self.check("closure_ancestors")?;
        let tables = self.tables.read().await;
        Ok(tables
            .ancestors
            .get(&(domain, descendant))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn closure_entries(&self, domain: ClosureDomain) -> StoreResult<Vec<ClosureEntry>> {
        self.check("closure_entries")?;
        let tables = self.tables.read().await;
        let mut entries: Vec<ClosureEntry> = tables
            .closure
            .iter()
            .filter(|entry| entry.domain == domain)
            .copied()
            .collect();
        entries.sort();
        Ok(entries)
    }

    async fn remove_closure(&self, entry: ClosureEntry) -> StoreResult<bool> {
        self.check("remove_closure")?;
        let mut tables = self.tables.write().await;
        if !tables.closure.remove(&entry) {
            return Ok(false);
        }
        if let Some(set) = tables.ancestors.get_mut(&(entry.domain, entry.descendant)) {
            set.remove(&entry.ancestor);
        }
        Ok(true)
    }

    async fn map_insert_if_absent(
        &self,
        run: &str,
        key: &LegacyKey,
        id: NodeId,
    ) -> StoreResult<NodeId> {
        self.check("map_insert_if_absent")?;
        let mut tables = self.tables.write().await;
        let mapping = tables.mappings.entry(run.to_string()).or_default();
        Ok(*mapping.entry(key.clone()).or_insert(id))
    }

    async fn map_rebind(&self, run: &str, key: &LegacyKey, id: NodeId) -> StoreResult<()> {
        self.check("map_rebind")?;
        let mut tables = self.tables.write().await;
        tables
            .mappings
            .entry(run.to_string())
            .or_default()
            .insert(key.clone(), id);
        Ok(())
    }

    async fn map_get(&self, run: &str, key: &LegacyKey) -> StoreResult<Option<NodeId>> {
        self.check("map_get")?;
        let tables = self.tables.read().await;
        Ok(tables
            .mappings
            .get(run)
            .and_then(|mapping| mapping.get(key))
            .copied())
    }

    async fn map_entries(&self, run: &str) -> StoreResult<Vec<(LegacyKey, NodeId)>> {
        self.check("map_entries")?;
        let tables = self.tables.read().await;
        let mut entries: Vec<(LegacyKey, NodeId)> = tables
            .mappings
            .get(run)
            .map(|mapping| mapping.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        entries.sort();
        Ok(entries)
    }

    async fn discard_mapping(&self, run: &str) -> StoreResult<usize> {
        self.check("discard_mapping")?;
        let mut tables = self.tables.write().await;
        Ok(tables.mappings.remove(run).map_or(0, |mapping| mapping.len()))
    }

    async fn insert_reaction(&self, reaction: Reaction) -> StoreResult<()> {
        self.check("insert_reaction")?;
        let mut tables = self.tables.write().await;
        if tables.reactions.contains_key(&reaction.id) {
            return Err(StoreError::conflict(format!(
                "reaction {} already exists",
                reaction.id
            )));
        }
        tables.reactions.insert(reaction.id, reaction);
        Ok(())
    }

    async fn reactions_for_legacy_target(&self, key: &LegacyKey) -> StoreResult<Vec<Reaction>> {
        self.check("reactions_for_legacy_target")?;
        let tables = self.tables.read().await;
        Ok(tables
            .reactions
            .values()
            .filter(|r| matches!(&r.target, ReactionTarget::Legacy(target) if target == key))
            .cloned()
            .collect())
    }

    async fn reactions_for_node(&self, node: NodeId) -> StoreResult<Vec<Reaction>> {
        self.check("reactions_for_node")?;
        let tables = self.tables.read().await;
        Ok(tables
            .reactions
            .values()
            .filter(|r| r.targets_node(node))
            .cloned()
            .collect())
    }

    async fn update_reaction(&self, reaction: Reaction) -> StoreResult<()> {
        self.check("update_reaction")?;
        let mut tables = self.tables.write().await;
        if !tables.reactions.contains_key(&reaction.id) {
            return Err(StoreError::not_found("reaction", reaction.id));
        }
        tables.reactions.insert(reaction.id, reaction);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Endpoint, NodeType};
    use serde_json::json;

    fn post(id: i64) -> Node {
        Node::new(NodeType::Post, None, json!({})).with_legacy_key(LegacyKey::new("posts", id))
    }

    #[tokio::test]
    async fn test_insert_node_if_absent_is_keyed_by_legacy_key() {
        let store = MemoryStore::new();

        let first = store.insert_node_if_absent(post(1)).await.unwrap();
        let second = store.insert_node_if_absent(post(1)).await.unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.into_inner().id, second.into_inner().id);
        assert_eq!(store.node_count().await, 1);
    }

    #[tokio::test]
    async fn test_active_edge_uniqueness_and_soft_delete() {
        let store = MemoryStore::new();
        let a = store.insert_node_if_absent(post(1)).await.unwrap().into_inner();
        let b = store.insert_node_if_absent(post(2)).await.unwrap().into_inner();

        let edge = Edge::new(a.endpoint(), b.endpoint(), RelationshipKind::Link);
        let inserted = store.insert_edge_if_absent(edge.clone()).await.unwrap();
        assert!(inserted.is_new());

        let again = Edge::new(a.endpoint(), b.endpoint(), RelationshipKind::Link);
        assert!(!store.insert_edge_if_absent(again).await.unwrap().is_new());

        let mut deleted = inserted.into_inner();
        deleted.state = EdgeState::Deleted;
        store.update_edge(deleted).await.unwrap();

        let replacement = Edge::new(a.endpoint(), b.endpoint(), RelationshipKind::Link);
        assert!(store.insert_edge_if_absent(replacement).await.unwrap().is_new());
        assert_eq!(store.all_edges().await.len(), 2);
        assert_eq!(store.edges_from(a.id, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_map_insert_if_absent_keeps_first_writer() {
        let store = MemoryStore::new();
        let key = LegacyKey::new("comments", 9);
        let first = NodeId::new();
        let second = NodeId::new();

        assert_eq!(store.map_insert_if_absent("run", &key, first).await.unwrap(), first);
        assert_eq!(store.map_insert_if_absent("run", &key, second).await.unwrap(), first);
        assert_eq!(store.map_get("other", &key).await.unwrap(), None);
        assert_eq!(store.discard_mapping("run").await.unwrap(), 1);
        assert_eq!(store.map_get("run", &key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_claim_replacement_keeps_first_claim() {
        let store = MemoryStore::new();
        let node = store.insert_node_if_absent(post(1)).await.unwrap().into_inner();
        let first = NodeId::new();

        assert_eq!(store.claim_replacement(node.id, first).await.unwrap(), first);
        assert_eq!(
            store.claim_replacement(node.id, NodeId::new()).await.unwrap(),
            first
        );

        // Inserting under a claimed id twice yields one node
        let replacement = Node::new(NodeType::Comment, None, json!({})).with_id(first);
        assert!(store.insert_node_if_absent(replacement.clone()).await.unwrap().is_new());
        assert!(!store.insert_node_if_absent(replacement).await.unwrap().is_new());
        assert_eq!(store.node_count().await, 2);
    }

    #[tokio::test]
    async fn test_fail_after_takes_store_offline() {
        let store = MemoryStore::new();
        store.fail_after(1);

        assert!(store.list_nodes().await.is_ok());
        let err = store.list_nodes().await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.list_nodes().await.unwrap_err().is_unavailable());

        store.set_available(true);
        assert!(store.list_nodes().await.is_ok());
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();

        let node = store.insert_node_if_absent(post(1)).await.unwrap().into_inner();
        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            GraphEvent::NodeCreated {
                id: node.id,
                node_type: NodeType::Post
            }
        );

        let other = Endpoint::new(NodeType::User, NodeId::new());
        store
            .insert_edge_if_absent(Edge::new(node.endpoint(), other, RelationshipKind::Link))
            .await
            .unwrap();
        assert_eq!(events.recv().await.unwrap().event_type(), "edge:created");
    }
}
