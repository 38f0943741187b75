//! Node Registry
//!
//! Maps source records to canonical nodes:
//!
//! - [`NodeRegistry::classify`] is a pure function of the record's shape,
//!   driven by the definition's declarative rules.
//! - [`NodeRegistry::resolve`] allocates a canonical id on first resolution and
//!   returns the same id on every later call, within a run and across re-runs.
//! - [`NodeRegistry::reclassify`] changes a node's type by creating a new node
//!   and remapping its edges; `node_type` is never mutated in place.
//!
//! Resolution is two compare-and-set writes: the store's legacy-key index
//! (one node per key) and the run's identity mapping (one id per key), so
//! concurrent record tasks resolving the same key always agree. A node that a
//! later definition reclassified is followed to its replacement, so re-runs
//! never attach edges to a superseded node.

use crate::db::{GraphStore, Inserted};
use crate::models::{
    Classification, ClassificationRule, Edge, EdgeState, Endpoint, LegacyKey, Node, NodeId, NodeState,
    NodeType, SourceRecord,
};
use crate::services::closure_maintainer::ClosureMaintainer;
use crate::services::error::{GraphError, GraphResult};
use std::sync::Arc;

/// Outcome of resolving a legacy key
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub node: Node,
    /// A node was allocated by this call
    pub created: bool,
}

pub struct NodeRegistry {
    store: Arc<dyn GraphStore>,
    rules: Vec<ClassificationRule>,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn GraphStore>, rules: Vec<ClassificationRule>) -> Self {
        Self { store, rules }
    }

    /// Classify a record into a node type
    ///
    /// # Errors
    ///
    /// - `Unclassified`: no rule matches
    /// - `ClassificationAmbiguous`: matching rules disagree on type, subtype or shape
    pub fn classify(&self, record: &SourceRecord) -> GraphResult<Classification> {
        let matching: Vec<&ClassificationRule> =
            self.rules.iter().filter(|rule| rule.matches(record)).collect();

        let first = matching.first().ok_or_else(|| GraphError::Unclassified {
            key: record.legacy_key(),
        })?;

        let conflicting = matching
            .iter()
            .any(|rule| {
                rule.node_type != first.node_type
                    || rule.subtype != first.subtype
                    || rule.shape != first.shape
            });
        if conflicting {
            return Err(GraphError::ambiguous(
                record.legacy_key(),
                matching.iter().map(|rule| rule.name.clone()).collect(),
            ));
        }

        Ok(Classification {
            node_type: first.node_type,
            subtype: first.subtype.clone(),
            legacy_key: record.legacy_key(),
            rule: first.name.clone(),
        })
    }

    /// Resolve the canonical node of a classified record, allocating it if needed
    pub async fn resolve(
        &self,
        run: &str,
        classification: &Classification,
        record: &SourceRecord,
    ) -> GraphResult<Resolved> {
        let key = &classification.legacy_key;

        if let Some(node) = self.mapped_node(run, key).await? {
            return self.ensure_type(run, node, classification, false).await;
        }

        let state = if record.deleted {
            NodeState::Deleted
        } else {
            NodeState::Active
        };
        let candidate = Node::new(
            classification.node_type,
            classification.subtype.clone(),
            record.payload.clone(),
        )
        .with_legacy_key(key.clone())
        .with_state(state)
        .with_created_at(record.created_at);

        let (node, created) = match self.store.insert_node_if_absent(candidate).await? {
            Inserted::New(node) => (node, true),
            Inserted::Existing(node) => (self.follow_replacements(node).await?, false),
        };
        let resolved = self.ensure_type(run, node, classification, created).await?;

        let winner = self
            .store
            .map_insert_if_absent(run, key, resolved.node.id)
            .await?;
        if winner == resolved.node.id {
            return Ok(resolved);
        }

        // Another task mapped the key first; its node is canonical
        let node = self
            .store
            .get_node(winner)
            .await?
            .ok_or(GraphError::NodeNotFound { id: winner })?;
        Ok(Resolved {
            node: self.follow_replacements(node).await?,
            created: false,
        })
    }

    /// Find the canonical node of a key without allocating
    pub async fn lookup(&self, run: &str, key: &LegacyKey) -> GraphResult<Option<Node>> {
        if let Some(node) = self.mapped_node(run, key).await? {
            return Ok(Some(node));
        }

        match self.store.find_node_by_legacy_key(key).await? {
            Some(node) => {
                let node = self.follow_replacements(node).await?;
                let winner = self.store.map_insert_if_absent(run, key, node.id).await?;
                if winner == node.id {
                    Ok(Some(node))
                } else {
                    Ok(self.store.get_node(winner).await?)
                }
            }
            None => Ok(None),
        }
    }

    pub async fn node(&self, id: NodeId) -> GraphResult<Option<Node>> {
        Ok(self.store.get_node(id).await?)
    }

    /// Give a node a new type by replacing it
    ///
    /// The replacement inherits the payload, state, creation time and legacy
    /// key. Every active edge touching the old node is re-created against the
    /// replacement and soft-deleted, closure rows are copied, and the old node
    /// is marked deleted. Counters start at zero and must be recounted.
    ///
    /// Every step is re-entrant: the replacement id is claimed on the old node
    /// before anything else is written, so a call interrupted by an outage is
    /// finished by the next call instead of starting a second replacement. The
    /// legacy key moves last.
    pub async fn reclassify(
        &self,
        node_id: NodeId,
        node_type: NodeType,
        subtype: Option<String>,
    ) -> GraphResult<Node> {
        let old = self
            .store
            .get_node(node_id)
            .await?
            .ok_or(GraphError::NodeNotFound { id: node_id })?;

        if old.node_type == node_type && old.subtype == subtype {
            return Ok(old);
        }

        let replacement_id = self.store.claim_replacement(old.id, NodeId::new()).await?;
        let replacement = Node::new(node_type, subtype.clone(), old.properties.clone())
            .with_id(replacement_id)
            .with_state(old.state)
            .with_created_at(old.created_at);
        let replacement = self
            .store
            .insert_node_if_absent(replacement)
            .await?
            .into_inner();
        if replacement.node_type != node_type || replacement.subtype != subtype {
            return Err(GraphError::invariant(format!(
                "node {} is already being replaced by {} ({})",
                old.id, replacement.id, replacement.node_type
            )));
        }

        let mut touching = self.store.edges_from(old.id, None).await?;
        touching.extend(self.store.edges_to(old.id, None).await?);

        for edge in touching {
            let swap = |endpoint: Endpoint| {
                if endpoint.id == old.id {
                    replacement.endpoint()
                } else {
                    endpoint
                }
            };
            let remapped = Edge::new(swap(edge.from), swap(edge.to), edge.kind)
                .with_role(edge.role.clone())
                .with_order_index(edge.order_index)
                .with_created_at(edge.created_at);

            // An edge moved before an interruption comes back as `Existing`
            self.store.insert_edge_if_absent(remapped).await?;
            let mut retired = edge;
            retired.state = EdgeState::Deleted;
            self.store.update_edge(retired).await?;
        }

        ClosureMaintainer::new(self.store.clone())
            .copy_entries(old.id, replacement.id)
            .await?;

        self.store.set_node_state(old.id, NodeState::Deleted).await?;

        if let Some(key) = &old.legacy_key {
            let indexed = self.store.find_node_by_legacy_key(key).await?;
            if indexed.map_or(true, |node| node.id == old.id) {
                self.store.rebind_legacy_key(key, replacement.id).await?;
            }
        }

        tracing::info!(
            "Reclassified node {} ({}) as {} ({})",
            old.id,
            old.node_type,
            replacement.id,
            replacement.node_type
        );

        Ok(self
            .store
            .get_node(replacement.id)
            .await?
            .unwrap_or(replacement))
    }

    /// The run's mapped node, moved forward past any later reclassification
    async fn mapped_node(&self, run: &str, key: &LegacyKey) -> GraphResult<Option<Node>> {
        let Some(id) = self.store.map_get(run, key).await? else {
            return Ok(None);
        };
        let Some(node) = self.store.get_node(id).await? else {
            return Ok(None);
        };

        let current = self.follow_replacements(node).await?;
        if current.id != id {
            self.store.map_rebind(run, key, current.id).await?;
        }
        Ok(Some(current))
    }

    /// Walk `superseded_by` to the live node, finishing any interrupted
    /// reclassification on the way
    async fn follow_replacements(&self, mut node: Node) -> GraphResult<Node> {
        while let Some(next) = node.superseded_by {
            // Claimed but never inserted: the next reclassify reuses the claim
            let Some(target) = self.store.get_node(next).await? else {
                break;
            };
            let replacement = self
                .reclassify(node.id, target.node_type, target.subtype.clone())
                .await?;
            if replacement.id == node.id {
                break;
            }
            node = replacement;
        }
        Ok(node)
    }

    /// Reclassify an existing node whose type no longer matches the rules
    async fn ensure_type(
        &self,
        run: &str,
        node: Node,
        classification: &Classification,
        created: bool,
    ) -> GraphResult<Resolved> {
        if node.node_type == classification.node_type && node.subtype == classification.subtype {
            return Ok(Resolved { node, created });
        }

        let replacement = self
            .reclassify(
                node.id,
                classification.node_type,
                classification.subtype.clone(),
            )
            .await?;

        // Point this run's mapping at the replacement too
        self.store
            .map_rebind(run, &classification.legacy_key, replacement.id)
            .await?;

        Ok(Resolved {
            node: replacement,
            created: true,
        })
    }
}
