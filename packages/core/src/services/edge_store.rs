//! Edge Store
//!
//! Creation, soft deletion and dense renumbering of edges. Uniqueness of
//! `(from, to, kind)` among active edges is enforced by the backing store's
//! insert-if-absent; this layer turns a lost race into `DuplicateEdge`.
//!
//! An ordered group is every active edge sharing `(from, kind)` that carries an
//! order index. Unindexed edges in the same `(from, kind)` (replies to a post,
//! for example) are left alone by [`EdgeStore::reindex`].

use crate::db::{DenseOrderCalculator, GraphStore, Inserted, OrderKey};
use crate::models::{Edge, EdgeId, EdgeState, GroupKey, NodeId, RelationshipKind};
use crate::services::error::{GraphError, GraphResult};
use std::sync::Arc;

/// Result of a reindex pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReindexSummary {
    /// Indexed members of the group
    pub members: usize,
    /// Members whose index changed
    pub moved: usize,
}

pub struct EdgeStore {
    store: Arc<dyn GraphStore>,
}

impl EdgeStore {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Create an active edge
    ///
    /// # Errors
    ///
    /// `DuplicateEdge` when an active edge with the same endpoints and kind
    /// already exists; the existing edge's id is carried in the error.
    pub async fn create_edge(&self, edge: Edge) -> GraphResult<Edge> {
        match self.store.insert_edge_if_absent(edge).await? {
            Inserted::New(edge) => {
                tracing::debug!("Created {} edge {} -> {}", edge.kind, edge.from, edge.to);
                Ok(edge)
            }
            Inserted::Existing(existing) => Err(GraphError::DuplicateEdge {
                from: existing.from,
                to: existing.to,
                kind: existing.kind,
                existing: existing.id,
            }),
        }
    }

    /// Renumber the indexed members of a group to `0..n-1`
    ///
    /// Members keep their relative order: prior index, then creation time, then
    /// insertion sequence. Running it twice is a no-op the second time.
    pub async fn reindex(&self, group: &GroupKey) -> GraphResult<ReindexSummary> {
        let members = self.indexed_members(group).await?;
        let keys: Vec<OrderKey> = members
            .iter()
            .map(|edge| OrderKey {
                order_index: edge.order_index,
                created_at: edge.created_at,
                seq: edge.seq,
            })
            .collect();
        let assigned = DenseOrderCalculator::assign(&keys);

        let mut moved = 0;
        for (mut edge, index) in members.into_iter().zip(assigned) {
            if edge.order_index == Some(index) {
                continue;
            }
            edge.order_index = Some(index);
            self.store.update_edge(edge).await?;
            moved += 1;
        }

        let written: Vec<i64> = self
            .indexed_members(group)
            .await?
            .iter()
            .filter_map(|edge| edge.order_index)
            .collect();
        if !DenseOrderCalculator::is_dense(&written) {
            return Err(GraphError::invariant(format!(
                "group {} is not contiguous after reindex: {:?}",
                group, written
            )));
        }

        if moved > 0 {
            tracing::debug!("Reindexed group {}: {} of {} moved", group, moved, written.len());
        }

        Ok(ReindexSummary {
            members: written.len(),
            moved,
        })
    }

    /// Mark an edge deleted; closure entries are kept
    pub async fn soft_delete(&self, id: EdgeId) -> GraphResult<Edge> {
        let mut edge = self
            .store
            .get_edge(id)
            .await?
            .ok_or(GraphError::EdgeNotFound { id })?;

        if edge.state == EdgeState::Deleted {
            return Ok(edge);
        }

        edge.state = EdgeState::Deleted;
        self.store.update_edge(edge.clone()).await?;
        Ok(edge)
    }

    /// Indexed active members of a group, in index order
    pub async fn group(&self, group: &GroupKey) -> GraphResult<Vec<Edge>> {
        let mut members = self.indexed_members(group).await?;
        members.sort_by_key(|edge| (edge.order_index, edge.created_at, edge.seq));
        Ok(members)
    }

    pub async fn edges_from(
        &self,
        node: NodeId,
        kind: Option<RelationshipKind>,
    ) -> GraphResult<Vec<Edge>> {
        Ok(self.store.edges_from(node, kind).await?)
    }

    pub async fn edges_to(
        &self,
        node: NodeId,
        kind: Option<RelationshipKind>,
    ) -> GraphResult<Vec<Edge>> {
        Ok(self.store.edges_to(node, kind).await?)
    }

    async fn indexed_members(&self, group: &GroupKey) -> GraphResult<Vec<Edge>> {
        Ok(self
            .store
            .scan_group(group)
            .await?
            .into_iter()
            .filter(|edge| edge.order_index.is_some())
            .collect())
    }
}
