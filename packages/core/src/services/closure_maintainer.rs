//! Closure Maintainer
//!
//! Materializes the transitive-ancestor relation over `parent` edges, one
//! relation per [`ClosureDomain`]. Rows are append-mostly: soft-deleting a
//! parent edge leaves them in place until [`ClosureMaintainer::compact`] is
//! explicitly requested.

use crate::db::GraphStore;
use crate::models::{ClosureDomain, ClosureEntry, NodeId, RelationshipKind};
use crate::services::error::GraphResult;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub struct ClosureMaintainer {
    store: Arc<dyn GraphStore>,
}

impl ClosureMaintainer {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Add `node` under `parent`
    ///
    /// Inserts `(parent, node)` and `(a, node)` for every ancestor `a` of
    /// `parent`. Returns how many rows were new; repeating the call inserts none.
    pub async fn extend(
        &self,
        domain: ClosureDomain,
        node: NodeId,
        parent: NodeId,
    ) -> GraphResult<usize> {
        let mut ancestors = self.store.closure_ancestors(domain, parent).await?;
        ancestors.push(parent);

        let mut inserted = 0;
        for ancestor in ancestors {
            if ancestor == node {
                continue;
            }
            if self
                .store
                .insert_closure_if_absent(ClosureEntry::new(domain, ancestor, node))
                .await?
            {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Whether `descendant` sits anywhere below `ancestor`
    pub async fn is_descendant(
        &self,
        domain: ClosureDomain,
        ancestor: NodeId,
        descendant: NodeId,
    ) -> GraphResult<bool> {
        Ok(self
            .store
            .closure_contains(domain, ancestor, descendant)
            .await?)
    }

    pub async fn ancestors(&self, domain: ClosureDomain, node: NodeId) -> GraphResult<Vec<NodeId>> {
        Ok(self.store.closure_ancestors(domain, node).await?)
    }

    /// Drop rows no longer backed by a chain of active parent edges
    ///
    /// Returns how many rows were removed.
    pub async fn compact(&self, domain: ClosureDomain) -> GraphResult<usize> {
        let entries = self.store.closure_entries(domain).await?;

        // Active parent edges restricted to nodes this domain knows about
        let mut parents_of: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let descendants: HashSet<NodeId> = entries.iter().map(|e| e.descendant).collect();
        for descendant in &descendants {
            let parents = self
                .store
                .edges_to(*descendant, Some(RelationshipKind::Parent))
                .await?
                .into_iter()
                .map(|edge| edge.from.id)
                .collect();
            parents_of.insert(*descendant, parents);
        }

        let mut removed = 0;
        for entry in entries {
            if !Self::reachable(&parents_of, entry.descendant, entry.ancestor)
                && self.store.remove_closure(entry).await?
            {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("Compacted {} closure rows in {:?} domain", removed, domain);
        }
        Ok(removed)
    }

    /// Give `to` the closure rows of `from`, in every domain
    ///
    /// `from`'s ancestors become `to`'s ancestors and `from`'s descendants
    /// become `to`'s descendants. Returns how many rows were new.
    pub async fn copy_entries(&self, from: NodeId, to: NodeId) -> GraphResult<usize> {
        let mut inserted = 0;
        for domain in [ClosureDomain::Content, ClosureDomain::Space] {
            for ancestor in self.store.closure_ancestors(domain, from).await? {
                if self
                    .store
                    .insert_closure_if_absent(ClosureEntry::new(domain, ancestor, to))
                    .await?
                {
                    inserted += 1;
                }
            }

            let below: Vec<NodeId> = self
                .store
                .closure_entries(domain)
                .await?
                .into_iter()
                .filter(|entry| entry.ancestor == from)
                .map(|entry| entry.descendant)
                .collect();
            for descendant in below {
                if self
                    .store
                    .insert_closure_if_absent(ClosureEntry::new(domain, to, descendant))
                    .await?
                {
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    /// Walk parent edges upwards from `node` looking for `target`
    fn reachable(parents_of: &HashMap<NodeId, Vec<NodeId>>, node: NodeId, target: NodeId) -> bool {
        let mut queue = VecDeque::from([node]);
        let mut seen = HashSet::from([node]);

        while let Some(current) = queue.pop_front() {
            for parent in parents_of.get(&current).into_iter().flatten() {
                if *parent == target {
                    return true;
                }
                if seen.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
        }
        false
    }
}
