//! Aggregate Counter Maintainer
//!
//! Keeps the denormalized counters on nodes (and their mirrors on incoming
//! edges) in line with the graph.
//!
//! ## Single-writer model
//!
//! Every counter mutation is a command on an mpsc queue consumed by one
//! background task, so two increments of the same counter can never interleave
//! their read-modify-write. [`CounterMaintainer`] is a cheap, cloneable handle
//! to that task; the task exits once the last handle is dropped.
//!
//! - `increment`/`decrement` enqueue a delta and return immediately
//! - `recount` recomputes a counter from its predicate and waits for the result
//! - `flush` waits until every command sent before it has been applied

use crate::db::GraphStore;
use crate::models::{CounterName, NodeId, NodeType, ReactionKind, RelationshipKind};
use crate::services::error::{GraphError, GraphResult};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

const COMMAND_QUEUE_CAPACITY: usize = 1024;

enum CounterCommand {
    Apply {
        node: NodeId,
        counter: CounterName,
        delta: i64,
    },
    Recount {
        node: NodeId,
        counter: CounterName,
        reply: oneshot::Sender<GraphResult<u64>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the counter maintainer task
#[derive(Clone)]
pub struct CounterMaintainer {
    commands: mpsc::Sender<CounterCommand>,
}

impl CounterMaintainer {
    /// Spawn the consumer task on the current runtime
    pub fn spawn(store: Arc<dyn GraphStore>) -> Self {
        let (commands, mut rx) = mpsc::channel::<CounterCommand>(COMMAND_QUEUE_CAPACITY);

        tokio::spawn(async move {
            let worker = CounterWorker { store };
            while let Some(command) = rx.recv().await {
                match command {
                    CounterCommand::Apply {
                        node,
                        counter,
                        delta,
                    } => {
                        if let Err(e) = worker.apply(node, counter, delta).await {
                            tracing::warn!(
                                "Failed to apply {:+} to {} on {}: {}",
                                delta,
                                counter,
                                node,
                                e
                            );
                        }
                    }
                    CounterCommand::Recount {
                        node,
                        counter,
                        reply,
                    } => {
                        let result = worker.recount(node, counter).await;
                        // Caller may have gone away
                        let _ = reply.send(result);
                    }
                    CounterCommand::Flush { reply } => {
                        let _ = reply.send(());
                    }
                }
            }
            tracing::debug!("CounterMaintainer stopped: all handles dropped");
        });

        Self { commands }
    }

    pub async fn increment(&self, node: NodeId, counter: CounterName, delta: u64) -> GraphResult<()> {
        let delta = i64::try_from(delta).unwrap_or(i64::MAX);
        self.send(CounterCommand::Apply {
            node,
            counter,
            delta,
        })
        .await
    }

    /// Counters saturate at zero
    pub async fn decrement(&self, node: NodeId, counter: CounterName, delta: u64) -> GraphResult<()> {
        let delta = i64::try_from(delta).map_or(i64::MIN, |d| -d);
        self.send(CounterCommand::Apply {
            node,
            counter,
            delta,
        })
        .await
    }

    /// Recompute `counter` on `node` from its predicate and persist it
    pub async fn recount(&self, node: NodeId, counter: CounterName) -> GraphResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.send(CounterCommand::Recount {
            node,
            counter,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Self::stopped())?
    }

    /// Wait until every command sent so far has been applied
    pub async fn flush(&self) -> GraphResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(CounterCommand::Flush { reply }).await?;
        rx.await.map_err(|_| Self::stopped())
    }

    async fn send(&self, command: CounterCommand) -> GraphResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Self::stopped())
    }

    fn stopped() -> GraphError {
        GraphError::invariant("counter maintainer task has stopped")
    }
}

struct CounterWorker {
    store: Arc<dyn GraphStore>,
}

impl CounterWorker {
    async fn apply(&self, node: NodeId, counter: CounterName, delta: i64) -> GraphResult<u64> {
        let mut counters = self
            .store
            .get_node(node)
            .await?
            .ok_or(GraphError::NodeNotFound { id: node })?
            .counters;
        let value = counters.apply(counter, delta);
        self.write(node, counter, value).await?;
        Ok(value)
    }

    async fn recount(&self, node: NodeId, counter: CounterName) -> GraphResult<u64> {
        if self.store.get_node(node).await?.is_none() {
            return Err(GraphError::NodeNotFound { id: node });
        }

        let value = match counter {
            CounterName::TotalChildren => {
                let mut count = 0;
                for edge in self
                    .store
                    .edges_from(node, Some(RelationshipKind::Parent))
                    .await?
                {
                    if self.is_active(edge.to.id).await? {
                        count += 1;
                    }
                }
                count
            }
            CounterName::TotalReplies => {
                let mut count = 0;
                for edge in self
                    .store
                    .edges_from(node, Some(RelationshipKind::Ancestor))
                    .await?
                {
                    if edge.to.node_type == NodeType::Comment && self.is_active(edge.to.id).await? {
                        count += 1;
                    }
                }
                count
            }
            CounterName::TotalLikes => self
                .store
                .reactions_for_node(node)
                .await?
                .iter()
                .filter(|r| r.is_active() && r.kind == ReactionKind::Like)
                .count() as u64,
            CounterName::TotalRatings => self
                .store
                .reactions_for_node(node)
                .await?
                .iter()
                .filter(|r| r.is_active() && matches!(r.kind, ReactionKind::Rating { .. }))
                .count() as u64,
        };

        self.write(node, counter, value).await?;
        Ok(value)
    }

    /// Persist a counter and mirror the node's counters onto its incoming edges
    async fn write(&self, node: NodeId, counter: CounterName, value: u64) -> GraphResult<()> {
        let counters = self.store.set_node_counter(node, counter, value).await?;

        for mut edge in self.store.edges_to(node, None).await? {
            if edge.counters != counters {
                edge.counters = counters;
                self.store.update_edge(edge).await?;
            }
        }
        Ok(())
    }

    async fn is_active(&self, node: NodeId) -> GraphResult<bool> {
        Ok(self
            .store
            .get_node(node)
            .await?
            .is_some_and(|n| n.is_active()))
    }
}
