//! Migration Engine Integration Tests
//!
//! End-to-end runs of the built-in definitions against the in-memory store.
//!
//! ## Test Coverage
//! - Comment thread flattening (parent, root and ancestor edges, closures,
//!   counters) with children fed before their parents
//! - Media block ordering from attachment positions
//! - Idempotent re-runs: zero new nodes and edges, identical mapping
//! - Per-record failures: missing parents, ambiguity, duplicates, cycles
//! - Stage-level outcomes: storage outage and resume, cancellation
//! - Game bead renumbering and the unordered prompt bead
//! - Reclassification: re-runs of earlier definitions and outages mid-way

#[cfg(test)]
mod migration_engine_tests {
    use anyhow::Result;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use threadgraph_core::db::{GraphStore, MemoryStore};
    use threadgraph_core::services::migrations::{comment_threads, game_beads, media_blocks};
    use threadgraph_core::{
        ClassificationRule, ClosureDomain, ClosureEntry, ClosureMaintainer, EdgeShape, EngineConfig,
        FailureReason, LegacyKey, Marker, MigrationDefinition, MigrationEngine, NodeId,
        NodeState, NodeType, RelationshipKind, RunOutcome, RunReport, RunStage, SourceRecord,
    };

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 4, 1, 10, minute, 0).unwrap()
    }

    fn key(table: &str, id: i64) -> LegacyKey {
        LegacyKey::new(table, id)
    }

    fn post(id: i64) -> SourceRecord {
        SourceRecord::new("posts", id)
            .with_created_at(at(0))
            .with_payload(json!({"body": format!("post {}", id)}))
    }

    fn comment(id: i64, parent: LegacyKey, root: LegacyKey) -> SourceRecord {
        SourceRecord::new("comments", id)
            .with_parent(parent)
            .with_root(root)
            .with_created_at(at(id as u32 % 60))
            .with_payload(json!({"body": format!("comment {}", id)}))
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            max_concurrency: 4,
            batch_size: 5,
            storage_retries: 2,
            retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn engine(store: &Arc<MemoryStore>) -> MigrationEngine {
        MigrationEngine::new(store.clone(), test_config())
    }

    fn id_of(report: &RunReport, key: &LegacyKey) -> NodeId {
        report
            .mapped_id(key)
            .unwrap_or_else(|| panic!("{} is not mapped", key))
    }

    async fn active_edges(store: &MemoryStore, kind: RelationshipKind) -> usize {
        store
            .all_edges()
            .await
            .iter()
            .filter(|e| e.is_active() && e.kind == kind)
            .count()
    }

    async fn has_edge(
        store: &MemoryStore,
        from: NodeId,
        to: NodeId,
        kind: RelationshipKind,
    ) -> Result<bool> {
        Ok(store
            .edges_from(from, Some(kind))
            .await?
            .iter()
            .any(|e| e.to.id == to))
    }

    /// Post 1 with the chain comment 1 ← comment 2 ← comment 3, leaves first
    fn reply_chain() -> Vec<SourceRecord> {
        vec![
            comment(3, key("comments", 2), key("posts", 1)),
            comment(2, key("comments", 1), key("posts", 1)),
            comment(1, key("posts", 1), key("posts", 1)),
            post(1),
        ]
    }

    #[tokio::test]
    async fn test_reply_chain_is_flattened() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let report = engine(&store)
            .run(&comment_threads::definition_v1(), reply_chain())
            .await?;

        assert_eq!(report.outcome, RunOutcome::Done);
        assert_eq!(report.stage, RunStage::Done);
        assert!(report.failures.is_empty());
        assert_eq!(report.nodes_created, 4);

        let p = id_of(&report, &key("posts", 1));
        let c1 = id_of(&report, &key("comments", 1));
        let c2 = id_of(&report, &key("comments", 2));
        let c3 = id_of(&report, &key("comments", 3));

        assert_eq!(active_edges(&store, RelationshipKind::Parent).await, 3);
        assert!(has_edge(&store, p, c1, RelationshipKind::Parent).await?);
        assert!(has_edge(&store, c1, c2, RelationshipKind::Parent).await?);
        assert!(has_edge(&store, c2, c3, RelationshipKind::Parent).await?);

        // Every comment hangs off the post through a root edge
        assert_eq!(active_edges(&store, RelationshipKind::Root).await, 3);
        for comment in [c1, c2, c3] {
            assert!(has_edge(&store, p, comment, RelationshipKind::Root).await?);
        }

        // One ancestor edge per transitive ancestor, post included
        assert_eq!(active_edges(&store, RelationshipKind::Ancestor).await, 6);
        assert!(has_edge(&store, c1, c3, RelationshipKind::Ancestor).await?);
        assert!(has_edge(&store, c2, c3, RelationshipKind::Ancestor).await?);
        assert!(has_edge(&store, p, c3, RelationshipKind::Ancestor).await?);
        assert!(!has_edge(&store, c3, c1, RelationshipKind::Ancestor).await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_closure_is_complete_after_flattening() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let report = engine(&store)
            .run(&comment_threads::definition_v1(), reply_chain())
            .await?;

        let p = id_of(&report, &key("posts", 1));
        let c1 = id_of(&report, &key("comments", 1));
        let c2 = id_of(&report, &key("comments", 2));
        let c3 = id_of(&report, &key("comments", 3));

        let closure = ClosureMaintainer::new(store.clone());
        for (ancestor, descendant) in [(p, c1), (p, c2), (p, c3), (c1, c2), (c1, c3), (c2, c3)] {
            assert!(
                closure
                    .is_descendant(ClosureDomain::Content, ancestor, descendant)
                    .await?
            );
        }
        assert!(!closure.is_descendant(ClosureDomain::Content, c3, p).await?);
        assert_eq!(store.closure_count().await, 6);
        assert_eq!(report.closures_inserted, 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_counters_are_recomputed() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let report = engine(&store)
            .run(&comment_threads::definition_v1(), reply_chain())
            .await?;

        let p = id_of(&report, &key("posts", 1));
        let c1 = id_of(&report, &key("comments", 1));

        let post = store.get_node(p).await?.unwrap();
        assert_eq!(post.counters.total_children, 1);
        assert_eq!(post.counters.total_replies, 3);

        let root_comment = store.get_node(c1).await?.unwrap();
        assert_eq!(root_comment.counters.total_children, 1);
        assert_eq!(root_comment.counters.total_replies, 2);

        // Incoming edges carry the target's counters
        for edge in store.edges_to(c1, None).await? {
            assert_eq!(edge.counters, root_comment.counters);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_deleted_records_do_not_count() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let feed = vec![
            post(1),
            comment(1, key("posts", 1), key("posts", 1)),
            comment(2, key("posts", 1), key("posts", 1)).deleted(),
        ];
        let report = engine(&store)
            .run(&comment_threads::definition_v1(), feed)
            .await?;
        assert_eq!(report.outcome, RunOutcome::Done);

        let deleted = store
            .get_node(id_of(&report, &key("comments", 2)))
            .await?
            .unwrap();
        assert_eq!(deleted.state, NodeState::Deleted);

        let post = store
            .get_node(id_of(&report, &key("posts", 1)))
            .await?
            .unwrap();
        assert_eq!(post.counters.total_children, 1);
        assert_eq!(post.counters.total_replies, 1);
        Ok(())
    }

    /// Post 1 with an image at position 1 and an audio clip at position 0
    fn media_feed() -> Vec<SourceRecord> {
        vec![
            SourceRecord::new("post_images", 1)
                .with_parent(key("posts", 1))
                .with_created_at(at(1))
                .with_payload(json!({"url": "a.png", "position": 1})),
            SourceRecord::new("post_audios", 1)
                .with_parent(key("posts", 1))
                .with_created_at(at(2))
                .with_payload(json!({"url": "a.mp3", "position": 0})),
            post(1),
        ]
    }

    #[tokio::test]
    async fn test_media_blocks_follow_positions() -> Result<()> {
        let store = Arc::new(MemoryStore::new());

        let report = engine(&store)
            .run(&media_blocks::definition_v1(), media_feed())
            .await?;
        assert_eq!(report.outcome, RunOutcome::Done);
        assert_eq!(report.groups_reindexed, 1);

        let p = id_of(&report, &key("posts", 1));
        let image = id_of(&report, &key("post_images", 1));
        let audio = id_of(&report, &key("post_audios", 1));

        let mut blocks = store.edges_from(p, Some(RelationshipKind::Parent)).await?;
        blocks.sort_by_key(|e| e.order_index);
        let order: Vec<(NodeId, Option<i64>)> =
            blocks.iter().map(|e| (e.to.id, e.order_index)).collect();
        assert_eq!(order, vec![(audio, Some(0)), (image, Some(1))]);

        let image_node = store.get_node(image).await?.unwrap();
        assert_eq!(image_node.node_type, NodeType::MediaBlock);
        assert_eq!(image_node.subtype.as_deref(), Some("image"));
        Ok(())
    }

    #[tokio::test]
    async fn test_rerun_creates_nothing() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let definition = comment_threads::definition_v1();

        let first = engine(&store).run(&definition, reply_chain()).await?;
        assert_eq!(first.outcome, RunOutcome::Done);
        let edges_before = store.all_edges().await.len();

        let second = engine(&store).run(&definition, reply_chain()).await?;
        assert_eq!(second.outcome, RunOutcome::Done);
        assert_eq!(second.nodes_created, 0);
        assert_eq!(second.edges_created, 0);
        assert_eq!(second.duplicate_edges, first.edges_created);
        assert_eq!(second.closures_inserted, 0);

        let mut before = first.identity_mapping.clone();
        let mut after = second.identity_mapping.clone();
        before.sort_by(|a, b| a.legacy_key.cmp(&b.legacy_key));
        after.sort_by(|a, b| a.legacy_key.cmp(&b.legacy_key));
        assert_eq!(before, after);

        assert_eq!(store.node_count().await, 4);
        assert_eq!(store.all_edges().await.len(), edges_before);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_parent_keeps_comment_under_root() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        // comments:99 was hard-deleted from the legacy database
        let feed = vec![post(1), comment(5, key("comments", 99), key("posts", 1))];

        let report = engine(&store)
            .run(&comment_threads::definition_v1(), feed)
            .await?;

        assert_eq!(report.outcome, RunOutcome::Partial);
        assert_eq!(report.stage, RunStage::Failed);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.key, key("comments", 5));
        assert_eq!(failure.reason, FailureReason::MissingParentReference);
        assert!(failure.message.contains("comments:99"));

        let p = id_of(&report, &key("posts", 1));
        let c5 = id_of(&report, &key("comments", 5));
        assert!(has_edge(&store, p, c5, RelationshipKind::Root).await?);
        assert!(has_edge(&store, p, c5, RelationshipKind::Ancestor).await?);
        assert!(store
            .edges_to(c5, Some(RelationshipKind::Parent))
            .await?
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_comment_without_parent_or_root_fails() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let feed = vec![post(1), SourceRecord::new("comments", 7).with_created_at(at(7))];

        let report = engine(&store)
            .run(&comment_threads::definition_v1(), feed)
            .await?;

        assert_eq!(report.outcome, RunOutcome::Partial);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].reason,
            FailureReason::MissingParentReference
        );
        assert!(report.failures[0].message.contains("parent null"));
        assert!(report.mapped_id(&key("comments", 7)).is_none());
        assert_eq!(store.node_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_classification_failures_are_reported() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let definition = MigrationDefinition::new("pinned-comments", 1)
            .with_table("comments")
            .with_table("spaces")
            .with_table("attachments")
            .with_rule(ClassificationRule::new("comment", "comments", NodeType::Comment))
            .with_rule(
                ClassificationRule::new("pinned", "comments", NodeType::Post).with_marker(
                    Marker::Field {
                        name: "pinned".to_string(),
                    },
                ),
            )
            .with_rule(ClassificationRule::new("space", "spaces", NodeType::Space))
            .with_shape(NodeType::Comment, EdgeShape::TopLevel)
            .with_shape(NodeType::Post, EdgeShape::TopLevel)
            .with_shape(NodeType::Space, EdgeShape::TopLevel);

        let feed = vec![
            SourceRecord::new("comments", 1),
            SourceRecord::new("comments", 2).with_payload(json!({"pinned": true})),
            SourceRecord::new("attachments", 1),
            SourceRecord::new("users", 1),
            SourceRecord::new("spaces", 1),
            SourceRecord::new("spaces", 1),
        ];

        let report = engine(&store).run(&definition, feed).await?;
        assert_eq!(report.outcome, RunOutcome::Partial);
        assert_eq!(report.records_scanned, 6);
        assert_eq!(report.records_skipped, 1);

        let reason_of = |k: LegacyKey| {
            report
                .failures
                .iter()
                .find(|f| f.key == k)
                .map(|f| f.reason)
        };
        assert_eq!(
            reason_of(key("comments", 2)),
            Some(FailureReason::ClassificationAmbiguous)
        );
        assert_eq!(
            reason_of(key("attachments", 1)),
            Some(FailureReason::Unclassified)
        );
        assert_eq!(
            reason_of(key("spaces", 1)),
            Some(FailureReason::DuplicateLegacyKey)
        );
        assert_eq!(report.failures.len(), 3);

        // First copy of the duplicate still migrates
        assert!(report.mapped_id(&key("spaces", 1)).is_some());
        assert!(report.mapped_id(&key("comments", 1)).is_some());
        assert_eq!(store.node_count().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_cycles_fail_without_blocking_the_rest() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let feed = vec![
            post(1),
            comment(1, key("comments", 2), key("posts", 1)),
            comment(2, key("comments", 1), key("posts", 1)),
            comment(3, key("comments", 2), key("posts", 1)),
            comment(4, key("posts", 1), key("posts", 1)),
        ];

        let report = engine(&store)
            .run(&comment_threads::definition_v1(), feed)
            .await?;

        assert_eq!(report.outcome, RunOutcome::Partial);
        let mut cyclic: Vec<i64> = report
            .failures
            .iter()
            .filter(|f| f.reason == FailureReason::CycleDetected)
            .map(|f| f.key.id)
            .collect();
        cyclic.sort();
        assert_eq!(cyclic, vec![1, 2, 3]);
        assert_eq!(report.failures.len(), 3);

        assert!(report.mapped_id(&key("posts", 1)).is_some());
        assert!(report.mapped_id(&key("comments", 4)).is_some());
        assert!(report.mapped_id(&key("comments", 1)).is_none());
        Ok(())
    }

    /// Post 1 with `count` top-level comments
    fn wide_thread(count: i64) -> Vec<SourceRecord> {
        let mut feed = vec![post(1)];
        feed.extend((1..=count).map(|id| comment(id, key("posts", 1), key("posts", 1))));
        feed
    }

    #[tokio::test]
    async fn test_storage_outage_aborts_and_rerun_resumes() -> Result<()> {
        let definition = comment_threads::definition_v1();

        let reference = Arc::new(MemoryStore::new());
        engine(&reference).run(&definition, wide_thread(30)).await?;

        let store = Arc::new(MemoryStore::new());
        store.fail_after(40);
        let aborted = engine(&store).run(&definition, wide_thread(30)).await?;

        assert!(matches!(
            aborted.outcome,
            RunOutcome::Aborted {
                stage: RunStage::Transforming,
                ..
            }
        ));
        assert_eq!(aborted.stage, RunStage::Failed);
        assert!(aborted.failures.is_empty());

        store.set_available(true);
        let resumed = engine(&store).run(&definition, wide_thread(30)).await?;
        assert_eq!(resumed.outcome, RunOutcome::Done);

        // Same graph as an uninterrupted run, nothing doubled
        assert_eq!(store.node_count().await, reference.node_count().await);
        assert_eq!(store.closure_count().await, reference.closure_count().await);
        for kind in [
            RelationshipKind::Parent,
            RelationshipKind::Root,
            RelationshipKind::Ancestor,
        ] {
            assert_eq!(
                active_edges(&store, kind).await,
                active_edges(&reference, kind).await,
                "{} edges",
                kind
            );
        }

        let post = store
            .get_node(id_of(&resumed, &key("posts", 1)))
            .await?
            .unwrap();
        assert_eq!(post.counters.total_children, 30);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_before_run_starts_no_tasks() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);
        engine.cancel_handle().cancel();

        let report = engine
            .run(&comment_threads::definition_v1(), reply_chain())
            .await?;

        assert_eq!(
            report.outcome,
            RunOutcome::Cancelled {
                stage: RunStage::Transforming
            }
        );
        assert_eq!(report.stage, RunStage::Failed);
        assert_eq!(report.batches_committed, 0);
        assert_eq!(store.node_count().await, 0);

        // A fresh engine picks the run up from scratch
        let resumed = MigrationEngine::new(store.clone(), test_config())
            .run(&comment_threads::definition_v1(), reply_chain())
            .await?;
        assert_eq!(resumed.outcome, RunOutcome::Done);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrency_settings_do_not_change_the_result() -> Result<()> {
        let definition = comment_threads::definition_v1();
        let mut edge_counts = HashSet::new();

        for (max_concurrency, batch_size) in [(1, 1), (4, 3), (16, 500)] {
            let store = Arc::new(MemoryStore::new());
            let config = EngineConfig {
                max_concurrency,
                batch_size,
                ..test_config()
            };
            let report = MigrationEngine::new(store.clone(), config)
                .run(&definition, wide_thread(12))
                .await?;
            assert_eq!(report.outcome, RunOutcome::Done);
            edge_counts.insert((
                store.node_count().await,
                store.all_edges().await.len(),
                store.closure_count().await,
            ));
        }

        assert_eq!(edge_counts.len(), 1);
        Ok(())
    }

    fn game_feed() -> Vec<SourceRecord> {
        let bead = |id: i64, position: i64| {
            SourceRecord::new("posts", id)
                .with_parent(key("games", 1))
                .with_created_at(at(id as u32))
                .with_payload(json!({"gameId": 1, "position": position, "body": "bead"}))
        };

        vec![
            bead(10, 3),
            bead(11, 1),
            bead(12, 2),
            SourceRecord::new("posts", 13)
                .with_parent(key("games", 1))
                .with_created_at(at(13))
                .with_payload(json!({"gameId": 1, "role": "prompt", "body": "prompt"})),
            SourceRecord::new("games", 1).with_created_at(at(0)),
            post(20),
        ]
    }

    #[tokio::test]
    async fn test_game_beads_are_renumbered_from_zero() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let report = engine(&store)
            .run(&game_beads::definition_v1(), game_feed())
            .await?;
        assert_eq!(report.outcome, RunOutcome::Done);

        let game = id_of(&report, &key("games", 1));
        let children = store.edges_from(game, Some(RelationshipKind::Parent)).await?;
        assert_eq!(children.len(), 4);

        let mut ordered: Vec<(Option<i64>, NodeId)> = children
            .iter()
            .filter(|e| e.order_index.is_some())
            .map(|e| (e.order_index, e.to.id))
            .collect();
        ordered.sort();
        assert_eq!(
            ordered,
            vec![
                (Some(0), id_of(&report, &key("posts", 11))),
                (Some(1), id_of(&report, &key("posts", 12))),
                (Some(2), id_of(&report, &key("posts", 10))),
            ]
        );

        let prompt = children
            .iter()
            .find(|e| e.role.as_deref() == Some("prompt"))
            .unwrap();
        assert_eq!(prompt.to.id, id_of(&report, &key("posts", 13)));
        assert_eq!(prompt.order_index, None);

        let game_node = store.get_node(game).await?.unwrap();
        assert_eq!(game_node.node_type, NodeType::Post);
        assert_eq!(game_node.subtype.as_deref(), Some("game"));
        assert_eq!(game_node.counters.total_children, 4);

        let bead = store
            .get_node(id_of(&report, &key("posts", 10)))
            .await?
            .unwrap();
        assert_eq!(bead.subtype.as_deref(), Some("bead"));

        let plain = store
            .get_node(id_of(&report, &key("posts", 20)))
            .await?
            .unwrap();
        assert_eq!(plain.subtype, None);
        Ok(())
    }

    /// Definition that types beads as `game-bead` nodes
    fn legacy_bead_definition() -> MigrationDefinition {
        MigrationDefinition::new("legacy-beads", 1)
            .with_table("games")
            .with_table("posts")
            .with_rule(
                ClassificationRule::new("game", "games", NodeType::Post).with_subtype("game"),
            )
            .with_rule(
                ClassificationRule::new("bead", "posts", NodeType::GameBead).with_marker(
                    Marker::Field {
                        name: "gameId".to_string(),
                    },
                ),
            )
            .with_shape(NodeType::Post, EdgeShape::TopLevel)
            .with_shape(
                NodeType::GameBead,
                EdgeShape::Contained {
                    order: threadgraph_core::OrderSource::Field {
                        name: "position".to_string(),
                    },
                    role: None,
                },
            )
    }

    /// Game 1 with the three ordered beads 10, 11 and 12
    fn bead_feed() -> Vec<SourceRecord> {
        game_feed()
            .into_iter()
            .filter(|r| r.origin_table == "games" || [10, 11, 12].contains(&r.origin_id))
            .collect()
    }

    /// Ordered members of the game's parent group as `(index, node)`
    async fn game_group(store: &MemoryStore) -> Result<Vec<(Option<i64>, NodeId)>> {
        let game = store
            .find_node_by_legacy_key(&key("games", 1))
            .await?
            .unwrap();
        let mut members: Vec<(Option<i64>, NodeId)> = store
            .edges_from(game.id, Some(RelationshipKind::Parent))
            .await?
            .iter()
            .filter(|e| e.order_index.is_some())
            .map(|e| (e.order_index, e.to.id))
            .collect();
        members.sort();
        Ok(members)
    }

    /// Active edges whose endpoints are not live nodes of the tagged type
    async fn dangling_edges(store: &MemoryStore) -> Result<usize> {
        let mut dangling = 0;
        for edge in store.all_edges().await.iter().filter(|e| e.is_active()) {
            for endpoint in [edge.from, edge.to] {
                let live = store
                    .get_node(endpoint.id)
                    .await?
                    .is_some_and(|n| n.is_active() && n.node_type == endpoint.node_type);
                if !live {
                    dangling += 1;
                }
            }
        }
        Ok(dangling)
    }

    async fn active_nodes(store: &MemoryStore) -> Result<usize> {
        Ok(store
            .list_nodes()
            .await?
            .iter()
            .filter(|n| n.is_active())
            .count())
    }

    #[tokio::test]
    async fn test_bead_nodes_are_reclassified_by_a_later_definition() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let legacy = legacy_bead_definition();
        let feed = bead_feed();

        let first = engine(&store).run(&legacy, feed.clone()).await?;
        assert_eq!(first.outcome, RunOutcome::Done);
        let old_bead = id_of(&first, &key("posts", 10));
        assert_eq!(
            store.get_node(old_bead).await?.unwrap().node_type,
            NodeType::GameBead
        );

        let second = engine(&store)
            .run(&game_beads::definition_v1(), feed)
            .await?;
        assert_eq!(second.outcome, RunOutcome::Done);

        let new_bead = id_of(&second, &key("posts", 10));
        assert_ne!(new_bead, old_bead);

        let replacement = store.find_node_by_legacy_key(&key("posts", 10)).await?.unwrap();
        assert_eq!(replacement.id, new_bead);
        assert_eq!(replacement.node_type, NodeType::Post);
        assert_eq!(replacement.subtype.as_deref(), Some("bead"));
        assert_eq!(
            store.get_node(old_bead).await?.unwrap().state,
            NodeState::Deleted
        );

        // Edges moved to the replacement; the group stays dense
        assert!(store.edges_to(old_bead, None).await?.is_empty());
        let game = id_of(&second, &key("games", 1));
        let mut indexes: Vec<i64> = store
            .edges_from(game, Some(RelationshipKind::Parent))
            .await?
            .iter()
            .filter_map(|e| e.order_index)
            .collect();
        indexes.sort();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(has_edge(&store, game, new_bead, RelationshipKind::Parent).await?);
        Ok(())
    }

    /// Ordered children of `parent` as `(index, node)`
    async fn ordered_children(
        store: &MemoryStore,
        parent: NodeId,
    ) -> Result<Vec<(Option<i64>, NodeId)>> {
        let mut members: Vec<(Option<i64>, NodeId)> = store
            .edges_from(parent, Some(RelationshipKind::Parent))
            .await?
            .iter()
            .map(|e| (e.order_index, e.to.id))
            .collect();
        members.sort();
        Ok(members)
    }

    #[tokio::test]
    async fn test_rerun_of_ordered_definitions_creates_nothing() -> Result<()> {
        let cases = [
            (media_blocks::definition_v1(), media_feed(), key("posts", 1)),
            (game_beads::definition_v1(), game_feed(), key("games", 1)),
        ];

        for (definition, feed, parent_key) in cases {
            let store = Arc::new(MemoryStore::new());

            let first = engine(&store).run(&definition, feed.clone()).await?;
            assert_eq!(first.outcome, RunOutcome::Done);
            let parent = id_of(&first, &parent_key);
            let group_before = ordered_children(&store, parent).await?;
            let edges_before = store.all_edges().await.len();

            let second = engine(&store).run(&definition, feed).await?;
            assert_eq!(second.outcome, RunOutcome::Done, "{}", definition.run_key());
            assert_eq!(second.nodes_created, 0, "{}", definition.run_key());
            assert_eq!(second.edges_created, 0, "{}", definition.run_key());
            assert_eq!(second.duplicate_edges, first.edges_created);

            assert_eq!(ordered_children(&store, parent).await?, group_before);
            assert_eq!(store.all_edges().await.len(), edges_before);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_rerun_after_reclassification_follows_the_replacement() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let legacy = legacy_bead_definition();

        let first = engine(&store).run(&legacy, bead_feed()).await?;
        assert_eq!(first.outcome, RunOutcome::Done);
        let original = id_of(&first, &key("posts", 10));

        let second = engine(&store)
            .run(&game_beads::definition_v1(), bead_feed())
            .await?;
        assert_eq!(second.outcome, RunOutcome::Done);

        // The earlier definition runs again over the reclassified nodes
        let third = engine(&store).run(&legacy, bead_feed()).await?;
        assert_eq!(third.outcome, RunOutcome::Done);
        assert_eq!(third.edges_created, 0);

        assert_eq!(dangling_edges(&store).await?, 0);
        assert_eq!(active_nodes(&store).await?, 4);

        let group = game_group(&store).await?;
        let indexes: Vec<Option<i64>> = group.iter().map(|(index, _)| *index).collect();
        assert_eq!(indexes, vec![Some(0), Some(1), Some(2)]);

        let current = id_of(&third, &key("posts", 10));
        assert_ne!(current, original);
        assert_ne!(current, id_of(&second, &key("posts", 10)));
        let bead = store.get_node(current).await?.unwrap();
        assert!(bead.is_active());
        assert_eq!(bead.node_type, NodeType::GameBead);
        assert_eq!(
            store
                .find_node_by_legacy_key(&key("posts", 10))
                .await?
                .map(|n| n.id),
            Some(current)
        );
        assert_eq!(group[2].1, current);
        Ok(())
    }

    #[tokio::test]
    async fn test_outage_during_reclassification_resumes_cleanly() -> Result<()> {
        let legacy = legacy_bead_definition();
        let definition = game_beads::definition_v1();

        for budget in 0..200 {
            let store = Arc::new(MemoryStore::new());
            engine(&store).run(&legacy, bead_feed()).await?;

            store.fail_after(budget);
            engine(&store).run(&definition, bead_feed()).await?;

            store.set_available(true);
            let resumed = engine(&store).run(&definition, bead_feed()).await?;
            assert_eq!(resumed.outcome, RunOutcome::Done, "budget {}", budget);

            // Game plus three beads, no orphan replacements
            assert_eq!(active_nodes(&store).await?, 4, "budget {}", budget);
            assert_eq!(dangling_edges(&store).await?, 0, "budget {}", budget);

            let group = game_group(&store).await?;
            let indexes: Vec<Option<i64>> = group.iter().map(|(index, _)| *index).collect();
            assert_eq!(indexes, vec![Some(0), Some(1), Some(2)], "budget {}", budget);

            for id in [10, 11, 12] {
                let bead = store
                    .find_node_by_legacy_key(&key("posts", id))
                    .await?
                    .unwrap();
                assert!(bead.is_active(), "budget {}", budget);
                assert_eq!(bead.node_type, NodeType::Post);
                assert_eq!(bead.subtype.as_deref(), Some("bead"));
                assert_eq!(id_of(&resumed, &key("posts", id)), bead.id);
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_deferred_records_are_retried_in_sub_batches() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let mut feed = vec![post(1)];
        feed.extend((1..=7).map(|id| comment(id, key("comments", 99), key("posts", 1))));

        let report = engine(&store)
            .run(&comment_threads::definition_v1(), feed)
            .await?;

        assert_eq!(report.outcome, RunOutcome::Partial);
        assert_eq!(report.failures.len(), 7);
        // post wave (1) + comment wave (5 + 2) + retry (5 + 2)
        assert_eq!(report.batches_committed, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_closure_ancestor_without_node_is_reported() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let definition = comment_threads::definition_v1();

        let first = engine(&store)
            .run(
                &definition,
                vec![post(1), comment(1, key("posts", 1), key("posts", 1))],
            )
            .await?;
        let parent = id_of(&first, &key("comments", 1));
        let missing = NodeId::new();
        store
            .insert_closure_if_absent(ClosureEntry::new(ClosureDomain::Content, missing, parent))
            .await?;

        let report = engine(&store)
            .run(
                &definition,
                vec![comment(2, key("comments", 1), key("posts", 1))],
            )
            .await?;

        assert_eq!(report.outcome, RunOutcome::Partial);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, key("comments", 2));
        assert_eq!(report.failures[0].reason, FailureReason::Other);
        assert!(report.failures[0].message.contains(&missing.to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_discard_mapping_on_done() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig {
            discard_mapping_on_done: true,
            ..test_config()
        };
        let definition = comment_threads::definition_v1();

        let report = MigrationEngine::new(store.clone(), config)
            .run(&definition, reply_chain())
            .await?;
        assert_eq!(report.outcome, RunOutcome::Done);
        assert_eq!(report.identity_mapping.len(), 4);
        assert!(store.map_entries(&definition.run_key()).await?.is_empty());

        // The legacy-key index still makes a re-run a no-op
        let rerun = engine(&store).run(&definition, reply_chain()).await?;
        assert_eq!(rerun.nodes_created, 0);
        assert_eq!(rerun.edges_created, 0);
        Ok(())
    }
}
