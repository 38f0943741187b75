//! Migration/Rewrite Engine
//!
//! Interprets a [`MigrationDefinition`] over a feed of [`SourceRecord`]s and
//! reshapes the graph accordingly. One run walks the stages
//! `Pending → Scanning → Transforming → Reconciling → Done`:
//!
//! 1. **Scanning**: drop out-of-scope rows, classify the rest, reject
//!    duplicate legacy keys and plan parent-before-child waves (Kahn's
//!    algorithm over in-feed parent and root references). Rows left on a cycle
//!    fail with `CycleDetected`.
//! 2. **Transforming**: per wave and per sub-batch of `batch_size`, record
//!    tasks fan out up to `max_concurrency`. Each task resolves the record's
//!    node, creates the edges of its shape and extends closures. Rows with an
//!    unresolvable parent are retried once at the end; after a barrier every
//!    touched ordered group is reindexed.
//! 3. **Reconciling**: retarget hooks see every resolved key once, then
//!    `finish`; counters of every touched node are recomputed; closures are
//!    compacted on request.
//!
//! Per-record errors are collected into the report and never stop a batch.
//! A storage outage (after retries) or an invariant violation aborts the
//! current stage; every write is insert-if-absent, so running the same
//! definition again resumes where the aborted run stopped.

use crate::config::EngineConfig;
use crate::db::GraphStore;
use crate::models::{
    Classification, ClosureDomain, Edge, EdgeShape, Endpoint, GroupKey, LegacyKey, MappingEntry,
    MigrationDefinition, Node, NodeId, OrderSource, RecordFailure, RelationshipKind, RunOutcome,
    RunReport, RunStage, SourceRecord,
};
use crate::services::closure_maintainer::ClosureMaintainer;
use crate::services::counter_maintainer::CounterMaintainer;
use crate::services::edge_store::EdgeStore;
use crate::services::error::{GraphError, GraphResult};
use crate::services::hooks::RetargetHook;
use crate::services::node_registry::NodeRegistry;
use crate::services::retry::{with_storage_retry, RetryPolicy};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Cooperative cancellation of a running migration
///
/// Checked before every record task and hook call: tasks already in flight
/// complete, nothing new starts.
#[derive(Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A classified record scheduled for transformation
#[derive(Debug, Clone)]
struct PlannedRecord {
    record: SourceRecord,
    classification: Classification,
}

/// Output of the scanning stage
struct ScanPlan {
    waves: Vec<Vec<PlannedRecord>>,
    failures: Vec<RecordFailure>,
    skipped: usize,
}

enum TaskOutcome {
    Applied,
    Failed(GraphError),
    NotStarted,
}

/// Counters shared by concurrent record tasks
#[derive(Default)]
struct RunStats {
    nodes_created: AtomicUsize,
    edges_created: AtomicUsize,
    duplicate_edges: AtomicUsize,
    closures_inserted: AtomicUsize,
}

/// Everything a record task needs, borrowed by the fan-out
struct RunContext<'a> {
    definition: &'a MigrationDefinition,
    run_key: String,
    registry: NodeRegistry,
    edges: EdgeStore,
    closure: ClosureMaintainer,
    stats: RunStats,
    touched_groups: Mutex<HashSet<GroupKey>>,
    touched_nodes: Mutex<HashSet<NodeId>>,
    resolved: Mutex<HashMap<LegacyKey, Endpoint>>,
}

/// Reason a stage stopped early
enum StageStop {
    Aborted(GraphError),
    Cancelled,
}

pub struct MigrationEngine {
    store: Arc<dyn GraphStore>,
    config: EngineConfig,
    hooks: Vec<Arc<dyn RetargetHook>>,
    cancel: CancelHandle,
}

impl MigrationEngine {
    pub fn new(store: Arc<dyn GraphStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            hooks: Vec::new(),
            cancel: CancelHandle::new(),
        }
    }

    /// Register a dependent-record hook
    pub fn with_hook(mut self, hook: Arc<dyn RetargetHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `definition` over `records`
    ///
    /// Always returns a report once the definition and config are valid; stage
    /// failures and cancellation are expressed through `RunReport::outcome`.
    ///
    /// # Errors
    ///
    /// - `InvalidDefinition`: the definition fails validation
    /// - `InvalidConfig`: the engine config fails validation
    pub async fn run(
        &self,
        definition: &MigrationDefinition,
        records: Vec<SourceRecord>,
    ) -> GraphResult<RunReport> {
        definition
            .validate()
            .map_err(GraphError::InvalidDefinition)?;
        self.config.validate().map_err(GraphError::InvalidConfig)?;

        let run_key = definition.run_key();
        let mut report = RunReport::new(run_key.clone());
        report.records_scanned = records.len();

        tracing::info!(
            "Starting migration {} over {} records",
            run_key,
            records.len()
        );

        let ctx = RunContext {
            definition,
            run_key: run_key.clone(),
            registry: NodeRegistry::new(self.store.clone(), definition.rules.clone()),
            edges: EdgeStore::new(self.store.clone()),
            closure: ClosureMaintainer::new(self.store.clone()),
            stats: RunStats::default(),
            touched_groups: Mutex::new(HashSet::new()),
            touched_nodes: Mutex::new(HashSet::new()),
            resolved: Mutex::new(HashMap::new()),
        };

        // Scanning
        self.advance(&mut report, RunStage::Scanning);
        let plan = self.scan(&ctx, records);
        report.records_skipped = plan.skipped;
        report.failures.extend(plan.failures);

        // Transforming
        self.advance(&mut report, RunStage::Transforming);
        if let Err(stop) = self.transform(&ctx, plan.waves, &mut report).await {
            return Ok(self.stop(&ctx, report, RunStage::Transforming, stop).await);
        }

        // Reconciling
        self.advance(&mut report, RunStage::Reconciling);
        if let Err(stop) = self.reconcile(&ctx, &mut report).await {
            return Ok(self.stop(&ctx, report, RunStage::Reconciling, stop).await);
        }

        self.collect_stats(&ctx, &mut report);
        report.identity_mapping = self.mapping(&run_key).await;

        if report.failures.is_empty() {
            self.advance(&mut report, RunStage::Done);
            report.outcome = RunOutcome::Done;
            if self.config.discard_mapping_on_done {
                match self.store.discard_mapping(&run_key).await {
                    Ok(count) => tracing::info!("Discarded {} identity mapping entries", count),
                    Err(e) => tracing::warn!("Failed to discard identity mapping: {}", e),
                }
            }
        } else {
            self.advance(&mut report, RunStage::Failed);
            report.outcome = RunOutcome::Partial;
        }
        report.finished_at = Some(Utc::now());

        tracing::info!(
            "Migration {} finished: {} nodes, {} edges ({} duplicate), {} closures, {} failures",
            run_key,
            report.nodes_created,
            report.edges_created,
            report.duplicate_edges,
            report.closures_inserted,
            report.failures.len()
        );

        Ok(report)
    }

    //
    // SCANNING
    //

    fn scan(&self, ctx: &RunContext<'_>, records: Vec<SourceRecord>) -> ScanPlan {
        let mut failures = Vec::new();
        let mut skipped = 0;
        let mut seen = HashSet::new();
        let mut planned = Vec::new();

        for record in records {
            if !ctx.definition.in_scope(&record) {
                skipped += 1;
                continue;
            }

            let key = record.legacy_key();
            if !seen.insert(key.clone()) {
                let err = GraphError::DuplicateLegacyKey { key: key.clone() };
                failures.push(Self::failure(&key, err));
                continue;
            }

            match ctx.registry.classify(&record) {
                Ok(classification) => planned.push(PlannedRecord {
                    record,
                    classification,
                }),
                Err(e) => failures.push(Self::failure(&key, e)),
            }
        }

        let (waves, cycles) = Self::plan_waves(planned);
        for record in cycles {
            let key = record.classification.legacy_key;
            failures.push(Self::failure(&key, GraphError::CycleDetected { key: key.clone() }));
        }

        for failure in &failures {
            tracing::warn!("Skipping {}: {}", failure.key, failure.message);
        }
        tracing::debug!("Planned {} waves", waves.len());

        ScanPlan {
            waves,
            failures,
            skipped,
        }
    }

    /// Layer records so every in-feed parent or root sits in an earlier wave
    ///
    /// Returns the waves and the records that could not be placed (cycles and
    /// anything hanging below one).
    fn plan_waves(records: Vec<PlannedRecord>) -> (Vec<Vec<PlannedRecord>>, Vec<PlannedRecord>) {
        let index: HashMap<LegacyKey, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.classification.legacy_key.clone(), i))
            .collect();

        let mut indegree = vec![0usize; records.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
        for (i, planned) in records.iter().enumerate() {
            let deps: BTreeSet<usize> = [&planned.record.parent, &planned.record.root]
                .into_iter()
                .flatten()
                .filter_map(|key| index.get(key).copied())
                .collect();
            for dep in deps {
                if dep == i {
                    // Self reference never resolves
                    indegree[i] = usize::MAX;
                    continue;
                }
                indegree[i] = indegree[i].saturating_add(1);
                dependents[dep].push(i);
            }
        }

        let mut current: VecDeque<usize> = (0..records.len()).filter(|i| indegree[*i] == 0).collect();
        let mut layers: Vec<Vec<usize>> = Vec::new();
        let mut placed = vec![false; records.len()];

        while !current.is_empty() {
            let mut next = VecDeque::new();
            let layer: Vec<usize> = current.drain(..).collect();
            for &i in &layer {
                placed[i] = true;
                for &dependent in &dependents[i] {
                    if indegree[dependent] == usize::MAX {
                        continue;
                    }
                    indegree[dependent] -= 1;
                    if indegree[dependent] == 0 {
                        next.push_back(dependent);
                    }
                }
            }
            layers.push(layer);
            current = next;
        }

        let mut slots: Vec<Option<PlannedRecord>> = records.into_iter().map(Some).collect();
        let waves = layers
            .into_iter()
            .map(|layer| layer.into_iter().filter_map(|i| slots[i].take()).collect())
            .collect();
        let unplaced = placed
            .iter()
            .enumerate()
            .filter(|(_, placed)| !**placed)
            .filter_map(|(i, _)| slots[i].take())
            .collect();

        (waves, unplaced)
    }

    //
    // TRANSFORMING
    //

    async fn transform(
        &self,
        ctx: &RunContext<'_>,
        waves: Vec<Vec<PlannedRecord>>,
        report: &mut RunReport,
    ) -> Result<(), StageStop> {
        let mut deferred = Vec::new();

        for (wave_number, wave) in waves.iter().enumerate() {
            for batch in wave.chunks(self.config.batch_size) {
                self.commit_batch(ctx, batch, report, Some(&mut deferred))
                    .await?;
                tracing::debug!(
                    "Committed batch of {} records in wave {}",
                    batch.len(),
                    wave_number
                );
            }
        }

        if !deferred.is_empty() {
            tracing::info!("Retrying {} records with unresolved parents", deferred.len());
            for batch in deferred.chunks(self.config.batch_size) {
                self.commit_batch(ctx, batch, report, None).await?;
                tracing::debug!("Committed retry batch of {} records", batch.len());
            }
        }

        // Barrier: every record task has finished before groups are renumbered
        let mut groups: Vec<GroupKey> = ctx.touched_groups.lock().await.iter().copied().collect();
        groups.sort();
        for group in groups {
            let summary = self
                .retry(&format!("reindex {}", group), || ctx.edges.reindex(&group))
                .await
                .map_err(StageStop::Aborted)?;
            if summary.moved > 0 {
                tracing::debug!("Group {} renumbered ({} moved)", group, summary.moved);
            }
            report.groups_reindexed += 1;
        }

        Ok(())
    }

    /// Run one sub-batch and record its per-record failures
    ///
    /// With `deferred`, `MissingParentReference` failures are set aside for
    /// the retry pass instead of being reported.
    async fn commit_batch(
        &self,
        ctx: &RunContext<'_>,
        batch: &[PlannedRecord],
        report: &mut RunReport,
        mut deferred: Option<&mut Vec<PlannedRecord>>,
    ) -> Result<(), StageStop> {
        let results = self.run_batch(ctx, batch).await;
        let mut stop = None;

        for (planned, outcome) in batch.iter().zip(results) {
            let key = &planned.classification.legacy_key;
            match outcome {
                TaskOutcome::Applied | TaskOutcome::NotStarted => {}
                TaskOutcome::Failed(e) if e.is_stage_level() => {
                    stop.get_or_insert(StageStop::Aborted(e));
                }
                TaskOutcome::Failed(e @ GraphError::MissingParentReference { .. })
                    if self.config.retry_missing_parents && deferred.is_some() =>
                {
                    tracing::debug!("Deferring {}: {}", key, e);
                    if let Some(deferred) = deferred.as_deref_mut() {
                        deferred.push(planned.clone());
                    }
                }
                TaskOutcome::Failed(e) => {
                    tracing::warn!("Record {} failed: {}", key, e);
                    report.failures.push(Self::failure(key, e));
                }
            }
        }

        if let Some(stop) = stop {
            return Err(stop);
        }
        if self.cancel.is_cancelled() {
            return Err(StageStop::Cancelled);
        }
        report.batches_committed += 1;
        Ok(())
    }

    /// Fan out one batch, returning outcomes in batch order
    async fn run_batch(&self, ctx: &RunContext<'_>, batch: &[PlannedRecord]) -> Vec<TaskOutcome> {
        let mut outcomes: Vec<(usize, TaskOutcome)> = stream::iter(batch.iter().enumerate())
            .map(|(position, planned)| async move {
                if self.cancel.is_cancelled() {
                    return (position, TaskOutcome::NotStarted);
                }
                let label = planned.classification.legacy_key.to_string();
                let outcome = match self
                    .retry(&label, || Self::process_record(ctx, planned))
                    .await
                {
                    Ok(()) => TaskOutcome::Applied,
                    Err(e) => TaskOutcome::Failed(e),
                };
                (position, outcome)
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        outcomes.sort_by_key(|(position, _)| *position);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    /// Apply one record: resolve its node and create the edges of its shape
    async fn process_record(ctx: &RunContext<'_>, planned: &PlannedRecord) -> GraphResult<()> {
        let record = &planned.record;
        let classification = &planned.classification;
        let key = &classification.legacy_key;

        match ctx.definition.shape_of(classification) {
            EdgeShape::TopLevel => {
                let node = Self::resolve(ctx, planned).await?;
                ctx.touched_nodes.lock().await.insert(node.id);
                Ok(())
            }

            EdgeShape::Contained { order, role } => {
                let parent = Self::lookup(ctx, record.parent.as_ref()).await?;
                let Some(parent) = parent else {
                    return Err(GraphError::missing_parent(key.clone(), record.parent.clone()));
                };

                let node = Self::resolve(ctx, planned).await?;
                let order_index = match order {
                    OrderSource::Field { name } => Some(
                        record
                            .field(name)
                            .and_then(|v| v.as_i64())
                            .unwrap_or_else(|| record.created_at.timestamp_millis()),
                    ),
                    OrderSource::CreatedAt => Some(record.created_at.timestamp_millis()),
                    OrderSource::Unordered => None,
                };

                let edge = Edge::new(parent.endpoint(), node.endpoint(), RelationshipKind::Parent)
                    .with_role(role.clone())
                    .with_order_index(order_index)
                    .with_created_at(record.created_at);
                if order_index.is_some() {
                    ctx.touched_groups.lock().await.insert(edge.group());
                }
                Self::create_edge(ctx, edge).await?;
                Self::extend_closure(ctx, &node, &parent).await?;

                let mut touched = ctx.touched_nodes.lock().await;
                touched.insert(node.id);
                touched.insert(parent.id);
                Ok(())
            }

            EdgeShape::Thread => Self::flatten(ctx, planned).await,
        }
    }

    /// Parent, root and ancestor edges of one thread member
    async fn flatten(ctx: &RunContext<'_>, planned: &PlannedRecord) -> GraphResult<()> {
        let record = &planned.record;
        let key = &planned.classification.legacy_key;

        let parent = Self::lookup(ctx, record.parent.as_ref()).await?;
        let declared_root = Self::lookup(ctx, record.root.as_ref()).await?;

        if parent.is_none() && declared_root.is_none() {
            return Err(GraphError::missing_parent(key.clone(), record.parent.clone()));
        }

        let node = Self::resolve(ctx, planned).await?;
        let root = match (&declared_root, &parent) {
            (Some(root), _) => Some(root.clone()),
            (None, Some(parent)) => Some(Self::root_of(ctx, parent).await?),
            (None, None) => None,
        };

        let mut touched = vec![node.id];

        if let Some(parent) = &parent {
            let edge = Edge::new(parent.endpoint(), node.endpoint(), RelationshipKind::Parent)
                .with_created_at(record.created_at);
            Self::create_edge(ctx, edge).await?;
            Self::extend_closure(ctx, &node, parent).await?;
            touched.push(parent.id);
        }

        if let Some(root) = &root {
            let edge = Edge::new(root.endpoint(), node.endpoint(), RelationshipKind::Root)
                .with_created_at(record.created_at);
            Self::create_edge(ctx, edge).await?;
            touched.push(root.id);

            let mut ancestors: BTreeSet<NodeId> = match node.node_type.closure_domain() {
                Some(domain) => ctx
                    .closure
                    .ancestors(domain, node.id)
                    .await?
                    .into_iter()
                    .collect(),
                None => BTreeSet::new(),
            };
            ancestors.insert(root.id);
            ancestors.remove(&node.id);

            for ancestor in ancestors {
                let ancestor_node = ctx
                    .registry
                    .node(ancestor)
                    .await?
                    .ok_or(GraphError::NodeNotFound { id: ancestor })?;
                let edge =
                    Edge::new(ancestor_node.endpoint(), node.endpoint(), RelationshipKind::Ancestor)
                        .with_created_at(record.created_at);
                Self::create_edge(ctx, edge).await?;
                touched.push(ancestor);
            }
        }

        ctx.touched_nodes.lock().await.extend(touched);

        if parent.is_none() {
            // Kept under its root; the missing parent is still reported
            return Err(GraphError::missing_parent(key.clone(), record.parent.clone()));
        }
        Ok(())
    }

    /// Top-level node of the thread `parent` belongs to
    async fn root_of(ctx: &RunContext<'_>, parent: &Node) -> GraphResult<Node> {
        let incoming = ctx
            .edges
            .edges_to(parent.id, Some(RelationshipKind::Root))
            .await?;
        match incoming.first() {
            Some(edge) => Ok(ctx
                .registry
                .node(edge.from.id)
                .await?
                .ok_or(GraphError::NodeNotFound { id: edge.from.id })?),
            None => Ok(parent.clone()),
        }
    }

    async fn resolve(ctx: &RunContext<'_>, planned: &PlannedRecord) -> GraphResult<Node> {
        let resolved = ctx
            .registry
            .resolve(&ctx.run_key, &planned.classification, &planned.record)
            .await?;
        if resolved.created {
            ctx.stats.nodes_created.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "Resolved {} to new {} node {}",
                planned.classification.legacy_key,
                resolved.node.node_type,
                resolved.node.id
            );
        }
        ctx.resolved.lock().await.insert(
            planned.classification.legacy_key.clone(),
            resolved.node.endpoint(),
        );
        Ok(resolved.node)
    }

    async fn lookup(ctx: &RunContext<'_>, key: Option<&LegacyKey>) -> GraphResult<Option<Node>> {
        match key {
            Some(key) => ctx.registry.lookup(&ctx.run_key, key).await,
            None => Ok(None),
        }
    }

    /// Create an edge; an existing active edge counts as already applied
    async fn create_edge(ctx: &RunContext<'_>, edge: Edge) -> GraphResult<()> {
        match ctx.edges.create_edge(edge).await {
            Ok(_) => {
                ctx.stats.edges_created.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(GraphError::DuplicateEdge { .. }) => {
                ctx.stats.duplicate_edges.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Extend closures when parent and child share a closure domain
    async fn extend_closure(ctx: &RunContext<'_>, node: &Node, parent: &Node) -> GraphResult<()> {
        let domain = node.node_type.closure_domain();
        if domain.is_none() || domain != parent.node_type.closure_domain() {
            return Ok(());
        }
        if let Some(domain) = domain {
            let inserted = ctx.closure.extend(domain, node.id, parent.id).await?;
            ctx.stats
                .closures_inserted
                .fetch_add(inserted, Ordering::Relaxed);
        }
        Ok(())
    }

    //
    // RECONCILING
    //

    async fn reconcile(&self, ctx: &RunContext<'_>, report: &mut RunReport) -> Result<(), StageStop> {
        let mut resolved: Vec<(LegacyKey, Endpoint)> = ctx
            .resolved
            .lock()
            .await
            .iter()
            .map(|(key, endpoint)| (key.clone(), *endpoint))
            .collect();
        resolved.sort();

        for hook in &self.hooks {
            let mut delivered = HashSet::new();
            for (key, endpoint) in &resolved {
                if self.cancel.is_cancelled() {
                    return Err(StageStop::Cancelled);
                }
                if !delivered.insert(key) {
                    continue;
                }
                report.hook_calls += 1;
                if let Err(e) = hook.retarget(key, *endpoint).await {
                    let err = GraphError::hook_failed(hook.name(), key.clone(), e.to_string());
                    tracing::warn!("{}", err);
                    report.failures.push(Self::failure(key, err));
                }
            }

            hook.finish().await.map_err(|e| {
                StageStop::Aborted(GraphError::invariant(format!(
                    "hook '{}' failed to finish: {}",
                    hook.name(),
                    e
                )))
            })?;
            tracing::debug!("Hook '{}' finished after {} keys", hook.name(), delivered.len());
        }

        let counters = CounterMaintainer::spawn(self.store.clone());
        let mut touched: Vec<NodeId> = ctx.touched_nodes.lock().await.iter().copied().collect();
        touched.sort();

        for node in touched {
            if self.cancel.is_cancelled() {
                return Err(StageStop::Cancelled);
            }
            for counter in &ctx.definition.counters {
                let label = format!("recount {} on {}", counter, node);
                self.retry(&label, || counters.recount(node, *counter))
                    .await
                    .map_err(StageStop::Aborted)?;
                report.counters_recomputed += 1;
            }
        }
        counters.flush().await.map_err(StageStop::Aborted)?;

        if self.config.compact_closures {
            for domain in [ClosureDomain::Content, ClosureDomain::Space] {
                self.retry("compact closures", || ctx.closure.compact(domain))
                    .await
                    .map_err(StageStop::Aborted)?;
            }
        }

        Ok(())
    }

    //
    // HELPERS
    //

    async fn retry<T, F, Fut>(&self, label: &str, operation: F) -> GraphResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = GraphResult<T>>,
    {
        let policy = RetryPolicy::new(self.config.storage_retries, self.config.retry_backoff_ms);
        with_storage_retry(policy, label, operation).await
    }

    fn advance(&self, report: &mut RunReport, next: RunStage) {
        if !report.stage.can_transition_to(next) {
            tracing::warn!("Unexpected stage transition {} -> {}", report.stage, next);
        }
        tracing::info!("Run {}: {} -> {}", report.run_key, report.stage, next);
        report.stage = next;
    }

    /// Close the report of a run stopped during `stage`
    async fn stop(
        &self,
        ctx: &RunContext<'_>,
        mut report: RunReport,
        stage: RunStage,
        stop: StageStop,
    ) -> RunReport {
        self.collect_stats(ctx, &mut report);
        report.identity_mapping = self.mapping(&ctx.run_key).await;

        report.outcome = match stop {
            StageStop::Aborted(e) => {
                tracing::warn!("Run {} aborted during {}: {}", report.run_key, stage, e);
                RunOutcome::Aborted {
                    stage,
                    error: e.to_string(),
                }
            }
            StageStop::Cancelled => {
                tracing::info!("Run {} cancelled during {}", report.run_key, stage);
                RunOutcome::Cancelled { stage }
            }
        };
        self.advance(&mut report, RunStage::Failed);
        report.finished_at = Some(Utc::now());
        report
    }

    fn collect_stats(&self, ctx: &RunContext<'_>, report: &mut RunReport) {
        report.nodes_created = ctx.stats.nodes_created.load(Ordering::Relaxed);
        report.edges_created = ctx.stats.edges_created.load(Ordering::Relaxed);
        report.duplicate_edges = ctx.stats.duplicate_edges.load(Ordering::Relaxed);
        report.closures_inserted = ctx.stats.closures_inserted.load(Ordering::Relaxed);
    }

    /// Identity mapping of the run; empty if the store cannot be read
    async fn mapping(&self, run_key: &str) -> Vec<MappingEntry> {
        match self.store.map_entries(run_key).await {
            Ok(entries) => entries
                .into_iter()
                .map(|(legacy_key, node_id)| MappingEntry {
                    legacy_key,
                    node_id,
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Identity mapping unavailable for report: {}", e);
                Vec::new()
            }
        }
    }

    fn failure(key: &LegacyKey, err: GraphError) -> RecordFailure {
        RecordFailure {
            key: key.clone(),
            reason: err.failure_reason(),
            message: err.to_string(),
        }
    }
}
