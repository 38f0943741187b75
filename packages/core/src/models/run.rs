//! Migration run state and the structured run report
//!
//! The report is the only artifact an operator receives from a run. It is
//! emitted for every outcome (success, partial failure, aborted stage,
//! cancellation) and serializes to JSON for the operational tooling.

use crate::models::node::{LegacyKey, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStage {
    Pending,
    Scanning,
    Transforming,
    Reconciling,
    Done,
    Failed,
}

impl RunStage {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: RunStage) -> bool {
        use RunStage::*;
        matches!(
            (self, next),
            (Pending, Scanning)
                | (Scanning, Transforming)
                | (Transforming, Reconciling)
                | (Reconciling, Done)
                | (Scanning, Failed)
                | (Transforming, Failed)
                | (Reconciling, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStage::Done | RunStage::Failed)
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Pending => "pending",
            RunStage::Scanning => "scanning",
            RunStage::Transforming => "transforming",
            RunStage::Reconciling => "reconciling",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Machine-readable category of a per-record failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    ClassificationAmbiguous,
    Unclassified,
    DuplicateLegacyKey,
    MissingParentReference,
    CycleDetected,
    HookFailed,
    Other,
}

/// One failed source record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    pub key: LegacyKey,
    pub reason: FailureReason,
    pub message: String,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RunOutcome {
    /// Every in-scope record migrated
    Done,
    /// Run completed but some records failed; see `failures`
    Partial,
    /// A stage-level error stopped the run; re-running the same definition resumes it
    Aborted { stage: RunStage, error: String },
    /// Cancelled between record tasks
    Cancelled { stage: RunStage },
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, RunOutcome::Done)
    }
}

/// Old-to-new identity pair exposed in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub legacy_key: LegacyKey,
    pub node_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_key: String,
    pub stage: RunStage,
    pub outcome: RunOutcome,
    pub records_scanned: usize,
    pub records_skipped: usize,
    pub nodes_created: usize,
    pub edges_created: usize,
    pub duplicate_edges: usize,
    pub closures_inserted: usize,
    pub groups_reindexed: usize,
    pub counters_recomputed: usize,
    pub hook_calls: usize,
    /// Sub-batches whose record tasks all finished
    pub batches_committed: usize,
    pub failures: Vec<RecordFailure>,
    pub identity_mapping: Vec<MappingEntry>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new(run_key: impl Into<String>) -> Self {
        Self {
            run_key: run_key.into(),
            stage: RunStage::Pending,
            outcome: RunOutcome::Partial,
            records_scanned: 0,
            records_skipped: 0,
            nodes_created: 0,
            edges_created: 0,
            duplicate_edges: 0,
            closures_inserted: 0,
            groups_reindexed: 0,
            counters_recomputed: 0,
            hook_calls: 0,
            batches_committed: 0,
            failures: Vec::new(),
            identity_mapping: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn failed_keys(&self) -> Vec<&LegacyKey> {
        self.failures.iter().map(|f| &f.key).collect()
    }

    pub fn mapped_id(&self, key: &LegacyKey) -> Option<NodeId> {
        self.identity_mapping
            .iter()
            .find(|entry| &entry.legacy_key == key)
            .map(|entry| entry.node_id)
    }
}
