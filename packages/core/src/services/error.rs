//! Service Layer Error Types
//!
//! This module defines the error taxonomy of the graph services and the
//! migration engine. Errors fall into two groups:
//!
//! - **Per-record** (`ClassificationAmbiguous`, `Unclassified`,
//!   `DuplicateLegacyKey`, `MissingParentReference`, `CycleDetected`,
//!   `HookFailed`): the record is skipped and reported, the batch continues.
//! - **Stage-level** (`StorageUnavailable`, `InvariantViolation`, `Cancelled`):
//!   the current stage stops; re-running the same definition resumes the run.
//!
//! `DuplicateEdge` is benign: the engine treats it as already applied.

use crate::db::StoreError;
use crate::models::{EdgeId, Endpoint, FailureReason, LegacyKey, NodeId, RelationshipKind};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Record matches rules with conflicting outcomes
    #[error("Record {key} is ambiguous: matches rules {rules:?}")]
    ClassificationAmbiguous { key: LegacyKey, rules: Vec<String> },

    /// Record matches no classification rule
    #[error("Record {key} matches no classification rule")]
    Unclassified { key: LegacyKey },

    /// Same legacy key appears twice in one feed
    #[error("Legacy key {key} appears more than once in the feed")]
    DuplicateLegacyKey { key: LegacyKey },

    /// Active edge with the same endpoints and kind already exists
    #[error("Duplicate {kind} edge {from} -> {to} (existing edge {existing})")]
    DuplicateEdge {
        from: Endpoint,
        to: Endpoint,
        kind: RelationshipKind,
        existing: EdgeId,
    },

    /// Declared parent cannot be resolved to a canonical node; `None` when the
    /// record carries no parent reference at all
    #[error(
        "Record {key} references parent {} which cannot be resolved",
        .parent.as_ref().map_or_else(|| "null".to_string(), |p| p.to_string())
    )]
    MissingParentReference {
        key: LegacyKey,
        parent: Option<LegacyKey>,
    },

    /// Parent chain of the record loops back on itself
    #[error("Record {key} is part of a parent cycle")]
    CycleDetected { key: LegacyKey },

    /// Backing store outage
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Structural invariant broken; must not be repaired automatically
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Node not found: {id}")]
    NodeNotFound { id: NodeId },

    #[error("Edge not found: {id}")]
    EdgeNotFound { id: EdgeId },

    /// Dependent-record hook rejected a retarget
    #[error("Hook '{hook}' failed for {key}: {message}")]
    HookFailed {
        hook: String,
        key: LegacyKey,
        message: String,
    },

    #[error("Invalid migration definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled")]
    Cancelled,

    /// Any other store failure (conflicts, missing rows)
    #[error("Store operation failed: {0}")]
    Store(StoreError),
}

impl From<StoreError> for GraphError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { context } => GraphError::StorageUnavailable(context),
            other => GraphError::Store(other),
        }
    }
}

impl GraphError {
    /// Create an ambiguous classification error
    pub fn ambiguous(key: LegacyKey, rules: Vec<String>) -> Self {
        Self::ClassificationAmbiguous { key, rules }
    }

    /// Create a missing parent error
    pub fn missing_parent(key: LegacyKey, parent: Option<LegacyKey>) -> Self {
        Self::MissingParentReference { key, parent }
    }

    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Create a hook failure error
    pub fn hook_failed(hook: impl Into<String>, key: LegacyKey, message: impl Into<String>) -> Self {
        Self::HookFailed {
            hook: hook.into(),
            key,
            message: message.into(),
        }
    }

    /// Whether the error stops the current stage instead of one record
    pub fn is_stage_level(&self) -> bool {
        matches!(
            self,
            GraphError::StorageUnavailable(_)
                | GraphError::InvariantViolation(_)
                | GraphError::Cancelled
        )
    }

    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, GraphError::StorageUnavailable(_))
    }

    /// Report category of a per-record error
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            GraphError::ClassificationAmbiguous { .. } => FailureReason::ClassificationAmbiguous,
            GraphError::Unclassified { .. } => FailureReason::Unclassified,
            GraphError::DuplicateLegacyKey { .. } => FailureReason::DuplicateLegacyKey,
            GraphError::MissingParentReference { .. } => FailureReason::MissingParentReference,
            GraphError::CycleDetected { .. } => FailureReason::CycleDetected,
            GraphError::HookFailed { .. } => FailureReason::HookFailed,
            _ => FailureReason::Other,
        }
    }
}

pub type GraphResult<T> = Result<T, GraphError>;
