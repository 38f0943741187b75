//! Store Error Types
//!
//! This module defines error types for the persistence seam. Service-layer code
//! converts them into `GraphError` so that an outage surfaces as
//! `StorageUnavailable` and aborts the current stage.

use thiserror::Error;

/// Persistence operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backing store cannot be reached; the operation had no effect
    #[error("Store unavailable: {context}")]
    Unavailable { context: String },

    /// Referenced record does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Write conflicts with existing state (e.g. a rebind onto a missing node)
    #[error("Store conflict: {context}")]
    Conflict { context: String },
}

impl StoreError {
    /// Create an unavailable error
    pub fn unavailable(context: impl Into<String>) -> Self {
        Self::Unavailable {
            context: context.into(),
        }
    }

    /// Create a not-found error for the given entity
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a conflict error
    pub fn conflict(context: impl Into<String>) -> Self {
        Self::Conflict {
            context: context.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
