//! Migration engine configuration
use serde::{Deserialize, Serialize};

/// Upper bound for concurrent record tasks; beyond this the store's
/// connection budget is the bottleneck anyway
const MAX_SUPPORTED_CONCURRENCY: usize = 1024;

/// Configuration for the migration engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum record tasks in flight at once
    pub max_concurrency: usize,

    /// Records per sub-batch; a sub-batch is the unit of committed progress
    pub batch_size: usize,

    /// Retries of a record task after a transient `StorageUnavailable`
    pub storage_retries: usize,

    /// Base backoff between storage retries, doubled on every attempt
    pub retry_backoff_ms: u64,

    /// Retry records with unresolved parents once after the rest of the batch
    pub retry_missing_parents: bool,

    /// Drop closure entries no longer backed by active parent edges while reconciling
    pub compact_closures: bool,

    /// Discard the identity mapping once a run reaches `Done`
    pub discard_mapping_on_done: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            batch_size: 500,
            storage_retries: 3,
            retry_backoff_ms: 10,
            retry_missing_parents: true,
            compact_closures: false,
            discard_mapping_on_done: false,
        }
    }
}

impl EngineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".to_string());
        }

        if self.max_concurrency > MAX_SUPPORTED_CONCURRENCY {
            return Err(format!(
                "max_concurrency cannot exceed {}",
                MAX_SUPPORTED_CONCURRENCY
            ));
        }

        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }

        Ok(())
    }
}
