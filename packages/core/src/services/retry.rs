//! Retry of record tasks on transient storage outages
//!
//! A record task is safe to repeat: every write it makes is insert-if-absent
//! or an overwrite with the same value. When the store reports
//! `StorageUnavailable`, the whole task is retried with exponential backoff
//! (10ms, 20ms, 40ms, ... for the default base). Any other error is returned
//! immediately. Once retries are exhausted the outage surfaces to the engine,
//! which aborts the stage.

use crate::services::error::GraphResult;
use std::future::Future;
use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: usize,
    pub base_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, base_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            base_backoff_ms,
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u64.checked_shl(attempt as u32).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out
pub async fn with_storage_retry<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut operation: F,
) -> GraphResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GraphResult<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!("{} succeeded after {} retry(ies)", label, attempt);
                }
                return Ok(value);
            }
            Err(err) if err.is_storage_unavailable() && attempt < policy.max_retries => {
                tracing::debug!(
                    "Storage unavailable on attempt {}/{} for {}: {}. Retrying...",
                    attempt + 1,
                    policy.max_retries + 1,
                    label,
                    err
                );
                tokio::time::sleep(policy.backoff(attempt)).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_storage_unavailable() {
                    tracing::warn!(
                        "{} failed after {} attempt(s): {}",
                        label,
                        attempt + 1,
                        err
                    );
                }
                return Err(err);
            }
        }
    }
}
