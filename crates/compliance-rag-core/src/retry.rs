//! Timeout, bounded retry, and exponential backoff for collaborator calls.
//!
//! Every call to an embedding, generation, OCR, NLP, or store collaborator
//! goes through [`call`]. Each attempt is bounded by `policy.timeout`;
//! retryable failures (see [`Error::is_retryable`]) are retried after
//! `base_delay × 2^(n-1)`, capped at `max_delay`. Non-retryable errors and
//! cancellation return immediately.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `failed_attempts`-th failure.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Run `op` under `policy`, racing `cancel`.
pub async fn call<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            let delay = policy.backoff(attempt - 1);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = tokio::time::timeout(policy.timeout, op()) => r,
        };

        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.is_retryable() => e,
            Ok(Err(e)) => return Err(e),
            Err(_) => Error::Timeout {
                operation: operation.to_string(),
                after: policy.timeout,
            },
        };

        warn!(operation, attempt, max_attempts = attempts, error = %err, "collaborator call failed");
        last_err = Some(err);
    }

    Err(last_err.unwrap_or_else(|| Error::Timeout {
        operation: operation.to_string(),
        after: policy.timeout,
    }))
}
