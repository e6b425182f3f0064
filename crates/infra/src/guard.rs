//! Bounded retry of optimistic-concurrency conflicts.

use std::time::Duration;

use tracing::warn;

use crate::error::LedgerResult;

/// How often, and how patiently, a conflicting operation is re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    /// Base backoff; attempt `n` sleeps `n * backoff` before retrying.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(25))
    }
}

/// Run `op`, re-running it while it fails with a retryable error and attempts
/// remain. `op` must re-read whatever state it depends on.
pub fn with_retry<T, F>(policy: &RetryPolicy, operation: &str, mut op: F) -> LedgerResult<T>
where
    F: FnMut() -> LedgerResult<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                warn!(operation, attempt, max_attempts, error = %err, "conflict, retrying");
                std::thread::sleep(policy.backoff * attempt);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
