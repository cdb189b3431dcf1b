//! Bounded retry with linear backoff.
//!
//! Every subprocess call in the loop goes through a [`RetryExecutor`]. The
//! schedule is deterministic: after failed attempt `n` the executor sleeps
//! `n * base_delay` before trying again, and it never sleeps after the final
//! attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{LoopError, Result};

/// Runs an operation up to `max_attempts` times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExecutor {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

impl RetryExecutor {
    /// Creates an executor. A budget of 0 is treated as a single attempt.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Runs `operation` until it succeeds or the budget is spent.
    ///
    /// On exhaustion the last underlying error is returned wrapped in
    /// [`LoopError::RetriesExhausted`]. No call is made after the final
    /// failed attempt. Errors that are not [`LoopError::is_retryable`] are
    /// returned unchanged after the first call.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    debug!(label, attempt, error = %err, "fatal error, not retrying");
                    return Err(err);
                }
                Err(err) if attempt >= self.max_attempts => {
                    warn!(label, attempt, error = %err, "retry budget exhausted");
                    return Err(LoopError::RetriesExhausted {
                        label: label.to_string(),
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
