//! Exponential backoff with jitter.
//!
//! Disk flushes use [`retry_with_backoff`], which gives up after
//! `max_attempts`. Uploads never give up; they keep a [`Backoff`] per artifact
//! and the scheduler skips the artifact until its delay has elapsed.

use brook_core::{CoreResult, RetryConfig};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Fraction of the delay added as random jitter.
pub const JITTER_PERCENT: f64 = 0.2;

/// Adds up to `JITTER_PERCENT` of `delay` at random.
pub fn with_jitter(delay: Duration) -> Duration {
    let delay_ms = delay.as_millis() as u64;
    let jitter_range = (delay_ms as f64 * JITTER_PERCENT) as u64;
    let jitter = rand::random::<u64>() % (jitter_range + 1);
    Duration::from_millis(delay_ms + jitter)
}

/// Runs `operation` until it succeeds, returns a non-retryable error, or
/// `config.max_attempts` attempts have failed.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts || !e.is_retryable() {
                    return Err(e);
                }

                let delay = with_jitter(config.backoff_for_attempt(attempt - 1));
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retry state for an operation that is never abandoned.
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    failures: u32,
    not_before_ms: i64,
}

impl Backoff {
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether the next attempt may run at `now_ms`.
    pub fn is_ready(&self, now_ms: i64) -> bool {
        now_ms >= self.not_before_ms
    }

    /// Records a failure and schedules the next attempt. Returns the chosen delay.
    pub fn record_failure(&mut self, config: &RetryConfig, now_ms: i64) -> Duration {
        let delay = with_jitter(config.backoff_for_attempt(self.failures));
        self.failures = self.failures.saturating_add(1);
        self.not_before_ms = now_ms.saturating_add(delay.as_millis() as i64);
        delay
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
