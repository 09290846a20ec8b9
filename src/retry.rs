//! Caller-level retry with exponential backoff.
//!
//! This sits above the HTTP client's own retry budget: the client already
//! retried 5xx and rate-limit waits, so only timeouts and network failures
//! are retried here.

use std::time::Duration;

use log::{debug, warn};

use crate::error::FeedError;

/// Maximum number of attempts at the caller level.
pub const MAX_ATTEMPTS: usize = 3;

/// Delay before the second attempt in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1).min(16) as u32);
        self.initial_delay * factor
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent. `on_retry` is invoked before each retry.
pub async fn with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: &BackoffPolicy,
    mut on_retry: impl FnMut(),
    operation: F,
) -> Result<T, FeedError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, FeedError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => {
                debug!("{}: non-retryable error: {}", operation_name, e);
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    "{}: giving up after {} attempts ({})",
                    operation_name, attempt, e
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                    operation_name,
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                on_retry();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
