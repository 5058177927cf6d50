//! Bounded retry-with-backoff around idempotent remote operations.
//!
//! Every wrapped operation must be safe to repeat (upserts, not appends);
//! the page and batch checkpoints rely on that.

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Deadline applied to each individual attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_duration(&self, retry_count: usize) -> Duration {
        let base = self.initial_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();

        // initial_delay * 2^retry_count
        let exp_backoff = base * (2_f64.powi(retry_count as i32));
        let final_delay = exp_backoff.min(max);

        Duration::from_secs_f64(final_delay)
    }
}

/// Run `operation` until it succeeds, the error is not retryable, or the
/// attempt budget is spent. Each attempt is bounded by `attempt_timeout`;
/// `on_timeout` supplies the error used when an attempt exceeds it.
pub async fn retry_with_backoff<T, E, Fut, Op, Retryable, OnTimeout>(
    policy: &RetryPolicy,
    mut operation: Op,
    is_retryable: Retryable,
    on_timeout: OnTimeout,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Retryable: Fn(&E) -> bool,
    OnTimeout: Fn() -> E,
{
    let mut last_error: Option<E> = None;

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.backoff_duration(attempt)).await;
        }

        let result = tokio::time::timeout(policy.attempt_timeout, operation()).await;
        match result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                if !is_retryable(&err) {
                    return Err(err);
                }
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    "Retryable error, backing off"
                );
                last_error = Some(err);
            }
            Err(_) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    "Attempt timed out"
                );
                last_error = Some(on_timeout());
            }
        }
    }

    // max_attempts >= 1, so at least one error was recorded.
    Err(last_error.unwrap_or_else(on_timeout))
}
