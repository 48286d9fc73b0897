//! Fixed-delay retry that honors cancellation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LlmError, Result};

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self { max_retries: 0, delay: Duration::ZERO }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, delay: Duration::from_secs(2) }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. The last error is returned unchanged.
///
/// `op` receives the 1-based attempt number.
///
/// # Errors
/// The first non-retryable error, the last retryable error once retries are
/// exhausted, or [`LlmError::Cancelled`] if `cancel` fires.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        attempt += 1;
        if attempt > 1 {
            debug!(operation, attempt, attempts, "retrying");
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= attempts => {
                warn!(operation, attempts, error = %err, "retries exhausted");
                return Err(err);
            }
            Err(err) => {
                warn!(
                    operation,
                    attempt,
                    attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                sleep_or_cancel(policy.delay, cancel).await?;
            }
        }
    }
}

/// Sleep for `delay`, returning early with [`LlmError::Cancelled`] if the
/// token fires first.
///
/// # Errors
/// [`LlmError::Cancelled`] when cancelled mid-sleep.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(LlmError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(10))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(policy(3), &CancellationToken::new(), "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(LlmError::Transport("connection reset".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error_unchanged() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(policy(2), &CancellationToken::new(), "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(LlmError::Api { status: 503, message: format!("attempt {attempt}") }) }
        })
        .await;

        match result {
            Err(LlmError::Api { status: 503, message }) => assert_eq!(message, "attempt 3"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(policy(5), &CancellationToken::new(), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Validation("bad prompt".into())) }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let long = RetryPolicy::new(3, Duration::from_secs(3600));

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<()> = with_retry(long, &cancel, "test", |_| async {
            Err(LlmError::EmptyResponse)
        })
        .await;

        assert!(matches!(result, Err(LlmError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.await.expect("trigger task");
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_attempts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(policy(3), &cancel, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
