//! AgentMesh Retry - Shared timeout, backoff, and retry primitives
//!
//! Both dispatchers and both channel engines compose the same two
//! building blocks: `with_timeout(op, bound)` and
//! `execute_with_retry(op, policy)`. Retry + timeout are a primitive
//! here, not a framework.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Default backoff base in milliseconds
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
/// Default backoff cap in milliseconds
pub const DEFAULT_CAP_DELAY_MS: u64 = 30_000;

/// Failure modes of [`with_timeout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimeoutError {
    /// A non-positive bound is a programmer error
    #[error("invalid timeout bound: {0} ms")]
    InvalidArgument(i64),

    #[error("operation timed out after {0} ms")]
    Timeout(u64),
}

/// Run `op` to completion within `bound_ms` milliseconds.
///
/// Fails with [`TimeoutError::InvalidArgument`] before polling the
/// operation when the bound is not positive. When the operation cannot be
/// cancelled the waiter is still released and the eventual result is
/// dropped with the future.
pub async fn with_timeout<F>(bound_ms: i64, op: F) -> Result<F::Output, TimeoutError>
where
    F: Future,
{
    if bound_ms <= 0 {
        return Err(TimeoutError::InvalidArgument(bound_ms));
    }
    let bound = bound_ms as u64;
    tokio::time::timeout(Duration::from_millis(bound), op)
        .await
        .map_err(|_| TimeoutError::Timeout(bound))
}

/// Exponential backoff delay for attempt `n`: `min(base * 2^n, cap)`.
pub fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    Duration::from_millis(exp.min(cap_ms))
}

/// Retry policy: attempt budget, backoff parameters, and optional hooks.
pub struct RetryPolicy<E> {
    /// Additional attempts after the first; 0 means a single attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
    /// Consulted on each failure; default is to always retry
    pub should_retry: Option<Box<dyn Fn(&E) -> bool + Send + Sync>>,
    /// Observer invoked with the zero-based attempt index and its error
    pub on_retry: Option<Box<dyn Fn(u32, &E) + Send + Sync>>,
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            cap_delay_ms: DEFAULT_CAP_DELAY_MS,
            should_retry: None,
            on_retry: None,
        }
    }
}

impl<E> RetryPolicy<E> {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn delays(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.base_delay_ms = base_ms;
        self.cap_delay_ms = cap_ms;
        self
    }

    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Some(Box::new(predicate));
        self
    }

    pub fn on_retry(mut self, hook: impl Fn(u32, &E) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }
}

/// Execute `op`, retrying failures per `policy`.
///
/// Returns the first success, or the last error once `max_retries`
/// additional attempts are exhausted or `should_retry` declines.
pub async fn execute_with_retry<T, E, F, Fut>(mut op: F, policy: &RetryPolicy<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let retryable = policy
                    .should_retry
                    .as_ref()
                    .map(|predicate| predicate(&error))
                    .unwrap_or(true);
                if !retryable || attempt >= policy.max_retries {
                    return Err(error);
                }
                if let Some(hook) = &policy.on_retry {
                    hook(attempt, &error);
                }
                let delay = backoff_delay(attempt, policy.base_delay_ms, policy.cap_delay_ms);
                warn!(attempt, delay_ms = delay.as_millis() as u64, %error, "retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_doubles_until_cap() {
        assert_eq!(backoff_delay(0, 1_000, 30_000), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(1, 1_000, 30_000), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(4, 1_000, 30_000), Duration::from_millis(16_000));
        assert_eq!(backoff_delay(5, 1_000, 30_000), Duration::from_millis(30_000));
        assert_eq!(backoff_delay(63, 1_000, 30_000), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_timeout_rejects_non_positive_bound() {
        let result = with_timeout(0, async { 1 }).await;
        assert_eq!(result, Err(TimeoutError::InvalidArgument(0)));
        let result = with_timeout(-5, async { 1 }).await;
        assert_eq!(result, Err(TimeoutError::InvalidArgument(-5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_waiter() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "done"
        };
        let result = with_timeout(100, slow).await;
        assert_eq!(result, Err(TimeoutError::Timeout(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_calls_at_most_n_plus_one_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("boom".to_string())
                }
            },
            &RetryPolicy::with_max_retries(2),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("boom".to_string())
                }
            },
            &RetryPolicy::with_max_retries(0),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy::with_max_retries(5).retry_if(|e: &String| e != "fatal");
        let result: Result<(), String> = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                }
            },
            &policy,
        )
        .await;
        assert_eq!(result, Err("fatal".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventual_success_returns_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let observed = Arc::new(AtomicU32::new(0));
        let seen = observed.clone();
        let policy =
            RetryPolicy::with_max_retries(5).on_retry(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        let result: Result<u32, String> = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(42)
                    }
                }
            },
            &policy,
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(observed.load(Ordering::SeqCst), 2);
    }
}
