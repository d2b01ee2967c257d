//! Retry policy with exponential backoff, shared by collection and dispatch.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::{CollectorError, ExecutorError};
use crate::domain::models::RetryConfig;

/// Errors that know whether another attempt can help.
pub trait Retryable {
    fn is_transient(&self) -> bool;

    /// Server-requested delay, honoured when longer than the computed backoff.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for CollectorError {
    fn is_transient(&self) -> bool {
        CollectorError::is_transient(self)
    }
}

impl Retryable for ExecutorError {
    fn is_transient(&self) -> bool {
        ExecutorError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// Backoff doubles with each retry: 1s -> 2s -> 4s ... capped at `max_backoff_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            config.initial_backoff_ms,
            config.max_backoff_ms,
        )
    }
}

impl RetryPolicy {
    /// Policy with the given retry count and backoff bounds.
    pub const fn new(max_retries: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.execute_until_cancelled(operation, &CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but gives up on the last error as soon
    /// as `cancel` fires instead of sleeping through the backoff.
    pub async fn execute_until_cancelled<F, Fut, T, E>(
        &self,
        mut operation: F,
        cancel: &CancellationToken,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "Operation succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !self.should_retry(&err, attempt) || cancel.is_cancelled() {
                        if attempt >= self.max_retries {
                            warn!(attempts = attempt + 1, error = %err, "Operation failed after retries");
                        } else {
                            debug!(error = %err, "Not retrying");
                        }
                        return Err(err);
                    }

                    let backoff = self.backoff_for(&err, attempt);
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient failure; retrying"
                    );

                    tokio::select! {
                        () = sleep(backoff) => {}
                        () = cancel.cancelled() => {
                            debug!("Cancelled during backoff");
                            return Err(err);
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Whether `err` on attempt `attempt` (0-based) earns another try.
    pub fn should_retry<E: Retryable>(&self, err: &E, attempt: u32) -> bool {
        err.is_transient() && attempt < self.max_retries
    }

    /// `initial * 2^attempt`, capped.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    fn backoff_for<E: Retryable>(&self, err: &E, attempt: u32) -> Duration {
        let computed = self.calculate_backoff(attempt);
        let cap = Duration::from_millis(self.max_backoff_ms);
        err.retry_after()
            .map_or(computed, |hint| computed.max(hint.min(cap)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, 100, 1000);
        assert_eq!(policy.calculate_backoff(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_backoff(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_backoff(3), Duration::from_millis(800));
        assert_eq!(policy.calculate_backoff(4), Duration::from_millis(1000));
        assert_eq!(policy.calculate_backoff(40), Duration::from_millis(1000));
    }

    #[test]
    fn rate_limit_hint_extends_backoff() {
        let policy = RetryPolicy::new(3, 100, 10_000);
        let err = ExecutorError::RateLimited {
            message: "slow down".into(),
            retry_after_ms: Some(5_000),
        };
        assert_eq!(policy.backoff_for(&err, 0), Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let policy = RetryPolicy::new(3, 100, 1000);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<u32, CollectorError> = policy
            .execute(|| {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(CollectorError::Transient("busy".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy::new(3, 100, 1000);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), CollectorError> = policy
            .execute(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(CollectorError::Fatal("no such tool".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(CollectorError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_retries() {
        let policy = RetryPolicy::new(2, 10, 100);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), ExecutorError> = policy
            .execute(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ExecutorError::Timeout { after_secs: 1 })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_retrying() {
        let policy = RetryPolicy::new(5, 1_000, 10_000);
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), ExecutorError> = policy
            .execute_until_cancelled(
                || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err(ExecutorError::Rejected("nope".into()))
                    }
                },
                &token,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
