//! Concurrent batch dispatch to the fix executor.
//!
//! Batches run under a semaphore so at most `concurrency` executor calls are
//! in flight. Before each dispatch the cancellation token and the cost
//! monitor are consulted; once either says stop, the remaining batches are
//! handed back undispatched. Every attempt has its own timeout and transient
//! failures are retried with backoff.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::ControllerEvent;
use crate::domain::errors::{BudgetExceeded, ExecutorError};
use crate::domain::models::{ExecutorConfig, FixBatch, TerminationReason};
use crate::domain::ports::{CostMonitor, FixExecutor, FixOutcome};
use crate::services::retry::RetryPolicy;

/// How batches reach the executor.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Batches in flight at once.
    pub concurrency: usize,
    /// Limit on a single executor attempt.
    pub attempt_timeout: Duration,
    /// Retries for transient executor errors.
    pub retry: RetryPolicy,
    /// Attempts allowed per minute across all batches.
    pub rate_limit_per_minute: Option<u32>,
}

impl DispatchPolicy {
    /// Policy from the `executor` config section.
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            attempt_timeout: Duration::from_secs(config.timeout_secs),
            retry: RetryPolicy::from(&config.retry),
            rate_limit_per_minute: config.rate_limit_per_minute,
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutorConfig::default())
    }
}

/// Final result for one dispatched batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// The batch as dispatched.
    pub batch: FixBatch,
    /// Outcome of the last attempt.
    pub result: Result<FixOutcome, ExecutorError>,
    /// Attempts made, including the last.
    pub attempts: u32,
}

impl BatchResult {
    /// True when the last attempt succeeded.
    pub const fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Why dispatch stopped before every batch was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchStop {
    /// Termination reason the run should end with.
    pub reason: TerminationReason,
    /// Human-readable cause.
    pub detail: String,
}

/// Everything one dispatch round produced.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Dispatched batches in plan order.
    pub results: Vec<BatchResult>,
    /// Batches never sent because dispatch stopped.
    pub skipped: Vec<FixBatch>,
    /// Set when dispatch stopped early.
    pub stop: Option<DispatchStop>,
}

impl DispatchReport {
    /// Batches whose last attempt failed.
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.succeeded()).count()
    }
}

const fn stop_reason(exceeded: &BudgetExceeded) -> TerminationReason {
    match exceeded {
        BudgetExceeded::Cost(_) => TerminationReason::CostBudgetExceeded,
        BudgetExceeded::Time(_) => TerminationReason::TimeBudgetExceeded,
    }
}

/// Sends batches to the executor under the concurrency, rate and budget limits.
pub struct BatchDispatcher {
    executor: Arc<dyn FixExecutor>,
    cost_monitor: Arc<dyn CostMonitor>,
    policy: DispatchPolicy,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl BatchDispatcher {
    /// Dispatcher over `executor`, gated on `cost_monitor`.
    pub fn new(
        executor: Arc<dyn FixExecutor>,
        cost_monitor: Arc<dyn CostMonitor>,
        policy: DispatchPolicy,
    ) -> Self {
        let limiter = policy
            .rate_limit_per_minute
            .and_then(NonZeroU32::new)
            .map(|per_minute| Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))));

        Self {
            executor,
            cost_monitor,
            policy,
            limiter,
        }
    }

    /// Policy in use.
    pub const fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Send `batches` to the executor and wait for all dispatched ones.
    pub async fn dispatch(
        &self,
        batches: Vec<FixBatch>,
        cancel: &CancellationToken,
        event_tx: Option<&mpsc::Sender<ControllerEvent>>,
    ) -> DispatchReport {
        let semaphore = Arc::new(Semaphore::new(self.policy.concurrency));
        let mut handles = Vec::with_capacity(batches.len());
        let mut report = DispatchReport::default();
        let mut pending = batches.into_iter();

        while let Some(batch) = pending.next() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            if let Some(stop) = self.should_stop(cancel).await {
                info!(reason = %stop.reason, detail = %stop.detail, "Stopping dispatch");
                report.skipped.push(batch);
                report.skipped.extend(pending.by_ref());
                report.stop = Some(stop);
                break;
            }

            if let Some(tx) = event_tx {
                let _ = tx
                    .send(ControllerEvent::BatchDispatched {
                        iteration: batch.iteration,
                        batch_id: batch.id,
                        items: batch.items.len(),
                        est_tokens: batch.est_tokens(),
                    })
                    .await;
            }

            let executor = self.executor.clone();
            let cost_monitor = self.cost_monitor.clone();
            let limiter = self.limiter.clone();
            let policy = self.policy.clone();
            let cancel = cancel.clone();
            let task_batch = batch.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                run_batch(executor, cost_monitor, limiter, &policy, &task_batch, &cancel).await
            });
            handles.push((batch, handle));
        }

        let (spawned, joins): (Vec<FixBatch>, Vec<_>) = handles.into_iter().unzip();
        let finished = join_all(joins).await;

        for (batch, joined) in spawned.into_iter().zip(finished) {
            let (result, attempts) = match joined {
                Ok(done) => done,
                Err(e) => (
                    Err(ExecutorError::Unavailable(format!("dispatch task failed: {e}"))),
                    1,
                ),
            };

            if let Err(err) = &result {
                warn!(
                    batch_id = %batch.id,
                    attempts,
                    kind = err.kind(),
                    error = %err,
                    "Batch failed"
                );
                if let Some(tx) = event_tx {
                    let _ = tx
                        .send(ControllerEvent::BatchFailed {
                            iteration: batch.iteration,
                            batch_id: batch.id,
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                            attempts,
                        })
                        .await;
                }
            }

            report.results.push(BatchResult {
                batch,
                result,
                attempts,
            });
        }

        report
    }

    async fn should_stop(&self, cancel: &CancellationToken) -> Option<DispatchStop> {
        if cancel.is_cancelled() {
            return Some(DispatchStop {
                reason: TerminationReason::UserAbort,
                detail: "cancelled before dispatch".to_string(),
            });
        }
        let check = self.cost_monitor.check_budget().await;
        if check.allowed {
            return None;
        }
        check.exceeded.map(|exceeded| DispatchStop {
            reason: stop_reason(&exceeded),
            detail: exceeded.to_string(),
        })
    }
}

/// One batch with retries. Returns the final result and the attempt count.
async fn run_batch(
    executor: Arc<dyn FixExecutor>,
    cost_monitor: Arc<dyn CostMonitor>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    policy: &DispatchPolicy,
    batch: &FixBatch,
    cancel: &CancellationToken,
) -> (Result<FixOutcome, ExecutorError>, u32) {
    let mut attempts = 0u32;
    let result = policy
        .retry
        .execute_until_cancelled(
            || {
                attempts += 1;
                let executor = executor.clone();
                let cost_monitor = cost_monitor.clone();
                let limiter = limiter.clone();
                let attempt_timeout = policy.attempt_timeout;
                async move {
                    if let Some(limiter) = &limiter {
                        limiter.until_ready().await;
                    }
                    attempt_once(executor.as_ref(), cost_monitor.as_ref(), batch, attempt_timeout)
                        .await
                }
            },
            cancel,
        )
        .await;
    (result, attempts)
}

async fn attempt_once(
    executor: &dyn FixExecutor,
    cost_monitor: &dyn CostMonitor,
    batch: &FixBatch,
    attempt_timeout: Duration,
) -> Result<FixOutcome, ExecutorError> {
    debug!(batch_id = %batch.id, items = batch.items.len(), "Attempting batch");
    let outcome = match timeout(attempt_timeout, executor.attempt(batch)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ExecutorError::Timeout {
                after_secs: attempt_timeout.as_secs(),
            })
        }
    };

    if let Some(usage) = &outcome.usage {
        cost_monitor.record_usage(usage).await;
    }

    if outcome.success {
        Ok(outcome)
    } else {
        Err(ExecutorError::Rejected(
            outcome
                .error
                .unwrap_or_else(|| "executor reported failure".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::domain::models::{
        ClassificationSource, ClassifiedFinding, Complexity, ContextItem, ContextPayload,
        ContextPriority, Finding, FindingCategory, Severity,
    };
    use crate::domain::ports::TokenUsage;
    use crate::services::budget_monitor::{BudgetMonitor, BudgetMonitorConfig};

    struct ScriptedExecutor {
        responses: Mutex<VecDeque<Result<FixOutcome, ExecutorError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new(responses: Vec<Result<FixOutcome, ExecutorError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FixExecutor for ScriptedExecutor {
        async fn attempt(&self, _batch: &FixBatch) -> Result<FixOutcome, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(FixOutcome::succeeded(vec![])))
        }
    }

    fn batch(n: u32) -> FixBatch {
        let finding = Finding::new("eslint", "no-unused-vars", "a.js", n, 1, Severity::Warning, "x");
        let classified = ClassifiedFinding {
            finding: finding.clone(),
            fixable: true,
            confidence: 0.9,
            complexity: Complexity::Trivial,
            category: FindingCategory::Maintainability,
            source: ClassificationSource::Heuristic,
            snippet: None,
        };
        FixBatch::new(
            1,
            vec![ContextItem {
                id: uuid::Uuid::new_v4(),
                priority: ContextPriority::of(&classified),
                payload: ContextPayload::Finding {
                    finding,
                    snippet: None,
                },
                est_tokens: 10,
                pattern_hash: classified.pattern_hash(),
                age: 0,
            }],
        )
    }

    fn policy() -> DispatchPolicy {
        DispatchPolicy {
            concurrency: 2,
            attempt_timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(2, 100, 1_000),
            rate_limit_per_minute: None,
        }
    }

    fn unlimited() -> Arc<dyn CostMonitor> {
        Arc::new(BudgetMonitor::new(BudgetMonitorConfig::unlimited()))
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Err(ExecutorError::Timeout { after_secs: 5 }),
            Ok(FixOutcome::succeeded(vec!["a.js".into()])),
        ]));
        let dispatcher = BatchDispatcher::new(executor.clone(), unlimited(), policy());

        let report = dispatcher
            .dispatch(vec![batch(1)], &CancellationToken::new(), None)
            .await;

        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].succeeded());
        assert_eq!(report.results[0].attempts, 2);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unsuccessful_outcome_counts_as_rejection() {
        let rejected = FixOutcome {
            success: false,
            error: Some("could not apply".into()),
            ..FixOutcome::default()
        };
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Ok(rejected.clone()),
            Ok(rejected.clone()),
            Ok(rejected),
        ]));
        let dispatcher = BatchDispatcher::new(executor, unlimited(), policy());

        let report = dispatcher
            .dispatch(vec![batch(1)], &CancellationToken::new(), None)
            .await;

        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.results[0].attempts, 3);
        assert!(matches!(
            report.results[0].result,
            Err(ExecutorError::Rejected(ref m)) if m == "could not apply"
        ));
    }

    #[tokio::test]
    async fn unavailable_executor_is_not_retried() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Err(
            ExecutorError::Unavailable("missing".into()),
        )]));
        let dispatcher = BatchDispatcher::new(executor.clone(), unlimited(), policy());

        let report = dispatcher
            .dispatch(vec![batch(1)], &CancellationToken::new(), None)
            .await;

        assert_eq!(report.results[0].attempts, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_skips_everything() {
        let executor = Arc::new(ScriptedExecutor::new(vec![]));
        let dispatcher = BatchDispatcher::new(executor.clone(), unlimited(), policy());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = dispatcher.dispatch(vec![batch(1), batch(2)], &cancel, None).await;

        assert!(report.results.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(
            report.stop.map(|s| s.reason),
            Some(TerminationReason::UserAbort)
        );
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cost_ceiling_stops_later_batches() {
        let spend = FixOutcome::succeeded(vec![]).with_usage(TokenUsage {
            input_tokens: 10,
            output_tokens: 10,
            cost_usd: Some(2.0),
        });
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(spend)]));
        let monitor: Arc<dyn CostMonitor> = Arc::new(BudgetMonitor::new(BudgetMonitorConfig {
            max_cost_usd: Some(1.0),
            ..BudgetMonitorConfig::unlimited()
        }));
        let dispatcher = BatchDispatcher::new(
            executor,
            monitor,
            DispatchPolicy {
                concurrency: 1,
                ..policy()
            },
        );

        let report = dispatcher
            .dispatch(
                vec![batch(1), batch(2), batch(3)],
                &CancellationToken::new(),
                None,
            )
            .await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(
            report.stop.map(|s| s.reason),
            Some(TerminationReason::CostBudgetExceeded)
        );
    }
}
