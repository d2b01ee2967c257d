//! The convergence-driven fix loop.
//!
//! ## One iteration
//!
//! 1. **Collecting**: run the collector (with retry) and check the findings
//!    against the set the previous iteration ended with.
//! 2. **Classifying**: prepare source context, then classify every finding
//!    against the session's rule statistics.
//! 3. **Budgeting**: plan up to `max_batches_per_iteration` batches under the
//!    token budget.
//! 4. **Fixing**: dispatch the batches to the executor.
//! 5. **ReCollecting**: collect again and diff against the starting set.
//! 6. **Evaluating**: settle the finding ledger, commit learning, record the
//!    outcome, ask the evaluator whether to continue, and persist.
//!
//! The session is saved after every iteration so an interrupted run can be
//! resumed from the last recorded iteration without re-applying learning.
//! Every run ends in exactly one [`TerminationReason`].

mod dispatch;
mod events;

pub use dispatch::{BatchDispatcher, BatchResult, DispatchPolicy, DispatchReport, DispatchStop};
pub use events::{ControllerEvent, RunSummary};

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{
    BudgetExceeded, CollectorError, ConsistencyError, DomainError, DomainResult,
};
use crate::domain::models::{
    diff_findings, ClassifiedFinding, Config, DeferralReason, DeferredFinding, Finding,
    FindingKey, FindingLedger, FixBatch, IterationOutcome, IterationPhase, LearningUpdate,
    LoopConfig, RuleKey, RuleStatsSnapshot, Session, TerminationReason,
};
use crate::domain::ports::{CostMonitor, FixExecutor, LintCollector, SessionStore};
use crate::services::classifier::{snapshot_or_empty, FindingClassifier, SourceContextBuilder};
use crate::services::context_budget::{ContextBudgetManager, PlanLimits, SelectionHistory};
use crate::services::convergence_analyzer::ConvergenceEvaluator;
use crate::services::retry::RetryPolicy;

/// Collaborators the controller drives.
#[derive(Clone)]
pub struct ControllerPorts {
    /// Source of findings.
    pub collector: Arc<dyn LintCollector>,
    /// Applies fixes for a batch.
    pub executor: Arc<dyn FixExecutor>,
    /// Tracks spend and gates dispatch.
    pub cost_monitor: Arc<dyn CostMonitor>,
    /// Persists sessions and learned rules.
    pub store: Arc<dyn SessionStore>,
    /// Decides whether another iteration is worthwhile.
    pub evaluator: Arc<dyn ConvergenceEvaluator>,
}

/// Settings the controller derives from [`Config`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Iteration caps and the consistency check.
    pub run: LoopConfig,
    /// Retries for transient collector errors.
    pub collector_retry: RetryPolicy,
    /// How batches reach the executor.
    pub dispatch: DispatchPolicy,
    /// Root that finding paths are resolved against when reading source.
    pub source_root: PathBuf,
}

impl ControllerConfig {
    /// Settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            run: config.run.clone(),
            collector_retry: RetryPolicy::from(&config.collector.retry),
            dispatch: DispatchPolicy::from_config(&config.executor),
            source_root: config
                .executor
                .working_dir
                .as_ref()
                .map_or_else(|| PathBuf::from("."), PathBuf::from),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

enum Step {
    Continue,
    Stop {
        reason: TerminationReason,
        detail: String,
        /// `(findings, fixable)` observed but not yet recorded in history.
        latest: Option<(usize, Option<usize>)>,
    },
}

impl Step {
    fn stop(
        reason: TerminationReason,
        detail: impl Into<String>,
        latest: Option<(usize, Option<usize>)>,
    ) -> Self {
        Self::Stop {
            reason,
            detail: detail.into(),
            latest,
        }
    }
}

/// Drives one session through collect, classify, budget, fix and evaluate until it terminates.
pub struct IterationController {
    collector: Arc<dyn LintCollector>,
    cost_monitor: Arc<dyn CostMonitor>,
    store: Arc<dyn SessionStore>,
    evaluator: Arc<dyn ConvergenceEvaluator>,
    dispatcher: BatchDispatcher,
    classifier: FindingClassifier,
    budget: ContextBudgetManager,
    sources: SourceContextBuilder,
    config: ControllerConfig,
    event_tx: Option<mpsc::Sender<ControllerEvent>>,
    phase: IterationPhase,
}

impl IterationController {
    /// Controller over `ports` with settings from `config`.
    pub fn new(ports: ControllerPorts, config: &Config) -> Self {
        Self::with_controller_config(ports, config, ControllerConfig::from_config(config))
    }

    /// Like [`new`](Self::new) with explicit loop, retry and dispatch settings.
    pub fn with_controller_config(
        ports: ControllerPorts,
        config: &Config,
        controller: ControllerConfig,
    ) -> Self {
        let dispatcher = BatchDispatcher::new(
            ports.executor,
            ports.cost_monitor.clone(),
            controller.dispatch.clone(),
        );
        Self {
            collector: ports.collector,
            cost_monitor: ports.cost_monitor,
            store: ports.store,
            evaluator: ports.evaluator,
            dispatcher,
            classifier: FindingClassifier::new(config.classifier.clone()),
            budget: ContextBudgetManager::new(config.budget.clone()),
            sources: SourceContextBuilder::new(controller.source_root.clone(), &config.classifier),
            config: controller,
            event_tx: None,
            phase: IterationPhase::Idle,
        }
    }

    /// Send [`ControllerEvent`]s to `event_tx` as the run progresses.
    #[must_use]
    pub fn with_events(mut self, event_tx: mpsc::Sender<ControllerEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Current phase of the state machine.
    pub const fn phase(&self) -> IterationPhase {
        self.phase
    }

    /// Start a new session over `scope` and run it to termination.
    pub async fn run(&mut self, scope: &str, cancel: CancellationToken) -> DomainResult<RunSummary> {
        let seed = snapshot_or_empty(self.store.load_rule_stats().await)?.rebased();
        let session = Session::new(scope, seed);
        self.store.save(&session).await?;
        self.cost_monitor.restore(&session.budget_spent).await;
        info!(session_id = %session.id, scope, learned_rules = session.rule_stats.len(), "Starting fix session");
        self.drive(session, false, &cancel).await
    }

    /// Continue a persisted session after its last recorded iteration.
    pub async fn resume(&mut self, session_id: Uuid, cancel: CancellationToken) -> DomainResult<RunSummary> {
        let session = self
            .store
            .load(session_id)
            .await?
            .ok_or(DomainError::SessionNotFound(session_id))?;
        if let Some(termination) = &session.termination {
            return Err(DomainError::SessionTerminated {
                session_id,
                reason: termination.reason.to_string(),
            });
        }
        self.cost_monitor.restore(&session.budget_spent).await;
        info!(
            session_id = %session.id,
            completed_iterations = session.iteration_history.len(),
            "Resuming fix session"
        );
        self.drive(session, true, &cancel).await
    }

    async fn drive(
        &mut self,
        mut session: Session,
        resumed: bool,
        cancel: &CancellationToken,
    ) -> DomainResult<RunSummary> {
        self.phase = IterationPhase::Idle;
        self.emit(ControllerEvent::SessionStarted {
            session_id: session.id,
            scope: session.scope.clone(),
            resumed,
            next_iteration: session.next_iteration_index(),
        })
        .await;

        loop {
            if let Some((reason, detail)) = self.preflight(&session, cancel).await {
                return self.finish(session, reason, detail, None).await;
            }
            match self.run_iteration(&mut session, cancel).await? {
                Step::Continue => {}
                Step::Stop {
                    reason,
                    detail,
                    latest,
                } => return self.finish(session, reason, detail, latest).await,
            }
        }
    }

    /// Hard caps checked before every iteration.
    async fn preflight(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Option<(TerminationReason, String)> {
        if cancel.is_cancelled() {
            return Some((TerminationReason::UserAbort, "cancelled".to_string()));
        }
        let completed = session.iteration_history.len();
        if completed >= self.config.run.max_iterations as usize {
            return Some((
                TerminationReason::MaxIterationsReached,
                format!("completed {completed} iterations"),
            ));
        }
        let check = self.cost_monitor.check_budget().await;
        match check.exceeded {
            Some(exceeded) if !check.allowed => {
                let reason = match exceeded {
                    BudgetExceeded::Cost(_) => TerminationReason::CostBudgetExceeded,
                    BudgetExceeded::Time(_) => TerminationReason::TimeBudgetExceeded,
                };
                Some((reason, exceeded.to_string()))
            }
            _ => None,
        }
    }

    async fn run_iteration(
        &mut self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> DomainResult<Step> {
        let index = session.next_iteration_index();
        let started = Instant::now();
        info!(session_id = %session.id, iteration = index, "Starting iteration");

        // Collect
        self.transition(index, IterationPhase::Collecting).await?;
        let before = match self.collect(&session.scope, cancel).await {
            Ok(findings) => findings,
            Err(err) => {
                return Ok(Step::stop(
                    TerminationReason::CollectorFatalError,
                    err.to_string(),
                    None,
                ))
            }
        };
        self.emit(ControllerEvent::FindingsCollected {
            iteration: index,
            count: before.len(),
        })
        .await;

        if self.config.run.consistency_check {
            if let Some(drift) = session.collection_drift(&before) {
                let err = ConsistencyError {
                    iteration: index,
                    expected: session.last_outcome().map_or(0, |o| o.findings_after),
                    actual: before.len(),
                    missing: drift.missing,
                    unexpected: drift.unexpected,
                };
                error!(error = %err, "Collector output inconsistent with recorded history");
                return Ok(Step::stop(
                    TerminationReason::CollectorFatalError,
                    err.to_string(),
                    Some((before.len(), None)),
                ));
            }
        }

        if before.is_empty() {
            return Ok(Step::stop(
                TerminationReason::Converged,
                "no findings",
                Some((0, Some(0))),
            ));
        }

        let hashes: Vec<String> = before.iter().map(Finding::pattern_hash).collect();
        session.note_seen(hashes.iter().map(String::as_str), index);

        // Classify
        self.transition(index, IterationPhase::Classifying).await?;
        let (classified, languages) = self.classify(&before, &session.rule_stats).await?;
        let fixable = classified.iter().filter(|c| c.fixable).count();
        self.emit(ControllerEvent::Classified {
            iteration: index,
            total: classified.len(),
            fixable,
        })
        .await;
        if fixable == 0 {
            return Ok(Step::stop(
                TerminationReason::NoFixableFindings,
                format!("none of {} findings are fixable", before.len()),
                Some((before.len(), Some(0))),
            ));
        }

        // Budget
        self.transition(index, IterationPhase::Budgeting).await?;
        let limits = PlanLimits {
            max_findings: self.config.run.max_findings_per_iteration,
            max_batches: self.config.run.max_batches_per_iteration,
            max_items_per_batch: self.config.run.max_items_per_batch,
        };
        let plan = self.budget.plan(
            &classified,
            limits,
            &SelectionHistory::for_session(session, index),
        );
        let batches: Vec<FixBatch> = plan
            .batches
            .into_iter()
            .map(|items| FixBatch::new(index, items))
            .collect();
        info!(
            iteration = index,
            fixable,
            batches = batches.len(),
            deferred = plan.deferred.len(),
            "Planned fix batches"
        );

        // Fix
        self.transition(index, IterationPhase::Fixing).await?;
        let report = self
            .dispatcher
            .dispatch(batches, cancel, self.event_tx.as_ref())
            .await;

        // Re-collect
        self.transition(index, IterationPhase::ReCollecting).await?;
        let after = match self.collect(&session.scope, cancel).await {
            Ok(findings) => findings,
            Err(err) => {
                return Ok(Step::stop(
                    TerminationReason::CollectorFatalError,
                    err.to_string(),
                    Some((before.len(), Some(fixable))),
                ))
            }
        };

        // Evaluate
        self.transition(index, IterationPhase::Evaluating).await?;
        let accounting = settle(index, &before, &after, &report, &plan.deferred, &languages);
        session.rule_stats = session.rule_stats.commit(&accounting.learning);

        let fixable_after = if after.is_empty() {
            0
        } else {
            self.classify(&after, &session.rule_stats)
                .await?
                .0
                .iter()
                .filter(|c| c.fixable)
                .count()
        };

        let outcome = IterationOutcome {
            index,
            findings_before: before.len(),
            findings_after: after.len(),
            fixed_count: accounting.fixed,
            new_findings_count: accounting.introduced,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: chrono::Utc::now(),
            attempted_count: accounting.attempted,
            deferred_count: accounting.deferred.len(),
            batches_dispatched: report.results.len(),
            batches_failed: report.failed_count(),
            fixable_after: Some(fixable_after),
            ledger: accounting.ledger,
        };
        session.record_iteration(outcome.clone())?;
        session.remember_collected(&after);
        session.recent_failures = accounting.failed_patterns;
        session.deferred = accounting.deferred;
        session.budget_spent = self.cost_monitor.spent().await;

        let verdict = self.evaluator.evaluate(&session.iteration_history);
        session.last_verdict = Some(verdict.clone());
        session.touch();
        self.store.save(session).await?;
        self.merge_learning(&accounting.learning).await;

        info!(
            session_id = %session.id,
            iteration = index,
            before = outcome.findings_before,
            after = outcome.findings_after,
            fixed = outcome.fixed_count,
            introduced = outcome.new_findings_count,
            state = verdict.state.as_str(),
            continue_loop = verdict.should_continue,
            "Iteration complete"
        );
        self.emit(ControllerEvent::IterationCompleted {
            outcome,
            state: verdict.state,
            should_continue: verdict.should_continue,
            reason: verdict.reason.clone(),
        })
        .await;

        if let Some(stop) = report.stop {
            return Ok(Step::stop(stop.reason, stop.detail, None));
        }
        if !verdict.should_continue {
            return Ok(Step::stop(
                verdict.stop_reason.unwrap_or(TerminationReason::Converged),
                verdict.reason,
                None,
            ));
        }
        Ok(Step::Continue)
    }

    async fn collect(
        &self,
        scope: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Finding>, CollectorError> {
        self.config
            .collector_retry
            .execute_until_cancelled(|| self.collector.collect(scope), cancel)
            .await
    }

    /// Classify `findings`, also returning languages read from file content.
    async fn classify(
        &self,
        findings: &[Finding],
        snapshot: &RuleStatsSnapshot,
    ) -> DomainResult<(Vec<ClassifiedFinding>, SourceLanguages)> {
        let contexts = self.sources.prepare(findings).await;
        let languages = findings
            .iter()
            .zip(&contexts)
            .filter_map(|(f, c)| Some((f.file_path.clone(), c.language.clone()?)))
            .collect();
        let items = findings.iter().cloned().zip(contexts).collect();
        let classified = self
            .classifier
            .classify_all(items, Arc::new(snapshot.clone()))
            .await?;
        Ok((classified, languages))
    }

    /// Fold this iteration's tallies into the cross-session store.
    async fn merge_learning(&self, update: &LearningUpdate) {
        if update.is_empty() {
            return;
        }
        let current = match snapshot_or_empty(self.store.load_rule_stats().await) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "Could not load learned rules; skipping merge");
                return;
            }
        };
        let merged = current.rebased().commit(update);
        if let Err(err) = self.store.save_rule_stats(&merged).await {
            warn!(error = %err, "Could not persist learned rules");
        }
    }

    async fn transition(&mut self, iteration: u32, next: IterationPhase) -> DomainResult<()> {
        let from = self.phase;
        if !from.can_transition_to(next) {
            return Err(DomainError::InvalidPhaseTransition {
                from: from.to_string(),
                to: next.to_string(),
            });
        }
        debug!(iteration, from = from.as_str(), to = next.as_str(), "Phase transition");
        self.phase = next;
        self.emit(ControllerEvent::PhaseChanged {
            iteration,
            from,
            to: next,
        })
        .await;
        Ok(())
    }

    async fn finish(
        &mut self,
        mut session: Session,
        reason: TerminationReason,
        detail: String,
        latest: Option<(usize, Option<usize>)>,
    ) -> DomainResult<RunSummary> {
        let iteration = session.iteration_history.len() as u32;
        self.transition(iteration, IterationPhase::Terminated).await?;

        session.budget_spent = self.cost_monitor.spent().await;
        session.terminate(reason, detail.clone())?;
        self.store.save(&session).await?;

        let summary = RunSummary::from_session(&session, reason, detail, latest);
        if reason.is_failure() {
            warn!(session_id = %session.id, reason = %reason, detail = %summary.detail, "Fix session terminated");
        } else {
            info!(
                session_id = %session.id,
                reason = %reason,
                iterations = summary.iterations,
                total_fixed = summary.total_fixed,
                remaining = summary.remaining,
                "Fix session terminated"
            );
        }
        self.emit(ControllerEvent::Terminated {
            summary: summary.clone(),
        })
        .await;
        Ok(summary)
    }

    async fn emit(&self, event: ControllerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger settlement
// ---------------------------------------------------------------------------

/// Content-derived languages by file path, for files whose extension is silent.
type SourceLanguages = HashMap<String, String>;

/// Bookkeeping derived from one iteration's before/after sets.
struct Settlement {
    fixed: usize,
    introduced: usize,
    attempted: usize,
    ledger: FindingLedger,
    learning: LearningUpdate,
    /// Patterns attempted by a successful batch that are still present.
    failed_patterns: BTreeSet<String>,
    deferred: Vec<DeferredFinding>,
}

/// Take one disappearance of `finding` from the pool, if any remain.
fn claim(pool: &mut HashMap<FindingKey, usize>, finding: &Finding) -> bool {
    match pool.get_mut(&finding.key()) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

/// Attribute every starting finding to exactly one ledger bucket.
///
/// Disappearances are claimed first by findings from successful batches
/// (which feed learning), then by findings from failed batches (counted
/// fixed but not learned from), then by findings that were never sent.
fn settle(
    index: u32,
    before: &[Finding],
    after: &[Finding],
    report: &DispatchReport,
    plan_deferred: &[ClassifiedFinding],
    languages: &SourceLanguages,
) -> Settlement {
    let diff = diff_findings(before, after);
    let mut pool: HashMap<FindingKey, usize> = HashMap::new();
    for finding in &diff.fixed {
        *pool.entry(finding.key()).or_default() += 1;
    }

    let mut learning = LearningUpdate::new(index);
    let mut failed_patterns = BTreeSet::new();
    let mut deferred = Vec::new();
    let mut attempted = 0;
    let mut deferred_due_to_error = 0;

    for result in report.results.iter().filter(|r| r.succeeded()) {
        for finding in result.batch.items.iter().flat_map(|i| i.covered_findings()) {
            attempted += 1;
            let resolved = claim(&mut pool, finding);
            let language = languages.get(&finding.file_path).map(String::as_str);
            learning.record(RuleKey::for_finding(finding, language), resolved);
            if !resolved {
                failed_patterns.insert(finding.pattern_hash());
            }
        }
    }

    for result in &report.results {
        let Err(err) = &result.result else {
            continue;
        };
        for finding in result.batch.items.iter().flat_map(|i| i.covered_findings()) {
            attempted += 1;
            if !claim(&mut pool, finding) {
                deferred_due_to_error += 1;
                deferred.push(DeferredFinding {
                    finding: finding.clone(),
                    iteration: index,
                    reason: DeferralReason::ExecutorFailure {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    },
                });
            }
        }
    }

    let skip_reason = match &report.stop {
        Some(stop) if stop.reason == TerminationReason::UserAbort => DeferralReason::UserAbort,
        Some(stop) => DeferralReason::BudgetStop {
            message: stop.detail.clone(),
        },
        None => DeferralReason::CapacityLimit,
    };
    for finding in report
        .skipped
        .iter()
        .flat_map(|b| b.items.iter())
        .flat_map(|i| i.covered_findings())
    {
        if !claim(&mut pool, finding) {
            deferred.push(DeferredFinding {
                finding: finding.clone(),
                iteration: index,
                reason: skip_reason.clone(),
            });
        }
    }

    for classified in plan_deferred {
        if !claim(&mut pool, &classified.finding) {
            deferred.push(DeferredFinding {
                finding: classified.finding.clone(),
                iteration: index,
                reason: DeferralReason::CapacityLimit,
            });
        }
    }

    let fixed = diff.fixed.len();
    Settlement {
        fixed,
        introduced: diff.introduced.len(),
        attempted,
        ledger: FindingLedger {
            fixed,
            still_present: before.len().saturating_sub(fixed + deferred_due_to_error),
            deferred_due_to_error,
        },
        learning,
        failed_patterns,
        deferred,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ExecutorError;
    use crate::domain::models::{
        ClassificationSource, Complexity, ContextItem, ContextPayload, ContextPriority,
        FindingCategory, Severity,
    };
    use crate::domain::ports::FixOutcome;

    fn finding(rule: &str, line: u32) -> Finding {
        Finding::new("eslint", rule, "src/a.js", line, 1, Severity::Warning, format!("{rule} here"))
    }

    fn batch(findings: &[Finding]) -> FixBatch {
        let items = findings
            .iter()
            .map(|f| {
                let classified = ClassifiedFinding {
                    finding: f.clone(),
                    fixable: true,
                    confidence: 0.9,
                    complexity: Complexity::Trivial,
                    category: FindingCategory::Style,
                    source: ClassificationSource::Heuristic,
                    snippet: None,
                };
                ContextItem {
                    id: Uuid::new_v4(),
                    priority: ContextPriority::of(&classified),
                    payload: ContextPayload::Finding {
                        finding: f.clone(),
                        snippet: None,
                    },
                    est_tokens: 10,
                    pattern_hash: f.pattern_hash(),
                    age: 0,
                }
            })
            .collect();
        FixBatch::new(1, items)
    }

    fn ok(findings: &[Finding]) -> BatchResult {
        BatchResult {
            batch: batch(findings),
            result: Ok(FixOutcome::succeeded(vec![])),
            attempts: 1,
        }
    }

    fn failed(findings: &[Finding]) -> BatchResult {
        BatchResult {
            batch: batch(findings),
            result: Err(ExecutorError::Timeout { after_secs: 30 }),
            attempts: 3,
        }
    }

    #[test]
    fn ledger_accounts_for_every_finding() {
        let a = finding("semi", 1);
        let b = finding("quotes", 2);
        let c = finding("eqeqeq", 3);
        let d = finding("no-var", 4);
        let before = vec![a.clone(), b.clone(), c.clone(), d.clone()];
        // a fixed by a successful batch, b left behind by it, c's batch
        // failed, d never attempted.
        let after = vec![b.clone(), c.clone(), d.clone()];
        let report = DispatchReport {
            results: vec![ok(&[a, b.clone()]), failed(&[c.clone()])],
            skipped: vec![],
            stop: None,
        };

        let s = settle(1, &before, &after, &report, &[], &HashMap::new());

        assert_eq!(s.ledger.fixed, 1);
        assert_eq!(s.ledger.deferred_due_to_error, 1);
        assert_eq!(s.ledger.still_present, 2);
        assert_eq!(s.ledger.total(), before.len());
        assert_eq!(s.attempted, 3);
        assert!(s.failed_patterns.contains(&b.pattern_hash()));
        assert!(!s.failed_patterns.contains(&c.pattern_hash()));
        assert_eq!(s.deferred.len(), 1);
        assert!(s.deferred[0].reason.is_error());
    }

    #[test]
    fn failed_batch_finding_that_disappears_counts_as_fixed_but_not_learned() {
        let a = finding("semi", 1);
        let report = DispatchReport {
            results: vec![failed(&[a.clone()])],
            skipped: vec![],
            stop: None,
        };

        let s = settle(1, &[a], &[], &report, &[], &HashMap::new());

        assert_eq!(s.ledger.fixed, 1);
        assert_eq!(s.ledger.deferred_due_to_error, 0);
        assert!(s.learning.is_empty());
        assert!(s.deferred.is_empty());
    }

    #[test]
    fn skipped_batches_carry_the_stop_reason() {
        let a = finding("semi", 1);
        let report = DispatchReport {
            results: vec![],
            skipped: vec![batch(&[a.clone()])],
            stop: Some(DispatchStop {
                reason: TerminationReason::UserAbort,
                detail: "cancelled".into(),
            }),
        };

        let s = settle(1, &[a.clone()], &[a], &report, &[], &HashMap::new());

        assert_eq!(s.ledger.still_present, 1);
        assert_eq!(s.deferred.len(), 1);
        assert_eq!(s.deferred[0].reason, DeferralReason::UserAbort);
        assert_eq!(s.attempted, 0);
    }

    #[test]
    fn learning_records_outcome_per_rule() {
        let fixed = finding("semi", 1);
        let stuck = finding("quotes", 2);
        let report = DispatchReport {
            results: vec![ok(&[fixed.clone(), stuck.clone()])],
            skipped: vec![],
            stop: None,
        };

        let s = settle(4, &[fixed.clone(), stuck.clone()], &[stuck.clone()], &report, &[], &HashMap::new());

        let semi = &s.learning.tallies[&RuleKey::for_finding(&fixed, None)];
        let quotes = &s.learning.tallies[&RuleKey::for_finding(&stuck, None)];
        assert_eq!((semi.resolved, semi.still_present), (1, 0));
        assert_eq!((quotes.resolved, quotes.still_present), (0, 1));
        assert_eq!(s.learning.iteration, 4);
    }

    #[test]
    fn learning_uses_content_language_for_extensionless_files() {
        let script = Finding::new(
            "ruff",
            "F401",
            "bin/deploy",
            2,
            1,
            Severity::Warning,
            "`os` imported but unused",
        );
        let report = DispatchReport {
            results: vec![ok(&[script.clone()])],
            skipped: vec![],
            stop: None,
        };
        let languages = HashMap::from([("bin/deploy".to_string(), "python".to_string())]);

        let s = settle(2, &[script.clone()], &[], &report, &[], &languages);

        let key = RuleKey::new("ruff", "F401", "python");
        assert_eq!(s.learning.tallies[&key].resolved, 1);
        assert!(!s.learning.tallies.contains_key(&RuleKey::for_finding(&script, None)));
    }
}
