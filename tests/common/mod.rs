//! Common test utilities for integration tests
//!
//! A simulated workspace shared by a collector and an executor, plus
//! fixtures for findings, configuration and controllers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lintloop::adapters::InMemorySessionStore;
use lintloop::domain::errors::{CollectorError, DomainError, DomainResult, ExecutorError};
use lintloop::domain::models::{Config, Finding, FixBatch, RuleStatsSnapshot, Session, Severity};
use lintloop::domain::ports::{FixExecutor, FixOutcome, LintCollector, SessionStore, TokenUsage};
use lintloop::services::{
    BudgetMonitor, BudgetMonitorConfig, ControllerPorts, IterationController, RuleBasedAnalyzer,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Finding reported by the `eslint` fixture tool.
pub fn finding(rule: &str, file: &str, line: u32, message: &str) -> Finding {
    Finding::new("eslint", rule, file, line, 1, Severity::Warning, message)
}

/// `count` heuristically fixable findings of one rule, one per file.
pub fn unused_imports(count: usize) -> Vec<Finding> {
    (0..count)
        .map(|i| {
            finding(
                "no-unused-vars",
                &format!("web/module{i}.js"),
                3,
                &format!("unused import `dep{i}`"),
            )
        })
        .collect()
}

/// Findings no heuristic recognises.
pub fn opaque(count: usize) -> Vec<Finding> {
    (0..count)
        .map(|i| {
            finding(
                "custom-check",
                &format!("web/opaque{i}.js"),
                10,
                &format!("opaque diagnostic {i}"),
            )
        })
        .collect()
}

/// Findings the heuristics mark as not fixable.
pub fn unfixable(count: usize) -> Vec<Finding> {
    (0..count)
        .map(|i| {
            finding(
                "max-params",
                &format!("web/service{i}.js"),
                1,
                &format!("function has too many arguments ({})", 8 + i),
            )
        })
        .collect()
}

/// Defaults with fast retries, no wall-clock ceiling and one batch in flight.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.run.max_wall_clock_secs = 0;
    config.executor.concurrency = 1;
    config.executor.timeout_secs = 30;
    config.executor.retry.max_retries = 2;
    config.executor.retry.initial_backoff_ms = 10;
    config.executor.retry.max_backoff_ms = 100;
    config.collector.retry.max_retries = 2;
    config.collector.retry.initial_backoff_ms = 10;
    config.collector.retry.max_backoff_ms = 100;
    config.executor.working_dir = Some(std::env::temp_dir().display().to_string());
    config
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// The "codebase": the findings a linter would currently report.
#[derive(Default)]
pub struct Workspace {
    findings: Mutex<Vec<Finding>>,
}

impl Workspace {
    pub fn new(findings: Vec<Finding>) -> Arc<Self> {
        Arc::new(Self {
            findings: Mutex::new(findings),
        })
    }

    pub fn snapshot(&self) -> Vec<Finding> {
        self.findings.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.findings.lock().unwrap().len()
    }

    fn remove(&self, finding: &Finding) -> bool {
        let mut findings = self.findings.lock().unwrap();
        match findings.iter().position(|f| f == finding) {
            Some(pos) => {
                findings.remove(pos);
                true
            }
            None => false,
        }
    }

    fn add(&self, finding: Finding) {
        self.findings.lock().unwrap().push(finding);
    }
}

// ---------------------------------------------------------------------------
// Collectors
// ---------------------------------------------------------------------------

/// Reports the workspace, after first replaying any queued errors.
pub struct WorkspaceCollector {
    workspace: Arc<Workspace>,
    errors: Mutex<VecDeque<CollectorError>>,
    calls: AtomicUsize,
}

impl WorkspaceCollector {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            workspace,
            errors: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn failing_first(self, errors: Vec<CollectorError>) -> Self {
        *self.errors.lock().unwrap() = errors.into();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LintCollector for WorkspaceCollector {
    async fn collect(&self, _scope: &str) -> Result<Vec<Finding>, CollectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.workspace.snapshot())
    }

    fn name(&self) -> &str {
        "workspace"
    }
}

/// Returns canned responses in order, repeating the last one.
pub struct ScriptedCollector {
    responses: Mutex<VecDeque<Vec<Finding>>>,
}

impl ScriptedCollector {
    pub fn new(responses: Vec<Vec<Finding>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl LintCollector for ScriptedCollector {
    async fn collect(&self, _scope: &str) -> Result<Vec<Finding>, CollectorError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            Ok(responses.pop_front().unwrap_or_default())
        } else {
            Ok(responses.front().cloned().unwrap_or_default())
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Fixes findings in the workspace.
///
/// Queued errors are returned first, one per attempt. Each successful attempt
/// then fixes the number of covered findings at the head of `fix_counts`
/// (all of them once the queue is empty) and adds `introduce_per_attempt`
/// fresh findings.
pub struct FixingExecutor {
    workspace: Arc<Workspace>,
    errors: Mutex<VecDeque<ExecutorError>>,
    fix_counts: Mutex<VecDeque<usize>>,
    introduce_per_attempt: usize,
    only_rules: Option<Vec<String>>,
    usage: Option<TokenUsage>,
    cancel_on_attempt: Option<CancellationToken>,
    advance_per_attempt: Option<Duration>,
    attempts: AtomicUsize,
    introduced: AtomicUsize,
}

impl FixingExecutor {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            workspace,
            errors: Mutex::new(VecDeque::new()),
            fix_counts: Mutex::new(VecDeque::new()),
            introduce_per_attempt: 0,
            only_rules: None,
            usage: None,
            cancel_on_attempt: None,
            advance_per_attempt: None,
            attempts: AtomicUsize::new(0),
            introduced: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn failing_first(self, errors: Vec<ExecutorError>) -> Self {
        *self.errors.lock().unwrap() = errors.into();
        self
    }

    #[must_use]
    pub fn fixing(self, counts: Vec<usize>) -> Self {
        *self.fix_counts.lock().unwrap() = counts.into();
        self
    }

    /// Leave findings of every other rule untouched.
    #[must_use]
    pub fn only_rules(mut self, rules: &[&str]) -> Self {
        self.only_rules = Some(rules.iter().map(|r| (*r).to_string()).collect());
        self
    }

    #[must_use]
    pub const fn introducing(mut self, per_attempt: usize) -> Self {
        self.introduce_per_attempt = per_attempt;
        self
    }

    #[must_use]
    pub const fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Cancel `token` during the first attempt, as Ctrl-C would.
    #[must_use]
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_attempt = Some(token);
        self
    }

    /// Move the paused test clock forward on every attempt, as a slow edit would.
    #[must_use]
    pub const fn taking(mut self, per_attempt: Duration) -> Self {
        self.advance_per_attempt = Some(per_attempt);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FixExecutor for FixingExecutor {
    async fn attempt(&self, batch: &FixBatch) -> Result<FixOutcome, ExecutorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_attempt {
            token.cancel();
        }
        if let Some(step) = self.advance_per_attempt {
            tokio::time::advance(step).await;
        }
        if let Some(err) = self.errors.lock().unwrap().pop_front() {
            return Err(err);
        }

        let covered: Vec<Finding> = batch
            .items
            .iter()
            .flat_map(|item| item.covered_findings().into_iter().cloned())
            .filter(|f| {
                self.only_rules
                    .as_ref()
                    .is_none_or(|rules| rules.contains(&f.rule_id))
            })
            .collect();
        let limit = self
            .fix_counts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(covered.len());

        let mut files_changed = Vec::new();
        for finding in covered.iter().take(limit) {
            if self.workspace.remove(finding) {
                files_changed.push(finding.file_path.clone());
            }
        }
        for _ in 0..self.introduce_per_attempt {
            let n = self.introduced.fetch_add(1, Ordering::SeqCst);
            self.workspace.add(finding(
                "no-unused-vars",
                &format!("web/regression{n}.js"),
                1,
                &format!("unused import `regressed{n}`"),
            ));
        }

        let outcome = FixOutcome::succeeded(files_changed);
        Ok(match self.usage {
            Some(usage) => outcome.with_usage(usage),
            None => outcome,
        })
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// In-memory store whose `save` fails once, on the given call number.
pub struct FlakyStore {
    pub inner: InMemorySessionStore,
    fail_on_save: usize,
    saves: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: InMemorySessionStore, fail_on_save: usize) -> Self {
        Self {
            inner,
            fail_on_save,
            saves: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn save(&self, session: &Session) -> DomainResult<()> {
        let call = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on_save {
            return Err(DomainError::DatabaseError("disk I/O error".to_string()));
        }
        self.inner.save(session).await
    }

    async fn load(&self, id: Uuid) -> DomainResult<Option<Session>> {
        self.inner.load(id).await
    }

    async fn list_recent(&self, limit: usize) -> DomainResult<Vec<Session>> {
        self.inner.list_recent(limit).await
    }

    async fn load_rule_stats(&self) -> DomainResult<RuleStatsSnapshot> {
        self.inner.load_rule_stats().await
    }

    async fn save_rule_stats(&self, snapshot: &RuleStatsSnapshot) -> DomainResult<()> {
        self.inner.save_rule_stats(snapshot).await
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub fn unlimited_monitor() -> Arc<BudgetMonitor> {
    Arc::new(BudgetMonitor::new(BudgetMonitorConfig::unlimited()))
}

/// Controller over the given collaborators with a rule-based evaluator.
pub fn controller(
    config: &Config,
    collector: Arc<dyn LintCollector>,
    executor: Arc<dyn FixExecutor>,
    store: Arc<dyn SessionStore>,
    monitor: Arc<BudgetMonitor>,
) -> IterationController {
    let ports = ControllerPorts {
        collector,
        executor,
        cost_monitor: monitor,
        store,
        evaluator: Arc::new(RuleBasedAnalyzer::new(config.convergence.clone())),
    };
    IterationController::new(ports, config)
}
