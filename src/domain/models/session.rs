//! Fix session model.
//!
//! A session is created when a run starts, mutated only by the iteration
//! controller, persisted after every iteration, and terminated exactly once.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

use super::convergence::ConvergenceVerdict;
use super::finding::{Finding, FindingKey};
use super::iteration::{DeferredFinding, IterationOutcome};
use super::rule_stats::RuleStatsSnapshot;

// ---------------------------------------------------------------------------
// IterationPhase
// ---------------------------------------------------------------------------

/// Phase of the iteration controller's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationPhase {
    Idle,
    Collecting,
    Classifying,
    Budgeting,
    Fixing,
    ReCollecting,
    Evaluating,
    Terminated,
}

impl IterationPhase {
    /// Stable snake_case name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Collecting => "collecting",
            Self::Classifying => "classifying",
            Self::Budgeting => "budgeting",
            Self::Fixing => "fixing",
            Self::ReCollecting => "re_collecting",
            Self::Evaluating => "evaluating",
            Self::Terminated => "terminated",
        }
    }

    /// Whether the controller may move from `self` to `next`.
    ///
    /// Every non-terminal phase may also jump straight to `Terminated`
    /// (fatal errors, zero fixable findings, aborts).
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == Self::Terminated {
            return self != Self::Terminated;
        }
        matches!(
            (self, next),
            (Self::Idle, Self::Collecting)
                | (Self::Collecting, Self::Classifying)
                | (Self::Classifying, Self::Budgeting)
                | (Self::Budgeting, Self::Fixing)
                | (Self::Fixing, Self::ReCollecting)
                | (Self::ReCollecting, Self::Evaluating)
                | (Self::Evaluating, Self::Collecting)
        )
    }

    /// Whether no further transition is allowed.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for IterationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

/// Why a session stopped. Exactly one per terminated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxIterationsReached,
    Converged,
    DivergingAbort,
    OscillatingAbort,
    CostBudgetExceeded,
    TimeBudgetExceeded,
    NoFixableFindings,
    UserAbort,
    CollectorFatalError,
}

impl TerminationReason {
    /// Stable snake_case name, as stored.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MaxIterationsReached => "max_iterations_reached",
            Self::Converged => "converged",
            Self::DivergingAbort => "diverging_abort",
            Self::OscillatingAbort => "oscillating_abort",
            Self::CostBudgetExceeded => "cost_budget_exceeded",
            Self::TimeBudgetExceeded => "time_budget_exceeded",
            Self::NoFixableFindings => "no_fixable_findings",
            Self::UserAbort => "user_abort",
            Self::CollectorFatalError => "collector_fatal_error",
        }
    }

    /// Parse a stored name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "max_iterations_reached" => Self::MaxIterationsReached,
            "converged" => Self::Converged,
            "diverging_abort" => Self::DivergingAbort,
            "oscillating_abort" => Self::OscillatingAbort,
            "cost_budget_exceeded" => Self::CostBudgetExceeded,
            "time_budget_exceeded" => Self::TimeBudgetExceeded,
            "no_fixable_findings" => Self::NoFixableFindings,
            "user_abort" => Self::UserAbort,
            "collector_fatal_error" => Self::CollectorFatalError,
            _ => return None,
        })
    }

    /// Reasons that indicate the run did not end on its own terms.
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::CollectorFatalError | Self::DivergingAbort)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How and when a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termination {
    /// Why the session ended.
    pub reason: TerminationReason,
    /// Human-readable detail.
    pub detail: String,
    /// When it ended.
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// BudgetSpent
// ---------------------------------------------------------------------------

/// Resources consumed by a session so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetSpent {
    /// Prompt tokens reported by the executor.
    pub input_tokens: u64,
    /// Completion tokens reported by the executor.
    pub output_tokens: u64,
    /// Cost in USD.
    pub cost_usd: f64,
    /// Wall-clock time spent inside iterations, across resumes.
    pub wall_clock_ms: u64,
}

impl BudgetSpent {
    /// Input plus output tokens.
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One convergence-driven fix run, possibly spread over several resumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session ID.
    pub id: Uuid,
    /// Path or glob the collectors were pointed at.
    pub scope: String,
    /// When the session started.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
    /// Completed iterations in order.
    pub iteration_history: Vec<IterationOutcome>,
    /// Rule statistics the session classifies with.
    pub rule_stats: RuleStatsSnapshot,
    /// Resources consumed so far.
    #[serde(default)]
    pub budget_spent: BudgetSpent,
    /// Pattern hashes attempted in the previous iteration and still present.
    #[serde(default)]
    pub recent_failures: BTreeSet<String>,
    /// Pattern hash -> iteration in which it was first seen.
    #[serde(default)]
    pub first_seen: BTreeMap<String, u32>,
    /// Findings carried over from the latest iteration.
    #[serde(default)]
    pub deferred: Vec<DeferredFinding>,
    /// Informational; always recomputed from history when needed.
    #[serde(default)]
    pub last_verdict: Option<ConvergenceVerdict>,
    /// Set once the session ends.
    #[serde(default)]
    pub termination: Option<Termination>,
    /// Sorted keys of the set the latest iteration ended with.
    #[serde(default)]
    pub last_collected: Option<Vec<FindingKey>>,
}

/// How a fresh collection differs from the set the previous iteration ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionDrift {
    /// Findings recorded at the end of the previous iteration but not collected now.
    pub missing: usize,
    /// Findings collected now that the previous iteration did not end with.
    pub unexpected: usize,
}

impl Session {
    /// Active session over `scope`, seeded with `rule_stats`.
    pub fn new(scope: impl Into<String>, rule_stats: RuleStatsSnapshot) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            scope: scope.into(),
            created_at: now,
            updated_at: now,
            iteration_history: Vec::new(),
            rule_stats,
            budget_spent: BudgetSpent::default(),
            recent_failures: BTreeSet::new(),
            first_seen: BTreeMap::new(),
            deferred: Vec::new(),
            last_verdict: None,
            termination: None,
            last_collected: None,
        }
    }

    /// Index the next iteration will carry (1-based).
    pub fn next_iteration_index(&self) -> u32 {
        self.iteration_history.len() as u32 + 1
    }

    /// Most recently recorded iteration.
    pub fn last_outcome(&self) -> Option<&IterationOutcome> {
        self.iteration_history.last()
    }

    /// True once [`Session::terminate`] has been called.
    pub const fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }

    /// Findings fixed, summed over every iteration.
    pub fn total_fixed(&self) -> usize {
        self.iteration_history.iter().map(|o| o.fixed_count).sum()
    }

    /// Findings the executor introduced, summed over every iteration.
    pub fn total_introduced(&self) -> usize {
        self.iteration_history
            .iter()
            .map(|o| o.new_findings_count)
            .sum()
    }

    /// Remember the set an iteration ended with, for the next consistency check.
    pub fn remember_collected(&mut self, findings: &[Finding]) {
        let mut keys: Vec<FindingKey> = findings.iter().map(Finding::key).collect();
        keys.sort();
        self.last_collected = Some(keys);
    }

    /// Compare a fresh collection with the set the previous iteration ended with.
    ///
    /// Sessions saved without a remembered set fall back to comparing counts.
    /// `None` means no previous iteration or no difference.
    pub fn collection_drift(&self, findings: &[Finding]) -> Option<CollectionDrift> {
        let Some(remembered) = &self.last_collected else {
            let expected = self.last_outcome()?.findings_after;
            return (expected != findings.len()).then(|| CollectionDrift {
                missing: expected.saturating_sub(findings.len()),
                unexpected: findings.len().saturating_sub(expected),
            });
        };

        let fresh: Vec<FindingKey> = findings.iter().map(Finding::key).collect();
        let mut balance: HashMap<&FindingKey, i64> = HashMap::new();
        for key in remembered {
            *balance.entry(key).or_default() += 1;
        }
        for key in &fresh {
            *balance.entry(key).or_default() -= 1;
        }

        let missing: i64 = balance.values().filter(|&&n| n > 0).sum();
        let unexpected: i64 = balance.values().filter(|&&n| n < 0).map(|n| -n).sum();
        (missing != 0 || unexpected != 0).then(|| CollectionDrift {
            missing: missing.unsigned_abs() as usize,
            unexpected: unexpected.unsigned_abs() as usize,
        })
    }

    /// Append an outcome. History is append-only and indices are contiguous.
    pub fn record_iteration(&mut self, outcome: IterationOutcome) -> DomainResult<()> {
        self.ensure_active()?;
        let expected = self.next_iteration_index();
        if outcome.index != expected {
            return Err(DomainError::ValidationFailed(format!(
                "iteration {} recorded out of order (expected {expected})",
                outcome.index
            )));
        }
        self.iteration_history.push(outcome);
        self.touch();
        Ok(())
    }

    /// Record the first iteration each pattern hash appeared in.
    pub fn note_seen<'a>(&mut self, hashes: impl IntoIterator<Item = &'a str>, iteration: u32) {
        for hash in hashes {
            self.first_seen.entry(hash.to_string()).or_insert(iteration);
        }
    }

    /// Terminate the session. A second call is an error.
    pub fn terminate(
        &mut self,
        reason: TerminationReason,
        detail: impl Into<String>,
    ) -> DomainResult<()> {
        self.ensure_active()?;
        self.termination = Some(Termination {
            reason,
            detail: detail.into(),
            at: Utc::now(),
        });
        self.touch();
        Ok(())
    }

    fn ensure_active(&self) -> DomainResult<()> {
        match &self.termination {
            Some(t) => Err(DomainError::SessionTerminated {
                session_id: self.id,
                reason: t.reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
