//! Per-iteration outcomes and finding accounting.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::finding::{Finding, FindingKey};

// ---------------------------------------------------------------------------
// Finding diff
// ---------------------------------------------------------------------------

/// Multiset difference between two collection passes, matched by
/// [`FindingKey`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindingDiff {
    /// Present before, gone after.
    pub fixed: Vec<Finding>,
    /// Present after, absent before.
    pub introduced: Vec<Finding>,
    /// Present in both passes (the `after` instance).
    pub persisted: Vec<Finding>,
}

/// Match `before` against `after` by key, counting duplicates.
pub fn diff_findings(before: &[Finding], after: &[Finding]) -> FindingDiff {
    let mut after_counts: HashMap<FindingKey, usize> = HashMap::new();
    for finding in after {
        *after_counts.entry(finding.key()).or_default() += 1;
    }
    let mut before_counts: HashMap<FindingKey, usize> = HashMap::new();
    for finding in before {
        *before_counts.entry(finding.key()).or_default() += 1;
    }

    let mut diff = FindingDiff::default();

    for finding in before {
        match after_counts.get_mut(&finding.key()) {
            Some(count) if *count > 0 => *count -= 1,
            _ => diff.fixed.push(finding.clone()),
        }
    }

    for finding in after {
        match before_counts.get_mut(&finding.key()) {
            Some(count) if *count > 0 => {
                *count -= 1;
                diff.persisted.push(finding.clone());
            }
            _ => diff.introduced.push(finding.clone()),
        }
    }

    diff
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Where every finding present at iteration start ended up.
///
/// `fixed + still_present + deferred_due_to_error == findings_before`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingLedger {
    /// Gone after the fix pass.
    pub fixed: usize,
    /// Still reported, attempted or not.
    pub still_present: usize,
    /// Still reported after its batch failed.
    pub deferred_due_to_error: usize,
}

impl FindingLedger {
    /// Sum of every bucket.
    pub const fn total(&self) -> usize {
        self.fixed + self.still_present + self.deferred_due_to_error
    }
}

// ---------------------------------------------------------------------------
// Deferral
// ---------------------------------------------------------------------------

/// Why a fixable finding was not attempted (or its attempt failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeferralReason {
    /// The batch exhausted its retries.
    ExecutorFailure { kind: String, message: String },
    /// The cost or time monitor denied dispatch.
    BudgetStop { message: String },
    /// The run was aborted before the batch was dispatched.
    UserAbort,
    /// Did not fit this iteration's batch caps or token budget.
    CapacityLimit,
}

impl DeferralReason {
    /// True for executor failures.
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::ExecutorFailure { .. })
    }
}

/// A finding carried over to the next iteration with its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredFinding {
    /// The deferred finding.
    pub finding: Finding,
    /// Iteration that deferred it.
    pub iteration: u32,
    /// Why it was deferred.
    #[serde(flatten)]
    pub reason: DeferralReason,
}

// ---------------------------------------------------------------------------
// IterationOutcome
// ---------------------------------------------------------------------------

/// Summary of one completed iteration. Append-only once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationOutcome {
    /// 1-based iteration index within the session.
    pub index: u32,
    /// Findings collected at the start.
    pub findings_before: usize,
    /// Findings collected after the fix pass.
    pub findings_after: usize,
    /// Starting findings gone after the fix pass.
    pub fixed_count: usize,
    /// Findings present after the fix pass but not before.
    pub new_findings_count: usize,
    /// Wall-clock time of the iteration.
    pub duration_ms: u64,
    /// When the iteration finished.
    pub timestamp: DateTime<Utc>,

    /// Findings covered by dispatched batches.
    #[serde(default)]
    pub attempted_count: usize,
    /// Fixable findings deferred to the next iteration for any reason.
    #[serde(default)]
    pub deferred_count: usize,
    /// Batches that reached the executor.
    #[serde(default)]
    pub batches_dispatched: usize,
    /// Of those, batches that exhausted their retries.
    #[serde(default)]
    pub batches_failed: usize,
    /// Fixable findings remaining after the fix pass, when known.
    #[serde(default)]
    pub fixable_after: Option<usize>,
    /// Where each starting finding ended up.
    #[serde(default)]
    pub ledger: FindingLedger,
}

impl IterationOutcome {
    /// Net improvement: `fixed_count - new_findings_count`.
    pub fn delta(&self) -> i64 {
        self.fixed_count as i64 - self.new_findings_count as i64
    }

    /// `duration_ms` as a `Duration`.
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Minimal outcome from counts; bookkeeping fields zeroed.
    pub fn from_counts(
        index: u32,
        findings_before: usize,
        fixed_count: usize,
        new_findings_count: usize,
    ) -> Self {
        let findings_after = findings_before.saturating_sub(fixed_count) + new_findings_count;
        Self {
            index,
            findings_before,
            findings_after,
            fixed_count,
            new_findings_count,
            duration_ms: 0,
            timestamp: Utc::now(),
            attempted_count: 0,
            deferred_count: 0,
            batches_dispatched: 0,
            batches_failed: 0,
            fixable_after: None,
            ledger: FindingLedger {
                fixed: fixed_count,
                still_present: findings_before.saturating_sub(fixed_count),
                deferred_due_to_error: 0,
            },
        }
    }
}
