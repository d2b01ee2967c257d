//! Progress events and the final run summary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::{
    BudgetSpent, ConvergenceState, IterationOutcome, IterationPhase, Session, TerminationReason,
};

/// Emitted by the controller as a run progresses.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    SessionStarted {
        session_id: Uuid,
        scope: String,
        resumed: bool,
        next_iteration: u32,
    },
    PhaseChanged {
        iteration: u32,
        from: IterationPhase,
        to: IterationPhase,
    },
    FindingsCollected {
        iteration: u32,
        count: usize,
    },
    Classified {
        iteration: u32,
        total: usize,
        fixable: usize,
    },
    BatchDispatched {
        iteration: u32,
        batch_id: Uuid,
        items: usize,
        est_tokens: usize,
    },
    BatchFailed {
        iteration: u32,
        batch_id: Uuid,
        kind: String,
        message: String,
        attempts: u32,
    },
    IterationCompleted {
        outcome: IterationOutcome,
        state: ConvergenceState,
        should_continue: bool,
        reason: String,
    },
    Terminated {
        summary: RunSummary,
    },
}

/// Final report of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Session the run belonged to.
    pub session_id: Uuid,
    /// Why the run stopped.
    pub reason: TerminationReason,
    /// Human-readable cause.
    pub detail: String,
    /// Iterations recorded in the session.
    pub iterations: u32,
    /// Findings fixed, over every iteration.
    pub total_fixed: usize,
    /// Findings the executor's edits introduced, over every iteration.
    pub total_introduced: usize,
    /// Findings present when the run stopped.
    pub remaining: usize,
    /// Of those, still considered fixable (when known).
    pub remaining_fixable: Option<usize>,
    /// Of those, classified as not fixable (when known).
    pub remaining_unfixable: Option<usize>,
    /// Findings whose batch failed in the last iteration.
    pub deferred_due_to_error: usize,
    /// State from the last evaluated iteration.
    pub final_state: Option<ConvergenceState>,
    /// Spend across every run of the session.
    pub budget_spent: BudgetSpent,
}

impl RunSummary {
    /// Summary of a terminated session. `latest` carries the current
    /// `(findings, fixable)` counts when the run stopped before recording
    /// the iteration that observed them.
    pub fn from_session(
        session: &Session,
        reason: TerminationReason,
        detail: impl Into<String>,
        latest: Option<(usize, Option<usize>)>,
    ) -> Self {
        let last = session.last_outcome();
        let (remaining, remaining_fixable) = latest.unwrap_or_else(|| {
            last.map_or((0, None), |o| (o.findings_after, o.fixable_after))
        });

        Self {
            session_id: session.id,
            reason,
            detail: detail.into(),
            iterations: session.iteration_history.len() as u32,
            total_fixed: session.total_fixed(),
            total_introduced: session.total_introduced(),
            remaining,
            remaining_fixable,
            remaining_unfixable: remaining_fixable.map(|f| remaining.saturating_sub(f)),
            deferred_due_to_error: last.map_or(0, |o| o.ledger.deferred_due_to_error),
            final_state: session.last_verdict.as_ref().map(|v| v.state),
            budget_spent: session.budget_spent,
        }
    }
}
