//! Convergence states and verdicts.
//!
//! A verdict is always re-derived from the iteration history. Persisted
//! verdicts are informational only and never read back as input.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::session::TerminationReason;

/// Trend of a fix session, derived from its recent deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceState {
    /// Fixing clearly outpaces regressions.
    Improving,
    /// Small, non-negative progress.
    Plateauing,
    /// No further progress, or nothing left to fix.
    Converged,
    /// Fixes introduce more findings than they remove.
    Diverging,
    /// Deltas flip sign with no net progress.
    Oscillating,
    /// Not enough evidence to say.
    Unknown,
}

impl ConvergenceState {
    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Plateauing => "plateauing",
            Self::Converged => "converged",
            Self::Diverging => "diverging",
            Self::Oscillating => "oscillating",
            Self::Unknown => "unknown",
        }
    }

    /// Termination reason used when this state stops the loop.
    pub const fn termination_reason(self) -> Option<TerminationReason> {
        match self {
            Self::Converged => Some(TerminationReason::Converged),
            Self::Diverging => Some(TerminationReason::DivergingAbort),
            Self::Oscillating => Some(TerminationReason::OscillatingAbort),
            Self::Improving | Self::Plateauing | Self::Unknown => None,
        }
    }
}

impl fmt::Display for ConvergenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating an iteration history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceVerdict {
    /// Classified trend.
    pub state: ConvergenceState,
    /// Whether another iteration should run.
    pub should_continue: bool,
    /// Confidence in `[0, 1]` that another iteration is worthwhile.
    pub continue_confidence: f64,
    /// Human-readable explanation.
    pub reason: String,
    /// Set when the verdict stops the loop.
    pub stop_reason: Option<TerminationReason>,
    /// True when an outcome model changed the rule-based recommendation.
    #[serde(default)]
    pub model_adjusted: bool,
}

impl ConvergenceVerdict {
    /// Verdict that lets the loop continue.
    pub fn proceed(state: ConvergenceState, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            state,
            should_continue: true,
            continue_confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            stop_reason: None,
            model_adjusted: false,
        }
    }

    /// A stopping verdict; the termination reason follows from `state`.
    pub fn stop(state: ConvergenceState, reason: impl Into<String>) -> Self {
        Self {
            state,
            should_continue: false,
            continue_confidence: 0.0,
            reason: reason.into(),
            stop_reason: Some(state.termination_reason().unwrap_or(TerminationReason::Converged)),
            model_adjusted: false,
        }
    }

    /// Whether the verdict stops the loop.
    pub const fn is_terminal(&self) -> bool {
        !self.should_continue
    }
}
