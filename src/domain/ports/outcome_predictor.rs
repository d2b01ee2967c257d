//! Outcome predictor port.

use crate::domain::models::IterationOutcome;

/// Prediction for the iteration after `history`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Probability that another iteration yields a positive delta.
    pub continue_probability: f64,
    /// How much the predictor trusts its own estimate, in `[0, 1]`.
    pub confidence: f64,
}

/// Optional learned model refining the rule-based convergence verdict.
pub trait OutcomePredictor: Send + Sync {
    /// False when the model has not been trained or cannot run.
    fn is_available(&self) -> bool;

    fn predict(&self, history: &[IterationOutcome]) -> Option<Prediction>;

    fn name(&self) -> &str;
}
