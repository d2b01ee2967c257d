//! Convergence analysis over the iteration history.
//!
//! ## Evaluation order
//!
//! Each call re-derives the verdict from scratch; nothing is cached between
//! calls. With `delta = fixed_count - new_findings_count`:
//!
//! 1. **Unknown**: empty history.
//! 2. **Converged**: the latest iteration left no findings, or no fixable
//!    findings. Stops.
//! 3. **Oscillating**: the last `oscillation_window` deltas are non-zero,
//!    alternate in sign and sum to at most `oscillation_tolerance` in
//!    magnitude. Stops once this has held for `oscillation_grace + 1`
//!    consecutive evaluations.
//! 4. **Diverging**: more new findings than fixed for the last
//!    `diverge_window` iterations. Stops once the run reaches
//!    `diverge_window + diverge_grace`.
//! 5. **Improving**: latest delta above `improve_threshold`.
//! 6. **Unknown**: fewer than two iterations.
//! 7. **Converged**: zero delta for the last `converged_window` iterations.
//!    Stops.
//! 8. **Plateauing**: delta within `[0, improve_threshold]` for the last
//!    `plateau_window` iterations.
//! 9. **Unknown** otherwise.
//!
//! An optional [`OutcomePredictor`] may then turn a continuing verdict into a
//! stop, never the reverse.

use std::sync::Arc;

use tracing::debug;

use crate::domain::models::{
    ConvergenceConfig, ConvergenceState, ConvergenceVerdict, IterationOutcome, TerminationReason,
};
use crate::domain::ports::OutcomePredictor;

/// Strategy deciding whether the loop should continue.
pub trait ConvergenceEvaluator: Send + Sync {
    fn evaluate(&self, history: &[IterationOutcome]) -> ConvergenceVerdict;
}

// ---------------------------------------------------------------------------
// Rule-based analyzer
// ---------------------------------------------------------------------------

/// Window-based evaluator over the iteration history.
#[derive(Debug, Clone)]
pub struct RuleBasedAnalyzer {
    config: ConvergenceConfig,
}

impl RuleBasedAnalyzer {
    /// Analyzer with the given window sizes and tolerances.
    pub const fn new(config: ConvergenceConfig) -> Self {
        Self { config }
    }

    /// Windows and tolerances in use.
    pub const fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    fn is_oscillating(&self, history: &[IterationOutcome]) -> bool {
        let window = self.config.oscillation_window;
        if window < 2 || history.len() < window {
            return false;
        }
        let deltas: Vec<i64> = history[history.len() - window..]
            .iter()
            .map(IterationOutcome::delta)
            .collect();
        let nonzero = deltas.iter().all(|d| *d != 0);
        let alternating = deltas.windows(2).all(|w| w[0].signum() != w[1].signum());
        let net: i64 = deltas.iter().sum();
        nonzero && alternating && net.abs() <= self.config.oscillation_tolerance
    }

    /// Consecutive trailing evaluations for which the oscillation test held.
    fn oscillation_run(&self, history: &[IterationOutcome]) -> usize {
        (1..=history.len())
            .rev()
            .take_while(|&end| self.is_oscillating(&history[..end]))
            .count()
    }

    /// Consecutive trailing iterations with more new findings than fixed.
    fn diverging_run(history: &[IterationOutcome]) -> usize {
        history
            .iter()
            .rev()
            .take_while(|o| o.new_findings_count > o.fixed_count)
            .count()
    }

    fn tail_all(
        history: &[IterationOutcome],
        window: usize,
        pred: impl Fn(i64) -> bool,
    ) -> bool {
        window > 0
            && history.len() >= window
            && history[history.len() - window..]
                .iter()
                .all(|o| pred(o.delta()))
    }
}

impl Default for RuleBasedAnalyzer {
    fn default() -> Self {
        Self::new(ConvergenceConfig::default())
    }
}

impl ConvergenceEvaluator for RuleBasedAnalyzer {
    fn evaluate(&self, history: &[IterationOutcome]) -> ConvergenceVerdict {
        let Some(latest) = history.last() else {
            return ConvergenceVerdict::proceed(ConvergenceState::Unknown, 0.5, "No iterations yet");
        };
        let cfg = &self.config;
        let delta = latest.delta();

        if latest.findings_after == 0 {
            return ConvergenceVerdict::stop(
                ConvergenceState::Converged,
                format!("Iteration {} left no findings", latest.index),
            );
        }
        if latest.fixable_after == Some(0) {
            return ConvergenceVerdict::stop(
                ConvergenceState::Converged,
                format!(
                    "Iteration {} left {} findings, none fixable",
                    latest.index, latest.findings_after
                ),
            );
        }

        let oscillation_run = self.oscillation_run(history);
        if oscillation_run > 0 {
            let reason = format!(
                "Last {} deltas alternate in sign with no net progress (held for {} evaluation(s))",
                cfg.oscillation_window, oscillation_run
            );
            return if oscillation_run > cfg.oscillation_grace {
                ConvergenceVerdict::stop(ConvergenceState::Oscillating, reason)
            } else {
                ConvergenceVerdict::proceed(ConvergenceState::Oscillating, 0.3, reason)
            };
        }

        let diverging_run = Self::diverging_run(history);
        if cfg.diverge_window > 0 && diverging_run >= cfg.diverge_window {
            let reason = format!(
                "New findings outnumbered fixes for {diverging_run} consecutive iteration(s)"
            );
            return if diverging_run >= cfg.diverge_window + cfg.diverge_grace {
                ConvergenceVerdict::stop(ConvergenceState::Diverging, reason)
            } else {
                ConvergenceVerdict::proceed(ConvergenceState::Diverging, 0.2, reason)
            };
        }

        if delta > cfg.improve_threshold {
            let confidence = 0.7 + 0.3 * (delta as f64 / latest.findings_before.max(1) as f64);
            return ConvergenceVerdict::proceed(
                ConvergenceState::Improving,
                confidence,
                format!(
                    "Net improvement of {delta} exceeds threshold {}",
                    cfg.improve_threshold
                ),
            );
        }

        if history.len() < 2 {
            return ConvergenceVerdict::proceed(
                ConvergenceState::Unknown,
                0.5,
                format!("Only one iteration so far (delta {delta})"),
            );
        }

        if Self::tail_all(history, cfg.converged_window, |d| d == 0) {
            return ConvergenceVerdict::stop(
                ConvergenceState::Converged,
                format!(
                    "No net change for the last {} iteration(s)",
                    cfg.converged_window
                ),
            );
        }

        if Self::tail_all(history, cfg.plateau_window, |d| {
            (0..=cfg.improve_threshold).contains(&d)
        }) {
            return ConvergenceVerdict::proceed(
                ConvergenceState::Plateauing,
                0.5,
                format!(
                    "Small net improvement ({delta}) within threshold {}",
                    cfg.improve_threshold
                ),
            );
        }

        ConvergenceVerdict::proceed(
            ConvergenceState::Unknown,
            0.4,
            format!("No clear trend (latest delta {delta})"),
        )
    }
}

// ---------------------------------------------------------------------------
// Model-assisted analyzer
// ---------------------------------------------------------------------------

/// Rule-based analysis refined by an outcome predictor.
pub struct ModelAssistedAnalyzer {
    rules: RuleBasedAnalyzer,
    predictor: Arc<dyn OutcomePredictor>,
    min_model_confidence: f64,
}

impl ModelAssistedAnalyzer {
    /// Wrap `rules`; the model is heeded only at `min_model_confidence` or above.
    pub fn new(
        rules: RuleBasedAnalyzer,
        predictor: Arc<dyn OutcomePredictor>,
        min_model_confidence: f64,
    ) -> Self {
        Self {
            rules,
            predictor,
            min_model_confidence,
        }
    }
}

impl ConvergenceEvaluator for ModelAssistedAnalyzer {
    fn evaluate(&self, history: &[IterationOutcome]) -> ConvergenceVerdict {
        let mut verdict = self.rules.evaluate(history);
        if verdict.is_terminal() || !self.predictor.is_available() {
            return verdict;
        }
        let Some(prediction) = self.predictor.predict(history) else {
            return verdict;
        };

        verdict.continue_confidence = prediction.continue_probability.clamp(0.0, 1.0);

        if prediction.continue_probability < 0.5 && prediction.confidence >= self.min_model_confidence
        {
            debug!(
                model = self.predictor.name(),
                state = %verdict.state,
                probability = prediction.continue_probability,
                confidence = prediction.confidence,
                "Outcome model stops a continuing run"
            );
            verdict.should_continue = false;
            verdict.stop_reason = Some(
                verdict
                    .state
                    .termination_reason()
                    .unwrap_or(TerminationReason::Converged),
            );
            verdict.model_adjusted = true;
            verdict.reason = format!(
                "{}; {} predicts no further progress (p={:.2}, confidence {:.2})",
                verdict.reason,
                self.predictor.name(),
                prediction.continue_probability,
                prediction.confidence
            );
        }

        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Prediction;

    fn history(steps: &[(usize, usize)]) -> Vec<IterationOutcome> {
        let mut before = 100;
        steps
            .iter()
            .enumerate()
            .map(|(i, &(fixed, new))| {
                let outcome = IterationOutcome::from_counts(i as u32 + 1, before, fixed, new);
                before = outcome.findings_after;
                outcome
            })
            .collect()
    }

    fn states(steps: &[(usize, usize)]) -> Vec<ConvergenceState> {
        let analyzer = RuleBasedAnalyzer::default();
        let h = history(steps);
        (1..=h.len())
            .map(|n| analyzer.evaluate(&h[..n]).state)
            .collect()
    }

    #[test]
    fn empty_history_is_unknown() {
        let v = RuleBasedAnalyzer::default().evaluate(&[]);
        assert_eq!(v.state, ConvergenceState::Unknown);
        assert!(v.should_continue);
    }

    #[test]
    fn improving_plateauing_converged() {
        assert_eq!(
            states(&[(5, 0), (1, 0), (0, 0)]),
            vec![
                ConvergenceState::Improving,
                ConvergenceState::Plateauing,
                ConvergenceState::Converged
            ]
        );
        let h = history(&[(5, 0), (1, 0), (0, 0)]);
        let v = RuleBasedAnalyzer::default().evaluate(&h);
        assert_eq!(v.stop_reason, Some(TerminationReason::Converged));
    }

    #[test]
    fn zero_findings_converges_immediately() {
        let h = vec![IterationOutcome::from_counts(1, 3, 3, 0)];
        let v = RuleBasedAnalyzer::default().evaluate(&h);
        assert_eq!(v.state, ConvergenceState::Converged);
        assert!(v.is_terminal());
    }

    #[test]
    fn no_fixable_left_converges() {
        let mut outcome = IterationOutcome::from_counts(1, 10, 1, 0);
        outcome.fixable_after = Some(0);
        let v = RuleBasedAnalyzer::default().evaluate(&[outcome]);
        assert_eq!(v.state, ConvergenceState::Converged);
        assert!(v.is_terminal());
    }

    #[test]
    fn diverging_stops_after_grace() {
        let analyzer = RuleBasedAnalyzer::default();
        let h = history(&[(1, 3), (1, 3), (1, 4)]);
        let two = analyzer.evaluate(&h[..2]);
        assert_eq!(two.state, ConvergenceState::Diverging);
        assert!(two.should_continue);
        let three = analyzer.evaluate(&h);
        assert_eq!(three.state, ConvergenceState::Diverging);
        assert_eq!(three.stop_reason, Some(TerminationReason::DivergingAbort));
    }

    #[test]
    fn oscillation_needs_grace_evaluations() {
        let analyzer = RuleBasedAnalyzer::default();
        let h = history(&[(3, 0), (0, 3), (3, 0), (0, 3), (3, 0)]);
        let first = analyzer.evaluate(&h[..4]);
        assert_eq!(first.state, ConvergenceState::Oscillating);
        assert!(first.should_continue);
        let second = analyzer.evaluate(&h);
        assert_eq!(second.state, ConvergenceState::Oscillating);
        assert_eq!(second.stop_reason, Some(TerminationReason::OscillatingAbort));
    }

    #[test]
    fn single_small_delta_is_unknown() {
        assert_eq!(states(&[(1, 0)]), vec![ConvergenceState::Unknown]);
    }

    struct Pessimist(bool);

    impl OutcomePredictor for Pessimist {
        fn is_available(&self) -> bool {
            self.0
        }
        fn predict(&self, _history: &[IterationOutcome]) -> Option<Prediction> {
            Some(Prediction {
                continue_probability: 0.1,
                confidence: 0.95,
            })
        }
        fn name(&self) -> &str {
            "pessimist"
        }
    }

    #[test]
    fn model_may_stop_a_continuing_run() {
        let analyzer =
            ModelAssistedAnalyzer::new(RuleBasedAnalyzer::default(), Arc::new(Pessimist(true)), 0.8);
        let h = history(&[(5, 0), (1, 0)]);
        let v = analyzer.evaluate(&h);
        assert_eq!(v.state, ConvergenceState::Plateauing);
        assert!(v.is_terminal());
        assert!(v.model_adjusted);
        assert_eq!(v.stop_reason, Some(TerminationReason::Converged));
    }

    #[test]
    fn unavailable_model_is_ignored() {
        let analyzer = ModelAssistedAnalyzer::new(
            RuleBasedAnalyzer::default(),
            Arc::new(Pessimist(false)),
            0.8,
        );
        let h = history(&[(5, 0), (1, 0)]);
        assert!(analyzer.evaluate(&h).should_continue);
    }
}
