//! Logistic outcome model trained on past sessions.
//!
//! Each training sample is a prefix of a recorded iteration history labelled
//! with whether the following iteration made net progress. The model is fit
//! once at construction with plain batch gradient descent and is immutable
//! afterwards.

use tracing::info;

use crate::domain::models::{IterationOutcome, OutcomeModelConfig, Session};
use crate::domain::ports::{OutcomePredictor, Prediction};

const FEATURES: usize = 5;
const EPOCHS: usize = 400;
const LEARNING_RATE: f64 = 0.5;
const L2: f64 = 1e-3;

/// Feature vector for the iteration following `history`.
fn features(history: &[IterationOutcome]) -> Option<[f64; FEATURES]> {
    let latest = history.last()?;
    let before = latest.findings_before.max(1) as f64;
    let previous_delta = history
        .len()
        .checked_sub(2)
        .map_or(0.0, |i| history[i].delta() as f64 / before);

    Some([
        1.0,
        latest.delta() as f64 / before,
        latest.new_findings_count as f64 / before,
        previous_delta,
        (history.len() as f64 / 10.0).min(1.0),
    ])
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn dot(w: &[f64; FEATURES], x: &[f64; FEATURES]) -> f64 {
    w.iter().zip(x).map(|(a, b)| a * b).sum()
}

/// Logistic regression over per-iteration features, trained on past sessions.
#[derive(Debug, Clone)]
pub struct LogisticOutcomeModel {
    weights: [f64; FEATURES],
    samples: usize,
    training_accuracy: f64,
    min_samples: usize,
}

impl LogisticOutcomeModel {
    /// Fit on the histories of `sessions`.
    pub fn train(sessions: &[Session], config: &OutcomeModelConfig) -> Self {
        let mut data: Vec<([f64; FEATURES], f64)> = Vec::new();
        for session in sessions {
            let history = &session.iteration_history;
            for end in 1..history.len() {
                if let Some(x) = features(&history[..end]) {
                    let label = if history[end].delta() > 0 { 1.0 } else { 0.0 };
                    data.push((x, label));
                }
            }
        }

        let mut weights = [0.0; FEATURES];
        if !data.is_empty() {
            let n = data.len() as f64;
            for _ in 0..EPOCHS {
                let mut gradient = [0.0; FEATURES];
                for (x, y) in &data {
                    let err = sigmoid(dot(&weights, x)) - y;
                    for (g, xi) in gradient.iter_mut().zip(x) {
                        *g += err * xi;
                    }
                }
                for (w, g) in weights.iter_mut().zip(gradient) {
                    *w -= LEARNING_RATE * (g / n + L2 * *w);
                }
            }
        }

        let correct = data
            .iter()
            .filter(|(x, y)| (sigmoid(dot(&weights, x)) >= 0.5) == (*y >= 0.5))
            .count();
        let training_accuracy = if data.is_empty() {
            0.0
        } else {
            correct as f64 / data.len() as f64
        };

        info!(
            sessions = sessions.len(),
            samples = data.len(),
            training_accuracy,
            "Outcome model trained"
        );

        Self {
            weights,
            samples: data.len(),
            training_accuracy,
            min_samples: config.min_training_samples,
        }
    }

    /// History prefixes the model was fit on.
    pub const fn samples(&self) -> usize {
        self.samples
    }

    /// Accuracy on the training set.
    pub const fn training_accuracy(&self) -> f64 {
        self.training_accuracy
    }
}

impl OutcomePredictor for LogisticOutcomeModel {
    fn is_available(&self) -> bool {
        self.samples >= self.min_samples.max(1)
    }

    fn predict(&self, history: &[IterationOutcome]) -> Option<Prediction> {
        if !self.is_available() {
            return None;
        }
        let x = features(history)?;
        let p = sigmoid(dot(&self.weights, &x));
        Some(Prediction {
            continue_probability: p,
            confidence: self.training_accuracy * (2.0 * p - 1.0).abs(),
        })
    }

    fn name(&self) -> &str {
        "logistic"
    }
}
