//! Finding classifier.
//!
//! Scores each finding for fixability, confidence and complexity. Learned
//! per-rule statistics take precedence once they have enough samples and a
//! high enough confidence; otherwise the heuristic pattern table decides;
//! otherwise the finding is left alone.
//!
//! Classification is a pure function of the finding, its prepared
//! [`SourceContext`], and a read-only [`RuleStatsSnapshot`]. File reads
//! happen beforehand in [`source::SourceContextBuilder`].

pub mod patterns;
pub mod source;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ClassificationSource, ClassifiedFinding, ClassifierConfig, Complexity, Finding,
    FindingCategory, RuleKey, RuleStatsSnapshot, SourceContext,
};

pub use patterns::{HeuristicPattern, PatternTable};
pub use source::SourceContextBuilder;

/// Classifier with its compiled heuristic table.
#[derive(Debug, Clone)]
pub struct FindingClassifier {
    config: ClassifierConfig,
    table: Arc<PatternTable>,
}

impl FindingClassifier {
    /// Classifier over the built-in table plus `config.extra_patterns`.
    pub fn new(config: ClassifierConfig) -> Self {
        let table = Arc::new(PatternTable::with_extra(&config.extra_patterns));
        Self { config, table }
    }

    /// Classifier over an explicit pattern table.
    pub fn with_table(config: ClassifierConfig, table: PatternTable) -> Self {
        Self {
            config,
            table: Arc::new(table),
        }
    }

    /// Settings this classifier was built with.
    pub const fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify one finding.
    pub fn classify(
        &self,
        finding: &Finding,
        context: &SourceContext,
        snapshot: &RuleStatsSnapshot,
    ) -> ClassifiedFinding {
        let heuristic = self.table.best_match(&finding.message);
        let key = RuleKey::for_finding(finding, context.language.as_deref());

        let learned = snapshot.get(&key).filter(|stat| {
            stat.samples() >= self.config.min_samples
                && stat.confidence >= self.config.confidence_floor
        });

        let (fixable, confidence, complexity, category, source) = match (learned, heuristic) {
            (Some(stat), _) => (
                true,
                stat.confidence,
                heuristic.map_or(Complexity::Moderate, |h| h.complexity),
                heuristic.map_or(FindingCategory::Unknown, |h| h.category),
                ClassificationSource::Learned,
            ),
            (None, Some(h)) => (
                h.fixable,
                h.confidence,
                h.complexity,
                h.category,
                ClassificationSource::Heuristic,
            ),
            (None, None) => (
                false,
                0.0,
                Complexity::Complex,
                FindingCategory::Unknown,
                ClassificationSource::Default,
            ),
        };

        // Generated and vendored code is never edited.
        let (fixable, confidence) = if context.generated {
            (false, 0.0)
        } else {
            (fixable, confidence)
        };

        ClassifiedFinding {
            finding: finding.clone(),
            fixable,
            confidence,
            complexity,
            category,
            source,
            snippet: context.snippet.clone(),
        }
    }

    fn worker_count(&self) -> usize {
        self.config
            .workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
            })
            .max(1)
    }

    /// Classify many findings, in input order.
    ///
    /// Batches at or above `parallel_threshold` are split across scoped
    /// worker threads sharing the same snapshot.
    pub fn classify_batch(
        &self,
        items: &[(Finding, SourceContext)],
        snapshot: &RuleStatsSnapshot,
    ) -> Vec<ClassifiedFinding> {
        let workers = self.worker_count();
        if items.len() < self.config.parallel_threshold || workers == 1 {
            return items
                .iter()
                .map(|(finding, context)| self.classify(finding, context, snapshot))
                .collect();
        }

        let chunk_size = items.len().div_ceil(workers);
        debug!(
            findings = items.len(),
            workers,
            chunk_size,
            "Classifying in parallel"
        );

        std::thread::scope(|scope| {
            let handles: Vec<_> = items
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|(finding, context)| self.classify(finding, context, snapshot))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }

    /// Run [`classify_batch`](Self::classify_batch) on the blocking pool.
    pub async fn classify_all(
        &self,
        items: Vec<(Finding, SourceContext)>,
        snapshot: Arc<RuleStatsSnapshot>,
    ) -> DomainResult<Vec<ClassifiedFinding>> {
        let classifier = self.clone();
        tokio::task::spawn_blocking(move || classifier.classify_batch(&items, &snapshot))
            .await
            .map_err(|e| DomainError::ExecutionFailed(format!("classification task failed: {e}")))
    }
}

impl Default for FindingClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

/// Unwrap a learned-store load, falling back to an empty snapshot when the
/// stored data is unusable. Other errors propagate.
pub fn snapshot_or_empty(loaded: DomainResult<RuleStatsSnapshot>) -> DomainResult<RuleStatsSnapshot> {
    match loaded {
        Ok(snapshot) => Ok(snapshot),
        Err(DomainError::ClassifierData(err)) => {
            warn!(error = %err, "Learned rule store unusable; classifying with heuristics only");
            Ok(RuleStatsSnapshot::empty())
        }
        Err(other) => Err(other),
    }
}
