//! Lint collector port.

use async_trait::async_trait;

use crate::domain::errors::CollectorError;
use crate::domain::models::Finding;

/// Source of findings for a scope.
///
/// Implementations run one or more static-analysis tools and return every
/// finding they report. Two calls over an unchanged tree must return the same
/// multiset of findings; the controller relies on this for its consistency
/// check.
#[async_trait]
pub trait LintCollector: Send + Sync {
    /// Collect all findings under `scope`.
    ///
    /// # Errors
    /// - [`CollectorError::Transient`] for failures worth retrying
    /// - [`CollectorError::Fatal`] when the tool cannot run or its output is unusable
    async fn collect(&self, scope: &str) -> Result<Vec<Finding>, CollectorError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "collector"
    }
}
