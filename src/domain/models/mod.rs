//! Domain types shared by services and adapters.

pub mod config;
pub mod context;
pub mod convergence;
pub mod finding;
pub mod iteration;
pub mod rule_stats;
pub mod session;

pub use config::{
    BudgetConfig, ClassifierConfig, CollectorConfig, Config, ConvergenceConfig, CostConfig,
    DatabaseConfig, ExecutorConfig, LintCommandConfig, LoggingConfig, LoopConfig,
    OutcomeModelConfig, PatternRule, RetryConfig,
};
pub use context::{ContextItem, ContextPayload, ContextPriority, FixBatch};
pub use convergence::{ConvergenceState, ConvergenceVerdict};
pub use finding::{
    ClassificationSource, ClassifiedFinding, Complexity, Finding, FindingCategory, FindingKey,
    Severity, SourceContext,
};
pub use iteration::{
    diff_findings, DeferralReason, DeferredFinding, FindingDiff, FindingLedger, IterationOutcome,
};
pub use rule_stats::{
    laplace_confidence, LearningUpdate, RuleKey, RuleStat, RuleStatsSnapshot, RuleTally,
};
pub use session::{
    BudgetSpent, CollectionDrift, IterationPhase, Session, Termination, TerminationReason,
};
