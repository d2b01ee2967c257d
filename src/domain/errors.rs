//! Domain errors for the lintloop fix engine.
//!
//! Each collaborator has its own error type so the controller can decide
//! per kind whether to retry, defer, or terminate. [`DomainError`] wraps them
//! together with persistence and state errors.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a lint collector.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollectorError {
    /// Retryable: timeouts, tool killed by a signal, temporary I/O failure.
    #[error("Transient collector error: {0}")]
    Transient(String),

    /// Not retryable: tool missing, malformed output, bad configuration.
    #[error("Fatal collector error: {0}")]
    Fatal(String),
}

impl CollectorError {
    /// Whether a retry may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors raised by a fix executor for one batch attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    /// The attempt exceeded its timeout.
    #[error("Fix attempt timed out after {after_secs}s")]
    Timeout {
        /// Configured timeout.
        after_secs: u64,
    },

    /// The assistant asked to slow down.
    #[error("Fix executor rate limited: {message}")]
    RateLimited {
        /// Message from the assistant.
        message: String,
        /// Suggested wait before the next attempt.
        retry_after_ms: Option<u64>,
    },

    /// The assistant refused or failed the batch.
    #[error("Fix attempt rejected: {0}")]
    Rejected(String),

    /// The executor cannot run at all (binary missing, bad configuration).
    #[error("Fix executor unavailable: {0}")]
    Unavailable(String),
}

impl ExecutorError {
    /// Whether a retry may succeed.
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::Unavailable(_))
    }

    /// Machine-readable label recorded against deferred findings.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Rejected(_) => "rejected",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

/// A cost or time ceiling was hit. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BudgetExceeded {
    #[error("Cost budget exceeded: {0}")]
    Cost(String),

    #[error("Time budget exceeded: {0}")]
    Time(String),
}

/// Collector output contradicts the state recorded by the previous iteration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "Collector consistency violation at iteration {iteration}: previous iteration ended with \
     {expected} findings but the collector now reports {actual} ({missing} missing, \
     {unexpected} unexpected)"
)]
pub struct ConsistencyError {
    /// Iteration whose collection disagreed.
    pub iteration: u32,
    /// Findings the previous iteration ended with.
    pub expected: usize,
    /// Findings collected now.
    pub actual: usize,
    /// Expected findings absent from the new collection.
    pub missing: usize,
    /// Collected findings the previous iteration did not end with.
    pub unexpected: usize,
}

/// The learned rule store could not be used.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifierDataError {
    #[error("Learned rule store is unreadable: {0}")]
    Corrupt(String),

    #[error("Learned rule {key} is invalid: {reason}")]
    InvalidStat { key: String, reason: String },
}

/// Domain-level errors that can occur while running the fix loop.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error(transparent)]
    Collector(#[from] CollectorError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Budget(#[from] BudgetExceeded),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    ClassifierData(#[from] ClassifierDataError),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session {session_id} is already terminated ({reason})")]
    SessionTerminated { session_id: Uuid, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

/// Result alias for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
