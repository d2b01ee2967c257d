//! Lintloop - convergence-driven iterative lint fixing
//!
//! Lintloop repeatedly collects lint findings, classifies which ones an
//! external code-editing assistant can fix, packs them into token-budgeted
//! batches, dispatches the batches, re-collects, and decides from the
//! iteration history whether another pass is worthwhile.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, port traits and the error taxonomy
//! - **Service Layer** (`services`): classifier, budget manager, convergence
//!   analysis and the iteration controller
//! - **Adapters** (`adapters`): lint commands, the assistant executor and
//!   session persistence
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use lintloop::services::{ControllerPorts, IterationController};
//! use tokio_util::sync::CancellationToken;
//!
//! let mut controller = IterationController::new(ports, &config);
//! let summary = controller.run("src/", CancellationToken::new()).await?;
//! println!("stopped: {}", summary.reason);
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    ClassifiedFinding, Config, ConvergenceState, ConvergenceVerdict, Finding, FixBatch,
    IterationOutcome, RuleStatsSnapshot, Session, TerminationReason,
};
pub use domain::ports::{CostMonitor, FixExecutor, LintCollector, OutcomePredictor, SessionStore};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    ControllerEvent, ControllerPorts, FindingClassifier, IterationController, RunSummary,
};
