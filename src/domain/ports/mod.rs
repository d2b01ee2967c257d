//! Port trait definitions (Hexagonal Architecture)
//!
//! Collaborators the iteration controller talks to:
//! - LintCollector: produces findings
//! - FixExecutor: attempts a batch of fixes
//! - CostMonitor: spend tracking and ceilings
//! - SessionStore: session and learned-rule persistence
//! - OutcomePredictor: optional model for convergence decisions

pub mod cost_monitor;
pub mod fix_executor;
pub mod lint_collector;
pub mod outcome_predictor;
pub mod session_store;

pub use cost_monitor::{BudgetCheck, BudgetRemaining, CostMonitor};
pub use fix_executor::{FixExecutor, FixOutcome, TokenUsage};
pub use lint_collector::LintCollector;
pub use outcome_predictor::{OutcomePredictor, Prediction};
pub use session_store::SessionStore;
