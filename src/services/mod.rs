//! Loop services: classification, budgeting, convergence and the controller.

pub mod budget_monitor;
pub mod classifier;
pub mod context_budget;
pub mod convergence_analyzer;
pub mod iteration_controller;
pub mod outcome_model;
pub mod retry;

pub use budget_monitor::{BudgetMonitor, BudgetMonitorConfig};
pub use classifier::{FindingClassifier, SourceContextBuilder};
pub use context_budget::ContextBudgetManager;
pub use convergence_analyzer::{ConvergenceEvaluator, ModelAssistedAnalyzer, RuleBasedAnalyzer};
pub use iteration_controller::{
    ControllerConfig, ControllerEvent, ControllerPorts, IterationController, RunSummary,
};
pub use outcome_model::LogisticOutcomeModel;
pub use retry::RetryPolicy;
