//! Domain layer for the lintloop fix engine
//!
//! Core models, port traits and the error taxonomy. Nothing here performs I/O.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    BudgetExceeded, ClassifierDataError, CollectorError, ConsistencyError, DomainError,
    DomainResult, ExecutorError,
};
