//! Lint collector adapters.

pub mod command;

pub use command::{parse_findings, CommandLintCollector};
