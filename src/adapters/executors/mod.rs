//! Fix executor adapters.

pub mod command;

pub use command::CommandFixExecutor;
