//! Adapters implementing the domain ports against external systems.

pub mod collectors;
pub mod executors;
pub mod memory_store;
pub mod sqlite;

pub use collectors::CommandLintCollector;
pub use executors::CommandFixExecutor;
pub use memory_store::InMemorySessionStore;
pub use sqlite::SqliteSessionStore;
