//! SQLite persistence for fix sessions.

pub mod connection;
pub mod migrations;
pub mod session_store;

pub use connection::{create_pool, create_test_pool, database_url, ConnectionError, PoolConfig};
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use session_store::SqliteSessionStore;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::DatabaseConfig;

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a JSON column.
pub fn parse_json<T: DeserializeOwned>(s: &str) -> DomainResult<T> {
    serde_json::from_str(s).map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Open the configured database, apply migrations and return the store.
pub async fn open_session_store(config: &DatabaseConfig) -> anyhow::Result<SqliteSessionStore> {
    let pool = create_pool(&database_url(&config.path), Some(PoolConfig::from(config))).await?;
    Migrator::new(pool.clone())
        .run(all_embedded_migrations())
        .await?;
    Ok(SqliteSessionStore::new(pool))
}

/// In-memory store with migrations applied, for tests.
pub async fn open_test_store() -> anyhow::Result<SqliteSessionStore> {
    let pool = create_test_pool().await?;
    Migrator::new(pool.clone())
        .run(all_embedded_migrations())
        .await?;
    Ok(SqliteSessionStore::new(pool))
}
