//! Embedded schema migrations.

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

/// Migration failures.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to execute migration {version}: {source}")]
    ExecutionError {
        version: i64,
        #[source]
        source: sqlx::Error,
    },
    #[error("Failed to get schema version: {0}")]
    VersionCheckError(#[source] sqlx::Error),
}

/// One embedded schema step.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Schema version it produces.
    pub version: i64,
    /// Short description.
    pub description: &'static str,
    /// SQL to execute.
    pub sql: &'static str,
}

/// Applies embedded migrations to a pool.
pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    /// Migrator over `pool`.
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply every migration newer than the recorded schema version.
    pub async fn run(&self, migrations: &[Migration]) -> Result<usize, MigrationError> {
        self.ensure_migrations_table().await?;
        let current_version = self.current_version().await?;
        let pending: Vec<_> = migrations
            .iter()
            .filter(|m| m.version > current_version)
            .collect();

        for migration in &pending {
            self.apply(migration).await?;
            info!(version = migration.version, description = migration.description, "Applied migration");
        }

        Ok(pending.len())
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                description TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MigrationError::ExecutionError { version: 0, source: e })?;
        Ok(())
    }

    /// Highest applied version, 0 when none.
    pub async fn current_version(&self) -> Result<i64, MigrationError> {
        let (version,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await
                .map_err(MigrationError::VersionCheckError)?;
        Ok(version)
    }

    async fn apply(&self, migration: &Migration) -> Result<(), MigrationError> {
        let wrap = |e| MigrationError::ExecutionError {
            version: migration.version,
            source: e,
        };
        let mut tx = self.pool.begin().await.map_err(wrap)?;
        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(wrap)?;
        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&mut *tx)
            .await
            .map_err(wrap)?;
        tx.commit().await.map_err(wrap)
    }
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Fix sessions and learned rules",
        sql: include_str!("../../../migrations/001_fix_sessions.sql"),
    },
    Migration {
        version: 2,
        description: "Remember each session's last collected finding set",
        sql: include_str!("../../../migrations/002_last_collected.sql"),
    },
];

/// Every migration compiled into the binary, in order.
pub fn all_embedded_migrations() -> &'static [Migration] {
    MIGRATIONS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_test_pool;

    #[tokio::test]
    async fn migrations_apply_once() {
        let pool = create_test_pool().await.unwrap();
        let migrator = Migrator::new(pool);

        assert_eq!(migrator.run(all_embedded_migrations()).await.unwrap(), 2);
        assert_eq!(migrator.run(all_embedded_migrations()).await.unwrap(), 0);
        assert_eq!(migrator.current_version().await.unwrap(), 2);
    }
}
