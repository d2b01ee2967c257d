//! SQLite implementation of the SessionStore.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_json, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{RuleStatsSnapshot, Session};
use crate::domain::ports::SessionStore;

const SESSION_COLUMNS: &str = "id, scope, iteration_history, rule_stats, budget_spent, \
     recent_failures, first_seen, deferred, last_verdict, termination, last_collected, created_at, \
     updated_at";

/// [`SessionStore`] over a migrated SQLite pool.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Store over an already migrated pool.
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save(&self, session: &Session) -> DomainResult<()> {
        let status = session
            .termination
            .as_ref()
            .map_or("active", |t| t.reason.as_str());
        let history_json = serde_json::to_string(&session.iteration_history)?;
        let stats_json = serde_json::to_string(&session.rule_stats)?;
        let budget_json = serde_json::to_string(&session.budget_spent)?;
        let failures_json = serde_json::to_string(&session.recent_failures)?;
        let first_seen_json = serde_json::to_string(&session.first_seen)?;
        let deferred_json = serde_json::to_string(&session.deferred)?;
        let verdict_json = session
            .last_verdict
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let termination_json = session
            .termination
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let collected_json = session
            .last_collected
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO fix_sessions (id, scope, status, iteration_count, iteration_history,
                   rule_stats, budget_spent, recent_failures, first_seen, deferred, last_verdict,
                   termination, last_collected, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   status = excluded.status,
                   iteration_count = excluded.iteration_count,
                   iteration_history = excluded.iteration_history,
                   rule_stats = excluded.rule_stats,
                   budget_spent = excluded.budget_spent,
                   recent_failures = excluded.recent_failures,
                   first_seen = excluded.first_seen,
                   deferred = excluded.deferred,
                   last_verdict = excluded.last_verdict,
                   termination = excluded.termination,
                   last_collected = excluded.last_collected,
                   updated_at = excluded.updated_at"#,
        )
        .bind(session.id.to_string())
        .bind(&session.scope)
        .bind(status)
        .bind(session.iteration_history.len() as i64)
        .bind(&history_json)
        .bind(&stats_json)
        .bind(&budget_json)
        .bind(&failures_json)
        .bind(&first_seen_json)
        .bind(&deferred_json)
        .bind(verdict_json)
        .bind(termination_json)
        .bind(collected_json)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn load(&self, id: Uuid) -> DomainResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM fix_sessions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_recent(&self, limit: usize) -> DomainResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM fix_sessions ORDER BY updated_at DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn load_rule_stats(&self) -> DomainResult<RuleStatsSnapshot> {
        let row: Option<(String,)> = sqlx::query_as("SELECT snapshot FROM learned_rules WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((json,)) => Ok(RuleStatsSnapshot::from_json(&json)?),
            None => Ok(RuleStatsSnapshot::empty()),
        }
    }

    async fn save_rule_stats(&self, snapshot: &RuleStatsSnapshot) -> DomainResult<()> {
        snapshot.validate()?;
        let json = serde_json::to_string(snapshot)?;

        sqlx::query(
            r#"INSERT INTO learned_rules (id, version, snapshot, updated_at)
               VALUES (1, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   version = excluded.version,
                   snapshot = excluded.snapshot,
                   updated_at = excluded.updated_at"#,
        )
        .bind(snapshot.version as i64)
        .bind(&json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    scope: String,
    iteration_history: String,
    rule_stats: String,
    budget_spent: String,
    recent_failures: String,
    first_seen: String,
    deferred: String,
    last_verdict: Option<String>,
    termination: Option<String>,
    last_collected: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SessionRow> for Session {
    type Error = DomainError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Session {
            id: parse_uuid(&row.id)?,
            scope: row.scope,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            iteration_history: parse_json(&row.iteration_history)?,
            rule_stats: RuleStatsSnapshot::from_json(&row.rule_stats)?,
            budget_spent: parse_json(&row.budget_spent)?,
            recent_failures: parse_json(&row.recent_failures)?,
            first_seen: parse_json(&row.first_seen)?,
            deferred: parse_json(&row.deferred)?,
            last_verdict: row.last_verdict.as_deref().map(parse_json).transpose()?,
            termination: row.termination.as_deref().map(parse_json).transpose()?,
            last_collected: row.last_collected.as_deref().map(parse_json).transpose()?,
        })
    }
}
