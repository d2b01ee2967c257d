//! Session store port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{RuleStatsSnapshot, Session};

/// Persistence for fix sessions and the cross-session learned rule store.
///
/// `save` must be atomic: a reader never observes a half-written session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace the session.
    async fn save(&self, session: &Session) -> DomainResult<()>;

    async fn load(&self, id: Uuid) -> DomainResult<Option<Session>>;

    /// Most recently updated sessions first.
    async fn list_recent(&self, limit: usize) -> DomainResult<Vec<Session>>;

    /// Learned rules shared across sessions.
    ///
    /// # Errors
    /// Returns [`DomainError::ClassifierData`](crate::domain::errors::DomainError::ClassifierData)
    /// when the stored rules are unreadable.
    async fn load_rule_stats(&self) -> DomainResult<RuleStatsSnapshot>;

    async fn save_rule_stats(&self, snapshot: &RuleStatsSnapshot) -> DomainResult<()>;
}
