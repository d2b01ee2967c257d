//! In-process SessionStore, used for dry runs and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{RuleStatsSnapshot, Session};
use crate::domain::ports::SessionStore;

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    rule_stats: RuleStatsSnapshot,
    saves: usize,
}

/// Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with learned rules.
    pub fn with_rule_stats(snapshot: RuleStatsSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                rule_stats: snapshot,
                ..Inner::default()
            })),
        }
    }

    /// Number of successful `save` calls.
    pub async fn save_count(&self) -> usize {
        self.inner.read().await.saves
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, session: &Session) -> DomainResult<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id, session.clone());
        inner.saves += 1;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> DomainResult<Option<Session>> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> DomainResult<Vec<Session>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn load_rule_stats(&self) -> DomainResult<RuleStatsSnapshot> {
        Ok(self.inner.read().await.rule_stats.clone())
    }

    async fn save_rule_stats(&self, snapshot: &RuleStatsSnapshot) -> DomainResult<()> {
        snapshot.validate()?;
        self.inner.write().await.rule_stats = snapshot.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_replaces_and_lists_newest_first() {
        let store = InMemorySessionStore::new();
        let mut older = Session::new("a", RuleStatsSnapshot::empty());
        older.updated_at -= chrono::Duration::seconds(10);
        let newer = Session::new("b", RuleStatsSnapshot::empty());
        store.save(&older).await.unwrap();
        store.save(&newer).await.unwrap();
        store.save(&newer).await.unwrap();

        let listed = store.list_recent(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(store.save_count().await, 3);
        assert_eq!(store.list_recent(1).await.unwrap().len(), 1);
    }
}
