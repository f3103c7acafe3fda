use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::clock::Clock;
use super::store::{SessionStore, StoreStats};
use super::Session;
use crate::error::{SessionError, SessionResult};

struct Entry {
    session: Session,
    evict_at: DateTime<Utc>,
}

/// In-process session store backed by DashMap.
///
/// Entries are evicted lazily once their TTL has passed. An optional
/// eviction grace keeps entries around past their logical expiry, which
/// mirrors a cache whose native expiry lags behind the session's own
/// `expires_at`.
pub struct InMemorySessionStore {
    sessions: DashMap<String, Entry>,
    ttl: Duration,
    eviction_grace: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            eviction_grace: Duration::zero(),
            clock,
        }
    }

    pub fn with_eviction_grace(mut self, grace: Duration) -> Self {
        self.eviction_grace = grace;
        self
    }

    /// Number of entries currently held, evicted or not.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn get(&self, user_id: &str) -> SessionResult<Option<Session>> {
        let now = self.clock.now();
        let evicted = self
            .sessions
            .remove_if(user_id, |_, entry| entry.evict_at <= now)
            .is_some();
        if evicted {
            debug!("Evicted expired session for {}", user_id);
            return Ok(None);
        }
        Ok(self.sessions.get(user_id).map(|e| e.session.clone()))
    }

    async fn put(&self, session: &Session) -> SessionResult<()> {
        let mut stored = session.clone();
        stored.expires_at = stored.last_active_at + self.ttl;
        if stored.expires_at <= self.clock.now() {
            return Err(SessionError::InvalidInput(format!(
                "session for {} already expired on write",
                stored.user_id
            )));
        }
        let evict_at = stored.expires_at + self.eviction_grace;
        self.sessions.insert(
            stored.user_id.clone(),
            Entry {
                session: stored,
                evict_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> SessionResult<bool> {
        Ok(self.sessions.remove(user_id).is_some())
    }

    async fn evict_expired(&self, session: &Session, now: DateTime<Utc>) -> SessionResult<bool> {
        Ok(self
            .sessions
            .remove_if(&session.user_id, |_, entry| entry.session.is_expired(now))
            .is_some())
    }

    async fn list_active(&self) -> SessionResult<Vec<Session>> {
        let now = self.clock.now();
        self.sessions.retain(|_, entry| entry.evict_at > now);
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .map(|e| e.value().session.clone())
            .collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }

    async fn ping(&self) -> SessionResult<()> {
        Ok(())
    }

    async fn stats(&self) -> SessionResult<StoreStats> {
        Ok(StoreStats {
            session_keys: self.sessions.len(),
            memory_used: None,
        })
    }
}
