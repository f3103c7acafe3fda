use std::future::Future;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};
use crate::session::Session;

/// Backend usage figures for health output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub session_keys: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used: Option<String>,
}

/// Trait for session storage backends.
///
/// Sessions are keyed by user id. Every `put` is a single atomic upsert
/// (last writer wins) that refreshes the backing TTL from the session's
/// `last_active_at`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Session time-to-live applied on every `put`.
    fn ttl(&self) -> chrono::Duration;

    /// Load a session. Missing or already-evicted sessions are `Ok(None)`.
    async fn get(&self, user_id: &str) -> SessionResult<Option<Session>>;

    /// Upsert a session and reset its expiry clock.
    async fn put(&self, session: &Session) -> SessionResult<()>;

    /// Remove a session. Returns whether anything was removed; deleting an
    /// absent session is not an error.
    async fn delete(&self, user_id: &str) -> SessionResult<bool>;

    /// Remove `session` only if the stored copy is still the expired one
    /// that was listed. A session renewed in the meantime is kept.
    async fn evict_expired(&self, session: &Session, now: DateTime<Utc>) -> SessionResult<bool>;

    /// All sessions the backend still holds. Intended for the monitor and
    /// analytics, never for the per-request path.
    async fn list_active(&self) -> SessionResult<Vec<Session>>;

    /// Check the backend is reachable.
    async fn ping(&self) -> SessionResult<()>;

    /// Number of stored session keys, plus memory use if the backend reports it.
    async fn stats(&self) -> SessionResult<StoreStats> {
        Ok(StoreStats {
            session_keys: self.list_active().await?.len(),
            memory_used: None,
        })
    }
}

/// Run a store call with an upper bound on its duration.
pub async fn with_timeout<T, F>(limit: StdDuration, fut: F) -> SessionResult<T>
where
    F: Future<Output = SessionResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::StoreTimeout(limit.as_millis() as u64)),
    }
}
