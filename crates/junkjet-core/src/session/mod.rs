pub mod clock;
pub mod store;
pub mod memory_store;

#[cfg(feature = "redis-backend")]
pub mod redis_store;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{SessionConfig, StoreBackend, StoreConfig};

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory_store::InMemorySessionStore;
pub use store::{SessionStore, StoreStats};

/// A single turn in a chatbot conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    pub text: String,
    pub from_user: bool,
    pub timestamp: DateTime<Utc>,
}

/// Marketplace role of the user owning a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    /// Phase 1: households selling waste from home.
    Household,
    /// Phase 2: middle buyers who collect and resell.
    MiddleBuyer,
    /// Phase 3: organizations buying in bulk.
    Organization,
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserType::Household => write!(f, "household"),
            UserType::MiddleBuyer => write!(f, "middle_buyer"),
            UserType::Organization => write!(f, "organization"),
        }
    }
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "household" | "phase1" => Ok(UserType::Household),
            "middle_buyer" | "phase2" => Ok(UserType::MiddleBuyer),
            "organization" | "phase3" => Ok(UserType::Organization),
            _ => Err(format!("Unknown user type: {s}")),
        }
    }
}

/// One user's ongoing conversation with the chatbot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub messages: Vec<SessionMessage>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_intent: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            user_id: user_id.into(),
            messages: Vec::new(),
            created_at: now,
            last_active_at: now,
            expires_at: now + ttl,
            user_type: None,
            current_intent: None,
        }
    }

    /// Append a turn, dropping the oldest turns beyond `max_messages`.
    pub fn push_message(
        &mut self,
        text: &str,
        from_user: bool,
        now: DateTime<Utc>,
        max_messages: usize,
    ) {
        self.messages.push(SessionMessage {
            text: text.to_string(),
            from_user,
            timestamp: now,
        });
        if max_messages > 0 && self.messages.len() > max_messages {
            let excess = self.messages.len() - max_messages;
            self.messages.drain(..excess);
        }
    }

    /// Mark the session active at `now` and recompute its expiry.
    ///
    /// `last_active_at` never moves backward, so neither does `expires_at`.
    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        if now > self.last_active_at {
            self.last_active_at = now;
        }
        self.expires_at = self.last_active_at + ttl;
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).max(Duration::zero())
    }

    pub fn meta(&self) -> SessionMeta {
        SessionMeta {
            message_count: self.message_count(),
            expires_at: self.expires_at,
        }
    }

    pub fn info(&self, now: DateTime<Utc>) -> SessionInfo {
        SessionInfo {
            user_id: self.user_id.clone(),
            message_count: self.message_count(),
            created_at: self.created_at,
            last_active_at: self.last_active_at,
            expires_at: self.expires_at,
            remaining_seconds: self.remaining(now).num_seconds(),
            user_type: self.user_type,
            current_intent: self.current_intent.clone(),
        }
    }
}

/// Metadata returned alongside every chatbot reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub message_count: usize,
    pub expires_at: DateTime<Utc>,
}

/// Detailed view of one session, as reported by the info endpoint and the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user_id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_intent: Option<String>,
}

/// Build the session store selected by configuration.
///
/// The returned store is connected but not yet health-checked; callers
/// should `ping()` it before starting the monitor.
pub async fn connect_store(
    store: &StoreConfig,
    session: &SessionConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn SessionStore>, crate::error::JunkjetError> {
    session.validate()?;
    let ttl = session.ttl();
    match store.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemorySessionStore::new(ttl, clock))),
        #[cfg(feature = "redis-backend")]
        StoreBackend::Redis => {
            let redis = redis_store::RedisSessionStore::connect(store, ttl, clock).await?;
            Ok(Arc::new(redis))
        }
        #[cfg(not(feature = "redis-backend"))]
        StoreBackend::Redis => Err(crate::error::ConfigError::BackendUnavailable("redis".to_string()).into()),
    }
}
