pub mod replies;

use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::service::analytics::{self, SessionAnalyticsSnapshot};
use crate::session::{Clock, Session, SessionInfo, SessionMeta, SessionStore, UserType};
use crate::util::truncate_string;

pub use replies::{Keyword, Reply, ReplyRule, ReplyRules};

/// Response to a single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub reply: String,
    pub session_info: SessionMeta,
}

/// Per-request entry point of the chatbot.
///
/// Loads or creates the caller's session, appends the user turn, picks a
/// reply from the rule table, appends the bot turn and writes the session
/// back with a refreshed TTL. Requests for the same user are serialized;
/// different users never contend.
pub struct ChatbotService {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    rules: ReplyRules,
    config: SessionConfig,
    expiring_soon_window: Duration,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ChatbotService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
        expiring_soon_window: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            rules: ReplyRules::builtin(),
            config,
            expiring_soon_window,
            user_locks: DashMap::new(),
        }
    }

    pub fn with_rules(mut self, rules: ReplyRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Handle one message from an authenticated user.
    pub async fn send_message(
        &self,
        user_id: &str,
        user_type: Option<UserType>,
        message: &str,
    ) -> SessionResult<ChatReply> {
        self.validate(user_id, message)?;
        self.with_user_lock(user_id, self.dispatch(user_id, user_type, message))
            .await
    }

    /// Current state of the caller's session, or `None` if there is none.
    pub async fn get_session_info(&self, user_id: &str) -> SessionResult<Option<SessionInfo>> {
        let now = self.clock.now();
        let session = self.store.get(user_id).await?;
        Ok(session
            .filter(|s| !s.is_expired(now))
            .map(|s| s.info(now)))
    }

    /// Drop the caller's session. Clearing an absent session succeeds.
    pub async fn clear_session(&self, user_id: &str) -> SessionResult<()> {
        let removed = self
            .with_user_lock(user_id, self.store.delete(user_id))
            .await?;
        if removed {
            info!("Cleared chatbot session for {}", user_id);
        } else {
            debug!("No chatbot session to clear for {}", user_id);
        }
        Ok(())
    }

    /// Fresh analytics over every live session.
    pub async fn get_session_analytics(&self) -> SessionResult<SessionAnalyticsSnapshot> {
        analytics::compute_snapshot(
            self.store.as_ref(),
            self.clock.as_ref(),
            self.expiring_soon_window,
        )
        .await
    }

    fn validate(&self, user_id: &str, message: &str) -> SessionResult<()> {
        if user_id.trim().is_empty() {
            return Err(SessionError::InvalidInput("user id is required".into()));
        }
        if message.trim().is_empty() {
            return Err(SessionError::InvalidInput("message must not be empty".into()));
        }
        let chars = message.chars().count();
        if chars > self.config.max_message_chars {
            return Err(SessionError::InvalidInput(format!(
                "message is {} characters, limit is {}",
                chars, self.config.max_message_chars
            )));
        }
        Ok(())
    }

    async fn with_user_lock<T, F>(&self, user_id: &str, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let lock = self
            .user_locks
            .entry(user_id.to_string())
            .or_default()
            .clone();
        let result = {
            let _guard = lock.lock().await;
            fut.await
        };
        drop(lock);
        self.user_locks
            .remove_if(user_id, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn load(&self, user_id: &str) -> SessionResult<Option<Session>> {
        let now = self.clock.now();
        match self.store.get(user_id).await {
            Ok(session) => Ok(session.filter(|s| !s.is_expired(now))),
            Err(e) if self.config.graceful_degradation && e.is_store_failure() => {
                warn!(
                    "Session read failed for {} ({}); continuing with a fresh session",
                    user_id, e
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn dispatch(
        &self,
        user_id: &str,
        user_type: Option<UserType>,
        message: &str,
    ) -> SessionResult<ChatReply> {
        let ttl = self.store.ttl();
        let mut session = match self.load(user_id).await? {
            Some(session) => session,
            None => {
                debug!("Starting chatbot session for {}", user_id);
                Session::new(user_id, self.clock.now(), ttl)
            }
        };
        if user_type.is_some() {
            session.user_type = user_type;
        }

        let now = self.clock.now();
        session.push_message(message, true, now, self.config.max_messages);

        let reply = self.rules.select(message);
        if let Some(intent) = reply.intent {
            session.current_intent = Some(intent.to_string());
        }
        let reply_text = reply.text.to_string();

        session.push_message(&reply_text, false, now, self.config.max_messages);
        session.touch(now, ttl);
        self.store.put(&session).await?;

        debug!(
            "Chatbot {} <- {:?} (intent: {})",
            user_id,
            truncate_string(message, 60, "..."),
            session.current_intent.as_deref().unwrap_or("none")
        );

        Ok(ChatReply {
            reply: reply_text,
            session_info: session.meta(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InMemorySessionStore, ManualClock};

    fn service() -> (ChatbotService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemorySessionStore::new(Duration::minutes(30), clock.clone()));
        let svc = ChatbotService::new(
            store,
            clock.clone(),
            SessionConfig::default(),
            Duration::minutes(5),
        );
        (svc, clock)
    }

    #[tokio::test]
    async fn test_first_message_creates_session() {
        let (svc, clock) = service();
        let out = svc.send_message("alice", None, "Hello").await.unwrap();
        assert_eq!(out.session_info.message_count, 2);
        assert_eq!(out.session_info.expires_at, clock.now() + Duration::minutes(30));

        let info = svc.get_session_info("alice").await.unwrap().unwrap();
        assert_eq!(info.created_at, clock.now());
        assert_eq!(info.current_intent.as_deref(), Some("greeting"));
    }

    #[tokio::test]
    async fn test_rejects_blank_and_oversized_messages() {
        let (svc, _) = service();
        assert!(matches!(
            svc.send_message("alice", None, "   \n").await,
            Err(SessionError::InvalidInput(_))
        ));
        let long = "a".repeat(1001);
        assert!(matches!(
            svc.send_message("alice", None, &long).await,
            Err(SessionError::InvalidInput(_))
        ));
        assert!(matches!(
            svc.send_message("", None, "hi").await,
            Err(SessionError::InvalidInput(_))
        ));
        assert!(svc.get_session_info("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_starts_over() {
        let (svc, clock) = service();
        svc.send_message("bob", None, "Hello").await.unwrap();
        clock.advance(Duration::minutes(31));
        let out = svc.send_message("bob", None, "Hello again").await.unwrap();
        assert_eq!(out.session_info.message_count, 2);
    }

    #[tokio::test]
    async fn test_fallback_keeps_last_intent() {
        let (svc, _) = service();
        svc.send_message("carol", None, "I have old metal pipes").await.unwrap();
        svc.send_message("carol", None, "ok thanks").await.unwrap();
        let info = svc.get_session_info("carol").await.unwrap().unwrap();
        assert_eq!(info.current_intent.as_deref(), Some("metal"));
        assert_eq!(info.message_count, 4);
    }

    #[tokio::test]
    async fn test_user_type_recorded() {
        let (svc, _) = service();
        svc.send_message("dave", Some(UserType::MiddleBuyer), "hi")
            .await
            .unwrap();
        svc.send_message("dave", None, "hi").await.unwrap();
        let info = svc.get_session_info("dave").await.unwrap().unwrap();
        assert_eq!(info.user_type, Some(UserType::MiddleBuyer));
    }

    #[tokio::test]
    async fn test_locks_are_pruned() {
        let (svc, _) = service();
        svc.send_message("erin", None, "hi").await.unwrap();
        svc.clear_session("erin").await.unwrap();
        assert!(svc.user_locks.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_same_user_messages_are_not_lost() {
        let (svc, _) = service();
        let svc = Arc::new(svc);
        let mut handles = Vec::new();
        for i in 0..10 {
            let svc = svc.clone();
            handles.push(tokio::spawn(async move {
                svc.send_message("frank", None, &format!("message {i}"))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let info = svc.get_session_info("frank").await.unwrap().unwrap();
        assert_eq!(info.message_count, 20);
    }
}
