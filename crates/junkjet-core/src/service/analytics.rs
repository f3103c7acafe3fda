use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionResult;
use crate::session::{Clock, Session, SessionStore};

/// Point-in-time statistics over all live sessions. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalyticsSnapshot {
    pub active_session_count: usize,
    pub average_messages_per_session: f64,
    pub expiring_soon_count: usize,
    pub total_messages: usize,
    pub average_session_age_minutes: f64,
    pub user_types: BTreeMap<String, usize>,
    pub top_intents: BTreeMap<String, usize>,
    pub sampled_at: DateTime<Utc>,
}

impl SessionAnalyticsSnapshot {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            active_session_count: 0,
            average_messages_per_session: 0.0,
            expiring_soon_count: 0,
            total_messages: 0,
            average_session_age_minutes: 0.0,
            user_types: BTreeMap::new(),
            top_intents: BTreeMap::new(),
            sampled_at: now,
        }
    }
}

/// True when the session is still live but expires within `window`.
pub fn is_expiring_soon(session: &Session, now: DateTime<Utc>, window: Duration) -> bool {
    !session.is_expired(now) && session.expires_at - now <= window
}

/// Summarize a set of sessions as of `now`. Sessions already past their
/// expiry are not counted.
pub fn summarize(sessions: &[Session], now: DateTime<Utc>, window: Duration) -> SessionAnalyticsSnapshot {
    let live: Vec<&Session> = sessions.iter().filter(|s| !s.is_expired(now)).collect();
    if live.is_empty() {
        return SessionAnalyticsSnapshot::empty(now);
    }

    let mut snapshot = SessionAnalyticsSnapshot::empty(now);
    let mut total_age_secs: i64 = 0;

    for session in &live {
        snapshot.total_messages += session.message_count();
        total_age_secs += session.age(now).num_seconds();

        if is_expiring_soon(session, now, window) {
            snapshot.expiring_soon_count += 1;
        }
        if let Some(user_type) = session.user_type {
            *snapshot.user_types.entry(user_type.to_string()).or_insert(0) += 1;
        }
        if let Some(intent) = &session.current_intent {
            *snapshot.top_intents.entry(intent.clone()).or_insert(0) += 1;
        }
    }

    let count = live.len();
    snapshot.active_session_count = count;
    snapshot.average_messages_per_session = snapshot.total_messages as f64 / count as f64;
    snapshot.average_session_age_minutes = total_age_secs as f64 / 60.0 / count as f64;
    snapshot
}

/// Scan the store and summarize it. No caching: every call re-reads.
pub async fn compute_snapshot(
    store: &dyn SessionStore,
    clock: &dyn Clock,
    window: Duration,
) -> SessionResult<SessionAnalyticsSnapshot> {
    let sessions = store.list_active().await?;
    Ok(summarize(&sessions, clock.now(), window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UserType;

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn session(id: &str, created_min: i64, turns: usize) -> Session {
        let created = base() + Duration::minutes(created_min);
        let mut s = Session::new(id, created, Duration::minutes(30));
        for _ in 0..turns {
            s.push_message("x", true, created, 0);
        }
        s
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = summarize(&[], base(), Duration::minutes(5));
        assert_eq!(snap.active_session_count, 0);
        assert_eq!(snap.average_messages_per_session, 0.0);
        assert_eq!(snap.expiring_soon_count, 0);
    }

    #[test]
    fn test_counts_and_averages() {
        let mut a = session("a", 0, 2);
        a.user_type = Some(UserType::Household);
        a.current_intent = Some("plastic".into());
        let mut b = session("b", 20, 4);
        b.user_type = Some(UserType::Household);
        b.current_intent = Some("plastic".into());
        let c = session("c", 10, 6);

        let now = base() + Duration::minutes(26);
        let snap = summarize(&[a, b, c], now, Duration::minutes(5));

        assert_eq!(snap.active_session_count, 3);
        assert_eq!(snap.total_messages, 12);
        assert_eq!(snap.average_messages_per_session, 4.0);
        // "a" expires at minute 30, within five minutes of minute 26.
        assert_eq!(snap.expiring_soon_count, 1);
        assert_eq!(snap.user_types.get("household"), Some(&2));
        assert_eq!(snap.top_intents.get("plastic"), Some(&2));
        // Ages 26, 6 and 16 minutes.
        assert!((snap.average_session_age_minutes - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_expired_sessions_excluded() {
        let a = session("a", 0, 2);
        let b = session("b", 20, 2);
        let snap = summarize(&[a, b], base() + Duration::minutes(31), Duration::minutes(5));
        assert_eq!(snap.active_session_count, 1);
        assert_eq!(snap.total_messages, 2);
    }

    #[test]
    fn test_expiring_soon_boundary() {
        let s = session("a", 0, 0);
        let window = Duration::minutes(5);
        assert!(!is_expiring_soon(&s, base() + Duration::minutes(24), window));
        assert!(is_expiring_soon(&s, base() + Duration::minutes(25), window));
        assert!(!is_expiring_soon(&s, base() + Duration::minutes(30), window));
    }
}
