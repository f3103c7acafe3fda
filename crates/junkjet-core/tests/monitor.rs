//! Integration tests for the session monitor running alongside the dispatcher

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Notify;

use junkjet_core::chatbot::ChatbotService;
use junkjet_core::config::{MonitorConfig, SessionConfig};
use junkjet_core::error::{SessionError, SessionResult};
use junkjet_core::service::monitor::SessionMonitor;
use junkjet_core::session::{InMemorySessionStore, ManualClock, Session, SessionStore};

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<InMemorySessionStore>,
    chatbot: ChatbotService,
    monitor: SessionMonitor,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::default());
    // Backing eviction lags the logical expiry, as a remote cache may.
    let store = Arc::new(
        InMemorySessionStore::new(Duration::minutes(30), clock.clone())
            .with_eviction_grace(Duration::minutes(15)),
    );
    let chatbot = ChatbotService::new(
        store.clone(),
        clock.clone(),
        SessionConfig::default(),
        Duration::minutes(5),
    );
    let monitor = SessionMonitor::from_config(
        store.clone(),
        clock.clone(),
        &MonitorConfig::default(),
    );
    Harness {
        clock,
        store,
        chatbot,
        monitor,
    }
}

#[tokio::test]
async fn test_tick_with_empty_store() {
    let h = harness();
    let report = h.monitor.run_tick().await.unwrap();
    assert_eq!(report.snapshot.active_session_count, 0);
    assert_eq!(report.snapshot.average_messages_per_session, 0.0);
    assert_eq!(report.snapshot.expiring_soon_count, 0);
    assert!(report.expiring_soon.is_empty());
}

#[tokio::test]
async fn test_tick_leaves_healthy_sessions_untouched() {
    let h = harness();
    h.chatbot.send_message("alice", None, "Hello").await.unwrap();
    h.chatbot.send_message("bob", None, "metal?").await.unwrap();
    let before = h.store.get("alice").await.unwrap().unwrap();

    h.clock.advance(Duration::minutes(10));
    let report = h.monitor.run_tick().await.unwrap();
    assert_eq!(report.evicted, 0);
    assert_eq!(report.snapshot.active_session_count, 2);
    assert_eq!(report.snapshot.total_messages, 4);
    assert_eq!(report.snapshot.top_intents.get("metal"), Some(&1));

    let after = h.store.get("alice").await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_tick_evicts_sessions_the_store_kept() {
    let h = harness();
    h.chatbot.send_message("old", None, "hi").await.unwrap();
    h.clock.advance(Duration::minutes(25));
    h.chatbot.send_message("new", None, "hi").await.unwrap();

    // "old" is past its expiry, but still inside the eviction grace.
    h.clock.advance(Duration::minutes(8));
    assert_eq!(h.store.len(), 2);

    let report = h.monitor.run_tick().await.unwrap();
    assert_eq!(report.evicted, 1);
    assert_eq!(report.snapshot.active_session_count, 1);
    assert_eq!(h.store.len(), 1);
    assert!(h.chatbot.get_session_info("old").await.unwrap().is_none());
}

#[tokio::test]
async fn test_expiring_soon_details() {
    let h = harness();
    h.chatbot.send_message("carol", None, "plastic").await.unwrap();
    h.clock.advance(Duration::minutes(26));

    let report = h.monitor.run_tick().await.unwrap();
    assert_eq!(report.snapshot.expiring_soon_count, 1);
    let row = &report.expiring_soon[0];
    assert_eq!(row.user_id, "carol");
    assert_eq!(row.message_count, 2);
    assert_eq!(row.remaining_seconds, 4 * 60);
    assert_eq!(row.current_intent.as_deref(), Some("plastic"));
}

#[tokio::test(start_paused = true)]
async fn test_monitor_lifecycle() {
    let h = harness();
    assert!(h.monitor.start());
    assert!(!h.monitor.start(), "second start must be a no-op");
    assert!(h.monitor.is_running());

    h.chatbot.send_message("dave", None, "hi").await.unwrap();
    h.clock.advance(Duration::minutes(35));

    tokio::time::sleep(StdDuration::from_secs(61)).await;
    tokio::task::yield_now().await;
    assert!(h.store.is_empty());

    h.monitor.stop().await;
    assert!(!h.monitor.is_running());

    // No ticks after stop.
    h.chatbot.send_message("erin", None, "hi").await.unwrap();
    h.clock.advance(Duration::minutes(35));
    tokio::time::sleep(StdDuration::from_secs(300)).await;
    assert_eq!(h.store.len(), 1);
}

/// Memory store that can refuse listings and hold evictions until released.
struct GatedStore {
    inner: InMemorySessionStore,
    list_down: AtomicBool,
    hold_evictions: AtomicBool,
    lists: AtomicUsize,
    eviction_reached: Notify,
    eviction_released: Notify,
}

#[async_trait]
impl SessionStore for GatedStore {
    fn backend_name(&self) -> &'static str {
        "gated"
    }

    fn ttl(&self) -> Duration {
        self.inner.ttl()
    }

    async fn get(&self, user_id: &str) -> SessionResult<Option<Session>> {
        self.inner.get(user_id).await
    }

    async fn put(&self, session: &Session) -> SessionResult<()> {
        self.inner.put(session).await
    }

    async fn delete(&self, user_id: &str) -> SessionResult<bool> {
        self.inner.delete(user_id).await
    }

    async fn evict_expired(&self, session: &Session, now: DateTime<Utc>) -> SessionResult<bool> {
        if self.hold_evictions.load(Ordering::SeqCst) {
            self.eviction_reached.notify_one();
            self.eviction_released.notified().await;
        }
        self.inner.evict_expired(session, now).await
    }

    async fn list_active(&self) -> SessionResult<Vec<Session>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.list_down.load(Ordering::SeqCst) {
            return Err(SessionError::StoreUnavailable("connection reset".into()));
        }
        self.inner.list_active().await
    }

    async fn ping(&self) -> SessionResult<()> {
        Ok(())
    }
}

struct Gated {
    clock: Arc<ManualClock>,
    store: Arc<GatedStore>,
    chatbot: ChatbotService,
    monitor: Arc<SessionMonitor>,
}

fn gated() -> Gated {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(GatedStore {
        inner: InMemorySessionStore::new(Duration::minutes(30), clock.clone())
            .with_eviction_grace(Duration::minutes(15)),
        list_down: AtomicBool::new(false),
        hold_evictions: AtomicBool::new(false),
        lists: AtomicUsize::new(0),
        eviction_reached: Notify::new(),
        eviction_released: Notify::new(),
    });
    let chatbot = ChatbotService::new(
        store.clone(),
        clock.clone(),
        SessionConfig::default(),
        Duration::minutes(5),
    );
    let monitor = Arc::new(SessionMonitor::from_config(
        store.clone(),
        clock.clone(),
        &MonitorConfig::default(),
    ));
    Gated {
        clock,
        store,
        chatbot,
        monitor,
    }
}

#[tokio::test]
async fn test_sweep_keeps_session_renewed_after_listing() {
    let g = gated();
    g.chatbot.send_message("alice", None, "Hello").await.unwrap();
    g.clock.advance(Duration::minutes(31));

    g.store.hold_evictions.store(true, Ordering::SeqCst);
    let monitor = g.monitor.clone();
    let tick = tokio::spawn(async move { monitor.run_tick().await });
    g.store.eviction_reached.notified().await;

    // alice returns while the sweep still holds her expired copy.
    let out = g
        .chatbot
        .send_message("alice", None, "What about plastic?")
        .await
        .unwrap();
    assert_eq!(out.session_info.message_count, 2);
    g.store.eviction_released.notify_one();

    let report = tick.await.unwrap().unwrap();
    assert_eq!(report.evicted, 0);
    let info = g.chatbot.get_session_info("alice").await.unwrap().unwrap();
    assert_eq!(info.message_count, 2);
    assert_eq!(info.current_intent.as_deref(), Some("plastic"));
}

#[tokio::test]
async fn test_tick_skipped_when_listing_fails() {
    let g = gated();
    g.chatbot.send_message("bob", None, "hi").await.unwrap();
    g.clock.advance(Duration::minutes(31));

    g.store.list_down.store(true, Ordering::SeqCst);
    assert!(g.monitor.run_tick().await.is_none());
    assert_eq!(g.store.inner.len(), 1);

    g.store.list_down.store(false, Ordering::SeqCst);
    let report = g.monitor.run_tick().await.unwrap();
    assert_eq!(report.evicted, 1);
    assert!(g.store.inner.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_background_loop_survives_listing_failure() {
    let g = gated();
    g.chatbot.send_message("bob", None, "hi").await.unwrap();
    g.clock.advance(Duration::minutes(31));
    g.store.list_down.store(true, Ordering::SeqCst);

    assert!(g.monitor.start());
    tokio::time::sleep(StdDuration::from_secs(61)).await;
    tokio::task::yield_now().await;
    assert_eq!(g.store.lists.load(Ordering::SeqCst), 1);
    assert!(g.monitor.is_running());
    assert_eq!(g.store.inner.len(), 1);

    g.store.list_down.store(false, Ordering::SeqCst);
    tokio::time::sleep(StdDuration::from_secs(60)).await;
    tokio::task::yield_now().await;
    assert!(g.store.inner.is_empty());
    g.monitor.stop().await;
}

#[tokio::test]
async fn test_manual_ticks_run_one_at_a_time() {
    let g = gated();
    g.chatbot.send_message("carol", None, "hi").await.unwrap();
    g.clock.advance(Duration::minutes(31));

    g.store.hold_evictions.store(true, Ordering::SeqCst);
    let monitor = g.monitor.clone();
    let first = tokio::spawn(async move { monitor.run_tick().await });
    g.store.eviction_reached.notified().await;

    let monitor = g.monitor.clone();
    let second = tokio::spawn(async move { monitor.run_tick().await });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(g.store.lists.load(Ordering::SeqCst), 1);

    g.store.hold_evictions.store(false, Ordering::SeqCst);
    g.store.eviction_released.notify_one();
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.evicted, 1);
    assert_eq!(second.evicted, 0);
    assert_eq!(g.store.lists.load(Ordering::SeqCst), 2);
}
