use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::SessionResult;
use crate::service::analytics::{is_expiring_soon, summarize, SessionAnalyticsSnapshot};
use crate::session::{Clock, Session, SessionInfo, SessionStore};
use crate::util::whole_minutes;

/// Number of per-session detail rows logged on each tick.
const DETAIL_ROWS: usize = 10;

/// Outcome of one monitor sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub snapshot: SessionAnalyticsSnapshot,
    pub expiring_soon: Vec<SessionInfo>,
    pub evicted: usize,
}

#[derive(Clone)]
struct Sweeper {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
    // One sweep at a time, manual or background.
    tick_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Sweeper {
    async fn run_tick(&self) -> Option<SweepReport> {
        let _guard = self.tick_lock.lock().await;
        let now = self.clock.now();
        let sessions = match self.store.list_active().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Session monitor: listing sessions failed, retrying next tick: {}", e);
                return None;
            }
        };

        let (expired, live): (Vec<Session>, Vec<Session>) =
            sessions.into_iter().partition(|s| s.is_expired(now));

        let mut evicted = 0;
        for session in &expired {
            match self.store.evict_expired(session, now).await {
                Ok(true) => {
                    debug!("Session monitor: evicted expired session {}", session.user_id);
                    evicted += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(
                    "Session monitor: failed to evict {}: {}",
                    session.user_id, e
                ),
            }
        }

        let snapshot = summarize(&live, now, self.window);
        let expiring_soon: Vec<SessionInfo> = live
            .iter()
            .filter(|s| is_expiring_soon(s, now, self.window))
            .map(|s| s.info(now))
            .collect();

        if snapshot.active_session_count == 0 && evicted == 0 {
            debug!("Session monitor: no active sessions");
        } else {
            info!(
                "Session monitor: {} active, {} expiring soon, {} evicted, {:.1} msgs/session",
                snapshot.active_session_count,
                expiring_soon.len(),
                evicted,
                snapshot.average_messages_per_session
            );
        }

        for info in &expiring_soon {
            info!(
                "Session monitor: {} expires in {}s ({} messages)",
                info.user_id, info.remaining_seconds, info.message_count
            );
        }

        for session in live.iter().take(DETAIL_ROWS) {
            let user_type = session
                .user_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            debug!(
                user = %session.user_id,
                ttl_min = whole_minutes(session.remaining(now)),
                messages = session.message_count(),
                user_type = %user_type,
                last_activity = %session.last_active_at.to_rfc3339(),
                age_min = whole_minutes(session.age(now)),
                "Session detail"
            );
        }

        Some(SweepReport {
            snapshot,
            expiring_soon,
            evicted,
        })
    }

    async fn cleanup_stale(&self, max_idle: Duration) -> SessionResult<usize> {
        let _guard = self.tick_lock.lock().await;
        let now = self.clock.now();
        let sessions = self.store.list_active().await?;
        let mut removed = 0;
        for session in sessions {
            if now - session.last_active_at > max_idle && self.store.delete(&session.user_id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Session monitor: cleaned up {} stale sessions", removed);
        }
        Ok(removed)
    }
}

struct MonitorHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Background sweep over the session store.
///
/// One task, ticking every `interval`. Missed ticks are skipped, and every
/// sweep, background or manual, runs under one lock.
pub struct SessionMonitor {
    sweeper: Sweeper,
    interval: StdDuration,
    handle: Mutex<Option<MonitorHandle>>,
}

impl SessionMonitor {
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        interval: StdDuration,
        expiring_soon_window: Duration,
    ) -> Self {
        Self {
            sweeper: Sweeper {
                store,
                clock,
                window: expiring_soon_window,
                tick_lock: Arc::new(tokio::sync::Mutex::new(())),
            },
            interval,
            handle: Mutex::new(None),
        }
    }

    pub fn from_config(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        config: &MonitorConfig,
    ) -> Self {
        Self::new(
            store,
            clock,
            config.check_interval(),
            config.expiring_soon_window(),
        )
    }

    /// Start the periodic sweep. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.as_ref().is_some_and(|h| !h.task.is_finished()) {
            info!("Session monitor already running");
            return false;
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let sweeper = self.sweeper.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        sweeper.run_tick().await;
                    }
                }
            }
            debug!("Session monitor loop exited");
        });

        info!("Session monitor started (every {}s)", interval.as_secs());
        *handle = Some(MonitorHandle { stop_tx, task });
        true
    }

    /// Stop the sweep and wait for the task to finish. No-op when stopped.
    pub async fn stop(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };
        let _ = handle.stop_tx.send(());
        if let Err(e) = handle.task.await {
            warn!("Session monitor task ended abnormally: {}", e);
        }
        info!("Session monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Run one sweep now, after any sweep already in progress. `None` when
    /// the store could not be listed.
    pub async fn run_tick(&self) -> Option<SweepReport> {
        self.sweeper.run_tick().await
    }

    /// Delete sessions idle for longer than `max_idle`. Returns how many
    /// were removed.
    pub async fn cleanup_stale(&self, max_idle: Duration) -> SessionResult<usize> {
        self.sweeper.cleanup_stale(max_idle).await
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self
            .handle
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.task.abort();
        }
    }
}
