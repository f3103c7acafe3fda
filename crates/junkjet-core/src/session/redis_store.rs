use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::store::{with_timeout, SessionStore, StoreStats};
use super::Session;
use crate::config::StoreConfig;
use crate::error::{SessionError, SessionResult};

const SCAN_BATCH: usize = 100;

/// Delete KEYS[1] only while it still holds the payload in ARGV[1].
const DELETE_IF_UNCHANGED: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

fn unavailable(e: redis::RedisError) -> SessionError {
    SessionError::StoreUnavailable(e.to_string())
}

/// Redis-backed session store.
///
/// Each session is one JSON string under `{prefix}{user_id}`, written
/// with `SET ... PX` so the value and its TTL change atomically.
pub struct RedisSessionStore {
    conn: ConnectionManager,
    key_prefix: String,
    ttl: Duration,
    op_timeout: StdDuration,
    clock: Arc<dyn Clock>,
}

impl RedisSessionStore {
    /// Open a managed connection to the configured Redis server.
    pub async fn connect(
        config: &StoreConfig,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> SessionResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str()).map_err(unavailable)?;
        let op_timeout = config.operation_timeout();

        let conn = with_timeout(op_timeout, async {
            client.get_connection_manager().await.map_err(unavailable)
        })
        .await?;

        info!("Connected to Redis session store at {}", config.redis_url);

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            ttl,
            op_timeout,
            clock,
        })
    }

    fn key(&self, user_id: &str) -> String {
        format!("{}{}", self.key_prefix, user_id)
    }

    fn parse(&self, key: &str, raw: &str) -> Option<Session> {
        match serde_json::from_str::<Session>(raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Skipping corrupt session payload at {}: {}", key, e);
                None
            }
        }
    }

    async fn scan_keys(&self) -> SessionResult<Vec<String>> {
        let pattern = format!("{}*", self.key_prefix);
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn get(&self, user_id: &str) -> SessionResult<Option<Session>> {
        let key = self.key(user_id);
        let mut conn = self.conn.clone();
        let raw: Option<String> = with_timeout(self.op_timeout, async {
            redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)
        })
        .await?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, session: &Session) -> SessionResult<()> {
        let mut stored = session.clone();
        stored.expires_at = stored.last_active_at + self.ttl;

        let remaining_ms = (stored.expires_at - self.clock.now()).num_milliseconds();
        if remaining_ms <= 0 {
            return Err(SessionError::InvalidInput(format!(
                "session for {} already expired on write",
                stored.user_id
            )));
        }

        let key = self.key(&stored.user_id);
        let payload = serde_json::to_string(&stored)?;
        let mut conn = self.conn.clone();
        with_timeout(self.op_timeout, async {
            redis::cmd("SET")
                .arg(&key)
                .arg(&payload)
                .arg("PX")
                .arg(remaining_ms)
                .query_async::<()>(&mut conn)
                .await
                .map_err(unavailable)
        })
        .await
    }

    async fn delete(&self, user_id: &str) -> SessionResult<bool> {
        let key = self.key(user_id);
        let mut conn = self.conn.clone();
        let removed: i64 = with_timeout(self.op_timeout, async {
            redis::cmd("DEL")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)
        })
        .await?;
        Ok(removed > 0)
    }

    async fn evict_expired(&self, session: &Session, now: DateTime<Utc>) -> SessionResult<bool> {
        if !session.is_expired(now) {
            return Ok(false);
        }
        // Sessions are listed by parsing the stored JSON, so re-serializing
        // yields the stored bytes unless a newer write replaced them.
        let key = self.key(&session.user_id);
        let payload = serde_json::to_string(session)?;
        let script = redis::Script::new(DELETE_IF_UNCHANGED);
        let mut conn = self.conn.clone();
        let removed: i64 = with_timeout(self.op_timeout, async {
            script
                .key(&key)
                .arg(&payload)
                .invoke_async(&mut conn)
                .await
                .map_err(unavailable)
        })
        .await?;
        if removed == 0 {
            debug!("Session for {} changed since listing; not evicted", session.user_id);
        }
        Ok(removed > 0)
    }

    async fn list_active(&self) -> SessionResult<Vec<Session>> {
        let keys = with_timeout(self.op_timeout, self.scan_keys()).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = with_timeout(self.op_timeout, async {
            redis::cmd("MGET")
                .arg(&keys)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)
        })
        .await?;

        let mut sessions: Vec<Session> = keys
            .iter()
            .zip(values)
            .filter_map(|(key, raw)| raw.and_then(|raw| self.parse(key, &raw)))
            .collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }

    async fn ping(&self) -> SessionResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = with_timeout(self.op_timeout, async {
            redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(unavailable)
        })
        .await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(SessionError::StoreUnavailable(format!(
                "unexpected PING reply: {pong}"
            )))
        }
    }

    async fn stats(&self) -> SessionResult<StoreStats> {
        let keys = with_timeout(self.op_timeout, self.scan_keys()).await?;
        let mut conn = self.conn.clone();
        let info: String = with_timeout(self.op_timeout, async {
            redis::cmd("INFO")
                .arg("memory")
                .query_async(&mut conn)
                .await
                .map_err(unavailable)
        })
        .await?;
        Ok(StoreStats {
            session_keys: keys.len(),
            memory_used: used_memory_human(&info),
        })
    }
}

/// Pull `used_memory_human` out of an `INFO memory` reply.
fn used_memory_human(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory_human:"))
        .map(|v| v.trim().to_string())
}
