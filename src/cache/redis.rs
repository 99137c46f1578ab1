//! Redis-backed [`CacheStore`].

use std::future::Future;
use std::time::Duration;

use redis::AsyncCommands;
use redis::RedisResult;
use redis::aio::MultiplexedConnection;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use super::{CacheError, CacheStore};
use crate::BoxFuture;

/// How long the store stays in pass-through after a failed connection attempt.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ConnState {
    conn: Option<MultiplexedConnection>,
    down_until: Option<Instant>,
}

/// A [`CacheStore`] on a Redis server.
///
/// Values are stored as JSON text with `SET key value EX ttl`. The connection
/// is opened lazily and shared (multiplexed) across requests. When Redis is
/// unreachable or slower than the operation timeout, the store logs a
/// warning, drops the connection, and behaves as an empty, read-only cache
/// for [`RECONNECT_BACKOFF`] before trying again.
pub struct RedisStore {
    client: redis::Client,
    op_timeout: Duration,
    state: Mutex<ConnState>,
}

impl RedisStore {
    /// Validates `url` and prepares a lazily-connected store.
    ///
    /// # Errors
    ///
    /// [`CacheError::Redis`] if `url` is not a valid Redis connection string.
    pub fn connect(url: &str, op_timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            op_timeout,
            state: Mutex::new(ConnState::default()),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        let mut state = self.state.lock().await;
        if let Some(conn) = &state.conn {
            return Ok(conn.clone());
        }
        if let Some(until) = state.down_until {
            if Instant::now() < until {
                return Err(CacheError::Unavailable);
            }
        }

        match self
            .bounded(self.client.get_multiplexed_async_connection())
            .await
        {
            Ok(conn) => {
                debug!("redis connection established");
                state.down_until = None;
                state.conn = Some(conn.clone());
                Ok(conn)
            }
            Err(e) => {
                state.down_until = Some(Instant::now() + RECONNECT_BACKOFF);
                Err(e)
            }
        }
    }

    // Applies the per-operation timeout to a redis future.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, CacheError> {
        match timeout(self.op_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Timeout(self.op_timeout)),
        }
    }

    // Logs a failed operation. Connection-level failures drop the shared
    // connection so the next call reconnects.
    async fn record_failure(&self, op: &'static str, key: &str, error: &CacheError) {
        match error {
            CacheError::Unavailable => {
                debug!(op, key, "redis unavailable, skipping cache");
            }
            CacheError::Malformed(_) => {
                warn!(op, key, error = %error, "ignoring malformed cache entry");
            }
            CacheError::Redis(_) | CacheError::Timeout(_) => {
                warn!(op, key, error = %error, "redis cache operation failed");
            }
        }
        if breaks_connection(error) {
            self.state.lock().await.conn = None;
        }
    }

    async fn try_get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = self.bounded(conn.get(key)).await?;
        decode(raw)
    }

    async fn try_set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)?;
        // EX 0 is rejected by Redis.
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.connection().await?;
        let _: () = self.bounded(conn.set_ex(key, payload, seconds)).await?;
        Ok(())
    }

    async fn try_delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = self.bounded(conn.del(key)).await?;
        Ok(())
    }

    async fn try_clear(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let flush = redis::cmd("FLUSHDB");
        let _: () = self.bounded(flush.query_async(&mut conn)).await?;
        Ok(())
    }
}

/// Parses a stored value. Text that is not JSON is [`CacheError::Malformed`].
fn decode(raw: Option<String>) -> Result<Option<Value>, CacheError> {
    Ok(raw.map(|text| serde_json::from_str(&text)).transpose()?)
}

// Command-level replies (WRONGTYPE and friends) arrive on a healthy
// connection and leave it usable.
fn breaks_connection(error: &CacheError) -> bool {
    match error {
        CacheError::Timeout(_) => true,
        CacheError::Redis(e) => e.is_io_error() || e.is_connection_dropped(),
        CacheError::Unavailable | CacheError::Malformed(_) => false,
    }
}

impl CacheStore for RedisStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Value>> {
        Box::pin(async move {
            match self.try_get(key).await {
                Ok(value) => value,
                Err(e) => {
                    self.record_failure("get", key, &e).await;
                    None
                }
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Value, ttl: Duration) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Err(e) = self.try_set(key, &value, ttl).await {
                self.record_failure("set", key, &e).await;
            }
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Err(e) = self.try_delete(key).await {
                self.record_failure("delete", key, &e).await;
            }
        })
    }

    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.try_clear().await {
                self.record_failure("clear", "*", &e).await;
            }
        })
    }
}
