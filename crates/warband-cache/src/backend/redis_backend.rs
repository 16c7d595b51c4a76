//! Redis backend over a multiplexed async connection

use super::{KvBackend, redact_url, ttl_secs};
use crate::error::{CacheError, Result};
use ::redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Redis-backed key/value store.
///
/// The multiplexed connection is cloned per command; clones share one socket.
#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
    url: String,
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connect and verify the server answers PING.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        let redacted = redact_url(url);
        let connection_error = |reason: String| CacheError::Connection {
            url: redacted.clone(),
            reason,
        };

        let client = Client::open(url).map_err(|e| connection_error(e.to_string()))?;

        let conn = tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| connection_error(format!("timed out after {connect_timeout:?}")))?
            .map_err(|e| connection_error(e.to_string()))?;

        let backend = Self {
            conn,
            url: redacted.clone(),
        };
        backend
            .ping()
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        tracing::info!(url = %redacted, "Connected to Redis cache backend");
        Ok(backend)
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| CacheError::operation("GET", e))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl_secs(ttl))
            .await
            .map_err(|e| CacheError::operation("SETEX", e))?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.del(keys)
            .await
            .map_err(|e| CacheError::operation("DEL", e))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.keys(pattern)
            .await
            .map_err(|e| CacheError::operation("KEYS", e))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key)
            .await
            .map_err(|e| CacheError::operation("EXISTS", e))
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();
        let remaining: i64 = conn
            .ttl(key)
            .await
            .map_err(|e| CacheError::operation("TTL", e))?;
        // -2: missing key, -1: no expiry
        Ok(u64::try_from(remaining).ok())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let secs = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
        conn.expire(key, secs)
            .await
            .map_err(|e| CacheError::operation("EXPIRE", e))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::operation("PING", e))?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
