//! Typed, versioned key/value store
//!
//! Values are wrapped in a [`CacheEnvelope`] and serialized to JSON. An
//! envelope written under a different schema version is reported as a miss,
//! so entries shaped by an older release are never decoded.
//!
//! # Concurrency
//!
//! `get_or_set` coalesces concurrent misses per key: the first caller
//! computes, later callers wait and then re-read the cache. If the first
//! computation fails, the next waiter computes on its own. The computation
//! and its cache write run in a spawned task, so a caller that gives up does
//! not abort a fetch that is already in progress. The caller is answered as
//! soon as the value is computed. Waiters are released once it is written.
//!
//! When the initial read fails the backend is treated as degraded for that
//! call: the miss computes without coalescing or a stale lookup, so an
//! unresponsive backend costs at most one operation timeout per request.

use crate::backend::{self, KvBackend};
use crate::config::CacheConfig;
use crate::envelope::{CacheEnvelope, CacheResult};
use crate::error::{CacheError, Result};
use crate::flight::FlightMap;
use crate::stats::{CacheStats, StoreStats};
use crate::writer::{WriteJob, spawn_writer};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// How `get_or_set` behaves when the computation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Propagate the failure.
    #[default]
    Strict,
    /// Serve the last stored value regardless of age, if one exists.
    ///
    /// Each write also keeps a shadow copy for `stale_retention`. Can hide a
    /// sustained upstream outage, so call sites opt in explicitly.
    StaleFallback,
}

#[derive(Debug)]
struct StoreInner {
    backend: Arc<dyn KvBackend>,
    config: CacheConfig,
    flights: Arc<FlightMap>,
    stats: Arc<StoreStats>,
    writer: mpsc::UnboundedSender<WriteJob>,
}

/// Handle to the cache store. Cheap to clone.
///
/// Every handle carries a key prefix. [`KvStore::tenant`] derives handles
/// with disjoint prefixes so independent users of one backend never collide.
#[derive(Debug, Clone)]
pub struct KvStore {
    inner: Arc<StoreInner>,
    prefix: String,
}

impl KvStore {
    /// Connect to the configured backend.
    ///
    /// Fails with [`CacheError::Connection`] when the backend is unreachable.
    pub async fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let backend = backend::connect(&config.url, config.connect_timeout).await?;
        Ok(Self::with_backend(backend, config))
    }

    /// Build a store over an existing backend. Must be called inside a Tokio
    /// runtime (spawns the write-behind worker).
    pub fn with_backend(backend: Arc<dyn KvBackend>, config: CacheConfig) -> Self {
        let stats = Arc::new(StoreStats::default());
        let writer = spawn_writer(
            Arc::clone(&backend),
            config.operation_timeout,
            Arc::clone(&stats),
        );
        let prefix = format!("{}:", config.namespace);

        Self {
            inner: Arc::new(StoreInner {
                backend,
                config,
                flights: Arc::new(FlightMap::default()),
                stats,
                writer,
            }),
            prefix,
        }
    }

    /// Handle scoped to a sub-namespace of this one.
    pub fn tenant(&self, name: &str) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            prefix: format!("{}{name}:", self.prefix),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.config.default_ttl
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    pub fn backend_kind(&self) -> &'static str {
        self.inner.backend.kind()
    }

    fn physical(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn shadow(&self, key: &str) -> String {
        format!("{}stale:{key}", self.prefix)
    }

    async fn timed<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        let timeout = self.inner.config.operation_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout { op, timeout })?
    }

    fn encode<T: Serialize>(&self, key: &str, data: &T, updated_at: DateTime<Utc>) -> Result<String> {
        let envelope = CacheEnvelope {
            data,
            updated_at,
            version: self.inner.config.schema_version,
        };
        serde_json::to_string(&envelope).map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, raw: &str) -> Result<Option<CacheEnvelope<T>>> {
        let serialization = |source| CacheError::Serialization {
            key: key.to_string(),
            source,
        };

        let envelope: CacheEnvelope<serde_json::Value> =
            serde_json::from_str(raw).map_err(serialization)?;

        if envelope.version != self.inner.config.schema_version {
            tracing::debug!(
                key,
                stored = envelope.version,
                current = self.inner.config.schema_version,
                "Cache entry written under another schema version, treating as miss"
            );
            return Ok(None);
        }

        let data = serde_json::from_value(envelope.data).map_err(serialization)?;
        Ok(Some(CacheEnvelope {
            data,
            updated_at: envelope.updated_at,
            version: envelope.version,
        }))
    }

    async fn read_envelope<T: DeserializeOwned>(
        &self,
        physical: &str,
    ) -> Result<Option<CacheEnvelope<T>>> {
        let raw = self
            .timed("GET", self.inner.backend.get(physical))
            .await?;
        match raw {
            Some(raw) => self.decode(physical, &raw),
            None => Ok(None),
        }
    }

    /// Read a value. Absent, expired and version-mismatched entries are misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheResult<T>>> {
        let envelope = self.read_envelope(&self.physical(key)).await?;
        Ok(envelope.map(CacheResult::from_envelope))
    }

    /// Write a value stamped with the current time.
    pub async fn set<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        self.set_at(key, value, Utc::now(), ttl).await
    }

    /// Write a value with an explicit `updated_at`.
    pub async fn set_at<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        updated_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<()> {
        let physical = self.physical(key);
        let payload = self.encode(&physical, value, updated_at)?;
        self.timed("SETEX", self.inner.backend.set_ex(&physical, &payload, ttl))
            .await
    }

    /// Remove a key together with its stale shadow copy.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let keys = [self.physical(key), self.shadow(key)];
        let removed = self.timed("DEL", self.inner.backend.del(&keys)).await?;
        Ok(removed > 0)
    }

    /// Remove every key matching a glob pattern, including stale shadows.
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut keys = self
            .timed("KEYS", self.inner.backend.keys(&self.physical(pattern)))
            .await?;
        keys.extend(
            self.timed("KEYS", self.inner.backend.keys(&self.shadow(pattern)))
                .await?,
        );
        keys.sort_unstable();
        keys.dedup();

        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.timed("DEL", self.inner.backend.del(&keys)).await?;
        tracing::info!(pattern, removed, "Deleted cache keys by pattern");
        Ok(removed)
    }

    /// Whether a live entry exists. The version tag is not checked.
    pub async fn has(&self, key: &str) -> Result<bool> {
        self.timed("EXISTS", self.inner.backend.exists(&self.physical(key)))
            .await
    }

    /// Remaining lifetime in seconds.
    pub async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        self.timed("TTL", self.inner.backend.ttl(&self.physical(key)))
            .await
    }

    /// Reset a key's lifetime. Returns false when the key does not exist.
    pub async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        self.timed(
            "EXPIRE",
            self.inner
                .backend
                .expire(&self.physical(key), Duration::from_secs(seconds)),
        )
        .await
    }

    pub async fn ping(&self) -> Result<()> {
        self.timed("PING", self.inner.backend.ping()).await
    }

    /// Read-through with the strict policy.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> std::result::Result<CacheResult<T>, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: From<CacheError> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        self.get_or_set_with(key, ttl, CachePolicy::Strict, compute)
            .await
    }

    /// Read-through: return the cached value, or compute, store and return it.
    ///
    /// Backend and decode failures on the read path are logged and treated
    /// as misses. Failures writing the computed value are logged and do not
    /// affect the result, which is returned before the write completes.
    pub async fn get_or_set_with<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        policy: CachePolicy,
        compute: F,
    ) -> std::result::Result<CacheResult<T>, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: From<CacheError> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let degraded = match self.get::<T>(key).await {
            Ok(Some(hit)) => {
                self.inner.stats.record_hit();
                return Ok(hit);
            }
            Ok(None) => false,
            Err(e) => {
                self.inner.stats.record_read_error();
                tracing::warn!(key, error = %e, "Cache read failed, treating as miss");
                true
            }
        };
        self.inner.stats.record_miss();

        // A failing backend cannot publish results to waiters, so misses
        // against it compute without coalescing.
        let flight = if degraded {
            None
        } else {
            let flight = self.inner.flights.claim(&self.physical(key)).await;
            // Another task may have filled the key while we waited.
            if flight.waited()
                && let Some(hit) = self.lookup_quiet::<T>(key).await
            {
                return Ok(hit);
            }
            Some(flight)
        };

        let (reply, outcome) = oneshot::channel();
        let store = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let _flight = flight;
            store
                .compute_and_store(&key, ttl, policy, !degraded, compute, reply)
                .await;
        });

        outcome
            .await
            .map_err(|e| E::from(CacheError::TaskAborted(e.to_string())))?
    }

    /// Run the computation and hand its outcome to `reply`, then write the
    /// value. The caller's flight stays claimed until the write finishes.
    async fn compute_and_store<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        policy: CachePolicy,
        backend_healthy: bool,
        compute: F,
        reply: oneshot::Sender<std::result::Result<CacheResult<T>, E>>,
    ) where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.inner.stats.record_compute();

        match compute().await {
            Ok(data) => {
                let result = CacheResult::fresh(data);
                let payload = self.encode(&self.physical(key), &result.data, result.updated_at);
                let _ = reply.send(Ok(result));
                match payload {
                    Ok(payload) => self.write_through(key, &payload, ttl, policy).await,
                    Err(e) => {
                        self.inner.stats.record_write_failure();
                        tracing::warn!(key, error = %e, "Failed to encode computed value");
                    }
                }
            }
            Err(err) if policy == CachePolicy::StaleFallback && backend_healthy => {
                let _ = reply.send(self.stale_or(key, err).await);
            }
            Err(err) => {
                if policy == CachePolicy::StaleFallback {
                    tracing::warn!(
                        key,
                        "Computation failed with the cache unreachable, skipping stale fallback"
                    );
                }
                let _ = reply.send(Err(err));
            }
        }
    }

    /// Serve the stale shadow copy of `key`, or `err` when there is none.
    async fn stale_or<T: DeserializeOwned, E>(
        &self,
        key: &str,
        err: E,
    ) -> std::result::Result<CacheResult<T>, E> {
        match self.read_envelope::<T>(&self.shadow(key)).await {
            Ok(Some(envelope)) => {
                self.inner.stats.record_stale();
                tracing::warn!(
                    key,
                    updated_at = %envelope.updated_at,
                    "Computation failed, serving stale cached value"
                );
                Ok(CacheResult::from_envelope(envelope))
            }
            Ok(None) => Err(err),
            Err(e) => {
                tracing::warn!(key, error = %e, "Stale copy unreadable");
                Err(err)
            }
        }
    }

    /// Write the primary entry and, under `StaleFallback`, its shadow copy.
    /// Each write is attempted even when the other fails.
    async fn write_through(&self, key: &str, payload: &str, ttl: Duration, policy: CachePolicy) {
        let physical = self.physical(key);
        if let Err(e) = self
            .timed("SETEX", self.inner.backend.set_ex(&physical, payload, ttl))
            .await
        {
            self.inner.stats.record_write_failure();
            tracing::warn!(key, error = %e, "Failed to store computed value");
        }

        if policy == CachePolicy::StaleFallback {
            let retention = self.inner.config.stale_retention.max(ttl);
            if let Err(e) = self
                .timed(
                    "SETEX",
                    self.inner
                        .backend
                        .set_ex(&self.shadow(key), payload, retention),
                )
                .await
            {
                self.inner.stats.record_write_failure();
                tracing::warn!(key, error = %e, "Failed to store stale copy");
            }
        }
    }

    async fn lookup_quiet<T: DeserializeOwned>(&self, key: &str) -> Option<CacheResult<T>> {
        match self.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                self.inner.stats.record_read_error();
                tracing::warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Queue a write without waiting for it.
    ///
    /// Encoding happens immediately. The backend write is performed by the
    /// store's write-behind worker, which logs failures.
    pub fn store_in_background<T: Serialize>(
        &self,
        key: &str,
        result: &CacheResult<T>,
        ttl: Duration,
        policy: CachePolicy,
    ) {
        let physical = self.physical(key);
        let payload = match self.encode(&physical, &result.data, result.updated_at) {
            Ok(payload) => payload,
            Err(e) => {
                self.inner.stats.record_write_failure();
                tracing::warn!(key = %physical, error = %e, "Dropping background cache write");
                return;
            }
        };

        let shadow = (policy == CachePolicy::StaleFallback).then(|| {
            (
                self.shadow(key),
                self.inner.config.stale_retention.max(ttl),
            )
        });

        let job = WriteJob::Put {
            key: physical,
            payload,
            ttl,
            shadow,
        };
        if self.inner.writer.send(job).is_err() {
            self.inner.stats.record_write_failure();
            tracing::warn!(key, "Cache write-behind worker is gone, write dropped");
        }
    }

    /// Wait until every background write queued before this call completed.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.writer.send(WriteJob::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}
