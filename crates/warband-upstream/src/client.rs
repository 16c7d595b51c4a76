//! Cache-aware orchestration of upstream calls
//!
//! Every operation builds a [`CacheKey`] and an upstream URL, then runs one
//! of two flows depending on the caller's [`FetchStrategy`]:
//!
//! - `CacheFirst`: read-through via [`KvStore::get_or_set_with`]. Concurrent
//!   misses on one key share a single upstream call.
//! - `FetchFirst`: call upstream, return the fresh value and queue the cache
//!   write on the store's write-behind worker.
//!
//! Only the HTTP exchange passes through the rate limiter, so cache hits are
//! free.

use crate::archive::{Archivable, ArchiveRecord, ArchiveSink, NoopArchive};
use crate::config::UpstreamConfig;
use crate::error::{ClientError, ConfigError, FetchError};
use crate::fetcher::{Decoded, Fetcher};
use crate::key::CacheKey;
use crate::metrics::{Outcome, UpstreamMetrics};
use crate::model::{Clan, Player, RankingPage};
use crate::rate_limit::{RateLimitStatus, RateLimiter};
use crate::region::Region;
use crate::strategy::FetchStrategy;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use warband_cache::{CachePolicy, CacheResult, KvStore};

/// Cache key namespaces owned by the client, one per operation.
pub const NAMESPACES: [&str; 3] = ["player", "clan", "rankings"];

/// A fully resolved operation call.
struct Call {
    operation: &'static str,
    /// Entity name used in not-found errors
    entity: &'static str,
    region: Region,
    key: CacheKey,
    url: Url,
    ttl: Duration,
    policy: CachePolicy,
}

#[derive(Debug)]
struct ClientInner {
    config: UpstreamConfig,
    fetcher: Fetcher,
    limiter: Arc<RateLimiter>,
    store: KvStore,
    archive: Arc<dyn ArchiveSink>,
    metrics: UpstreamMetrics,
}

/// Handle to the upstream API. Cheap to clone.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    inner: Arc<ClientInner>,
}

impl UpstreamClient {
    /// Client without a history archive. Cache entries live under the
    /// `api` tenant of `store`.
    pub fn new(config: UpstreamConfig, store: &KvStore) -> Result<Self, ConfigError> {
        Self::with_archive(config, store, Arc::new(NoopArchive))
    }

    pub fn with_archive(
        config: UpstreamConfig,
        store: &KvStore,
        archive: Arc<dyn ArchiveSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let metrics = UpstreamMetrics::new()?;
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        let fetcher = Fetcher::new(config.timeout, config.retry.clone(), &config.user_agent)?
            .with_limiter(Arc::clone(&limiter))
            .with_attempt_counter(metrics.upstream_requests());

        tracing::info!(
            base_url = %config.base_url,
            capacity = config.rate_limit.capacity,
            refill_per_sec = config.rate_limit.refill_per_sec,
            "Upstream client ready"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                fetcher,
                limiter,
                store: store.tenant("api"),
                archive,
                metrics,
            }),
        })
    }

    /// Player profile by account id.
    pub async fn player(
        &self,
        region: Region,
        account_id: u64,
        strategy: FetchStrategy,
    ) -> Result<CacheResult<Decoded<Player>>, ClientError> {
        let id = account_id.to_string();
        let call = Call {
            operation: "player",
            entity: "Player",
            region,
            key: CacheKey::builder("player")
                .param("region", region)
                .param("id", account_id)
                .build(),
            url: self.endpoint(&[region.as_str(), "players", &id], &[])?,
            ttl: self.inner.config.ttls.player,
            policy: CachePolicy::Strict,
        };
        self.execute(call, strategy).await
    }

    /// Clan by tag. Tags are matched case-insensitively.
    pub async fn clan(
        &self,
        region: Region,
        tag: &str,
        strategy: FetchStrategy,
    ) -> Result<CacheResult<Decoded<Clan>>, ClientError> {
        let tag = tag.trim().to_ascii_uppercase();
        if tag.is_empty() {
            return Err(ClientError::NotFound("Clan".to_string()));
        }

        let call = Call {
            operation: "clan",
            entity: "Clan",
            region,
            key: CacheKey::builder("clan")
                .param("region", region)
                .param("tag", &tag)
                .build(),
            url: self.endpoint(&[region.as_str(), "clans", &tag], &[])?,
            ttl: self.inner.config.ttls.clan,
            policy: CachePolicy::Strict,
        };
        self.execute(call, strategy).await
    }

    /// One page of the player leaderboard, 1-based.
    ///
    /// Leaderboards change slowly and are expensive upstream, so when a
    /// refresh fails the last stored page is served regardless of age.
    pub async fn player_rankings(
        &self,
        region: Region,
        page: u32,
        strategy: FetchStrategy,
    ) -> Result<CacheResult<Decoded<RankingPage>>, ClientError> {
        let page = page.max(1);
        let call = Call {
            operation: "rankings",
            entity: "Rankings page",
            region,
            key: CacheKey::builder("rankings")
                .param("region", region)
                .param("page", page)
                .build(),
            url: self.endpoint(
                &[region.as_str(), "rankings", "players"],
                &[("page", page.to_string())],
            )?,
            ttl: self.inner.config.ttls.rankings,
            policy: CachePolicy::StaleFallback,
        };
        self.execute(call, strategy).await
    }

    /// Drop every cached entry of one operation namespace.
    pub async fn invalidate(&self, namespace: &str) -> Result<u64, ClientError> {
        if !NAMESPACES.contains(&namespace) {
            return Err(ClientError::NotFound(format!(
                "Cache namespace '{namespace}'"
            )));
        }
        let removed = self
            .inner
            .store
            .delete_pattern(&CacheKey::namespace_pattern(namespace))
            .await?;
        tracing::info!(namespace, removed, "Invalidated cache namespace");
        Ok(removed)
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.inner.limiter.status()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.limiter
    }

    /// The client's tenant of the cache store.
    pub fn store(&self) -> &KvStore {
        &self.inner.store
    }

    pub fn metrics(&self) -> &UpstreamMetrics {
        &self.inner.metrics
    }

    /// Prometheus text exposition, with gauges refreshed first.
    pub fn metrics_text(&self) -> String {
        self.inner
            .metrics
            .update_from_snapshots(&self.inner.limiter, &self.inner.store.stats());
        self.inner.metrics.gather()
    }

    fn endpoint(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url, ClientError> {
        let config = &self.inner.config;
        let mut url = config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::Internal("upstream base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair(&config.api_key_param, &config.api_key);
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn execute<T>(
        &self,
        call: Call,
        strategy: FetchStrategy,
    ) -> Result<CacheResult<Decoded<T>>, ClientError>
    where
        T: Serialize + DeserializeOwned + Archivable + Send + Sync + 'static,
    {
        let operation = call.operation;
        let result = match strategy {
            FetchStrategy::CacheFirst => {
                let store = &self.inner.store;
                let key = call.key.as_str().to_string();
                let (ttl, policy) = (call.ttl, call.policy);
                let this = self.clone();
                store
                    .get_or_set_with(&key, ttl, policy, move || async move {
                        this.fetch_upstream::<T>(&call).await
                    })
                    .await
            }
            FetchStrategy::FetchFirst => {
                // Spawned so a dropped caller cannot abandon a fetch whose
                // rate limit token is already spent.
                let this = self.clone();
                let task = tokio::spawn(async move {
                    let decoded = this.fetch_upstream::<T>(&call).await?;
                    let result = CacheResult::fresh(decoded);
                    this.inner.store.store_in_background(
                        call.key.as_str(),
                        &result,
                        call.ttl,
                        call.policy,
                    );
                    Ok(result)
                });
                task.await.unwrap_or_else(|e| {
                    Err(ClientError::Internal(format!("Fetch task failed: {e}")))
                })
            }
        };

        let outcome = match &result {
            Ok(hit) if hit.cached => Outcome::Hit,
            Ok(_) => Outcome::Fetched,
            Err(ClientError::NotFound(_)) => Outcome::NotFound,
            Err(ClientError::RateLimited { .. }) => Outcome::RateLimited,
            Err(_) => Outcome::Failed,
        };
        self.inner.metrics.record_operation(operation, outcome);
        tracing::debug!(operation, %strategy, outcome = outcome.as_str(), "Operation finished");

        result
    }

    async fn fetch_upstream<T>(&self, call: &Call) -> Result<Decoded<T>, ClientError>
    where
        T: DeserializeOwned + Archivable,
    {
        let decoded = self
            .inner
            .fetcher
            .fetch::<T>(&call.url)
            .await
            .map_err(|e| self.classify(call, e))?;

        match &decoded {
            Decoded::Strict(value) => self.archive(call.region, value),
            Decoded::Lenient { warnings, .. } => {
                self.inner.metrics.record_schema_drift();
                tracing::warn!(
                    operation = call.operation,
                    key = %call.key,
                    ?warnings,
                    "Upstream payload does not match the expected schema, passing it through raw"
                );
            }
        }
        Ok(decoded)
    }

    fn classify(&self, call: &Call, err: FetchError) -> ClientError {
        match err.status() {
            Some(StatusCode::NOT_FOUND) => ClientError::NotFound(call.entity.to_string()),
            Some(StatusCode::TOO_MANY_REQUESTS) => {
                tracing::warn!(
                    operation = call.operation,
                    retry_after = ?err.retry_after(),
                    "Upstream rate limit hit"
                );
                ClientError::RateLimited {
                    retry_after: err.retry_after(),
                }
            }
            status => {
                tracing::error!(
                    operation = call.operation,
                    key = %call.key,
                    status = ?status,
                    error = %err,
                    "Upstream request failed"
                );
                ClientError::Upstream {
                    operation: call.operation,
                    key: call.key.to_string(),
                    source: err,
                }
            }
        }
    }

    /// Record the entity's alias without waiting for the sink.
    fn archive<T: Archivable>(&self, region: Region, value: &T) {
        let Some((kind, id, alias)) = value.archive_entry() else {
            return;
        };
        let record = ArchiveRecord {
            kind,
            region,
            id,
            alias,
            observed_at: Utc::now(),
        };

        let archive = Arc::clone(&self.inner.archive);
        let metrics = self.inner.metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = archive.record(record).await {
                metrics.record_archive_failure();
                tracing::warn!(error = %e, "Failed to archive entity alias");
            }
        });
    }
}
