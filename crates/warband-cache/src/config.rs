//! Cache store configuration

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`KvStore`](crate::KvStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Backend URL (`redis://...` or `memory://`)
    pub url: String,

    /// Prefix applied to every physical key
    pub namespace: String,

    /// Envelope version tag. Entries written under another version read as misses.
    pub schema_version: u32,

    /// TTL used when a caller does not pass one
    pub default_ttl: Duration,

    /// Hard limit per backend command
    pub operation_timeout: Duration,

    /// Limit for the initial connection
    pub connect_timeout: Duration,

    /// How long stale shadow copies are retained for the fallback policy
    pub stale_retention: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: "warband".to_string(),
            schema_version: 1,
            default_ttl: Duration::from_secs(300),
            operation_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            stale_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl CacheConfig {
    /// In-process configuration for tests and single-node development.
    pub fn memory() -> Self {
        Self {
            url: "memory://".to_string(),
            ..Self::default()
        }
    }

    /// Create cache configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create cache configuration from a variable lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            url: get("WARBAND_REDIS_URL").unwrap_or(defaults.url),
            namespace: get("WARBAND_CACHE_NAMESPACE").unwrap_or(defaults.namespace),
            schema_version: get("WARBAND_CACHE_VERSION")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.schema_version),
            default_ttl: get("WARBAND_CACHE_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .map_or(defaults.default_ttl, Duration::from_secs),
            operation_timeout: get("WARBAND_CACHE_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .map_or(defaults.operation_timeout, Duration::from_millis),
            connect_timeout: defaults.connect_timeout,
            stale_retention: get("WARBAND_STALE_RETENTION_SECS")
                .and_then(|s| s.parse().ok())
                .map_or(defaults.stale_retention, Duration::from_secs),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(CacheError::Config("namespace must not be empty".to_string()));
        }
        if self.default_ttl.is_zero() {
            return Err(CacheError::Config("default TTL must be positive".to_string()));
        }
        if self.operation_timeout.is_zero() {
            return Err(CacheError::Config(
                "operation timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
