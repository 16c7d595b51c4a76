//! Server configuration management.
//!
//! Every option can be given as a CLI argument or a `WARBAND_*` environment
//! variable. The library configurations of the cache store, the upstream
//! client and the response cache are derived from it.
//!
//! # Example
//!
//! ```no_run
//! use warband_server::ServerConfig;
//!
//! let config = ServerConfig::from_args();
//! config.validate().expect("Invalid configuration");
//!
//! println!("Listening on {}", config.bind);
//! println!("Upstream: {}", config.upstream_url);
//! ```

use crate::error::ConfigError;
use crate::middleware::response_cache::ResponseCacheConfig;
use clap::{Parser, ValueEnum};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use warband_cache::CacheConfig;
use warband_upstream::{OperationTtls, RateLimitConfig, RetryPolicy, UpstreamConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Server configuration loaded from CLI args and environment variables.
#[derive(Clone, Parser)]
#[command(
    name = "warband-server",
    about = "Cache-aware, rate-limited front for the game statistics API",
    version
)]
pub struct ServerConfig {
    /// HTTP bind address
    #[arg(long, env = "WARBAND_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Upstream API base URL
    #[arg(long, env = "WARBAND_UPSTREAM_URL")]
    pub upstream_url: String,

    /// Upstream API key
    #[arg(long, env = "WARBAND_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Name of the query parameter carrying the API key
    #[arg(long, env = "WARBAND_API_KEY_PARAM", default_value = "api_key")]
    pub api_key_param: String,

    /// Key/value store URL (`redis://`, `rediss://` or `memory://`)
    #[arg(long, env = "WARBAND_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Timeout per cache command in milliseconds
    #[arg(long, env = "WARBAND_CACHE_TIMEOUT_MS", default_value_t = 500)]
    pub cache_timeout_ms: u64,

    /// Lifetime of cached upstream values in seconds
    #[arg(long, env = "WARBAND_CACHE_TTL_SECS", default_value_t = 300)]
    pub cache_ttl_secs: u64,

    /// Cache schema version; bump to invalidate entries written by older releases
    #[arg(long, env = "WARBAND_CACHE_VERSION", default_value_t = 1)]
    pub cache_version: u32,

    /// How long stale copies are kept for fallback, in seconds
    #[arg(long, env = "WARBAND_STALE_RETENTION_SECS", default_value_t = 604_800)]
    pub stale_retention_secs: u64,

    /// Rate limiter bucket size
    #[arg(long, env = "WARBAND_RATE_CAPACITY", default_value_t = 10)]
    pub rate_capacity: u32,

    /// Rate limiter refill in tokens per second
    #[arg(long, env = "WARBAND_RATE_REFILL", default_value_t = 10.0)]
    pub rate_refill: f64,

    /// Upstream request timeout in seconds
    #[arg(long, env = "WARBAND_UPSTREAM_TIMEOUT_SECS", default_value_t = 10)]
    pub upstream_timeout_secs: u64,

    /// Retries after a failed upstream attempt
    #[arg(long, env = "WARBAND_UPSTREAM_RETRIES", default_value_t = 3)]
    pub upstream_retries: u32,

    /// Shared secret that selects fetch-first for trusted workers
    #[arg(long, env = "WARBAND_WORKER_SECRET", hide_env_values = true)]
    pub worker_secret: Option<String>,

    /// Lifetime of cached HTTP responses in seconds
    #[arg(long, env = "WARBAND_RESPONSE_TTL_SECS", default_value_t = 300)]
    pub response_ttl_secs: u64,

    /// Paths never served from the response cache, comma separated.
    /// A trailing `*` matches a prefix; otherwise substring match.
    #[arg(
        long,
        env = "WARBAND_RESPONSE_CACHE_EXCLUDE",
        value_delimiter = ',',
        default_value = "/internal/*,/health,/metrics"
    )]
    pub response_cache_exclude: Vec<String>,

    /// Log output format
    #[arg(long, env = "WARBAND_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("upstream_url", &self.upstream_url)
            .field("api_key", &"<redacted>")
            .field("api_key_param", &self.api_key_param)
            .field("redis_url", &self.redis_url)
            .field("cache_timeout_ms", &self.cache_timeout_ms)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("cache_version", &self.cache_version)
            .field("stale_retention_secs", &self.stale_retention_secs)
            .field("rate_capacity", &self.rate_capacity)
            .field("rate_refill", &self.rate_refill)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .field("upstream_retries", &self.upstream_retries)
            .field(
                "worker_secret",
                &self.worker_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("response_ttl_secs", &self.response_ttl_secs)
            .field("response_cache_exclude", &self.response_cache_exclude)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl ServerConfig {
    /// Parse configuration from command-line arguments.
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - the API key is empty
    /// - the upstream URL is not http(s)
    /// - the rate limit capacity is zero or the refill rate is negative
    /// - any TTL or timeout is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired("upstream API key".to_string()));
        }

        match url::Url::parse(&self.upstream_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::InvalidValue {
                    field: "upstream_url",
                    reason: format!("unsupported scheme '{}'", url.scheme()),
                });
            }
            Err(e) => {
                return Err(ConfigError::InvalidValue {
                    field: "upstream_url",
                    reason: e.to_string(),
                });
            }
        }

        if self.rate_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.rate_refill.is_finite() || self.rate_refill < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_refill",
                reason: "must be a non-negative number".to_string(),
            });
        }

        for (field, value) in [
            ("cache_ttl_secs", self.cache_ttl_secs),
            ("response_ttl_secs", self.response_ttl_secs),
            ("cache_timeout_ms", self.cache_timeout_ms),
            ("upstream_timeout_secs", self.upstream_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Cache store settings.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            url: self.redis_url.clone(),
            schema_version: self.cache_version,
            default_ttl: Duration::from_secs(self.cache_ttl_secs),
            operation_timeout: Duration::from_millis(self.cache_timeout_ms),
            stale_retention: Duration::from_secs(self.stale_retention_secs),
            ..CacheConfig::default()
        }
    }

    /// Upstream client settings.
    pub fn upstream_config(&self) -> Result<UpstreamConfig, ConfigError> {
        let config = UpstreamConfig::parse(&self.upstream_url, self.api_key.clone())?
            .with_api_key_param(self.api_key_param.clone())
            .with_timeout(Duration::from_secs(self.upstream_timeout_secs))
            .with_retry(RetryPolicy {
                max_attempts: self.upstream_retries,
                ..RetryPolicy::default()
            })
            .with_rate_limit(RateLimitConfig {
                capacity: self.rate_capacity,
                refill_per_sec: self.rate_refill,
            })
            .with_ttls(OperationTtls::uniform(Duration::from_secs(
                self.cache_ttl_secs,
            )));
        Ok(config)
    }

    /// Response cache middleware settings.
    pub fn response_cache_config(&self) -> ResponseCacheConfig {
        ResponseCacheConfig {
            ttl: Duration::from_secs(self.response_ttl_secs),
            exclude: self
                .response_cache_exclude
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            ..ResponseCacheConfig::default()
        }
    }

    /// Worker secret, ignoring an empty value.
    pub fn worker_secret(&self) -> Option<&str> {
        self.worker_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
