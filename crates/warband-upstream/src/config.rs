//! Upstream client configuration

use crate::error::ConfigError;
use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryPolicy;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Cache lifetimes per operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTtls {
    pub player: Duration,
    pub clan: Duration,
    pub rankings: Duration,
}

impl Default for OperationTtls {
    fn default() -> Self {
        Self {
            player: Duration::from_secs(300),
            clan: Duration::from_secs(600),
            rankings: Duration::from_secs(900),
        }
    }
}

impl OperationTtls {
    /// Same lifetime for every operation.
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            player: ttl,
            clan: ttl,
            rankings: ttl,
        }
    }
}

#[derive(Clone)]
pub struct UpstreamConfig {
    /// API root; region and resource path segments are appended to it
    pub base_url: Url,
    /// Sent as a query parameter on every request
    pub api_key: String,
    /// Name of the API key query parameter
    pub api_key_param: String,
    /// Per-attempt request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
    pub ttls: OperationTtls,
    pub user_agent: String,
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<redacted>")
            .field("api_key_param", &self.api_key_param)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("rate_limit", &self.rate_limit)
            .field("ttls", &self.ttls)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl UpstreamConfig {
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            base_url,
            api_key: api_key.into(),
            api_key_param: "api_key".to_string(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            ttls: OperationTtls::default(),
            user_agent: concat!("warband/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Parse the base URL and build a configuration with defaults.
    pub fn parse(base_url: &str, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let url = Url::parse(base_url).map_err(|e| ConfigError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(url, api_key))
    }

    /// Create client configuration from environment variables.
    ///
    /// `WARBAND_UPSTREAM_URL` and `WARBAND_API_KEY` are required. Retry and
    /// rate limit settings are read by their own `from_env` constructors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create client configuration from a variable lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = get("WARBAND_UPSTREAM_URL")
            .ok_or_else(|| ConfigError::Invalid("WARBAND_UPSTREAM_URL is not set".to_string()))?;
        let api_key = get("WARBAND_API_KEY").ok_or(ConfigError::MissingApiKey)?;

        let mut config = Self::parse(&base_url, api_key)?
            .with_retry(RetryPolicy::from_lookup(&get))
            .with_rate_limit(RateLimitConfig::from_lookup(&get));
        if let Some(param) = get("WARBAND_API_KEY_PARAM") {
            config.api_key_param = param;
        }
        if let Some(secs) = get("WARBAND_UPSTREAM_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            config.timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    #[must_use]
    pub fn with_ttls(mut self, ttls: OperationTtls) -> Self {
        self.ttls = ttls;
        self
    }

    #[must_use]
    pub fn with_api_key_param(mut self, name: impl Into<String>) -> Self {
        self.api_key_param = name.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "scheme must be http or https".to_string(),
            });
        }
        if self.base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "URL cannot carry path segments".to_string(),
            });
        }
        if self.api_key_param.is_empty() {
            return Err(ConfigError::Invalid(
                "API key parameter name is empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be non-zero".to_string()));
        }
        if self.rate_limit.capacity == 0 {
            return Err(ConfigError::Invalid(
                "rate limit capacity must be at least 1".to_string(),
            ));
        }
        if !self.rate_limit.refill_per_sec.is_finite() || self.rate_limit.refill_per_sec < 0.0 {
            return Err(ConfigError::Invalid(
                "rate limit refill must be a non-negative number".to_string(),
            ));
        }
        if [self.ttls.player, self.ttls.clan, self.ttls.rankings]
            .iter()
            .any(Duration::is_zero)
        {
            return Err(ConfigError::Invalid("cache TTLs must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = UpstreamConfig::parse("https://api.example.com/v2", "secret").unwrap();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.api_key_param, "api_key");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = UpstreamConfig::parse("https://api.example.com", "hunter2").unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = UpstreamConfig::parse("https://api.example.com", " ").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::MissingApiKey)));

        let config = UpstreamConfig::parse("ftp://api.example.com", "k").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));

        let config = UpstreamConfig::parse("https://api.example.com", "k")
            .unwrap()
            .with_rate_limit(RateLimitConfig {
                capacity: 0,
                refill_per_sec: 1.0,
            });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(matches!(
            UpstreamConfig::parse("not a url", "k"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("WARBAND_UPSTREAM_URL", "https://api.example.com/v3"),
            ("WARBAND_API_KEY", "env-key"),
            ("WARBAND_API_KEY_PARAM", "application_id"),
            ("WARBAND_UPSTREAM_TIMEOUT_SECS", "4"),
            ("WARBAND_RATE_CAPACITY", "25"),
        ]);

        let config = UpstreamConfig::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();
        assert_eq!(config.base_url.as_str(), "https://api.example.com/v3");
        assert_eq!(config.api_key, "env-key");
        assert_eq!(config.api_key_param, "application_id");
        assert_eq!(config.timeout, Duration::from_secs(4));
        assert_eq!(config.rate_limit.capacity, 25);
    }

    #[test]
    fn test_from_lookup_requires_url_and_key() {
        let no_key = UpstreamConfig::from_lookup(|k| {
            (k == "WARBAND_UPSTREAM_URL").then(|| "https://api.example.com".to_string())
        });
        assert!(matches!(no_key, Err(ConfigError::MissingApiKey)));

        let no_url =
            UpstreamConfig::from_lookup(|k| (k == "WARBAND_API_KEY").then(|| "k".to_string()));
        assert!(matches!(no_url, Err(ConfigError::Invalid(_))));
    }
}
