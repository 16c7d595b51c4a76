//! HTTP fetcher with timeout, retry and lenient decoding
//!
//! One [`Fetcher::fetch_once`] call is one HTTP exchange. [`Fetcher::fetch`]
//! wraps it in the retry policy and, when a limiter is attached, takes a
//! token before every attempt so retries are throttled too.

use crate::error::{ConfigError, FetchError, Result};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use prometheus::IntCounter;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Once};
use std::time::Duration;
use url::Url;

/// Result of decoding an upstream payload.
///
/// `Lenient` keeps the raw JSON when it does not match the expected shape,
/// so a schema change upstream degrades to an untyped pass-through instead
/// of an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum Decoded<T> {
    Strict(T),
    Lenient { raw: Value, warnings: Vec<String> },
}

impl<T: DeserializeOwned> Decoded<T> {
    pub fn from_value(raw: Value) -> Self {
        match T::deserialize(&raw) {
            Ok(value) => Self::Strict(value),
            Err(e) => Self::Lenient {
                raw,
                warnings: vec![e.to_string()],
            },
        }
    }
}

impl<T> Decoded<T> {
    pub fn strict(&self) -> Option<&T> {
        match self {
            Self::Strict(value) => Some(value),
            Self::Lenient { .. } => None,
        }
    }

    pub fn into_strict(self) -> Option<T> {
        match self {
            Self::Strict(value) => Some(value),
            Self::Lenient { .. } => None,
        }
    }

    pub fn is_lenient(&self) -> bool {
        matches!(self, Self::Lenient { .. })
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Self::Strict(_) => &[],
            Self::Lenient { warnings, .. } => warnings,
        }
    }
}

impl<T: Serialize> Decoded<T> {
    /// The payload as plain JSON, typed or raw.
    pub fn to_json(&self) -> std::result::Result<Value, serde_json::Error> {
        match self {
            Self::Strict(value) => serde_json::to_value(value),
            Self::Lenient { raw, .. } => Ok(raw.clone()),
        }
    }
}

fn ensure_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Fails only when another provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Parse `Retry-After` as delta seconds or an HTTP date.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
    limiter: Option<Arc<RateLimiter>>,
    attempts: Option<IntCounter>,
}

impl Fetcher {
    pub fn new(
        timeout: Duration,
        retry: RetryPolicy,
        user_agent: &str,
    ) -> std::result::Result<Self, ConfigError> {
        ensure_crypto_provider();

        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(16)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .redirect(reqwest::redirect::Policy::limited(3))
            .user_agent(user_agent)
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self {
            client,
            timeout,
            retry,
            limiter: None,
            attempts: None,
        })
    }

    /// Take a token from `limiter` before each attempt.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    #[must_use]
    pub(crate) fn with_attempt_counter(mut self, counter: IntCounter) -> Self {
        self.attempts = Some(counter);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fetch and decode with retries.
    pub async fn fetch<T: DeserializeOwned>(&self, url: &Url) -> Result<Decoded<T>> {
        self.retry.execute(|| self.attempt(url)).await
    }

    async fn attempt<T: DeserializeOwned>(&self, url: &Url) -> Result<Decoded<T>> {
        match &self.limiter {
            Some(limiter) => limiter.limit(self.fetch_once(url)).await,
            None => self.fetch_once(url).await,
        }
    }

    /// A single GET without retry or throttling.
    pub async fn fetch_once<T: DeserializeOwned>(&self, url: &Url) -> Result<Decoded<T>> {
        if let Some(counter) = &self.attempts {
            counter.inc();
        }
        // The query string carries the API key; log the path only.
        tracing::debug!(path = url.path(), "Upstream request");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(path = url.path(), %status, "Upstream error response");
            return Err(FetchError::Status {
                status,
                retry_after,
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        let raw: Value = serde_json::from_slice(&bytes).map_err(FetchError::Decode)?;
        Ok(Decoded::from_value(raw))
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(err.without_url())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        id: u64,
    }

    #[test]
    fn test_decoded_strict_and_lenient() {
        let strict = Decoded::<Probe>::from_value(serde_json::json!({"id": 7}));
        assert_eq!(strict.strict(), Some(&Probe { id: 7 }));
        assert!(strict.warnings().is_empty());

        let lenient = Decoded::<Probe>::from_value(serde_json::json!({"id": "seven"}));
        assert!(lenient.is_lenient());
        assert_eq!(lenient.warnings().len(), 1);
        assert_eq!(lenient.to_json().unwrap(), serde_json::json!({"id": "seven"}));
    }

    #[test]
    fn test_decoded_round_trips_through_cache_format() {
        let lenient = Decoded::<Probe>::from_value(serde_json::json!({"other": true}));
        let stored = serde_json::to_value(&lenient).unwrap();
        assert_eq!(stored["mode"], "lenient");

        let restored: Decoded<Probe> = serde_json::from_value(stored).unwrap();
        assert_eq!(restored, lenient);
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(30)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        // In the past
        assert_eq!(parse_retry_after(&headers), None);
    }
}
