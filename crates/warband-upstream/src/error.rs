//! Error types for upstream fetches and orchestrated operations

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use warband_cache::CacheError;

/// Failure of a single upstream HTTP exchange
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// A complete non-2xx response was received
    #[error("HTTP status {status}")]
    Status {
        status: StatusCode,
        /// Parsed `Retry-After` header, when present
        retry_after: Option<Duration>,
        body: String,
    },

    #[error("Response body is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Check if error is retryable
    ///
    /// Timeouts and network failures are. A received error response is not,
    /// unless it is a server error with an empty body (typical of proxies).
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Transport(e) => !e.is_builder() && !e.is_redirect(),
            Self::Status { status, body, .. } => status.is_server_error() && body.trim().is_empty(),
            Self::Decode(_) | Self::InvalidUrl(_) => false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Errors surfaced by [`UpstreamClient`](crate::UpstreamClient) operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// Upstream answered 404
    #[error("{0} not found")]
    NotFound(String),

    /// Upstream answered 429
    #[error("Upstream rate limit exceeded")]
    RateLimited {
        /// Duration from the HTTP Retry-After header, if present
        retry_after: Option<Duration>,
    },

    /// Any other upstream failure: error status, timeout, transport or decode
    #[error("Upstream {operation} failed for {key}: {source}")]
    Upstream {
        operation: &'static str,
        key: String,
        #[source]
        source: FetchError,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Get the Retry-After hint duration, if this is a rate-limited error with one.
    pub fn retry_after_hint(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn upstream_status(&self) -> Option<StatusCode> {
        match self {
            Self::Upstream { source, .. } => source.status(),
            _ => None,
        }
    }
}

impl From<CacheError> for ClientError {
    fn from(err: CacheError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Invalid client configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Upstream API key is empty")]
    MissingApiKey,

    #[error("Invalid upstream URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("Failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result type for fetcher operations
pub type Result<T> = std::result::Result<T, FetchError>;
