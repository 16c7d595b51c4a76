//! Error types for the warband server.
//!
//! Startup and runtime failures use thiserror enums. Request failures are
//! carried by [`ApiError`], which renders as a JSON body with the matching
//! status code.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use warband_cache::CacheError;
use warband_upstream::ClientError;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing required configuration value
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// A value outside its allowed range
    #[error("Invalid {field}: {reason}")]
    InvalidValue {
        /// Option name
        field: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Upstream client rejected its settings
    #[error("Upstream configuration error: {0}")]
    Upstream(#[from] warband_upstream::ConfigError),
}

/// Server runtime errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind HTTP server
    #[error("Failed to bind HTTP server to {addr}: {source}")]
    HttpBindFailed {
        /// Address that failed to bind
        addr: std::net::SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Cache backend unavailable at startup
    #[error("Cache backend error: {0}")]
    Cache(#[from] CacheError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Server shutdown error
    #[error("Server shutdown error: {0}")]
    Shutdown(String),
}

impl From<warband_upstream::ConfigError> for ServerError {
    fn from(err: warband_upstream::ConfigError) -> Self {
        Self::Config(ConfigError::Upstream(err))
    }
}

/// Request-level failure rendered as `{ "error": <message> }`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path or query input (400)
    #[error("{0}")]
    BadRequest(String),

    /// Missing or wrong worker secret (403)
    #[error("Worker credentials required")]
    Forbidden,

    /// Entity does not exist upstream (404)
    #[error("{0}")]
    NotFound(String),

    /// Upstream quota exhausted (429)
    #[error("Upstream rate limit exceeded, retry later")]
    RateLimited {
        /// Hint forwarded as `Retry-After`
        retry_after: Option<Duration>,
    },

    /// Upstream failed (503). Details are logged, not returned.
    #[error("Upstream service temporarily unavailable")]
    Unavailable,

    /// Anything else (500)
    #[error("Internal server error")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound(_) => Self::NotFound(err.to_string()),
            ClientError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            // Logged with full context by the client
            ClientError::Upstream { .. } => Self::Unavailable,
            ClientError::Internal(reason) => Self::Internal(reason),
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(reason) = &self {
            tracing::error!(%reason, "Request failed");
        }

        let status = self.status();
        let retry_after = match &self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        };

        let mut response = (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response();

        if let Some(delay) = retry_after {
            // Round up so clients never retry early
            let secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
