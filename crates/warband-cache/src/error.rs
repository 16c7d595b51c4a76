//! Error types for cache store operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the key/value store
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not be reached when the store was opened.
    ///
    /// Callers treat this as fatal at startup.
    #[error("Cache connection failed ({url}): {reason}")]
    Connection {
        /// Backend URL with credentials stripped
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// A single backend command failed
    #[error("Cache operation {op} failed: {reason}")]
    Operation {
        /// Command name (GET, SETEX, ...)
        op: &'static str,
        /// Underlying failure
        reason: String,
    },

    /// A backend command did not complete within the store's operation timeout
    #[error("Cache operation {op} timed out after {timeout:?}")]
    Timeout {
        /// Command name
        op: &'static str,
        /// Configured operation timeout
        timeout: Duration,
    },

    /// Stored bytes did not decode into the requested type, or a value
    /// could not be encoded
    #[error("Cache serialization error for {key}: {source}")]
    Serialization {
        /// Key being read or written
        key: String,
        /// Underlying serde failure
        #[source]
        source: serde_json::Error,
    },

    /// A background compute task was cancelled or panicked
    #[error("Cache compute task aborted: {0}")]
    TaskAborted(String),

    /// Invalid store configuration
    #[error("Invalid cache configuration: {0}")]
    Config(String),
}

impl CacheError {
    pub(crate) fn operation(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Operation {
            op,
            reason: err.to_string(),
        }
    }

    /// Whether the error came from the backend rather than the payload.
    ///
    /// Backend failures are recovered as cache misses by callers.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Operation { .. } | Self::Timeout { .. })
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
