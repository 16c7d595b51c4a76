//! Stored envelope and caller-facing result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What is physically written to the backend for each key.
///
/// `updated_at` is the moment the value was produced upstream. Reads never
/// touch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEnvelope<T> {
    pub data: T,
    pub updated_at: DateTime<Utc>,
    /// Schema generation the entry was written under
    #[serde(rename = "v", default)]
    pub version: u32,
}

/// A value handed back to callers together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheResult<T> {
    pub data: T,
    /// True when served from the store rather than freshly computed
    pub cached: bool,
    pub updated_at: DateTime<Utc>,
}

impl<T> CacheResult<T> {
    /// A value that was just produced.
    pub fn fresh(data: T) -> Self {
        Self {
            data,
            cached: false,
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn from_envelope(envelope: CacheEnvelope<T>) -> Self {
        Self {
            data: envelope.data,
            cached: true,
            updated_at: envelope.updated_at,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
        CacheResult {
            data: f(self.data),
            cached: self.cached,
            updated_at: self.updated_at,
        }
    }
}
