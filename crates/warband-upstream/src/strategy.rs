//! Per-request fetch strategy

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether an operation consults the cache before calling upstream.
///
/// Chosen once per inbound request and passed explicitly to every
/// [`UpstreamClient`](crate::UpstreamClient) call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    /// Serve from cache, call upstream only on a miss.
    #[default]
    CacheFirst,
    /// Always call upstream, then refresh the cache in the background.
    FetchFirst,
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheFirst => write!(f, "cache-first"),
            Self::FetchFirst => write!(f, "fetch-first"),
        }
    }
}
