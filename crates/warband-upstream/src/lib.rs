//! # warband-upstream
//!
//! Cache-aware, rate-limited client for the upstream game statistics API.
//!
//! ## Architecture
//!
//! 1. **Orchestrator** ([`UpstreamClient`]): builds cache keys and upstream
//!    URLs, picks the cache flow from an explicit [`FetchStrategy`] and maps
//!    upstream failures onto [`ClientError`]
//! 2. **Fetcher** ([`Fetcher`]): one HTTP exchange per attempt with a
//!    timeout, exponential backoff retry and lenient JSON decoding
//! 3. **Rate limiter** ([`RateLimiter`]): token bucket around the network
//!    call only; callers are throttled, never rejected
//!
//! Values are cached through [`warband_cache::KvStore`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use warband_cache::{CacheConfig, KvStore};
//! use warband_upstream::{FetchStrategy, Region, UpstreamClient, UpstreamConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = KvStore::open(CacheConfig::memory()).await?;
//! let config = UpstreamConfig::parse("https://api.example.com/v1", "my-key")?;
//! let client = UpstreamClient::new(config, &store)?;
//!
//! let player = client
//!     .player(Region::Eu, 12345, FetchStrategy::CacheFirst)
//!     .await?;
//! println!("cached={} updated_at={}", player.cached, player.updated_at);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod key;
pub mod metrics;
pub mod model;
pub mod rate_limit;
pub mod region;
pub mod retry;
pub mod strategy;

pub use archive::{
    Archivable, ArchiveError, ArchiveRecord, ArchiveSink, EntityKind, MemoryArchive, NoopArchive,
};
pub use client::{NAMESPACES, UpstreamClient};
pub use config::{OperationTtls, UpstreamConfig};
pub use error::{ClientError, ConfigError, FetchError};
pub use fetcher::{Decoded, Fetcher};
pub use key::{CacheKey, CacheKeyBuilder};
pub use metrics::{Outcome, UpstreamMetrics};
pub use model::{Clan, Player, PlayerStatistics, RankingEntry, RankingPage};
pub use rate_limit::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use region::{Region, UnknownRegion};
pub use retry::RetryPolicy;
pub use strategy::FetchStrategy;
