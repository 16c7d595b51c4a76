//! Versioned key/value cache store
//!
//! `warband-cache` wraps a networked key/value store (Redis, or an in-process
//! map for tests and single-node setups) behind a typed boundary:
//!
//! - values are stored in a JSON [`CacheEnvelope`] carrying the time they
//!   were produced and a schema version tag
//! - a version mismatch reads as a miss
//! - [`KvStore::get_or_set`] coalesces concurrent misses on one key
//! - [`CachePolicy::StaleFallback`] serves the last known value when
//!   recomputation fails
//! - [`KvStore::store_in_background`] hands writes to a write-behind worker
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use warband_cache::{CacheConfig, CacheError, KvStore};
//!
//! # async fn example() -> Result<(), CacheError> {
//! let store = KvStore::open(CacheConfig::memory()).await?;
//!
//! let first = store
//!     .get_or_set("answer", Duration::from_secs(60), || async { Ok::<_, CacheError>(42_u32) })
//!     .await?;
//! assert!(!first.cached);
//!
//! let second = store
//!     .get_or_set("answer", Duration::from_secs(60), || async { Ok::<_, CacheError>(0_u32) })
//!     .await?;
//! assert!(second.cached);
//! assert_eq!(second.data, 42);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod envelope;
pub mod error;
mod flight;
mod stats;
pub mod store;
mod writer;

pub use backend::{KvBackend, MemoryBackend, RedisBackend};
pub use config::CacheConfig;
pub use envelope::{CacheEnvelope, CacheResult};
pub use error::{CacheError, Result};
pub use stats::CacheStats;
pub use store::{CachePolicy, KvStore};
