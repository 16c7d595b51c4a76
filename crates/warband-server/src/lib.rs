//! HTTP front for the warband upstream client.
//!
//! Public routes serve player, clan and leaderboard data through
//! [`warband_upstream::UpstreamClient`]. Two middlewares sit in front of the
//! handlers:
//!
//! - `strategy`: trusted workers presenting the shared secret get fetch-first
//!   semantics, everyone else cache-first
//! - `response_cache`: whole GET responses are replayed from the key/value
//!   store and tagged with `x-cache`
//!
//! # Architecture
//!
//! - `server`: application state and orchestration
//! - `config`: CLI and environment configuration
//! - `http`: router, handlers and listener
//! - `middleware`: strategy selection and response caching
//!
//! # Example
//!
//! ```no_run
//! use warband_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     tracing_subscriber::fmt::init();
//!
//!     let config = ServerConfig::from_args();
//!     config.validate()?;
//!
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod server;

pub use config::{LogFormat, ServerConfig};
pub use error::{ApiError, ConfigError, ServerError};
pub use middleware::{
    CachedHttpResponse, RequestStrategy, ResponseCacheConfig, WORKER_KEY_HEADER, WorkerSecret,
};
pub use server::{AppState, Server};
