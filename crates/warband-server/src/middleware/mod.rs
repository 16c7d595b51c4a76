//! Request middleware: fetch strategy selection and whole-response caching.

pub mod response_cache;
pub mod strategy;

pub use response_cache::{CachedHttpResponse, ResponseCacheConfig, response_cache};
pub use strategy::{RequestStrategy, WORKER_KEY_HEADER, WorkerSecret, strategy_selector};
