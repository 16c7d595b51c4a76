//! Per-request fetch strategy selection.
//!
//! Trusted workers present a shared secret in [`WORKER_KEY_HEADER`] and get
//! [`FetchStrategy::FetchFirst`]. Every other request, including one with a
//! wrong secret, gets [`FetchStrategy::CacheFirst`]. The choice is stored in
//! the request's extensions and read back by handlers through the
//! [`RequestStrategy`] extractor.

use crate::server::AppState;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use warband_upstream::FetchStrategy;

/// Header carrying the worker secret.
pub const WORKER_KEY_HEADER: &str = "x-worker-api-key";

/// Shared secret identifying trusted workers.
#[derive(Clone)]
pub struct WorkerSecret(Arc<str>);

impl WorkerSecret {
    pub fn new(secret: &str) -> Self {
        Self(Arc::from(secret))
    }

    /// Constant-time comparison against a presented value.
    pub fn matches(&self, presented: &[u8]) -> bool {
        self.0.as_bytes().ct_eq(presented).into()
    }
}

impl fmt::Debug for WorkerSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WorkerSecret(<redacted>)")
    }
}

/// Strategy for one request, given the configured secret and its headers.
pub fn select_strategy(secret: Option<&WorkerSecret>, headers: &HeaderMap) -> FetchStrategy {
    let presented = headers.get(WORKER_KEY_HEADER).map(|v| v.as_bytes());
    match (secret, presented) {
        (Some(secret), Some(presented)) if secret.matches(presented) => FetchStrategy::FetchFirst,
        _ => FetchStrategy::CacheFirst,
    }
}

/// Strategy chosen for the current request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStrategy(pub FetchStrategy);

impl RequestStrategy {
    /// True when the request carried a valid worker secret.
    pub fn is_worker(self) -> bool {
        self.0 == FetchStrategy::FetchFirst
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestStrategy {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Self>().copied().unwrap_or_default())
    }
}

/// Middleware publishing the [`RequestStrategy`] for downstream layers.
pub async fn strategy_selector(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let strategy = select_strategy(state.worker_secret(), request.headers());
    if strategy == FetchStrategy::FetchFirst {
        tracing::debug!(path = request.uri().path(), "Worker request, fetching first");
    }
    request.extensions_mut().insert(RequestStrategy(strategy));
    next.run(request).await
}
