//! Whole-response cache for GET routes.
//!
//! Successful, fully buffered GET responses are stored under
//! `"GET:" + path_and_query` in the `http` tenant of the cache store, so they
//! never collide with the upstream client's entries. A hit is replayed without
//! running the handler and carries `x-cache: HIT` plus the original capture
//! time. Stores go through the write-behind worker after the response has
//! been handed back.
//!
//! Worker requests (fetch-first) skip the lookup so they always reach the
//! handler, but their responses still refresh the stored copy.

use crate::middleware::strategy::RequestStrategy;
use crate::server::AppState;
use axum::body::{Body, HttpBody};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use warband_cache::{CachePolicy, CacheResult, KvStore};

/// Marks responses that went through the cache.
pub const CACHE_STATUS_HEADER: &str = "x-cache";
/// When a replayed response was originally produced.
pub const CAPTURED_AT_HEADER: &str = "x-cache-captured-at";

/// Response headers persisted with a cached response.
const HEADER_ALLOW_LIST: [&str; 7] = [
    "content-type",
    "content-language",
    "cache-control",
    "etag",
    "last-modified",
    "vary",
    "x-schema-drift",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCacheConfig {
    pub ttl: Duration,
    /// Path patterns never served from or written to the cache. A trailing
    /// `*` matches a prefix, anything else matches as a substring.
    pub exclude: Vec<String>,
    /// Larger bodies are passed through uncached
    pub max_body_bytes: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            exclude: vec![
                "/internal/*".to_string(),
                "/health".to_string(),
                "/metrics".to_string(),
            ],
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ResponseCacheConfig {
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude.iter().any(|pattern| {
            pattern
                .strip_suffix('*')
                .map_or_else(|| path.contains(pattern.as_str()), |prefix| path.starts_with(prefix))
        })
    }
}

/// What is stored for one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedHttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Base64 of the raw body
    pub body: String,
}

impl CachedHttpResponse {
    fn capture(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Self {
        let headers = HEADER_ALLOW_LIST
            .iter()
            .filter_map(|name| {
                let value = headers.get(*name)?.to_str().ok()?;
                Some(((*name).to_string(), value.to_string()))
            })
            .collect();

        Self {
            status: status.as_u16(),
            headers,
            body: STANDARD.encode(body),
        }
    }

    fn replay(self, captured_at: DateTime<Utc>) -> Result<Response, String> {
        let status = StatusCode::from_u16(self.status).map_err(|e| e.to_string())?;
        let body = STANDARD.decode(self.body).map_err(|e| e.to_string())?;

        let mut response = (status, Body::from(body)).into_response();
        let headers = response.headers_mut();
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| e.to_string())?;
            let value = HeaderValue::from_str(&value).map_err(|e| e.to_string())?;
            headers.insert(name, value);
        }
        headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
        let captured = captured_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Ok(value) = HeaderValue::from_str(&captured) {
            headers.insert(CAPTURED_AT_HEADER, value);
        }
        Ok(response)
    }
}

/// Buffered 2xx responses only: no streams, no multipart, no `no-store`.
fn is_cacheable(response: &Response, max_body_bytes: usize) -> bool {
    if !response.status().is_success() {
        return false;
    }

    let headers = response.headers();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type.starts_with("text/event-stream") || content_type.starts_with("multipart/") {
        return false;
    }

    let cache_control = headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if cache_control.contains("no-store") || cache_control.contains("private") {
        return false;
    }

    // Only bodies whose full length is already known
    response
        .body()
        .size_hint()
        .exact()
        .is_some_and(|len| usize::try_from(len).is_ok_and(|len| len <= max_body_bytes))
}

async fn lookup(store: &KvStore, key: &str) -> Option<Response> {
    match store.get::<CachedHttpResponse>(key).await {
        Ok(Some(hit)) => match hit.data.replay(hit.updated_at) {
            Ok(response) => Some(response),
            Err(reason) => {
                tracing::warn!(key, %reason, "Cached response is unusable, ignoring");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key, error = %e, "Response cache read failed");
            None
        }
    }
}

/// Middleware serving and filling the response cache.
pub async fn response_cache(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let config = state.response_cache_config();
    if request.method() != Method::GET || config.is_excluded(request.uri().path()) {
        return next.run(request).await;
    }

    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), ToString::to_string);
    let key = format!("{}:{path_and_query}", request.method());
    let store = state.response_store();

    let is_worker = request
        .extensions()
        .get::<RequestStrategy>()
        .copied()
        .unwrap_or_default()
        .is_worker();
    if !is_worker && let Some(hit) = lookup(store, &key).await {
        tracing::debug!(key, "Response cache hit");
        return hit;
    }

    let response = next.run(request).await;
    if !is_cacheable(&response, config.max_body_bytes) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(key, error = %e, "Failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let captured = CachedHttpResponse::capture(parts.status, &parts.headers, &bytes);
    store.store_in_background(
        &key,
        &CacheResult::fresh(captured),
        config.ttl,
        CachePolicy::Strict,
    );

    parts
        .headers
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exclusion_patterns() {
        let config = ResponseCacheConfig {
            exclude: vec!["/internal/*".to_string(), "debug".to_string()],
            ..ResponseCacheConfig::default()
        };
        assert!(config.is_excluded("/internal/rate-limit"));
        assert!(config.is_excluded("/v1/debug/info"));
        assert!(!config.is_excluded("/v1/eu/internal/x"));
        assert!(!config.is_excluded("/v1/eu/players/1"));
    }

    #[test]
    fn test_capture_keeps_allow_listed_headers_only() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::SET_COOKIE, HeaderValue::from_static("session=abc"));
        headers.insert("x-schema-drift", HeaderValue::from_static("true"));

        let captured = CachedHttpResponse::capture(StatusCode::OK, &headers, b"{}");
        assert_eq!(
            captured.headers,
            vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("x-schema-drift".to_string(), "true".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_replay_restores_response() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let captured = CachedHttpResponse::capture(StatusCode::OK, &headers, br#"{"a":1}"#);

        let at = Utc::now();
        let response = captured.replay(at).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_STATUS_HEADER], "HIT");
        assert_eq!(
            response.headers()[CAPTURED_AT_HEADER],
            at.to_rfc3339_opts(SecondsFormat::Millis, true).as_str()
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"a":1}"#);
    }

    #[test]
    fn test_streaming_and_error_responses_are_not_cacheable() {
        let ok = (StatusCode::OK, "hello").into_response();
        assert!(is_cacheable(&ok, 1024));
        assert!(!is_cacheable(&ok, 2));

        let error = (StatusCode::NOT_FOUND, "missing").into_response();
        assert!(!is_cacheable(&error, 1024));

        let sse = (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/event-stream")],
            "data: 1\n\n",
        )
            .into_response();
        assert!(!is_cacheable(&sse, 1024));

        let no_store = (
            StatusCode::OK,
            [(header::CACHE_CONTROL, "no-store")],
            "secret",
        )
            .into_response();
        assert!(!is_cacheable(&no_store, 1024));
    }
}
