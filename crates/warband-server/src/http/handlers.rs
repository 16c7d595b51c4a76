//! HTTP request handlers.
//!
//! Entity routes answer `{ data, cached, updatedAt }`. Values decoded
//! leniently from a drifted upstream payload carry `x-schema-drift: true`.

use crate::error::ApiError;
use crate::middleware::RequestStrategy;
use crate::server::AppState;
use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use warband_cache::CacheResult;
use warband_upstream::{Decoded, RateLimitStatus, Region};

/// Set on responses whose payload did not match the expected schema.
pub const SCHEMA_DRIFT_HEADER: &str = "x-schema-drift";

/// Namespace that clears the response cache instead of an upstream one.
pub const RESPONSE_CACHE_NAMESPACE: &str = "http";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntityBody {
    data: Value,
    cached: bool,
    updated_at: DateTime<Utc>,
}

/// Query string of the rankings route.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    cache: &'static str,
    backend: &'static str,
    uptime_seconds: u64,
}

/// Result of a cache invalidation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateBody {
    pub namespace: String,
    pub removed: u64,
}

fn parse_region(region: &str) -> Result<Region, ApiError> {
    region
        .parse()
        .map_err(|e: warband_upstream::UnknownRegion| ApiError::BadRequest(e.to_string()))
}

fn entity_response<T: Serialize>(result: CacheResult<Decoded<T>>) -> Result<Response, ApiError> {
    let drifted = result.data.is_lenient();
    let data = result
        .data
        .to_json()
        .map_err(|e| ApiError::Internal(format!("Failed to encode response: {e}")))?;

    let mut response = Json(EntityBody {
        data,
        cached: result.cached,
        updated_at: result.updated_at,
    })
    .into_response();

    if drifted {
        response
            .headers_mut()
            .insert(SCHEMA_DRIFT_HEADER, HeaderValue::from_static("true"));
    }
    Ok(response)
}

/// Handle GET /v1/{region}/players/{id}.
pub async fn handle_player(
    Path((region, id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    RequestStrategy(strategy): RequestStrategy,
) -> Result<Response, ApiError> {
    let region = parse_region(&region)?;
    let account_id: u64 = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid account id: {id}")))?;

    tracing::debug!(%region, account_id, ?strategy, "Handling player request");
    let result = state.client().player(region, account_id, strategy).await?;
    entity_response(result)
}

/// Handle GET /v1/{region}/clans/{tag}.
pub async fn handle_clan(
    Path((region, tag)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    RequestStrategy(strategy): RequestStrategy,
) -> Result<Response, ApiError> {
    let region = parse_region(&region)?;

    tracing::debug!(%region, tag = %tag, ?strategy, "Handling clan request");
    let result = state.client().clan(region, &tag, strategy).await?;
    entity_response(result)
}

/// Handle GET /v1/{region}/rankings/players?page=N.
pub async fn handle_player_rankings(
    Path(region): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
    State(state): State<Arc<AppState>>,
    RequestStrategy(strategy): RequestStrategy,
) -> Result<Response, ApiError> {
    let region = parse_region(&region)?;
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let page = query.page.unwrap_or(1);

    tracing::debug!(%region, page, ?strategy, "Handling rankings request");
    let result = state
        .client()
        .player_rankings(region, page, strategy)
        .await?;
    entity_response(result)
}

/// Handle GET /health.
///
/// Reports 503 when the cache backend does not answer a ping.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let store = state.store();
    let (status, body) = match store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            HealthBody {
                status: "ok",
                cache: "up",
                backend: store.backend_kind(),
                uptime_seconds: state.uptime_seconds(),
            },
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed to reach cache backend");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                HealthBody {
                    status: "degraded",
                    cache: "down",
                    backend: store.backend_kind(),
                    uptime_seconds: state.uptime_seconds(),
                },
            )
        }
    };
    (status, Json(body)).into_response()
}

/// Handle GET /internal/rate-limit.
pub async fn handle_rate_limit(State(state): State<Arc<AppState>>) -> Json<RateLimitStatus> {
    Json(state.client().rate_limit_status())
}

/// Handle GET /metrics.
pub async fn handle_metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.client().metrics_text(),
    )
        .into_response()
}

/// Handle DELETE /internal/cache/{namespace}.
///
/// Restricted to workers. `http` clears the response cache, any other name
/// must be one of the upstream namespaces.
pub async fn handle_invalidate(
    Path(namespace): Path<String>,
    State(state): State<Arc<AppState>>,
    strategy: RequestStrategy,
) -> Result<Json<InvalidateBody>, ApiError> {
    if !strategy.is_worker() {
        return Err(ApiError::Forbidden);
    }

    let removed = if namespace == RESPONSE_CACHE_NAMESPACE {
        let removed = state.response_store().delete_pattern("*").await?;
        tracing::info!(removed, "Cleared response cache");
        removed
    } else {
        state.client().invalidate(&namespace).await?
    };

    Ok(Json(InvalidateBody { namespace, removed }))
}
