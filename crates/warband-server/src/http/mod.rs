//! HTTP server implementation using axum.
//!
//! Request flow through the route layers, outermost first:
//! tracing, compression, CORS, strategy selection, response cache, handler.

use crate::error::ServerError;
use crate::middleware::{response_cache, strategy_selector};
use crate::server::AppState;
use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod handlers;

/// Create HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/{region}/players/{id}", get(handlers::handle_player))
        .route("/v1/{region}/clans/{tag}", get(handlers::handle_clan))
        .route(
            "/v1/{region}/rankings/players",
            get(handlers::handle_player_rankings),
        )
        .route("/health", get(handlers::handle_health))
        .route("/metrics", get(handlers::handle_metrics))
        .route("/internal/rate-limit", get(handlers::handle_rate_limit))
        .route(
            "/internal/cache/{namespace}",
            delete(handlers::handle_invalidate),
        )
        // Added first so it runs after the strategy is known
        .layer(from_fn_with_state(Arc::clone(&state), response_cache))
        .layer(from_fn_with_state(Arc::clone(&state), strategy_selector))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start HTTP server and serve until `shutdown` resolves.
///
/// # Errors
///
/// Returns `ServerError` if the server fails to bind or encounters a runtime error.
pub async fn start_server<F>(
    bind_addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|source| ServerError::HttpBindFailed {
            addr: bind_addr,
            source,
        })?;

    tracing::info!("HTTP server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Shutdown(format!("HTTP server error: {e}")))?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::middleware::ResponseCacheConfig;
    use warband_cache::{CacheConfig, KvStore};
    use warband_upstream::{UpstreamClient, UpstreamConfig};

    #[tokio::test]
    async fn test_router_creation() {
        let store = KvStore::open(CacheConfig::memory()).await.unwrap();
        let config = UpstreamConfig::parse("http://127.0.0.1:9", "key").unwrap();
        let client = UpstreamClient::new(config, &store).unwrap();
        let state = Arc::new(AppState::from_parts(
            client,
            store,
            ResponseCacheConfig::default(),
            None,
        ));
        let _router = create_router(state);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let store = KvStore::open(CacheConfig::memory()).await.unwrap();
        let config = UpstreamConfig::parse("http://127.0.0.1:9", "key").unwrap();
        let client = UpstreamClient::new(config, &store).unwrap();
        let state = Arc::new(AppState::from_parts(
            client,
            store,
            ResponseCacheConfig::default(),
            None,
        ));

        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let result = start_server(addr, state, std::future::ready(())).await;
        assert!(matches!(result, Err(ServerError::HttpBindFailed { .. })));
    }
}
