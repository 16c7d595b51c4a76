//! Integration tests for the upstream client against a mock API.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use warband_cache::{CacheConfig, KvStore};
use warband_upstream::{
    ArchiveSink, ClientError, EntityKind, FetchError, FetchStrategy, MemoryArchive, NoopArchive,
    OperationTtls, RateLimitConfig, Region, RetryPolicy, UpstreamClient, UpstreamConfig,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        multiplier: 2.0,
        jitter: false,
    }
}

fn config(server: &MockServer) -> UpstreamConfig {
    UpstreamConfig::parse(&server.uri(), "test-key")
        .expect("mock server URI is valid")
        .with_retry(fast_retry(2))
        .with_timeout(Duration::from_secs(2))
        .with_rate_limit(RateLimitConfig {
            capacity: 10,
            refill_per_sec: 0.0,
        })
}

async fn client_with(config: UpstreamConfig, archive: Arc<dyn ArchiveSink>) -> UpstreamClient {
    let store = KvStore::open(CacheConfig::memory())
        .await
        .expect("memory store opens");
    UpstreamClient::with_archive(config, &store, archive).expect("valid client config")
}

async fn client(server: &MockServer) -> UpstreamClient {
    client_with(config(server), Arc::new(NoopArchive)).await
}

fn player_body() -> serde_json::Value {
    json!({
        "account_id": 12345,
        "nickname": "Tanker",
        "clan_id": 77,
        "statistics": {"battles": 100, "wins": 55}
    })
}

fn rankings_body() -> serde_json::Value {
    json!({
        "page": 1,
        "total": 2,
        "entries": [
            {"rank": 1, "account_id": 1, "nickname": "First", "rating": 2100.5},
            {"rank": 2, "account_id": 2, "nickname": "Second", "rating": 1980.0}
        ]
    })
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |r| r.len())
}

#[tokio::test]
async fn test_cache_first_serves_second_call_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/eu/players/12345"))
        .and(query_param("api_key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(player_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).await;

    let first = client
        .player(Region::Eu, 12345, FetchStrategy::CacheFirst)
        .await
        .unwrap();
    assert!(!first.cached);
    assert_eq!(first.data.strict().unwrap().nickname, "Tanker");
    assert_eq!(client.rate_limit_status().available_tokens, 9);

    let second = client
        .player(Region::Eu, 12345, FetchStrategy::CacheFirst)
        .await
        .unwrap();
    assert!(second.cached);
    assert_eq!(second.updated_at, first.updated_at);
    assert_eq!(second.data, first.data);

    // Cache hits do not consume tokens
    assert_eq!(client.rate_limit_status().available_tokens, 9);
    assert_eq!(client.limiter().granted(), 1);
}

#[tokio::test]
async fn test_regions_are_cached_separately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/eu/players/12345"))
        .respond_with(ResponseTemplate::new(200).set_body_json(player_body()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/na/players/12345"))
        .respond_with(ResponseTemplate::new(200).set_body_json(player_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).await;
    for region in [Region::Eu, Region::Na, Region::Eu, Region::Na] {
        client
            .player(region, 12345, FetchStrategy::CacheFirst)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_concurrent_misses_share_one_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/eu/players/12345"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(player_body())
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).await;

    let calls: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .player(Region::Eu, 12345, FetchStrategy::CacheFirst)
                    .await
            })
        })
        .collect();
    let mut results = Vec::new();
    for call in calls {
        results.push(call.await.unwrap().unwrap());
    }

    assert_eq!(results.iter().filter(|r| !r.cached).count(), 1);
    assert!(
        results
            .iter()
            .all(|r| r.updated_at == results[0].updated_at)
    );
}

#[tokio::test]
async fn test_fetch_first_always_calls_upstream_and_warms_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/eu/clans/ABC"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "clan_id": 500,
            "tag": "ABC",
            "name": "Alpha Bravo",
            "members_count": 42
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server).await;

    for _ in 0..2 {
        let fresh = client
            .clan(Region::Eu, "abc", FetchStrategy::FetchFirst)
            .await
            .unwrap();
        assert!(!fresh.cached);
    }

    client.store().flush().await;

    let cached = client
        .clan(Region::Eu, "ABC", FetchStrategy::CacheFirst)
        .await
        .unwrap();
    assert!(cached.cached);
    assert_eq!(cached.data.strict().unwrap().members_count, 42);
}

#[tokio::test]
async fn test_abandoned_fetch_first_still_caches_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/eu/players/12345"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(player_body())
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).await;

    let caller = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .player(Region::Eu, 12345, FetchStrategy::FetchFirst)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    caller.abort();

    tokio::time::sleep(Duration::from_millis(400)).await;
    client.store().flush().await;

    let cached = client
        .player(Region::Eu, 12345, FetchStrategy::CacheFirst)
        .await
        .unwrap();
    assert!(cached.cached);
    assert_eq!(cached.data.strict().unwrap().nickname, "Tanker");
    assert_eq!(client.rate_limit_status().available_tokens, 9);
}

#[tokio::test]
async fn test_not_found_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "unknown account"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).await;
    let err = client
        .player(Region::Eu, 1, FetchStrategy::CacheFirst)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::NotFound(_)));
    assert_eq!(err.to_string(), "Player not found");
}

#[tokio::test]
async fn test_upstream_429_maps_to_rate_limited_with_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).await;
    let err = client
        .player(Region::Eu, 1, FetchStrategy::FetchFirst)
        .await
        .unwrap_err();

    assert_eq!(err.retry_after_hint(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_error_response_with_body_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).await;
    let err = client
        .player(Region::Eu, 1, FetchStrategy::CacheFirst)
        .await
        .unwrap_err();

    assert_eq!(err.upstream_status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
}

#[tokio::test]
async fn test_empty_gateway_error_is_retried_and_consumes_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let client = client(&server).await;
    let err = client
        .player(Region::Eu, 1, FetchStrategy::CacheFirst)
        .await
        .unwrap_err();

    assert_eq!(err.upstream_status(), Some(StatusCode::BAD_GATEWAY));
    // One token per attempt
    assert_eq!(client.rate_limit_status().available_tokens, 7);
}

#[tokio::test]
async fn test_timeout_is_retried_then_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(player_body())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = client_with(
        config(&server)
            .with_timeout(Duration::from_millis(100))
            .with_retry(fast_retry(1)),
        Arc::new(NoopArchive),
    )
    .await;

    let err = client
        .player(Region::Eu, 1, FetchStrategy::FetchFirst)
        .await
        .unwrap_err();

    match err {
        ClientError::Upstream { source, .. } => {
            assert!(matches!(source, FetchError::Timeout(_)));
        }
        other => panic!("expected upstream timeout, got {other:?}"),
    }
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn test_schema_drift_passes_raw_payload_through() {
    let server = MockServer::start().await;
    let drifted = json!({
        "accountId": 12345,
        "nickname": "Tanker",
        "stats": {"battles": 100}
    });
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drifted.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let archive = Arc::new(MemoryArchive::new());
    let client = client_with(config(&server), archive.clone()).await;

    let first = client
        .player(Region::Eu, 12345, FetchStrategy::CacheFirst)
        .await
        .unwrap();
    assert!(first.data.is_lenient());
    assert!(!first.data.warnings().is_empty());
    assert_eq!(first.data.to_json().unwrap(), drifted);

    let second = client
        .player(Region::Eu, 12345, FetchStrategy::CacheFirst)
        .await
        .unwrap();
    assert!(second.cached);
    assert!(second.data.is_lenient());

    // Untyped payloads are never archived
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(archive.records().is_empty());
    assert!(client.metrics_text().contains("warband_schema_drift_total 1"));
}

#[tokio::test]
async fn test_rankings_fall_back_to_stale_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/eu/rankings/players"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rankings_body()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/eu/rankings/players"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = client_with(
        config(&server).with_ttls(OperationTtls::uniform(Duration::from_secs(1))),
        Arc::new(NoopArchive),
    )
    .await;

    let fresh = client
        .player_rankings(Region::Eu, 1, FetchStrategy::CacheFirst)
        .await
        .unwrap();
    assert!(!fresh.cached);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let stale = client
        .player_rankings(Region::Eu, 1, FetchStrategy::CacheFirst)
        .await
        .unwrap();
    assert!(stale.cached);
    assert_eq!(stale.updated_at, fresh.updated_at);
    assert_eq!(stale.data, fresh.data);
    assert_eq!(client.store().stats().stale_served, 1);
}

#[tokio::test]
async fn test_strict_operations_do_not_fall_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/eu/players/12345"))
        .respond_with(ResponseTemplate::new(200).set_body_json(player_body()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = client_with(
        config(&server).with_ttls(OperationTtls::uniform(Duration::from_secs(1))),
        Arc::new(NoopArchive),
    )
    .await;

    client
        .player(Region::Eu, 12345, FetchStrategy::CacheFirst)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let err = client
        .player(Region::Eu, 12345, FetchStrategy::CacheFirst)
        .await
        .unwrap_err();
    assert_eq!(err.upstream_status(), Some(StatusCode::SERVICE_UNAVAILABLE));
}

#[tokio::test]
async fn test_fresh_fetch_records_alias_in_archive() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(player_body()))
        .mount(&server)
        .await;

    let archive = Arc::new(MemoryArchive::new());
    let client = client_with(config(&server), archive.clone()).await;

    client
        .player(Region::Eu, 12345, FetchStrategy::FetchFirst)
        .await
        .unwrap();

    let mut history = Vec::new();
    for _ in 0..50 {
        history = archive.history(EntityKind::Player, Region::Eu, "12345");
        if !history.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(history, vec!["Tanker".to_string()]);
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/eu/players/12345"))
        .respond_with(ResponseTemplate::new(200).set_body_json(player_body()))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server).await;

    client
        .player(Region::Eu, 12345, FetchStrategy::CacheFirst)
        .await
        .unwrap();
    assert_eq!(client.invalidate("player").await.unwrap(), 1);

    let refetched = client
        .player(Region::Eu, 12345, FetchStrategy::CacheFirst)
        .await
        .unwrap();
    assert!(!refetched.cached);
}
