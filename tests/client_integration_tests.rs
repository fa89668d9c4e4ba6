//! Integration Tests for the API Client
//!
//! Drives the full facade (cache, retry, breaker, planner) against an
//! in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use resilient_client::clock::{FixedJitter, ManualClock};
use resilient_client::config::{CacheConfig, PlannerConfig};
use resilient_client::query::{BatchEntry, BatchOptions};
use resilient_client::retry::{BreakerRegistry, CircuitBreakerConfig, CircuitState};
use resilient_client::{
    ApiClient, ApiRequest, ApiResponse, Config, ErrorKind, Method, RetryConfig, Transport,
    UpstreamError,
};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// == Helper Functions ==

type Handler = dyn Fn(&ApiRequest, usize) -> Result<ApiResponse, UpstreamError> + Send + Sync;

/// Transport that answers through a closure and records every request.
struct MockTransport {
    handler: Box<Handler>,
    calls: AtomicUsize,
    seen: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    fn new(
        handler: impl Fn(&ApiRequest, usize) -> Result<ApiResponse, UpstreamError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn request(&self, index: usize) -> ApiRequest {
        self.seen.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn perform_request(&self, request: &ApiRequest) -> Result<ApiResponse, UpstreamError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        (self.handler)(request, index)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resilient_client=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

fn test_config() -> Config {
    Config {
        cache: CacheConfig {
            ttl_ms: 10_000,
            ..CacheConfig::default()
        },
        retry: RetryConfig::default()
            .with_max_retries(2)
            .with_base_delay_ms(100),
        planner: PlannerConfig::default(),
    }
}

fn client_with(
    transport: Arc<MockTransport>,
    config: Config,
    clock: Arc<ManualClock>,
) -> ApiClient {
    init_tracing();
    ApiClient::builder(transport)
        .config(config)
        .clock(clock)
        .jitter(Arc::new(FixedJitter(1.0)))
        .build()
        .unwrap()
}

fn ok_json(value: Value) -> Result<ApiResponse, UpstreamError> {
    Ok(ApiResponse::json_body(&value))
}

// == REST Caching ==

#[tokio::test]
async fn test_get_is_served_from_cache() {
    let transport = MockTransport::new(|_, _| ok_json(json!({"name": "repo"})));
    let clock = Arc::new(ManualClock::new(1_000_000));
    let client = client_with(transport.clone(), test_config(), clock);

    let first = assert_ok!(client.request(ApiRequest::get("/repos/1")).await);
    let second = assert_ok!(client.request(ApiRequest::get("/repos/1")).await);

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.body, second.body);
    assert_eq!(transport.calls(), 1);

    let metrics = client.cache().get_metrics();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.hit_ratio(), 0.5);
}

#[tokio::test]
async fn test_param_order_shares_cache_entry() {
    let transport = MockTransport::new(|_, _| ok_json(json!([1, 2, 3])));
    let clock = Arc::new(ManualClock::new(1_000_000));
    let client = client_with(transport.clone(), test_config(), clock);

    let a = ApiRequest::get("/search").with_params(json!({"q": "rust", "page": 2}));
    let b = ApiRequest::get("/search").with_params(json!({"page": 2, "q": "rust"}));
    assert_ok!(client.request(a).await);
    let cached = assert_ok!(client.request(b).await);

    assert!(cached.from_cache);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_expired_entry_revalidates_with_etag() {
    let transport = MockTransport::new(|request, index| match index {
        0 => Ok(ApiResponse::new(200, "v1-body").with_header("ETag", "\"v1\"")),
        _ => {
            assert_eq!(request.header("if-none-match"), Some("\"v1\""));
            Ok(ApiResponse::new(304, ""))
        }
    });
    let clock = Arc::new(ManualClock::new(1_000_000));
    let client = client_with(transport.clone(), test_config(), clock.clone());

    assert_ok!(client.request(ApiRequest::get("/repos/1")).await);
    clock.advance(10_001);

    let revalidated = assert_ok!(client.request(ApiRequest::get("/repos/1")).await);
    assert!(revalidated.from_cache);
    assert_eq!(revalidated.body, "v1-body");
    assert_eq!(revalidated.header("etag"), Some("\"v1\""));
    assert_eq!(transport.calls(), 2);

    // Expiry was pushed out again, so the next read is a plain hit.
    let hit = assert_ok!(client.request(ApiRequest::get("/repos/1")).await);
    assert!(hit.from_cache);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_background_refresh_does_not_block_caller() {
    let transport = MockTransport::new(|_, index| match index {
        0 => Ok(ApiResponse::new(200, "old").with_header("ETag", "\"v1\"")),
        _ => Ok(ApiResponse::new(200, "new").with_header("ETag", "\"v2\"")),
    });
    let clock = Arc::new(ManualClock::new(1_000_000));
    let client = client_with(transport.clone(), test_config(), clock.clone());

    assert_ok!(client.request(ApiRequest::get("/repos/1")).await);
    clock.advance(9_000);

    let aging = assert_ok!(client.request(ApiRequest::get("/repos/1")).await);
    assert!(aging.from_cache);
    assert_eq!(aging.body, "old");
    // The refresh is detached and has not run yet.
    assert_eq!(transport.calls(), 1);

    for _ in 0..100 {
        if transport.calls() == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    tokio::task::yield_now().await;

    assert_eq!(transport.request(1).header("if-none-match"), Some("\"v1\""));
    let refreshed = assert_ok!(client.request(ApiRequest::get("/repos/1")).await);
    assert_eq!(refreshed.body, "new");
    assert_eq!(refreshed.header("etag"), Some("\"v2\""));
}

#[tokio::test]
async fn test_repeated_aging_hits_share_one_refresh() {
    let transport = MockTransport::new(|_, index| match index {
        0 => Ok(ApiResponse::new(200, "old")),
        _ => Ok(ApiResponse::new(200, "new")),
    });
    let clock = Arc::new(ManualClock::new(1_000_000));
    let client = client_with(transport.clone(), test_config(), clock.clone());

    assert_ok!(client.request(ApiRequest::get("/repos/1")).await);
    clock.advance(9_000);

    for _ in 0..3 {
        let aging = assert_ok!(client.request(ApiRequest::get("/repos/1")).await);
        assert!(aging.from_cache);
    }
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }

    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_mutation_invalidates_cached_read() {
    let transport = MockTransport::new(|request, _| match request.method {
        Method::Get => ok_json(json!({"stars": 1})),
        _ => ok_json(json!({"ok": true})),
    });
    let clock = Arc::new(ManualClock::new(1_000_000));
    let client = client_with(transport.clone(), test_config(), clock);

    assert_ok!(client.request(ApiRequest::get("/repos/1")).await);
    assert_ok!(
        client
            .request(ApiRequest::new(Method::Patch, "/repos/1").with_params(json!({"stars": 2})))
            .await
    );
    let after = assert_ok!(client.request(ApiRequest::get("/repos/1")).await);

    assert!(!after.from_cache);
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn test_credentials_are_attached() {
    let transport = MockTransport::new(|_, _| ok_json(json!({})));
    let client = ApiClient::builder(transport.clone())
        .credentials(Arc::new(|| "t0k3n".to_string()))
        .build()
        .unwrap();

    assert_ok!(client.request(ApiRequest::get("/user")).await);
    assert_eq!(
        transport.request(0).header("authorization"),
        Some("Bearer t0k3n")
    );
}

#[tokio::test]
async fn test_disabled_cache_passes_through() {
    let transport = MockTransport::new(|_, _| ok_json(json!({})));
    let mut config = test_config();
    config.cache.enabled = false;
    let client = client_with(transport.clone(), config, Arc::new(ManualClock::new(0)));

    assert_ok!(client.request(ApiRequest::get("/user")).await);
    assert_ok!(client.request(ApiRequest::get("/user")).await);
    assert_eq!(transport.calls(), 2);

    let err = assert_err!(client.cache().get("GET /user"));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

// == Retry and Breaker ==

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let transport = MockTransport::new(|_, index| match index {
        0 | 1 => Err(UpstreamError::http(503, "unavailable")),
        _ => ok_json(json!({"ok": true})),
    });
    let client = client_with(transport.clone(), test_config(), Arc::new(ManualClock::new(0)));

    let response = assert_ok!(client.request(ApiRequest::get("/flaky")).await);
    assert_eq!(response.status, 200);
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_not_found_is_not_retried() {
    let transport = MockTransport::new(|_, _| Err(UpstreamError::http(404, "no such repo")));
    let client = client_with(transport.clone(), test_config(), Arc::new(ManualClock::new(0)));

    let err = assert_err!(client.request(ApiRequest::get("/missing")).await);
    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert_eq!(err.status(), Some(404));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_error_status_in_ok_response_is_classified() {
    let transport = MockTransport::new(|_, _| Ok(ApiResponse::new(422, "validation failed")));
    let client = client_with(transport.clone(), test_config(), Arc::new(ManualClock::new(0)));

    let err = assert_err!(client.request(ApiRequest::get("/invalid")).await);
    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert!(err.to_string().contains("validation failed"));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_keep_last_status() {
    let transport = MockTransport::new(|_, _| Err(UpstreamError::http(502, "bad gateway")));
    let client = client_with(transport.clone(), test_config(), Arc::new(ManualClock::new(0)));

    let err = assert_err!(client.request(ApiRequest::get("/down")).await);
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(err.status(), Some(502));
    assert_eq!(err.attempts(), 3);
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_waits_for_retry_after() {
    let transport = MockTransport::new(|_, index| match index {
        0 => Err(UpstreamError::http(429, "slow down").with_header("Retry-After", "2")),
        _ => ok_json(json!({"ok": true})),
    });
    let client = client_with(transport.clone(), test_config(), Arc::new(ManualClock::new(0)));

    let started = tokio::time::Instant::now();
    assert_ok!(client.request(ApiRequest::get("/limited")).await);
    assert!(started.elapsed() >= Duration::from_millis(2_000));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shared_breaker_fails_fast_and_recovers() {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let breaker_config = CircuitBreakerConfig::default()
        .with_failure_threshold(2)
        .with_recovery_timeout_ms(5_000);
    let registry = Arc::new(BreakerRegistry::with_clock(breaker_config, clock.clone()));
    let healthy = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let flag = healthy.clone();
    let transport = MockTransport::new(move |_, _| {
        if flag.load(Ordering::SeqCst) {
            ok_json(json!({"ok": true}))
        } else {
            Err(UpstreamError::http(500, "boom"))
        }
    });
    let mut config = test_config();
    config.retry = RetryConfig::default()
        .with_max_retries(0)
        .with_circuit_breaker(breaker_config);

    let build = || {
        ApiClient::builder(transport.clone())
            .config(config.clone())
            .clock(clock.clone())
            .breaker_registry(registry.clone())
            .target("api.example.com")
            .build()
            .unwrap()
    };
    let first = build();
    let second = build();

    assert_err!(first.request(ApiRequest::get("/a")).await);
    assert_err!(first.request(ApiRequest::get("/b")).await);
    assert_eq!(transport.calls(), 2);

    // Both clients share the now-open breaker.
    let err = assert_err!(second.request(ApiRequest::get("/c")).await);
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(transport.calls(), 2);
    assert!(!registry.is_healthy("api.example.com"));

    clock.advance(5_000);
    healthy.store(true, Ordering::SeqCst);
    assert_ok!(second.request(ApiRequest::get("/c")).await);
    assert_eq!(
        first.retry().breaker().current_state(),
        CircuitState::Closed
    );
}

// == GraphQL ==

/// Leading `first:` literal of a printed query.
fn first_page_size(query: &str) -> usize {
    let start = query.find("first: ").unwrap() + "first: ".len();
    query[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap()
}

fn issues_page(request: &ApiRequest, total: usize) -> Result<ApiResponse, UpstreamError> {
    let query = request.params["query"].as_str().unwrap();
    let start = request.params["variables"]["splitCursor"]
        .as_str()
        .map(|c| c.trim_start_matches('c').parse::<usize>().unwrap())
        .unwrap_or(0);
    let end = (start + first_page_size(query)).min(total);
    let nodes: Vec<Value> = (start..end).map(|id| json!({"id": id})).collect();

    ok_json(json!({
        "data": {"repository": {"issues": {
            "nodes": nodes,
            "pageInfo": {"hasNextPage": end < total, "endCursor": format!("c{}", end)}
        }}}
    }))
}

fn split_config() -> Config {
    let mut config = test_config();
    config.planner.max_points_per_request = 500;
    config
}

const ISSUES_QUERY: &str = "query {
    repository(owner: \"o\", name: \"r\") {
        issues(first: 100) {
            nodes { id comments(first: 10) { totalCount } }
        }
    }
}";

#[tokio::test]
async fn test_graphql_split_pages_are_merged_in_order() {
    let transport = MockTransport::new(|request, _| issues_page(request, 100));
    let client = client_with(transport.clone(), split_config(), Arc::new(ManualClock::new(0)));

    let data = assert_ok!(client.graphql(ISSUES_QUERY, json!({})).await);

    assert_eq!(transport.calls(), 3);
    let ids: Vec<u64> = data["repository"]["issues"]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, (0..100).collect::<Vec<u64>>());
    assert_eq!(data["repository"]["issues"]["pageInfo"]["hasNextPage"], false);
    assert_eq!(data["repository"]["issues"]["pageInfo"]["endCursor"], "c100");

    let second = transport.request(1);
    assert_eq!(second.method, Method::Post);
    assert_eq!(second.path, "/graphql");
    assert_eq!(second.params["variables"]["splitCursor"], "c45");
}

#[tokio::test]
async fn test_graphql_stops_when_upstream_has_no_more_pages() {
    let transport = MockTransport::new(|request, _| issues_page(request, 30));
    let client = client_with(transport.clone(), split_config(), Arc::new(ManualClock::new(0)));

    let data = assert_ok!(client.graphql(ISSUES_QUERY, json!({})).await);

    assert_eq!(transport.calls(), 1);
    assert_eq!(
        data["repository"]["issues"]["nodes"].as_array().unwrap().len(),
        30
    );
}

#[tokio::test]
async fn test_graphql_cheap_query_sent_once() {
    let transport = MockTransport::new(|_, _| ok_json(json!({"data": {"viewer": {"login": "me"}}})));
    let client = client_with(transport.clone(), test_config(), Arc::new(ManualClock::new(0)));

    let data = assert_ok!(
        client
            .graphql("query($n: Int) { viewer { login } }", json!({"n": 1}))
            .await
    );
    assert_eq!(data, json!({"viewer": {"login": "me"}}));
    assert_eq!(transport.request(0).params["variables"], json!({"n": 1}));
}

#[tokio::test]
async fn test_graphql_too_expensive_is_rejected_before_dispatch() {
    let transport = MockTransport::new(|_, _| ok_json(json!({"data": {}})));
    let client = client_with(transport.clone(), test_config(), Arc::new(ManualClock::new(0)));

    let err = assert_err!(
        client
            .graphql("{ a(first: 2) { b(first: 1000) { c(first: 1000) { id } } } }", json!({}))
            .await
    );
    assert_eq!(err.kind(), ErrorKind::TooExpensive);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_graphql_huge_page_is_rejected_before_dispatch() {
    let transport = MockTransport::new(|_, _| ok_json(json!({"data": {}})));
    let client = client_with(transport.clone(), test_config(), Arc::new(ManualClock::new(0)));

    let err = assert_err!(
        client
            .graphql("query { repos(first: 1000000000000) { nodes { id } } }", json!({}))
            .await
    );
    assert_eq!(err.kind(), ErrorKind::TooExpensive);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_graphql_errors_are_permanent() {
    let transport = MockTransport::new(|_, _| {
        ok_json(json!({"errors": [{"message": "Field 'nope' doesn't exist on type 'Query'"}]}))
    });
    let client = client_with(transport.clone(), test_config(), Arc::new(ManualClock::new(0)));

    let err = assert_err!(client.graphql("{ nope }", json!({})).await);
    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert!(err.to_string().contains("nope"));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_graphql_batch_returns_every_alias() {
    let aliases = ["rust", "tokio", "serde"];
    let transport = MockTransport::new(move |request, _| {
        let query = request.params["query"].as_str().unwrap();
        let mut data = serde_json::Map::new();
        for alias in aliases {
            if query.contains(&format!("{}: repository", alias)) {
                data.insert(alias.to_string(), json!({"issues": {"totalCount": alias.len()}}));
            }
        }
        ok_json(json!({ "data": data }))
    });
    let client = client_with(transport.clone(), test_config(), Arc::new(ManualClock::new(0)));

    let entries: Vec<BatchEntry> = aliases
        .iter()
        .map(|alias| {
            BatchEntry::new(
                *alias,
                "query($name: String!) { repository(name: $name) { issues(first: 30) { totalCount } } }",
            )
            .with_variable("name", json!(alias))
        })
        .collect();
    let options = BatchOptions {
        max_points_per_batch: Some(70),
    };

    let results = assert_ok!(client.graphql_batch(&entries, &options).await);

    assert_eq!(transport.calls(), 2);
    assert_eq!(results.len(), 3);
    for alias in aliases {
        assert_eq!(results[alias]["issues"]["totalCount"], alias.len());
    }
    let first_query = transport.request(0).params["query"].as_str().unwrap().to_string();
    assert!(first_query.contains("name: \"rust\""));
    assert!(!first_query.contains('$'));
}
