//! End-to-end tests for the request executor.
//!
//! Each test starts its own axum server on an ephemeral port, so every test
//! gets a distinct host key and therefore a fresh circuit breaker.

use apilens_core::network::{
    CircuitBreakerConfig, CircuitState, ExecuteOptions, ExecutorConfig, HttpMethod, HttpRequest,
    RequestExecutor, ResponseBody, RetryConfig,
};
use apilens_core::ErrorKind;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
struct Hits(Arc<AtomicU32>);

impl Hits {
    fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

async fn always_500(State(hits): State<Hits>) -> impl IntoResponse {
    hits.bump();
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn flaky(State(hits): State<Hits>) -> impl IntoResponse {
    if hits.bump() <= 2 {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"ok": false})))
    } else {
        (StatusCode::OK, Json(json!({"ok": true})))
    }
}

async fn not_found(State(hits): State<Hits>) -> impl IntoResponse {
    hits.bump();
    (StatusCode::NOT_FOUND, Json(json!({"error": "missing"})))
}

async fn echo(State(hits): State<Hits>, Json(body): Json<Value>) -> Json<Value> {
    hits.bump();
    Json(body)
}

async fn inspect(
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    let trace = headers
        .get("x-trace")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({"query": query, "trace": trace}))
}

async fn slow(State(hits): State<Hits>) -> &'static str {
    hits.bump();
    tokio::time::sleep(Duration::from_millis(5000)).await;
    "late"
}

async fn plain() -> &'static str {
    "hello world"
}

async fn spawn_mock() -> (SocketAddr, Hits) {
    let hits = Hits::default();
    let app = Router::new()
        .route("/always-500", get(always_500))
        .route("/flaky", get(flaky))
        .route("/not-found", get(not_found))
        .route("/echo", post(echo))
        .route("/inspect", get(inspect))
        .route("/slow", get(slow))
        .route("/plain", get(plain))
        .route("/redirect", get(|| async { Redirect::temporary("/plain") }))
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}

fn fast_executor() -> RequestExecutor {
    RequestExecutor::with_config(ExecutorConfig {
        retry: RetryConfig::new().with_base_delay(Duration::from_millis(10)),
        ..ExecutorConfig::default()
    })
    .unwrap()
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

#[tokio::test]
async fn test_single_attempt_invokes_transport_once() {
    let (addr, hits) = spawn_mock().await;
    let executor = fast_executor();

    let result = executor
        .execute_request(
            HttpRequest::get(url(addr, "/always-500")),
            &ExecuteOptions::default().with_max_retries(1),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::UpstreamServerError));
    assert_eq!(result.response.status, 500);
    assert_eq!(result.response.body, ResponseBody::Text("boom".into()));
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_invoke_exactly_max_attempts() {
    let (addr, hits) = spawn_mock().await;
    let executor = fast_executor();

    for raw_mode in [false, true] {
        let before = hits.count();
        let result = executor
            .execute_request(
                HttpRequest::get(url(addr, "/always-500")),
                &ExecuteOptions::default()
                    .with_max_retries(4)
                    .with_raw_mode(raw_mode)
                    .without_circuit_breaker(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.attempts, 4);
        assert_eq!(hits.count() - before, 4, "raw_mode={}", raw_mode);
    }
}

#[tokio::test]
async fn test_backoff_delays_accumulate() {
    let (addr, hits) = spawn_mock().await;
    let executor = RequestExecutor::with_config(ExecutorConfig {
        retry: RetryConfig::new()
            .with_base_delay(Duration::from_millis(100))
            .with_multiplier(2.0),
        ..ExecutorConfig::default()
    })
    .unwrap();

    let started = Instant::now();
    let result = executor
        .execute_request(
            HttpRequest::get(url(addr, "/always-500")),
            &ExecuteOptions::default().with_max_retries(3),
        )
        .await;

    // 100ms + 200ms of backoff between three attempts
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(result.response.response_time >= 300);
    assert_eq!(hits.count(), 3);
}

#[tokio::test]
async fn test_recovers_after_server_errors_with_default_backoff() {
    let (addr, hits) = spawn_mock().await;
    let executor = RequestExecutor::new().unwrap();

    let result = executor
        .execute_request(
            HttpRequest::get(url(addr, "/flaky")),
            &ExecuteOptions::default().with_max_retries(3),
        )
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.response.status, 200);
    assert_eq!(result.response.body, ResponseBody::Json(json!({"ok": true})));
    assert_eq!(hits.count(), 3);
    assert_eq!(result.attempts, 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let (addr, hits) = spawn_mock().await;
    let executor = fast_executor();

    let result = executor
        .execute_request(
            HttpRequest::get(url(addr, "/not-found")),
            &ExecuteOptions::default().with_max_retries(3),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::UpstreamClientError));
    assert_eq!(result.response.body, ResponseBody::Json(json!({"error": "missing"})));
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn test_circuit_opens_after_threshold() {
    let (addr, hits) = spawn_mock().await;
    let executor = RequestExecutor::with_config(ExecutorConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            volume_threshold: Some(5),
            ..CircuitBreakerConfig::default()
        },
        ..ExecutorConfig::default()
    })
    .unwrap();
    let options = ExecuteOptions::default().with_max_retries(1);

    let mut results = Vec::new();
    for _ in 0..10 {
        results.push(
            executor
                .execute_request(HttpRequest::get(url(addr, "/always-500")), &options)
                .await,
        );
    }

    for result in &results[..5] {
        assert_eq!(result.error_kind, Some(ErrorKind::UpstreamServerError));
    }
    for result in &results[5..] {
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::CircuitOpen));
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .to_lowercase()
            .contains("circuit breaker is open"));
        assert_eq!(result.response.status, 0);
        assert_eq!(result.attempts, 0);
    }
    assert_eq!(hits.count(), 5);
    assert_eq!(
        executor.circuit_state(&addr.to_string()).await,
        Some(CircuitState::Open)
    );
}

#[tokio::test]
async fn test_json_echo_round_trip() {
    let (addr, hits) = spawn_mock().await;
    let executor = fast_executor();
    let payload = json!({
        "name": "widget",
        "tags": ["a", "b"],
        "dimensions": {"w": 1.5, "h": 2},
        "active": true,
        "parent": null
    });

    for raw_mode in [false, true] {
        let request = HttpRequest::post(url(addr, "/echo")).with_body(payload.clone());
        let result = executor
            .execute_request(request, &ExecuteOptions::default().with_raw_mode(raw_mode))
            .await;

        assert!(result.success, "raw_mode={} {:?}", raw_mode, result.error);
        assert_eq!(result.response.body, ResponseBody::Json(payload.clone()));
        assert!(result
            .response
            .content_type()
            .unwrap()
            .starts_with("application/json"));
    }
    assert_eq!(hits.count(), 2);
}

#[tokio::test]
async fn test_params_and_headers_reach_server() {
    let (addr, _hits) = spawn_mock().await;
    let executor = fast_executor();

    for raw_mode in [false, true] {
        let request = HttpRequest::get(url(addr, "/inspect?page=2"))
            .with_param("q", "hello world")
            .with_header("X-Trace", "t-1");
        let result = executor
            .execute_request(request, &ExecuteOptions::default().with_raw_mode(raw_mode))
            .await;

        assert_eq!(
            result.response.body,
            ResponseBody::Json(json!({
                "query": {"page": "2", "q": "hello world"},
                "trace": "t-1"
            })),
            "raw_mode={}",
            raw_mode
        );
    }
}

#[tokio::test]
async fn test_identical_requests_yield_identical_responses() {
    let (addr, _hits) = spawn_mock().await;
    let request = HttpRequest::new(HttpMethod::Post, url(addr, "/echo")).with_body(json!({"n": 1}));

    let first = fast_executor()
        .execute_request(request.clone(), &ExecuteOptions::default())
        .await;
    let second = fast_executor()
        .execute_request(request.clone(), &ExecuteOptions::default())
        .await;

    assert_eq!(first.response.status, second.response.status);
    assert_eq!(first.response.body, second.response.body);
    assert_eq!(first.request, request);
}

#[tokio::test]
async fn test_timeout_applies_per_attempt() {
    let (addr, _hits) = spawn_mock().await;
    let executor = fast_executor();

    for raw_mode in [false, true] {
        let started = Instant::now();
        let result = executor
            .execute_request(
                HttpRequest::get(url(addr, "/slow")).with_timeout_ms(100),
                &ExecuteOptions::default()
                    .with_max_retries(1)
                    .with_raw_mode(raw_mode),
            )
            .await;
        let elapsed = started.elapsed();

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert!(result.error.unwrap().to_lowercase().contains("timeout"));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(2000), "took {:?}", elapsed);
    }
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let executor = fast_executor();
    for raw_mode in [false, true] {
        let result = executor
            .execute_request(
                HttpRequest::get(url(addr, "/")),
                &ExecuteOptions::default()
                    .with_max_retries(2)
                    .with_raw_mode(raw_mode)
                    .without_circuit_breaker(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ConnectionRefused), "raw_mode={}", raw_mode);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.response.status, 0);
    }
}

#[tokio::test]
async fn test_invalid_url_fails_fast() {
    let executor = fast_executor();
    let result = executor
        .execute_request(HttpRequest::get("ftp://example.com/file"), &ExecuteOptions::default())
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    assert_eq!(result.attempts, 0);
    assert!(executor.circuit_breaker_stats().await.is_empty());
}

#[tokio::test]
async fn test_redirect_policy() {
    let (addr, _hits) = spawn_mock().await;
    let executor = fast_executor();

    let followed = executor
        .execute_request(HttpRequest::get(url(addr, "/redirect")), &ExecuteOptions::default())
        .await;
    assert_eq!(followed.response.status, 200);
    assert_eq!(followed.response.body, ResponseBody::Text("hello world".into()));

    let options = ExecuteOptions {
        follow_redirects: false,
        ..ExecuteOptions::default()
    };
    let not_followed = executor
        .execute_request(HttpRequest::get(url(addr, "/redirect")), &options)
        .await;
    assert!(not_followed.success);
    assert_eq!(not_followed.response.status, 307);
    assert_eq!(not_followed.response.headers["location"], "/plain");
}
