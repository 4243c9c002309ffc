//! RequestExecutor - runs one `HttpRequest` through breaker, retry and transport.
//!
//! Layering, outermost first:
//! - the destination host's circuit breaker (one guarded call per request)
//! - the retry policy (up to `max_attempts` transport invocations)
//! - a single transport attempt with a fresh per-attempt timeout
//!
//! Every outcome is folded into an `ApiTestResult`; nothing is returned as an
//! error to the caller.

use crate::network::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
use crate::network::retry::{retry_async, RetryConfig};
use crate::network::transport::{build_url, host_key, ManagedTransport, RawTransport, Transport};
use crate::network::types::{ApiTestResult, HttpRequest, HttpResponse};
use crate::config::NetworkConfig;
use crate::{ProbeError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Executor-wide configuration shared by all requests.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Backoff policy; `max_attempts` is the default when a call sets none.
    pub retry: RetryConfig,
    /// Configuration for every per-host breaker created by this executor.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-attempt timeout for requests without their own.
    pub default_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            default_timeout: NetworkConfig::REQUEST_TIMEOUT,
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Total attempts, including the first. `None` uses the executor default.
    pub max_retries: Option<u32>,
    /// Use the raw-socket transport instead of the managed client.
    pub raw_mode: bool,
    /// Skip the per-host circuit breaker entirely.
    pub disable_circuit_breaker: bool,
    /// Follow redirects (managed transport only).
    pub follow_redirects: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            max_retries: None,
            raw_mode: false,
            disable_circuit_breaker: false,
            follow_redirects: true,
        }
    }
}

impl ExecuteOptions {
    pub fn with_max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = Some(attempts);
        self
    }

    pub fn with_raw_mode(mut self, raw_mode: bool) -> Self {
        self.raw_mode = raw_mode;
        self
    }

    pub fn without_circuit_breaker(mut self) -> Self {
        self.disable_circuit_breaker = true;
        self
    }
}

/// Executes requests and owns the host -> circuit breaker map.
///
/// The map lives as long as the executor; construct a fresh executor (or call
/// [`RequestExecutor::clear_circuit_breakers`]) to start from clean state.
pub struct RequestExecutor {
    config: ExecutorConfig,
    managed: Arc<dyn Transport>,
    managed_no_redirects: Arc<dyn Transport>,
    raw: Arc<dyn Transport>,
    /// Overrides transport selection when set.
    custom_transport: Option<Arc<dyn Transport>>,
    circuit_breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl RequestExecutor {
    /// Create an executor with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(ExecutorConfig::default())
    }

    /// Create an executor with custom configuration. Invalid retry or breaker
    /// settings are rejected here rather than on first use.
    pub fn with_config(config: ExecutorConfig) -> Result<Self> {
        config.retry.validate()?;
        config.circuit_breaker.validate()?;
        Ok(Self {
            config,
            managed: Arc::new(ManagedTransport::with_redirects(true)?),
            managed_no_redirects: Arc::new(ManagedTransport::with_redirects(false)?),
            raw: Arc::new(RawTransport::new()?),
            custom_transport: None,
            circuit_breakers: RwLock::new(HashMap::new()),
        })
    }

    /// Route every attempt through `transport`, ignoring `raw_mode` and
    /// `follow_redirects`.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.custom_transport = Some(transport);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute `request` and report the outcome.
    ///
    /// `response.response_time` covers every attempt and backoff sleep.
    pub async fn execute_request(
        &self,
        request: HttpRequest,
        options: &ExecuteOptions,
    ) -> ApiTestResult {
        let timestamp = Utc::now().to_rfc3339();
        let started = Instant::now();
        let attempts = AtomicU32::new(0);

        let outcome = self.run(&request, options, &attempts).await;
        let elapsed = started.elapsed().as_millis() as u64;
        let attempts = attempts.load(Ordering::SeqCst);

        match outcome {
            Ok(mut response) => {
                response.response_time = elapsed;
                debug!(
                    "{} {} -> {} in {}ms ({} attempts)",
                    request.method, request.url, response.status, elapsed, attempts
                );
                ApiTestResult::succeeded(request, response, timestamp, attempts)
            }
            Err(err) => {
                let mut response = match &err {
                    ProbeError::UpstreamStatus { response, .. } => (**response).clone(),
                    _ => HttpResponse::placeholder(),
                };
                response.response_time = elapsed;
                warn!(
                    "{} {} failed after {} attempts: {}",
                    request.method, request.url, attempts, err
                );
                ApiTestResult::failed(request, response, timestamp, &err, attempts)
            }
        }
    }

    async fn run(
        &self,
        request: &HttpRequest,
        options: &ExecuteOptions,
        attempts: &AtomicU32,
    ) -> Result<HttpResponse> {
        let url = build_url(request)?;

        let max_attempts = match options.max_retries {
            Some(0) => {
                return Err(ProbeError::validation(
                    "max_retries",
                    "must allow at least one attempt",
                ))
            }
            Some(n) => n,
            None => self.config.retry.max_attempts,
        };
        let timeout = match request.timeout {
            Some(0) => return Err(ProbeError::validation("timeout", "must be positive")),
            Some(ms) => Duration::from_millis(ms),
            None => self.config.default_timeout,
        };

        let retry = RetryConfig {
            max_attempts,
            ..self.config.retry.clone()
        };
        let transport = self.select_transport(options);
        let transport = transport.as_ref();

        let attempt = || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                "Attempt {}/{} for {} via {}",
                n,
                max_attempts,
                url,
                transport.name()
            );
            async move {
                let response = transport.execute(request, timeout).await?;
                check_status(response)
            }
        };
        let retried = move || async move {
            retry_async(&retry, attempt, ProbeError::is_retryable)
                .await
                .result
        };

        if options.disable_circuit_breaker {
            retried().await
        } else {
            let breaker = self.breaker_for(&host_key(&url)).await;
            breaker.execute(retried).await
        }
    }

    fn select_transport(&self, options: &ExecuteOptions) -> Arc<dyn Transport> {
        if let Some(custom) = &self.custom_transport {
            return custom.clone();
        }
        if options.raw_mode {
            self.raw.clone()
        } else if options.follow_redirects {
            self.managed.clone()
        } else {
            self.managed_no_redirects.clone()
        }
    }

    // === Circuit Breaker Management ===

    /// Get or create the breaker for `host` (`host[:port]`).
    pub async fn breaker_for(&self, host: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.read().await.get(host) {
            return breaker.clone();
        }

        let mut breakers = self.circuit_breakers.write().await;
        breakers
            .entry(host.to_string())
            .or_insert_with(|| {
                debug!("Creating circuit breaker for {}", host);
                Arc::new(CircuitBreaker::with_config(
                    host,
                    self.config.circuit_breaker.clone(),
                ))
            })
            .clone()
    }

    /// Current state of the breaker for `host`, if one exists.
    pub async fn circuit_state(&self, host: &str) -> Option<CircuitState> {
        self.circuit_breakers
            .read()
            .await
            .get(host)
            .map(|breaker| breaker.state())
    }

    /// Snapshot of every breaker, sorted by host.
    pub async fn circuit_breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers = self.circuit_breakers.read().await;
        let mut stats: Vec<_> = breakers.values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.host.cmp(&b.host));
        stats
    }

    /// Reset the breaker for `host`. Returns false if none exists.
    pub async fn reset_circuit_breaker(&self, host: &str) -> bool {
        match self.circuit_breakers.read().await.get(host) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Drop all breakers.
    pub async fn clear_circuit_breakers(&self) {
        self.circuit_breakers.write().await.clear();
    }
}

/// Turn an error status into an `UpstreamStatus` failure carrying the response.
fn check_status(response: HttpResponse) -> Result<HttpResponse> {
    if response.status >= 400 {
        return Err(ProbeError::UpstreamStatus {
            status: response.status,
            status_text: response.status_text.clone(),
            response: Box::new(response),
        });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::network::types::ResponseBody;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    /// Returns the scripted statuses in order, repeating the last one.
    struct ScriptedTransport {
        statuses: Vec<u16>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(statuses: Vec<u16>) -> Arc<Self> {
            Arc::new(Self {
                statuses,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&self, _request: &HttpRequest, _timeout: Duration) -> Result<HttpResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let status = self.statuses[n.min(self.statuses.len() - 1)];
            Ok(HttpResponse {
                status,
                status_text: String::new(),
                headers: BTreeMap::new(),
                body: ResponseBody::Text(format!("call {}", n + 1)),
                response_time: 0,
            })
        }
    }

    struct RefusingTransport {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for RefusingTransport {
        fn name(&self) -> &'static str {
            "refusing"
        }

        async fn execute(&self, _request: &HttpRequest, _timeout: Duration) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProbeError::ConnectionRefused {
                host: "test".into(),
            })
        }
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            retry: RetryConfig::new().with_base_delay(Duration::from_millis(1)),
            ..ExecutorConfig::default()
        }
    }

    fn executor_with(transport: Arc<dyn Transport>) -> RequestExecutor {
        RequestExecutor::with_config(fast_config())
            .unwrap()
            .with_transport(transport)
    }

    #[tokio::test]
    async fn test_success_after_server_errors() {
        let transport = ScriptedTransport::new(vec![500, 500, 200]);
        let executor = executor_with(transport.clone());

        let result = executor
            .execute_request(
                HttpRequest::get("http://mock.local/items"),
                &ExecuteOptions::default().with_max_retries(3),
            )
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.response.status, 200);
        assert_eq!(result.attempts, 3);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_client_error_not_retried_and_keeps_response() {
        let transport = ScriptedTransport::new(vec![404]);
        let executor = executor_with(transport.clone());

        let result = executor
            .execute_request(
                HttpRequest::get("http://mock.local/missing"),
                &ExecuteOptions::default(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::UpstreamClientError));
        assert_eq!(result.response.status, 404);
        assert_eq!(transport.calls(), 1);

        // The host answered, so the breaker saw a success
        let stats = executor.circuit_breaker_stats().await;
        assert_eq!(stats[0].total_successes, 1);
        assert_eq!(stats[0].failures, 0);
    }

    #[tokio::test]
    async fn test_network_failure_uses_placeholder_response() {
        let transport = Arc::new(RefusingTransport {
            calls: AtomicU32::new(0),
        });
        let executor = executor_with(transport.clone());

        let result = executor
            .execute_request(
                HttpRequest::get("http://mock.local/"),
                &ExecuteOptions::default().with_max_retries(2),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ConnectionRefused));
        assert_eq!(result.response.status, 0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_validation_errors_skip_transport_and_breaker() {
        let transport = ScriptedTransport::new(vec![200]);
        let executor = executor_with(transport.clone());

        let result = executor
            .execute_request(HttpRequest::get("not-a-url"), &ExecuteOptions::default())
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));

        let result = executor
            .execute_request(
                HttpRequest::get("http://mock.local/"),
                &ExecuteOptions::default().with_max_retries(0),
            )
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        assert_eq!(result.attempts, 0);

        assert_eq!(transport.calls(), 0);
        assert!(executor.circuit_breaker_stats().await.is_empty());
    }

    #[tokio::test]
    async fn test_breaker_opens_and_rejects_without_invoking_transport() {
        let transport = ScriptedTransport::new(vec![503]);
        let config = ExecutorConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                volume_threshold: None,
                error_threshold_percentage: None,
                ..CircuitBreakerConfig::default()
            },
            ..fast_config()
        };
        let executor = RequestExecutor::with_config(config)
            .unwrap()
            .with_transport(transport.clone());
        let options = ExecuteOptions::default().with_max_retries(1);

        for _ in 0..2 {
            let result = executor
                .execute_request(HttpRequest::get("http://mock.local:9000/"), &options)
                .await;
            assert_eq!(result.error_kind, Some(ErrorKind::UpstreamServerError));
        }
        assert_eq!(
            executor.circuit_state("mock.local:9000").await,
            Some(CircuitState::Open)
        );

        let result = executor
            .execute_request(HttpRequest::get("http://mock.local:9000/"), &options)
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::CircuitOpen));
        assert!(result
            .error
            .unwrap()
            .to_lowercase()
            .contains("circuit breaker is open"));
        assert_eq!(transport.calls(), 2);

        // Other hosts have independent breakers
        let result = executor
            .execute_request(HttpRequest::get("http://other.local/"), &options)
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::UpstreamServerError));
        assert_eq!(transport.calls(), 3);

        // Bypassing the breaker still reaches the transport
        let result = executor
            .execute_request(
                HttpRequest::get("http://mock.local:9000/"),
                &options.clone().without_circuit_breaker(),
            )
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::UpstreamServerError));
        assert_eq!(transport.calls(), 4);

        assert!(executor.reset_circuit_breaker("mock.local:9000").await);
        assert_eq!(
            executor.circuit_state("mock.local:9000").await,
            Some(CircuitState::Closed)
        );
        executor.clear_circuit_breakers().await;
        assert!(executor.circuit_state("mock.local:9000").await.is_none());
    }

    #[tokio::test]
    async fn test_same_host_shares_breaker() {
        let executor = executor_with(ScriptedTransport::new(vec![200]));
        let a = executor.breaker_for("api.example.com").await;
        let b = executor.breaker_for("api.example.com").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let mut config = fast_config();
        config.retry.max_attempts = 0;
        assert!(RequestExecutor::with_config(config).is_err());

        let mut config = fast_config();
        config.circuit_breaker.failure_threshold = 0;
        assert!(RequestExecutor::with_config(config).is_err());
    }
}
