//! Circuit breaker pattern for network resilience.
//!
//! One breaker guards one destination host:
//! - CLOSED: Normal operation, requests flow through
//! - OPEN: Failing, requests are rejected immediately
//! - HALF_OPEN: Testing recovery, trial requests allowed
//!
//! The OPEN -> HALF_OPEN transition is computed lazily from
//! `last_failure_time + reset_timeout` whenever the state is observed, so it
//! takes effect without a call having to arrive first.

use crate::config::CircuitBreakerDefaults;
use crate::{ProbeError, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests flow through.
    Closed,
    /// Failing - requests are rejected immediately.
    Open,
    /// Testing recovery - trial requests allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time after the last failure before trial requests are allowed.
    pub reset_timeout: Duration,
    /// Minimum requests seen before the circuit may open. `None` disables gating.
    pub volume_threshold: Option<u32>,
    /// Failure percentage that also opens the circuit. `None` disables it.
    pub error_threshold_percentage: Option<f64>,
    /// Trial successes needed to close again. Defaults to
    /// `ceil(failure_threshold / 2)`.
    pub half_open_success_threshold: Option<u32>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: CircuitBreakerDefaults::FAILURE_THRESHOLD,
            reset_timeout: CircuitBreakerDefaults::RESET_TIMEOUT,
            volume_threshold: Some(CircuitBreakerDefaults::VOLUME_THRESHOLD),
            error_threshold_percentage: Some(CircuitBreakerDefaults::ERROR_THRESHOLD_PERCENTAGE),
            half_open_success_threshold: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Successes required in HALF_OPEN before closing.
    pub fn success_threshold(&self) -> u32 {
        self.half_open_success_threshold
            .unwrap_or_else(|| self.failure_threshold.div_ceil(2))
            .max(1)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(ProbeError::Config {
                message: message.to_string(),
            })
        };
        if self.failure_threshold == 0 {
            return invalid("failure_threshold must be at least 1");
        }
        if let Some(pct) = self.error_threshold_percentage {
            if !(0.0..=100.0).contains(&pct) {
                return invalid("error_threshold_percentage must be within 0..=100");
            }
        }
        if self.half_open_success_threshold == Some(0) {
            return invalid("half_open_success_threshold must be at least 1");
        }
        Ok(())
    }

    fn assert_valid(&self) {
        if let Err(e) = self.validate() {
            panic!("invalid circuit breaker config: {}", e);
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    total_requests: u32,
    last_failure_time: Option<Instant>,
    total_failures: u64,
    total_successes: u64,
    total_rejections: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            total_requests: 0,
            last_failure_time: None,
            total_failures: 0,
            total_successes: 0,
            total_rejections: 0,
        }
    }

    fn reset_counters(&mut self) {
        self.failures = 0;
        self.successes = 0;
        self.total_requests = 0;
        self.last_failure_time = None;
    }
}

/// Circuit breaker for protecting against cascading failures.
///
/// Counters are only touched while the internal mutex is held, and the mutex
/// is never held across an `.await`, so outcome updates of concurrent calls
/// never interleave.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    /// Host this circuit breaker protects.
    host: String,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration.
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_config(host, CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration.
    ///
    /// # Panics
    ///
    /// Panics on a zero failure threshold, a zero half-open success
    /// threshold, or an error percentage outside `0..=100`.
    pub fn with_config(host: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        config.assert_valid();
        Self {
            config,
            inner: Mutex::new(BreakerInner::new()),
            host: host.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Time left before an OPEN circuit admits trial requests.
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match (inner.state, inner.last_failure_time) {
            (CircuitState::Open, Some(failed_at)) => {
                Some(self.config.reset_timeout.saturating_sub(failed_at.elapsed()))
            }
            _ => None,
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// Rejects with `CircuitBreakerOpen` without invoking `operation` while
    /// OPEN. Retryable-class failures count against the host; any other
    /// outcome (including an upstream 4xx) means the host answered and counts
    /// as a success.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.try_acquire() {
            debug!("Circuit breaker for {} rejected request", self.host);
            return Err(ProbeError::CircuitBreakerOpen {
                host: self.host.clone(),
            });
        }

        let outcome = operation().await;
        match &outcome {
            Err(e) if e.is_retryable() => self.record_failure(),
            _ => self.record_success(),
        }
        outcome
    }

    /// Admit a request, counting it toward the request volume.
    ///
    /// Returns false while the circuit is OPEN.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Open => {
                inner.total_rejections += 1;
                false
            }
            CircuitState::Closed | CircuitState::HalfOpen => {
                inner.total_requests = inner.total_requests.saturating_add(1);
                true
            }
        }
    }

    /// Record a successful request.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.total_successes += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold() {
                    inner.state = CircuitState::Closed;
                    inner.reset_counters();
                    info!("Circuit breaker for {} recovered to CLOSED", self.host);
                }
            }
            CircuitState::Open => {
                // Outcome of a call admitted before the circuit opened
            }
        }
    }

    /// Record a failed request.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.total_failures += 1;
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if self.should_open(&inner) {
                    inner.state = CircuitState::Open;
                    warn!(
                        "Circuit breaker for {} opened after {} failures ({} requests)",
                        self.host, inner.failures, inner.total_requests
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.successes = 0;
                warn!("Circuit breaker for {} trial failed, reopening", self.host);
            }
            CircuitState::Open => {
                // Late outcome; the fresh failure time extends the cooldown
            }
        }
    }

    /// Get statistics about this circuit breaker.
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        CircuitBreakerStats {
            host: self.host.clone(),
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_rejections: inner.total_rejections,
            ms_since_last_failure: inner
                .last_failure_time
                .map(|t| t.elapsed().as_millis() as u64),
        }
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.reset_counters();
        info!("Circuit breaker for {} reset to CLOSED", self.host);
    }

    // Internal state handling

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Counters stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn should_open(&self, inner: &BreakerInner) -> bool {
        if let Some(volume) = self.config.volume_threshold {
            if inner.total_requests < volume {
                return false;
            }
        }

        if inner.failures >= self.config.failure_threshold {
            return true;
        }

        match self.config.error_threshold_percentage {
            Some(pct) if inner.total_requests > 0 => {
                let rate = inner.failures as f64 / inner.total_requests as f64 * 100.0;
                rate >= pct
            }
            _ => false,
        }
    }

    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }

        let elapsed = inner
            .last_failure_time
            .map(|t| t.elapsed() >= self.config.reset_timeout)
            .unwrap_or(true);
        if elapsed {
            inner.state = CircuitState::HalfOpen;
            inner.successes = 0;
            debug!("Circuit breaker for {} entering HALF_OPEN", self.host);
        }
    }
}

/// Statistics about a circuit breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub host: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub total_requests: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejections: u64,
    pub ms_since_last_failure: Option<u64>,
}
