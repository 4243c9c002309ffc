//! HTTP request execution with retries and per-host circuit breaking.
//!
//! This module provides:
//! - Request/response value types
//! - Retry logic with exponential backoff
//! - Circuit breaker pattern for network resilience
//! - Managed (`reqwest`) and raw-socket transports
//! - The `RequestExecutor` that ties them together

mod circuit_breaker;
mod executor;
mod retry;
mod types;

pub mod transport;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use executor::{ExecuteOptions, ExecutorConfig, RequestExecutor};
pub use retry::{retry_async, RetryConfig, RetryOutcome};
pub use transport::{ManagedTransport, RawTransport, Transport};
pub use types::{ApiTestResult, HttpMethod, HttpRequest, HttpResponse, ResponseBody};
