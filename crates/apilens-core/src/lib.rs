//! apilens core - resilient HTTP request execution and API schema management.
//!
//! This crate holds everything the CLI and the JSON-RPC server share: the
//! request executor (retry, per-host circuit breaker, managed and raw
//! transports), the schema catalog, and response structure inference. It can
//! be used programmatically without any RPC layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use apilens_core::network::{ExecuteOptions, HttpRequest, RequestExecutor};
//!
//! #[tokio::main]
//! async fn main() -> apilens_core::Result<()> {
//!     let executor = RequestExecutor::new()?;
//!     let result = executor
//!         .execute_request(
//!             HttpRequest::get("https://httpbin.org/json"),
//!             &ExecuteOptions::default(),
//!         )
//!         .await;
//!     println!("{} in {}ms", result.response.status, result.response.response_time);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod inference;
pub mod network;
pub mod schema;

// Re-export commonly used types
pub use config::{ExecutorSettings, ProbeSettings};
pub use error::{ErrorKind, ProbeError, Result};
pub use inference::{infer_structure, ResponseStructure, Structure};
pub use network::{
    ApiTestResult, ExecuteOptions, ExecutorConfig, HttpMethod, HttpRequest, HttpResponse,
    RequestExecutor,
};
pub use schema::{ApiSchema, Endpoint, SchemaCatalog, SchemaSummary};
