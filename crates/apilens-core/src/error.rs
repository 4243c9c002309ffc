//! Error types for apilens.
//!
//! Transport failures are reported as tagged variants so that retry and
//! circuit-breaker decisions are a pattern match on the error value.

use crate::network::HttpResponse;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for apilens.
#[derive(Debug, Error)]
pub enum ProbeError {
    // Request validation
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Transport errors
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Connection refused by {host}")]
    ConnectionRefused { host: String },

    #[error("DNS lookup failed for {host}: {message}")]
    DnsFailure { host: String, message: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    // Upstream answered, but with an error status
    #[error("Upstream responded with {status} {status_text}")]
    UpstreamStatus {
        status: u16,
        status_text: String,
        response: Box<HttpResponse>,
    },

    #[error("Circuit breaker is open for {host}")]
    CircuitBreakerOpen { host: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("YAML error in {path:?}: {message}")]
    Yaml {
        message: String,
        path: Option<PathBuf>,
    },

    // Schema lookups
    #[error("Schema not found: {name}")]
    SchemaNotFound { name: String },

    #[error("Endpoint not found: {endpoint} in schema {schema}")]
    EndpointNotFound { schema: String, endpoint: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for apilens operations.
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Classification of a failed request, reported alongside the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Timeout,
    ConnectionRefused,
    DnsFailure,
    Network,
    UpstreamServerError,
    UpstreamClientError,
    CircuitOpen,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::DnsFailure => "dns_failure",
            ErrorKind::Network => "network",
            ErrorKind::UpstreamServerError => "upstream_server_error",
            ErrorKind::UpstreamClientError => "upstream_client_error",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

// Conversion implementations for common error types

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        ProbeError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        ProbeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_yaml::Error> for ProbeError {
    fn from(err: serde_yaml::Error) -> Self {
        ProbeError::Yaml {
            message: err.to_string(),
            path: None,
        }
    }
}

impl ProbeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ProbeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a YAML error with path context.
    pub fn yaml_with_path(err: serde_yaml::Error, path: impl Into<PathBuf>) -> Self {
        ProbeError::Yaml {
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ProbeError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Classify this error for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::Validation { .. } | ProbeError::InvalidParams { .. } => {
                ErrorKind::Validation
            }
            ProbeError::Timeout(_) => ErrorKind::Timeout,
            ProbeError::ConnectionRefused { .. } => ErrorKind::ConnectionRefused,
            ProbeError::DnsFailure { .. } => ErrorKind::DnsFailure,
            ProbeError::Network { .. } => ErrorKind::Network,
            ProbeError::UpstreamStatus { status, .. } if *status >= 500 => {
                ErrorKind::UpstreamServerError
            }
            ProbeError::UpstreamStatus { .. } => ErrorKind::UpstreamClientError,
            ProbeError::CircuitBreakerOpen { .. } => ErrorKind::CircuitOpen,
            _ => ErrorKind::Other,
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Network-class failures and 5xx responses are transient. DNS failures
    /// and refused connections are included; callers that treat them as
    /// permanent can pass their own predicate to `retry_async`.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProbeError::Timeout(_)
            | ProbeError::ConnectionRefused { .. }
            | ProbeError::DnsFailure { .. }
            | ProbeError::Network { .. } => true,
            ProbeError::UpstreamStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Network/connectivity error
    /// - -32001: Schema not found
    /// - -32002: Endpoint not found
    /// - -32005: Validation error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            ProbeError::Timeout(_)
            | ProbeError::ConnectionRefused { .. }
            | ProbeError::DnsFailure { .. }
            | ProbeError::Network { .. }
            | ProbeError::UpstreamStatus { .. }
            | ProbeError::CircuitBreakerOpen { .. } => -32000,

            ProbeError::SchemaNotFound { .. } => -32001,

            ProbeError::EndpointNotFound { .. } => -32002,

            ProbeError::Validation { .. } => -32005,

            ProbeError::InvalidParams { .. } => -32602,

            ProbeError::MethodNotFound { .. } => -32601,

            // All other errors are internal errors
            _ => -32603,
        }
    }
}
