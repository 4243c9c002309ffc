//! JSON-RPC request handlers, split by domain.

mod requests;
mod schemas;
mod tools;

use crate::server::AppState;
use apilens_core::ProbeError;
use axum::{body::Bytes, extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

// ============================================================================
// JSON-RPC envelope
// ============================================================================

const JSONRPC_VERSION: &str = "2.0";
const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;

/// Incoming call. `params` defaults to an empty object.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

/// Outgoing reply: exactly one of `result` / `error` is set.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    /// `{"kind": ...}` for request failures, so clients can branch without
    /// parsing the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    /// Map a handler outcome, attaching the error kind as `data`.
    pub fn from_result(id: Option<Value>, outcome: apilens_core::Result<Value>) -> Self {
        match outcome {
            Ok(value) => Self::success(id, value),
            Err(e) => {
                let mut response = Self::error(id, e.to_rpc_error_code(), e.to_string());
                if let Some(error) = response.error.as_mut() {
                    error.data = Some(json!({ "kind": e.kind() }));
                }
                response
            }
        }
    }
}

// ============================================================================
// Parameter extraction helpers
// ============================================================================

fn get_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a Value> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .filter(|v| !v.is_null())
}

/// Extract an optional string parameter, supporting both snake_case and camelCase.
pub(crate) fn get_str_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a str> {
    get_param(params, snake, camel).and_then(|v| v.as_str())
}

/// Extract a required string parameter or return an error.
pub(crate) fn require_str_param(
    params: &Value,
    snake: &str,
    camel: &str,
) -> apilens_core::Result<String> {
    get_str_param(params, snake, camel)
        .map(String::from)
        .ok_or_else(|| ProbeError::InvalidParams {
            message: format!("Missing required parameter: {}", snake),
        })
}

/// Extract an optional bool parameter, supporting both snake_case and camelCase.
pub(crate) fn get_bool_param(params: &Value, snake: &str, camel: &str) -> Option<bool> {
    get_param(params, snake, camel).and_then(|v| v.as_bool())
}

/// Extract an optional u64 parameter, supporting both snake_case and camelCase.
pub(crate) fn get_u64_param(params: &Value, snake: &str, camel: &str) -> Option<u64> {
    get_param(params, snake, camel).and_then(|v| v.as_u64())
}

/// Extract an optional object of string values. Non-string scalars are
/// stringified.
pub(crate) fn get_string_map_param(
    params: &Value,
    snake: &str,
    camel: &str,
) -> apilens_core::Result<Option<BTreeMap<String, String>>> {
    let Some(value) = get_param(params, snake, camel) else {
        return Ok(None);
    };
    let object = value.as_object().ok_or_else(|| ProbeError::InvalidParams {
        message: format!("Parameter {} must be an object", snake),
    })?;

    let mut map = BTreeMap::new();
    for (key, value) in object {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(_) | Value::Bool(_) => value.to_string(),
            _ => {
                return Err(ProbeError::InvalidParams {
                    message: format!("Parameter {}.{} must be a scalar", snake, key),
                })
            }
        };
        map.insert(key.clone(), text);
    }
    Ok(Some(map))
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// `POST /rpc`. Every reply is HTTP 200 with a JSON-RPC body, including
/// malformed input.
pub async fn handle_rpc(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Unparseable RPC body: {}", e);
            let code = if serde_json::from_slice::<Value>(&body).is_ok() {
                INVALID_REQUEST
            } else {
                PARSE_ERROR
            };
            return Json(JsonRpcResponse::error(None, code, e.to_string()));
        }
    };
    if request.jsonrpc != JSONRPC_VERSION {
        return Json(JsonRpcResponse::error(
            request.id,
            INVALID_REQUEST,
            format!("Unsupported jsonrpc version: {}", request.jsonrpc),
        ));
    }

    let params = request.params.unwrap_or_else(|| json!({}));
    debug!("RPC call: {}({})", request.method, params);

    let outcome = dispatch_method(&state, &request.method, &params).await;
    if let Err(e) = &outcome {
        error!("RPC error for {}: {}", request.method, e);
    }
    Json(JsonRpcResponse::from_result(request.id, outcome))
}

// ============================================================================
// Method dispatcher
// ============================================================================

/// Dispatch a method call to the appropriate domain handler.
pub(crate) async fn dispatch_method(
    state: &AppState,
    method: &str,
    params: &Value,
) -> apilens_core::Result<Value> {
    match method {
        // Status & discovery
        "health_check" => Ok(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        })),
        "list_tools" => tools::list_tools(state, params).await,

        // Schemas
        "list_schemas" => schemas::list_schemas(state, params).await,
        "get_schema" => schemas::get_schema(state, params).await,
        "find_endpoint" => schemas::find_endpoint(state, params).await,
        "rescan_schemas" => schemas::rescan_schemas(state, params).await,

        // Requests
        "execute_request" => requests::execute_request(state, params).await,
        "infer_response" => requests::infer_response(state, params).await,
        "circuit_status" => requests::circuit_status(state, params).await,

        // Unknown method
        _ => {
            warn!("Method not found: {}", method);
            Err(ProbeError::MethodNotFound {
                method: method.to_string(),
            })
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
