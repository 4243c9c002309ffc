//! Request execution handlers.

use super::{
    get_bool_param, get_param, get_str_param, get_string_map_param, get_u64_param,
    require_str_param,
};
use crate::server::AppState;
use apilens_core::network::{ExecuteOptions, HttpRequest, HttpResponse};
use apilens_core::{infer_structure, ProbeError};
use serde_json::{json, Value};

fn invalid_params(message: impl Into<String>) -> ProbeError {
    ProbeError::InvalidParams {
        message: message.into(),
    }
}

/// Resolve the request to run from one of three shapes:
/// - `{request: {...}}` with a full `HttpRequest`
/// - `{schema, endpoint, path_params?, headers?, params?, body?, timeout?}`
/// - a flat `HttpRequest` (`{url, method?, headers?, ...}`), method defaulting to GET
pub(crate) async fn resolve_request(
    state: &AppState,
    params: &Value,
) -> apilens_core::Result<HttpRequest> {
    if let Some(request) = get_param(params, "request", "request") {
        return serde_json::from_value(request.clone())
            .map_err(|e| invalid_params(format!("Invalid request: {}", e)));
    }

    if let Some(schema_name) = get_str_param(params, "schema", "schema") {
        let endpoint_key = require_str_param(params, "endpoint", "endpoint")?;
        let path_params =
            get_string_map_param(params, "path_params", "pathParams")?.unwrap_or_default();

        let catalog = state.catalog.read().await;
        let (schema, endpoint) = catalog.find_endpoint(schema_name, &endpoint_key)?;
        let mut request = schema.to_request_with(endpoint, &path_params);
        drop(catalog);

        if let Some(headers) = get_string_map_param(params, "headers", "headers")? {
            request.headers.extend(headers);
        }
        if let Some(query) = get_string_map_param(params, "params", "params")? {
            request.params.get_or_insert_with(Default::default).extend(query);
        }
        if let Some(body) = get_param(params, "body", "body") {
            request.body = Some(body.clone());
        }
        if let Some(timeout) = get_u64_param(params, "timeout", "timeout") {
            request.timeout = Some(timeout);
        }
        return Ok(request);
    }

    if get_str_param(params, "url", "url").is_none() {
        return Err(invalid_params(
            "Provide url, request, or schema and endpoint",
        ));
    }
    let mut flat = params.clone();
    if let Some(object) = flat.as_object_mut() {
        object.entry("method").or_insert_with(|| json!("GET"));
    }
    serde_json::from_value(flat).map_err(|e| invalid_params(format!("Invalid request: {}", e)))
}

/// Per-call options layered over the server defaults.
pub(crate) fn resolve_options(
    state: &AppState,
    params: &Value,
) -> apilens_core::Result<ExecuteOptions> {
    let mut options = state.default_options.clone();

    if let Some(n) = get_u64_param(params, "max_retries", "maxRetries") {
        let n = u32::try_from(n).map_err(|_| invalid_params("max_retries is too large"))?;
        options.max_retries = Some(n);
    }
    if let Some(raw) = get_bool_param(params, "raw_mode", "rawMode") {
        options.raw_mode = raw;
    }
    if let Some(disable) = get_bool_param(params, "disable_circuit_breaker", "disableCircuitBreaker")
    {
        options.disable_circuit_breaker = disable;
    }
    if let Some(follow) = get_bool_param(params, "follow_redirects", "followRedirects") {
        options.follow_redirects = follow;
    }
    Ok(options)
}

/// Execute a request. Request failures are reported inside the result
/// (`success: false`), not as RPC errors.
pub async fn execute_request(state: &AppState, params: &Value) -> apilens_core::Result<Value> {
    let request = resolve_request(state, params).await?;
    let options = resolve_options(state, params)?;

    let result = state.executor.execute_request(request, &options).await;
    Ok(serde_json::to_value(result)?)
}

/// Infer the structure of `response`, or of a response obtained by executing
/// the request described by the remaining params.
pub async fn infer_response(state: &AppState, params: &Value) -> apilens_core::Result<Value> {
    if let Some(response) = get_param(params, "response", "response") {
        let response: HttpResponse = serde_json::from_value(response.clone())
            .map_err(|e| invalid_params(format!("Invalid response: {}", e)))?;
        return Ok(serde_json::to_value(infer_structure(&response))?);
    }

    let request = resolve_request(state, params).await?;
    let options = resolve_options(state, params)?;
    let result = state.executor.execute_request(request, &options).await;
    let structure = infer_structure(&result.response);

    Ok(json!({
        "result": result,
        "structure": structure,
    }))
}

/// Breaker snapshots, optionally filtered by `host`. `reset: "<host>"` resets
/// that breaker first.
pub async fn circuit_status(state: &AppState, params: &Value) -> apilens_core::Result<Value> {
    let reset = match get_str_param(params, "reset", "reset") {
        Some(host) => Some(state.executor.reset_circuit_breaker(host).await),
        None => None,
    };

    let mut breakers = state.executor.circuit_breaker_stats().await;
    if let Some(host) = get_str_param(params, "host", "host") {
        breakers.retain(|stats| stats.host == host);
    }

    let mut result = json!({ "breakers": breakers });
    if let Some(reset) = reset {
        result["reset"] = json!(reset);
    }
    Ok(result)
}
