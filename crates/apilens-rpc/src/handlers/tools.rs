//! Tool discovery for assistant clients.

use serde_json::{json, Value};

use crate::server::AppState;

/// Request parameters shared by `execute_request` and `infer_response`.
fn request_params() -> Value {
    json!({
        "url": "string, absolute http(s) URL (flat form)",
        "method": "string, GET|POST|PUT|DELETE|PATCH|HEAD|OPTIONS, default GET",
        "headers": "object of string values",
        "params": "object of query parameters",
        "body": "any JSON value; strings are sent verbatim",
        "timeout": "integer milliseconds per attempt",
        "request": "object, full request (alternative to the flat form)",
        "schema": "string, schema name (with endpoint, alternative to url)",
        "endpoint": "string, endpoint name or 'METHOD /path'",
        "path_params": "object, values for {placeholders} in the endpoint path",
        "max_retries": "integer total attempts",
        "raw_mode": "bool, use the raw socket transport",
        "disable_circuit_breaker": "bool",
        "follow_redirects": "bool, default true"
    })
}

pub async fn list_tools(_state: &AppState, _params: &Value) -> apilens_core::Result<Value> {
    Ok(json!({
        "tools": [
            {
                "name": "health_check",
                "description": "Server status and version",
                "params": {}
            },
            {
                "name": "list_tools",
                "description": "Describe the available methods",
                "params": {}
            },
            {
                "name": "list_schemas",
                "description": "Summaries of the loaded API schemas and any files that failed to load",
                "params": {}
            },
            {
                "name": "get_schema",
                "description": "Full definition of one schema",
                "params": {"name": "string, required"}
            },
            {
                "name": "find_endpoint",
                "description": "Resolve an endpoint to a ready-to-run request, or search endpoints by text",
                "params": {
                    "schema": "string",
                    "endpoint": "string, endpoint name or 'METHOD /path'",
                    "query": "string, free-text search (instead of schema/endpoint)"
                }
            },
            {
                "name": "rescan_schemas",
                "description": "Reload schema files from the schemas directory",
                "params": {}
            },
            {
                "name": "execute_request",
                "description": "Execute an HTTP request with retry and per-host circuit breaking",
                "params": request_params()
            },
            {
                "name": "infer_response",
                "description": "Infer the JSON structure of a given response, or of the response to a request",
                "params": {
                    "response": "object, a previously captured response (skips execution)",
                    "...": "otherwise the execute_request params"
                }
            },
            {
                "name": "circuit_status",
                "description": "Circuit breaker state per host",
                "params": {
                    "host": "string, only report this host[:port]",
                    "reset": "string, host[:port] whose breaker is reset first"
                }
            }
        ]
    }))
}
