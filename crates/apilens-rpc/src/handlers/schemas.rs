//! Schema lookup handlers.

use super::{get_str_param, require_str_param};
use crate::server::AppState;
use apilens_core::SchemaCatalog;
use serde_json::{json, Value};
use tracing::info;

pub async fn list_schemas(state: &AppState, _params: &Value) -> apilens_core::Result<Value> {
    let catalog = state.catalog.read().await;
    Ok(json!({
        "schemas": catalog.summaries(),
        "issues": catalog.issues(),
        "schemasDir": catalog.root(),
    }))
}

pub async fn get_schema(state: &AppState, params: &Value) -> apilens_core::Result<Value> {
    let name = require_str_param(params, "name", "name")?;
    let catalog = state.catalog.read().await;
    let schema = catalog.get(&name)?;
    Ok(serde_json::to_value(schema)?)
}

/// Either search all endpoints (`query`) or resolve one (`schema` + `endpoint`).
pub async fn find_endpoint(state: &AppState, params: &Value) -> apilens_core::Result<Value> {
    let catalog = state.catalog.read().await;

    if let Some(query) = get_str_param(params, "query", "query") {
        return Ok(json!({ "matches": catalog.search(query) }));
    }

    let schema_name = require_str_param(params, "schema", "schema")?;
    let endpoint_key = require_str_param(params, "endpoint", "endpoint")?;
    let (schema, endpoint) = catalog.find_endpoint(&schema_name, &endpoint_key)?;

    Ok(json!({
        "schema": schema.name,
        "id": endpoint.id(),
        "url": schema.endpoint_url(endpoint),
        "pathParams": endpoint.path_params(),
        "endpoint": endpoint,
        "request": schema.to_request(endpoint),
    }))
}

pub async fn rescan_schemas(state: &AppState, _params: &Value) -> apilens_core::Result<Value> {
    let catalog = SchemaCatalog::scan(&state.schemas_dir)?;
    let result = json!({
        "count": catalog.len(),
        "issues": catalog.issues(),
    });

    info!("Rescanned {} schemas", catalog.len());
    *state.catalog.write().await = catalog;
    Ok(result)
}
