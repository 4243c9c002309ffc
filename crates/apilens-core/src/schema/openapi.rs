//! Conversion of OpenAPI 3 and Swagger 2 documents into `ApiSchema`.
//!
//! Only what a request needs is kept: base URL, operations, example
//! parameter values, example bodies and the documented success response.
//! `$ref` pointers are not resolved.

use super::model::{ApiSchema, Endpoint};
use crate::network::HttpMethod;
use crate::{ProbeError, Result};
use serde_yaml::Value;

/// Convert an OpenAPI 3.x document.
pub(crate) fn from_openapi3(document: Value, fallback_name: Option<&str>) -> Result<ApiSchema> {
    let mut schema = schema_from_info(&document, fallback_name)?;

    if let Some(server) = document
        .get("servers")
        .and_then(Value::as_sequence)
        .and_then(|servers| servers.first())
    {
        let mut url = text(server.get("url")).unwrap_or_default();
        // Substitute server variables with their defaults
        if let Some(vars) = server.get("variables").and_then(Value::as_mapping) {
            for (name, var) in vars {
                if let (Some(name), Some(default)) =
                    (name.as_str(), var.get("default").and_then(scalar))
                {
                    url = url.replace(&format!("{{{}}}", name), &default);
                }
            }
        }
        schema.base_url = url;
    }

    schema.endpoints = convert_paths(&document, Dialect::OpenApi3)?;
    Ok(schema)
}

/// Convert a Swagger 2.0 document.
pub(crate) fn from_swagger2(document: Value, fallback_name: Option<&str>) -> Result<ApiSchema> {
    let mut schema = schema_from_info(&document, fallback_name)?;

    let base_path = text(document.get("basePath")).unwrap_or_default();
    schema.base_url = match text(document.get("host")) {
        Some(host) => {
            let scheme = document
                .get("schemes")
                .and_then(Value::as_sequence)
                .and_then(|schemes| schemes.first())
                .and_then(Value::as_str)
                .unwrap_or("https");
            format!("{}://{}{}", scheme, host, base_path)
        }
        None => base_path,
    };

    schema.endpoints = convert_paths(&document, Dialect::Swagger2)?;
    Ok(schema)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    OpenApi3,
    Swagger2,
}

fn text(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn to_json(value: &Value) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

fn schema_from_info(document: &Value, fallback_name: Option<&str>) -> Result<ApiSchema> {
    let info = document.get("info");
    let title = text(info.and_then(|i| i.get("title")));

    let name = title
        .as_deref()
        .map(slugify)
        .filter(|slug| !slug.is_empty())
        .or_else(|| fallback_name.map(str::to_string))
        .ok_or_else(|| ProbeError::validation("info.title", "document has no title"))?;

    let mut schema = ApiSchema::new(name, "");
    schema.version = info.and_then(|i| i.get("version")).and_then(scalar);
    schema.description = text(info.and_then(|i| i.get("description"))).or(title);
    Ok(schema)
}

fn convert_paths(document: &Value, dialect: Dialect) -> Result<Vec<Endpoint>> {
    let mut endpoints = Vec::new();
    let Some(paths) = document.get("paths").and_then(Value::as_mapping) else {
        return Ok(endpoints);
    };

    for (path, item) in paths {
        let path = path
            .as_str()
            .ok_or_else(|| ProbeError::validation("paths", "path keys must be strings"))?;
        let Some(operations) = item.as_mapping() else {
            continue;
        };
        let shared_params: &[Value] = item
            .get("parameters")
            .and_then(Value::as_sequence)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for (key, operation) in operations {
            // Skips non-operation keys such as `parameters` and `summary`
            let Some(method) = key.as_str().and_then(|k| k.parse::<HttpMethod>().ok()) else {
                continue;
            };

            let mut endpoint = Endpoint::new(method, path);
            endpoint.name = text(operation.get("operationId"));
            endpoint.description =
                text(operation.get("summary")).or_else(|| text(operation.get("description")));

            let own_params = operation
                .get("parameters")
                .and_then(Value::as_sequence)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for param in shared_params.iter().chain(own_params) {
                apply_parameter(&mut endpoint, param);
            }

            if dialect == Dialect::OpenApi3 {
                if let Some(body) = operation.get("requestBody") {
                    endpoint.body = media_example(body.get("content"));
                }
            }
            endpoint.response = success_response(operation, dialect);
            endpoints.push(endpoint);
        }
    }

    Ok(endpoints)
}

/// Example value of a parameter: `example`, `x-example`, `default`, or the
/// same keys on its `schema`.
fn parameter_value(param: &Value) -> Option<&Value> {
    let keys = ["example", "x-example", "default"];
    keys.iter()
        .find_map(|k| param.get(*k))
        .or_else(|| {
            let schema = param.get("schema")?;
            keys.iter().find_map(|k| schema.get(*k))
        })
}

fn apply_parameter(endpoint: &mut Endpoint, param: &Value) {
    let Some(name) = text(param.get("name")) else {
        return;
    };
    let location = param.get("in").and_then(Value::as_str).unwrap_or_default();
    let value = parameter_value(param);

    match location {
        "query" => {
            if let Some(value) = value.and_then(scalar) {
                endpoint.params.insert(name, value);
            }
        }
        "header" => {
            if let Some(value) = value.and_then(scalar) {
                endpoint.headers.insert(name, value);
            }
        }
        // Swagger 2 request body
        "body" => {
            endpoint.body = value.and_then(to_json);
        }
        _ => {}
    }
}

/// Example from an OpenAPI 3 `content` map, preferring JSON media types.
fn media_example(content: Option<&Value>) -> Option<serde_json::Value> {
    let content = content?.as_mapping()?;
    let media = content
        .iter()
        .find(|(k, _)| k.as_str().map(|k| k.contains("json")).unwrap_or(false))
        .or_else(|| content.iter().next())
        .map(|(_, v)| v)?;

    if let Some(example) = media.get("example") {
        return to_json(example);
    }
    if let Some(first) = media
        .get("examples")
        .and_then(Value::as_mapping)
        .and_then(|examples| examples.values().next())
    {
        if let Some(value) = first.get("value") {
            return to_json(value);
        }
    }
    let schema = media.get("schema")?;
    schema.get("example").and_then(to_json).or_else(|| to_json(schema))
}

/// Example or schema of the first documented 2xx response.
fn success_response(operation: &Value, dialect: Dialect) -> Option<serde_json::Value> {
    let responses = operation.get("responses")?.as_mapping()?;
    let (_, response) = responses.iter().find(|(code, _)| {
        scalar(code)
            .map(|c| c.starts_with('2'))
            .unwrap_or(false)
    })?;

    match dialect {
        Dialect::OpenApi3 => media_example(response.get("content")),
        Dialect::Swagger2 => {
            if let Some(example) = response
                .get("examples")
                .and_then(Value::as_mapping)
                .and_then(|examples| examples.values().next())
            {
                return to_json(example);
            }
            response.get("schema").and_then(to_json)
        }
    }
}
