//! Request, response and result records exchanged with the executor.

use crate::error::ErrorKind;
use crate::{ProbeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// HTTP verbs accepted by the executor. Deserialization is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
        HttpMethod::Head,
        HttpMethod::Options,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self> {
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                ProbeError::validation("method", format!("unrecognized HTTP method: {}", s))
            })
    }
}

impl<'de> Deserialize<'de> for HttpMethod {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A request to execute against a third-party API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Query parameters, appended to any already present in the URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, String>>,
    /// String bodies are sent as-is; anything else is serialized to JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: BTreeMap::new(),
            params: None,
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response body, decoded according to the response content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        ResponseBody::Text(String::new())
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ResponseBody::Json(v) => v.to_string().len(),
            ResponseBody::Text(s) => s.len(),
            ResponseBody::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::empty()
    }
}

/// Normalized HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    /// 0 when no response was received.
    pub status: u16,
    pub status_text: String,
    /// Lower-cased names; repeated headers joined with ", ".
    pub headers: BTreeMap<String, String>,
    pub body: ResponseBody,
    /// End-to-end milliseconds, set by the executor.
    pub response_time: u64,
}

impl HttpResponse {
    /// Zero-status response used when the exchange never completed.
    pub fn placeholder() -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            headers: BTreeMap::new(),
            body: ResponseBody::empty(),
            response_time: 0,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// The record returned for every executed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTestResult {
    pub request: HttpRequest,
    pub response: HttpResponse,
    /// RFC 3339 start time of the request.
    pub timestamp: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Transport invocations made for this request.
    pub attempts: u32,
}

impl ApiTestResult {
    pub fn succeeded(
        request: HttpRequest,
        response: HttpResponse,
        timestamp: String,
        attempts: u32,
    ) -> Self {
        Self {
            request,
            response,
            timestamp,
            success: true,
            error: None,
            error_kind: None,
            attempts,
        }
    }

    pub fn failed(
        request: HttpRequest,
        response: HttpResponse,
        timestamp: String,
        error: &ProbeError,
        attempts: u32,
    ) -> Self {
        Self {
            request,
            response,
            timestamp,
            success: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!(" PATCH ".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        let err = "FETCH".parse::<HttpMethod>().unwrap_err();
        assert!(matches!(err, ProbeError::Validation { .. }));
    }

    #[test]
    fn test_request_deserializes_from_json() {
        let request: HttpRequest = serde_json::from_value(json!({
            "url": "https://api.example.com/pets",
            "method": "POST",
            "headers": {"Authorization": "Bearer x"},
            "body": {"name": "rex"},
            "timeout": 500
        }))
        .unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.header("authorization"), Some("Bearer x"));
        assert_eq!(request.timeout, Some(500));
        assert!(request.params.is_none());
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let mut response = HttpResponse::placeholder();
        response.response_time = 12;
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["responseTime"], json!(12));
        assert_eq!(value["statusText"], json!(""));
        assert_eq!(value["body"], json!(""));
    }

    #[test]
    fn test_failed_result_carries_kind() {
        let err = ProbeError::Timeout(std::time::Duration::from_millis(100));
        let result = ApiTestResult::failed(
            HttpRequest::get("http://localhost"),
            HttpResponse::placeholder(),
            "2024-01-01T00:00:00Z".into(),
            &err,
            1,
        );
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert!(result.error.unwrap().contains("timeout"));
    }
}
