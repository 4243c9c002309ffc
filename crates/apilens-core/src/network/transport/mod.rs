//! Transports perform one HTTP exchange and normalize the result.
//!
//! Both implementations share URL building, body encoding and header
//! normalization so the executor can swap them freely between attempts.

mod managed;
mod raw;

pub use managed::ManagedTransport;
pub use raw::RawTransport;

use super::types::{HttpRequest, HttpResponse, ResponseBody};
use crate::{ProbeError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// A strategy for putting one request on the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Perform a single attempt. Any status code is a successful exchange;
    /// errors are reserved for transport-level problems.
    async fn execute(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse>;
}

/// Parse and validate the request URL, then append query parameters.
pub fn build_url(request: &HttpRequest) -> Result<Url> {
    let mut url = Url::parse(&request.url)
        .map_err(|e| ProbeError::validation("url", format!("{}: {}", request.url, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProbeError::validation(
                "url",
                format!("unsupported scheme: {}", other),
            ))
        }
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(ProbeError::validation("url", "missing host"));
    }

    if let Some(params) = &request.params {
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
    }

    Ok(url)
}

/// `host[:port]` key used to pick a circuit breaker.
pub fn host_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Encoded request body plus the content type to use if the caller set none.
pub struct EncodedBody {
    pub bytes: Vec<u8>,
    pub default_content_type: &'static str,
}

/// Strings are sent verbatim; any other value is serialized to JSON.
pub fn encode_body(request: &HttpRequest) -> Result<Option<EncodedBody>> {
    match &request.body {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(text)) => Ok(Some(EncodedBody {
            bytes: text.clone().into_bytes(),
            default_content_type: "text/plain; charset=utf-8",
        })),
        Some(value) => Ok(Some(EncodedBody {
            bytes: serde_json::to_vec(value)?,
            default_content_type: "application/json",
        })),
    }
}

/// Lower-case header names and join repeated values with ", ".
pub fn normalize_headers<'a, I>(headers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let mut normalized: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        normalized
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    normalized
}

pub(crate) fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    mime.eq_ignore_ascii_case("application/json") || mime.to_ascii_lowercase().ends_with("+json")
}

fn is_textual_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("text/")
        || mime.ends_with("+xml")
        || matches!(
            mime.as_str(),
            "application/xml"
                | "application/javascript"
                | "application/x-www-form-urlencoded"
                | "application/yaml"
                | "application/x-yaml"
        )
}

/// Decode a body by content type: JSON (falling back to text on a parse
/// failure), text, or raw bytes.
pub(crate) fn decode_body(content_type: Option<&str>, bytes: Vec<u8>) -> ResponseBody {
    if bytes.is_empty() {
        return ResponseBody::empty();
    }
    match content_type {
        Some(ct) if is_json_content_type(ct) => parse_json_or_text(bytes),
        Some(ct) if is_textual_content_type(ct) => {
            ResponseBody::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        // Untyped bodies that are valid UTF-8 are most likely text
        None => match String::from_utf8(bytes) {
            Ok(text) => ResponseBody::Text(text),
            Err(e) => ResponseBody::Binary(e.into_bytes()),
        },
        Some(_) => ResponseBody::Binary(bytes),
    }
}

/// Best-effort JSON parse; never an error.
pub(crate) fn parse_json_or_text(bytes: Vec<u8>) -> ResponseBody {
    match serde_json::from_slice(&bytes) {
        Ok(value) => ResponseBody::Json(value),
        Err(_) => ResponseBody::Text(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_url_appends_params() {
        let request = HttpRequest::get("https://api.example.com/items?page=2")
            .with_param("limit", "10")
            .with_param("q", "a b");
        let url = build_url(&request).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/items?page=2&limit=10&q=a+b");
    }

    #[test]
    fn test_build_url_rejects_invalid() {
        for bad in ["not a url", "/relative/path", "ftp://example.com/file", "http://"] {
            let err = build_url(&HttpRequest::get(bad)).unwrap_err();
            assert!(matches!(err, ProbeError::Validation { .. }), "{}", bad);
        }
    }

    #[test]
    fn test_host_key_includes_explicit_port() {
        let url = Url::parse("http://127.0.0.1:8080/x").unwrap();
        assert_eq!(host_key(&url), "127.0.0.1:8080");
        let url = Url::parse("https://api.example.com/x").unwrap();
        assert_eq!(host_key(&url), "api.example.com");
    }

    #[test]
    fn test_encode_body() {
        let request = HttpRequest::post("http://x").with_body(json!({"a": 1}));
        let body = encode_body(&request).unwrap().unwrap();
        assert_eq!(body.bytes, br#"{"a":1}"#);
        assert_eq!(body.default_content_type, "application/json");

        let request = HttpRequest::post("http://x").with_body(json!("raw=text"));
        let body = encode_body(&request).unwrap().unwrap();
        assert_eq!(body.bytes, b"raw=text");

        assert!(encode_body(&HttpRequest::get("http://x")).unwrap().is_none());
    }

    #[test]
    fn test_normalize_headers_joins_duplicates() {
        let headers = normalize_headers(vec![
            ("Set-Cookie", "a=1".to_string()),
            ("set-cookie", "b=2".to_string()),
            ("Content-Type", "text/plain".to_string()),
        ]);
        assert_eq!(headers["set-cookie"], "a=1, b=2");
        assert_eq!(headers["content-type"], "text/plain");
    }

    #[test]
    fn test_decode_body() {
        let body = decode_body(Some("application/json; charset=utf-8"), br#"{"ok":true}"#.to_vec());
        assert_eq!(body, ResponseBody::Json(json!({"ok": true})));

        let body = decode_body(Some("application/json"), b"{broken".to_vec());
        assert_eq!(body, ResponseBody::Text("{broken".into()));

        let body = decode_body(Some("application/problem+json"), b"[1]".to_vec());
        assert_eq!(body, ResponseBody::Json(json!([1])));

        let body = decode_body(Some("text/html"), b"<p>hi</p>".to_vec());
        assert_eq!(body, ResponseBody::Text("<p>hi</p>".into()));

        let body = decode_body(Some("image/png"), vec![0x89, 0x50]);
        assert_eq!(body, ResponseBody::Binary(vec![0x89, 0x50]));

        assert_eq!(decode_body(Some("image/png"), Vec::new()), ResponseBody::empty());
    }
}
