//! Managed-client transport backed by `reqwest`.

use super::{build_url, decode_body, encode_body, host_key, normalize_headers, Transport};
use crate::config::{AppConfig, NetworkConfig};
use crate::network::types::{HttpMethod, HttpRequest, HttpResponse};
use crate::{ProbeError, Result};
use async_trait::async_trait;
use reqwest::{header, redirect, Client, Method};
use std::error::Error as StdError;
use std::time::Duration;
use tracing::debug;

/// Transport using a pooled `reqwest` client.
pub struct ManagedTransport {
    client: Client,
    follow_redirects: bool,
}

impl ManagedTransport {
    /// Create a transport that follows redirects.
    pub fn new() -> Result<Self> {
        Self::with_redirects(true)
    }

    /// Create a transport with redirects enabled or disabled.
    pub fn with_redirects(follow_redirects: bool) -> Result<Self> {
        let policy = if follow_redirects {
            redirect::Policy::limited(NetworkConfig::MAX_REDIRECTS)
        } else {
            redirect::Policy::none()
        };

        let client = Client::builder()
            .user_agent(AppConfig::USER_AGENT)
            .redirect(policy)
            .build()
            .map_err(|e| ProbeError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            follow_redirects,
        })
    }

    pub fn follows_redirects(&self) -> bool {
        self.follow_redirects
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

/// Map a reqwest failure onto the transport error variants by inspecting the
/// error kind and its source chain.
fn map_reqwest_error(err: reqwest::Error, host: &str, timeout: Duration) -> ProbeError {
    if err.is_timeout() {
        return ProbeError::Timeout(timeout);
    }
    if err.is_builder() {
        return ProbeError::validation("request", err.to_string());
    }

    let mut chain = Vec::new();
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    return ProbeError::ConnectionRefused {
                        host: host.to_string(),
                    }
                }
                std::io::ErrorKind::TimedOut => return ProbeError::Timeout(timeout),
                _ => {}
            }
        }
        chain.push(cause.to_string());
        source = cause.source();
    }

    let detail = chain.join(": ");
    if err.is_connect() {
        let lowered = detail.to_ascii_lowercase();
        if lowered.contains("dns error") || lowered.contains("failed to lookup address") {
            return ProbeError::DnsFailure {
                host: host.to_string(),
                message: detail,
            };
        }
    }

    ProbeError::Network {
        message: err.to_string(),
        cause: if detail.is_empty() { None } else { Some(detail) },
    }
}

#[async_trait]
impl Transport for ManagedTransport {
    fn name(&self) -> &'static str {
        "managed"
    }

    async fn execute(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse> {
        let url = build_url(request)?;
        let host = host_key(&url);
        let body = encode_body(request)?;

        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), url.clone())
            .timeout(timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = body {
            if request.header(header::CONTENT_TYPE.as_str()).is_none() {
                builder = builder.header(header::CONTENT_TYPE, body.default_content_type);
            }
            builder = builder.body(body.bytes);
        }

        debug!("{} {} via managed transport", request.method, url);

        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &host, timeout))?;

        let status = response.status();
        let headers = normalize_headers(response.headers().iter().map(|(name, value)| {
            (
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        }));

        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, &host, timeout))?;
        let body = decode_body(
            headers.get("content-type").map(String::as_str),
            bytes.to_vec(),
        );

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            response_time: 0,
        })
    }
}
