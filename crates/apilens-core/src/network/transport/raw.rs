//! Raw-socket transport: hand-written HTTP/1.1 over TCP or TLS.
//!
//! The request is written manually with `Connection: close`; the response is
//! read incrementally and framed by Content-Length, chunked encoding, or
//! connection close.

use super::{build_url, encode_body, host_key, normalize_headers, parse_json_or_text, Transport};
use super::is_json_content_type;
use crate::config::{AppConfig, NetworkConfig};
use crate::network::types::{HttpMethod, HttpRequest, HttpResponse, ResponseBody};
use crate::{ProbeError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::Url;

/// Transport that speaks HTTP/1.1 directly on a socket.
pub struct RawTransport {
    tls: TlsConnector,
}

impl RawTransport {
    /// Create a raw transport trusting the bundled webpki roots.
    pub fn new() -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| ProbeError::Config {
            message: format!("Failed to configure TLS: {}", e),
        })?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }

    async fn exchange(
        &self,
        url: &Url,
        host: &str,
        wire: Vec<u8>,
        method: HttpMethod,
    ) -> Result<HttpResponse> {
        let hostname = url
            .host_str()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((hostname.as_str(), port))
            .await
            .map_err(|e| ProbeError::DnsFailure {
                host: hostname.clone(),
                message: e.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(ProbeError::DnsFailure {
                host: hostname,
                message: "no addresses returned".into(),
            });
        }

        let tcp = connect_any(&addrs, host).await?;
        let head_only = method == HttpMethod::Head;

        if url.scheme() == "https" {
            let server_name = ServerName::try_from(hostname.clone())
                .map_err(|e| ProbeError::validation("url", format!("invalid TLS name: {}", e)))?;
            let stream = self
                .tls
                .connect(server_name, tcp)
                .await
                .map_err(|e| ProbeError::Network {
                    message: format!("TLS handshake with {} failed", host),
                    cause: Some(e.to_string()),
                })?;
            round_trip(stream, &wire, head_only, NetworkConfig::RAW_MAX_BODY).await
        } else {
            round_trip(tcp, &wire, head_only, NetworkConfig::RAW_MAX_BODY).await
        }
    }
}

#[async_trait]
impl Transport for RawTransport {
    fn name(&self) -> &'static str {
        "raw"
    }

    async fn execute(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse> {
        let url = build_url(request)?;
        let host = host_key(&url);
        let wire = encode_request(request, &url)?;

        debug!("{} {} via raw transport", request.method, url);

        // Dropping the exchange future closes the socket
        match tokio::time::timeout(timeout, self.exchange(&url, &host, wire, request.method)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        }
    }
}

async fn connect_any(addrs: &[SocketAddr], host: &str) -> Result<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            Err(ProbeError::ConnectionRefused {
                host: host.to_string(),
            })
        }
        Some(e) => Err(socket_error(e)),
        None => Err(ProbeError::Network {
            message: format!("No address to connect to for {}", host),
            cause: None,
        }),
    }
}

fn socket_error(err: std::io::Error) -> ProbeError {
    ProbeError::Network {
        message: format!("Socket error: {}", err),
        cause: Some(format!("{:?}", err.kind())),
    }
}

fn check_header_text(field: &str, text: &str) -> Result<()> {
    if text.contains('\r') || text.contains('\n') {
        return Err(ProbeError::validation(
            "headers",
            format!("line break in header {}", field),
        ));
    }
    Ok(())
}

/// Serialize the request line, headers and body.
fn encode_request(request: &HttpRequest, url: &Url) -> Result<Vec<u8>> {
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let host_header = match url.port() {
        Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
        None => url.host_str().unwrap_or_default().to_string(),
    };

    let mut head = format!("{} {} HTTP/1.1\r\n", request.method, target);
    let mut push = |name: &str, value: &str| -> Result<()> {
        check_header_text(name, name)?;
        check_header_text(name, value)?;
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
        Ok(())
    };

    if request.header("host").is_none() {
        push("Host", &host_header)?;
    }
    for (name, value) in &request.headers {
        // Framing headers are owned by this transport
        if name.eq_ignore_ascii_case("connection")
            || name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
        {
            continue;
        }
        push(name, value)?;
    }
    if request.header("user-agent").is_none() {
        push("User-Agent", AppConfig::USER_AGENT)?;
    }
    if request.header("accept").is_none() {
        push("Accept", "*/*")?;
    }

    let body = encode_body(request)?;
    match &body {
        Some(body) => {
            if request.header("content-type").is_none() {
                push("Content-Type", body.default_content_type)?;
            }
            push("Content-Length", &body.bytes.len().to_string())?;
        }
        None => {
            if matches!(
                request.method,
                HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch
            ) {
                push("Content-Length", "0")?;
            }
        }
    }
    push("Connection", "close")?;
    head.push_str("\r\n");

    let mut wire = head.into_bytes();
    if let Some(body) = body {
        wire.extend_from_slice(&body.bytes);
    }
    Ok(wire)
}

/// Parsed status line and headers.
#[derive(Debug)]
struct ResponseHead {
    status: u16,
    status_text: String,
    headers: Vec<(String, String)>,
}

impl ResponseHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn framing(&self, head_only: bool) -> Framing {
        if head_only || self.status == 204 || self.status == 304 || self.status < 200 {
            return Framing::Empty;
        }
        if self
            .header("transfer-encoding")
            .map(|te| te.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
        {
            return Framing::Chunked;
        }
        match self
            .header("content-length")
            .and_then(|len| len.trim().parse::<usize>().ok())
        {
            Some(len) => Framing::Length(len),
            None => Framing::UntilClose,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn protocol_error(message: impl Into<String>) -> ProbeError {
    ProbeError::Network {
        message: message.into(),
        cause: Some("malformed HTTP response".into()),
    }
}

fn parse_head(raw: &[u8]) -> Result<ResponseHead> {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split("\r\n").filter(|line| !line.is_empty());

    let status_line = lines
        .next()
        .ok_or_else(|| protocol_error("Empty response head"))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(protocol_error(format!("Invalid status line: {}", status_line)));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| protocol_error(format!("Invalid status code in: {}", status_line)))?;
    let status_text = parts.next().unwrap_or_default().trim().to_string();

    let headers = lines
        .filter_map(|line| {
            line.split_once(':')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        })
        .collect();

    Ok(ResponseHead {
        status,
        status_text,
        headers,
    })
}

const MAX_CHUNK_LINE: usize = 4096;

/// Incremental decoder for a chunked body.
///
/// `pos` is the offset of the first raw byte not yet consumed; decoded
/// bytes never exceed `max_body`.
#[derive(Debug)]
struct ChunkedDecoder {
    pos: usize,
    out: Vec<u8>,
    max_body: usize,
}

impl ChunkedDecoder {
    fn new(max_body: usize) -> Self {
        Self {
            pos: 0,
            out: Vec::new(),
            max_body,
        }
    }

    /// Consume every complete chunk in `buf`. Returns true once the last
    /// chunk and its trailers have arrived.
    fn advance(&mut self, buf: &[u8]) -> Result<bool> {
        loop {
            let rest = &buf[self.pos..];
            let line_len = match find_subsequence(rest, b"\r\n") {
                Some(len) => len,
                None if rest.len() > MAX_CHUNK_LINE => {
                    return Err(protocol_error("Chunk size line too long"))
                }
                None => return Ok(false),
            };
            let size_line = String::from_utf8_lossy(&rest[..line_len]);
            let size_text = size_line.split(';').next().unwrap_or_default().trim();
            let size = usize::from_str_radix(size_text, 16)
                .map_err(|_| protocol_error(format!("Invalid chunk size: {:?}", size_text)))?;
            let data_start = line_len + 2;

            if size == 0 {
                // Last chunk; trailers end with an empty line
                let trailers = &rest[data_start..];
                return Ok(trailers.starts_with(b"\r\n")
                    || find_subsequence(trailers, b"\r\n\r\n").is_some());
            }

            if size > self.max_body.saturating_sub(self.out.len()) {
                return Err(body_too_large(self.max_body));
            }
            let chunk_end = data_start
                .checked_add(size)
                .and_then(|end| end.checked_add(2))
                .ok_or_else(|| protocol_error("Invalid chunk size"))?;
            if rest.len() < chunk_end {
                return Ok(false);
            }
            self.out.extend_from_slice(&rest[data_start..data_start + size]);
            self.pos += chunk_end;
        }
    }

    fn finish(self) -> Vec<u8> {
        self.out
    }
}

fn body_too_large(max_body: usize) -> ProbeError {
    ProbeError::Network {
        message: format!("Response body exceeds {} bytes", max_body),
        cause: None,
    }
}

async fn read_some<S: AsyncRead + Unpin>(stream: &mut S, chunk: &mut [u8]) -> Result<usize> {
    match stream.read(chunk).await {
        Ok(n) => Ok(n),
        // TLS peers often close without close_notify
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(0),
        Err(e) => Err(socket_error(e)),
    }
}

async fn round_trip<S>(
    mut stream: S,
    wire: &[u8],
    head_only: bool,
    max_body: usize,
) -> Result<HttpResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(wire).await.map_err(socket_error)?;
    stream.flush().await.map_err(socket_error)?;

    let mut buf = Vec::with_capacity(NetworkConfig::RAW_READ_CHUNK_SIZE);
    let mut chunk = vec![0u8; NetworkConfig::RAW_READ_CHUNK_SIZE];

    // Skip interim 1xx responses (other than 101) until the final head
    let (head, mut body) = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            let head = parse_head(&buf[..pos + 4])?;
            let rest = buf.split_off(pos + 4);
            if (100..200).contains(&head.status) && head.status != 101 {
                buf = rest;
                continue;
            }
            break (head, rest);
        }
        let n = read_some(&mut stream, &mut chunk).await?;
        if n == 0 {
            return Err(protocol_error("Connection closed before response headers"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let framing = head.framing(head_only);
    if let Framing::Length(len) = framing {
        if len > max_body {
            return Err(body_too_large(max_body));
        }
    }

    let mut chunked = ChunkedDecoder::new(max_body);
    loop {
        match framing {
            Framing::Empty => {
                body.clear();
                break;
            }
            Framing::Length(len) if body.len() >= len => {
                body.truncate(len);
                break;
            }
            Framing::Chunked => {
                if chunked.advance(&body)? {
                    body = chunked.finish();
                    break;
                }
            }
            Framing::UntilClose if body.len() > max_body => {
                return Err(body_too_large(max_body));
            }
            _ => {}
        }

        let n = read_some(&mut stream, &mut chunk).await?;
        if n == 0 {
            if framing == Framing::UntilClose {
                break;
            }
            return Err(protocol_error("Connection closed before end of body"));
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let headers = normalize_headers(
        head.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.clone())),
    );
    let body = match headers.get("content-type") {
        _ if body.is_empty() => ResponseBody::empty(),
        Some(ct) if is_json_content_type(ct) => parse_json_or_text(body),
        _ => ResponseBody::Text(String::from_utf8_lossy(&body).into_owned()),
    };

    Ok(HttpResponse {
        status: head.status,
        status_text: head.status_text,
        headers,
        body,
        response_time: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::duplex;

    #[test]
    fn test_encode_request_line_and_headers() {
        let request = HttpRequest::post("http://127.0.0.1:8080/items?x=1")
            .with_param("y", "2")
            .with_header("X-Trace", "abc")
            .with_body(json!({"name": "widget"}));
        let url = build_url(&request).unwrap();
        let wire = String::from_utf8(encode_request(&request, &url).unwrap()).unwrap();

        assert!(wire.starts_with("POST /items?x=1&y=2 HTTP/1.1\r\n"));
        assert!(wire.contains("Host: 127.0.0.1:8080\r\n"));
        assert!(wire.contains("X-Trace: abc\r\n"));
        assert!(wire.contains("Content-Type: application/json\r\n"));
        assert!(wire.contains("Content-Length: 17\r\n"));
        assert!(wire.contains("Connection: close\r\n\r\n"));
        assert!(wire.ends_with(r#"{"name":"widget"}"#));
    }

    #[test]
    fn test_encode_rejects_header_injection() {
        let request = HttpRequest::get("http://example.com/").with_header("X-Bad", "a\r\nHost: evil");
        let url = build_url(&request).unwrap();
        assert!(matches!(
            encode_request(&request, &url),
            Err(ProbeError::Validation { .. })
        ));
    }

    #[test]
    fn test_parse_head() {
        let head = parse_head(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nX-A: 1\r\n\r\n").unwrap();
        assert_eq!(head.status, 404);
        assert_eq!(head.status_text, "Not Found");
        assert_eq!(head.header("content-length"), Some("0"));
        assert_eq!(head.framing(false), Framing::Length(0));
        assert!(parse_head(b"garbage\r\n\r\n").is_err());
    }

    fn decode_all(buf: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut decoder = ChunkedDecoder::new(NetworkConfig::RAW_MAX_BODY);
        Ok(decoder.advance(buf)?.then(|| decoder.finish()))
    }

    #[test]
    fn test_decode_chunked() {
        let complete = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\n\r\n";
        assert_eq!(decode_all(complete).unwrap(), Some(b"Wikipedia".to_vec()));

        let partial = b"4\r\nWiki\r\n5\r\nped";
        assert_eq!(decode_all(partial).unwrap(), None);

        assert!(decode_all(b"zz\r\n").is_err());
    }

    #[test]
    fn test_decode_chunked_across_reads() {
        let stream = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new(1024);

        assert!(!decoder.advance(&stream[..10]).unwrap());
        assert_eq!(decoder.pos, 9);
        assert!(!decoder.advance(&stream[..20]).unwrap());
        assert!(decoder.advance(stream).unwrap());
        assert_eq!(decoder.finish(), b"Wikipedia".to_vec());
    }

    #[test]
    fn test_decode_chunked_rejects_oversized_chunks() {
        let err = decode_all(b"ffffffffffffffff\r\nabc").unwrap_err();
        assert!(matches!(err, ProbeError::Network { .. }));

        let mut decoder = ChunkedDecoder::new(8);
        assert!(decoder.advance(b"5\r\nhello\r\n").is_ok());
        assert!(decoder.advance(b"5\r\nhello\r\n5\r\nworld\r\n").is_err());

        let endless_line = vec![b'1'; MAX_CHUNK_LINE + 1];
        assert!(decode_all(&endless_line).is_err());
    }

    async fn serve_bytes(response: &'static [u8], head_only: bool) -> Result<HttpResponse> {
        let (client, mut server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let mut request = vec![0u8; 1024];
            let _ = server.read(&mut request).await;
            let _ = server.write_all(response).await;
        });
        round_trip(client, b"GET / HTTP/1.1\r\n\r\n", head_only, 1024).await
    }

    #[tokio::test]
    async fn test_round_trip_content_length_json() {
        let response = serve_bytes(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\nSet-Cookie: a\r\nSet-Cookie: b\r\n\r\n{\"ok\":true}",
            false,
        )
        .await
        .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, ResponseBody::Json(json!({"ok": true})));
        assert_eq!(response.headers["set-cookie"], "a, b");
    }

    #[tokio::test]
    async fn test_round_trip_chunked_with_interim_response() {
        let response = serve_bytes(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Type: text/plain\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
            false,
        )
        .await
        .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, ResponseBody::Text("hello".into()));
    }

    #[tokio::test]
    async fn test_round_trip_invalid_json_falls_back_to_text() {
        let response = serve_bytes(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\nnot json",
            false,
        )
        .await
        .unwrap();
        assert_eq!(response.body, ResponseBody::Text("not json".into()));
    }

    #[tokio::test]
    async fn test_round_trip_head_ignores_length() {
        let response = serve_bytes(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n", true)
            .await
            .unwrap();
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_truncated_body_is_error() {
        let err = serve_bytes(b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\nshort", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Network { .. }));
    }

    #[tokio::test]
    async fn test_round_trip_huge_chunk_size_is_error() {
        let err = serve_bytes(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nabc",
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProbeError::Network { .. }));
    }

    #[tokio::test]
    async fn test_round_trip_enforces_body_limit() {
        let err = serve_bytes(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\n", false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceeds 1024 bytes"), "{}", err);

        static UNFRAMED: [u8; 2048] = [b'x'; 2048];
        let (client, mut server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let mut request = vec![0u8; 1024];
            let _ = server.read(&mut request).await;
            let _ = server.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await;
            let _ = server.write_all(&UNFRAMED).await;
        });
        let err = round_trip(client, b"GET / HTTP/1.1\r\n\r\n", false, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Network { .. }));
    }
}
