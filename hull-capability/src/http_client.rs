//! The outbound HTTP capability. Blocking by design — spec.md §5 treats
//! that as a feature, not a limitation, of a single-threaded local-first
//! runtime. TLS is an injected boundary (a `TlsConnector` trait object
//! backed by `rustls`), matching "the TLS client" being out of scope as a
//! collaborator we only specify at the boundary.

use crate::http_parser::{IncrementalHttpParser, ParseStatus, ParsedResponse, ParserLimits};
use hull_core::HullError;
use hull_sandbox::Manifest;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub poll_timeout: Duration,
    pub limits: ParserLimitsConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct ParserLimitsConfig {
    pub max_headers: usize,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(30),
            limits: ParserLimitsConfig {
                max_headers: 100,
                max_header_bytes: 64 * 1024,
                max_body_bytes: 10 * 1024 * 1024,
            },
        }
    }
}

/// A fully materialized outbound response. Body is always NUL-terminated
/// on success, matching the C-string contract scripts expect at the FFI
/// boundary (`hull-runtime` hands this `Vec<u8>` straight through, trailing
/// 0 and all, as the Lua string backing buffer).
pub struct ClientResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Injected TLS boundary: a connector can turn a plain `TcpStream` into a
/// readable+writable handshake-complete stream. The production
/// implementation wraps `rustls`; tests inject a passthrough.
pub trait TlsConnector: Send + Sync {
    fn handshake(&self, host: &str, stream: TcpStream) -> Result<Box<dyn ReadWrite>, HullError>;
}

pub trait ReadWrite: Read + Write + Send {}
impl<T: Read + Write + Send> ReadWrite for T {}

pub struct RustlsConnector {
    config: Arc<rustls::ClientConfig>,
}

impl RustlsConnector {
    pub fn new() -> Result<Self, HullError> {
        let mut roots = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs()
            .map_err(|e| HullError::IoError(format!("loading native certs: {e}")))?;
        for cert in native {
            let _ = roots.add(cert);
        }
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(RustlsConnector {
            config: Arc::new(config),
        })
    }
}

impl TlsConnector for RustlsConnector {
    fn handshake(&self, host: &str, stream: TcpStream) -> Result<Box<dyn ReadWrite>, HullError> {
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| HullError::InvalidArgument(format!("invalid TLS server name: {e}")))?;
        let conn = rustls::ClientConnection::new(self.config.clone(), server_name)
            .map_err(|e| HullError::IoError(format!("TLS setup: {e}")))?;
        Ok(Box::new(rustls::StreamOwned::new(conn, stream)))
    }
}

/// Reject CRLF in a value that will be embedded in a request line or
/// header — this is the single check that prevents request smuggling via
/// script-controlled strings.
fn reject_crlf(value: &str, what: &str) -> Result<(), HullError> {
    if value.contains('\r') || value.contains('\n') {
        return Err(HullError::invalid_argument(format!("{what} must not contain CR or LF")));
    }
    Ok(())
}

struct ParsedTarget {
    host: String,
    port: u16,
    path_and_query: String,
    use_tls: bool,
}

fn parse_url(raw: &str) -> Result<ParsedTarget, HullError> {
    reject_crlf(raw, "url")?;
    let url = Url::parse(raw).map_err(|e| HullError::invalid_argument(format!("invalid url: {e}")))?;
    let use_tls = match url.scheme() {
        "http" => false,
        "https" => true,
        other => return Err(HullError::invalid_argument(format!("unsupported scheme '{other}'"))),
    };
    let host = url
        .host_str()
        .ok_or_else(|| HullError::invalid_argument("url has no host"))?
        .to_string();
    reject_crlf(&host, "host")?;
    let port = url.port_or_known_default().unwrap_or(if use_tls { 443 } else { 80 });
    if port == 0 {
        return Err(HullError::invalid_argument("port must be 1-65535"));
    }
    let mut path_and_query = url.path().to_string();
    if let Some(q) = url.query() {
        path_and_query.push('?');
        path_and_query.push_str(q);
    }
    reject_crlf(&path_and_query, "path")?;
    Ok(ParsedTarget {
        host,
        port,
        path_and_query,
        use_tls,
    })
}

fn connect_with_timeout(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, HullError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| HullError::IoError(format!("resolving '{host}': {e}")))?
        .collect();
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout)).ok();
                stream.set_write_timeout(Some(timeout)).ok();
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(HullError::Timeout(format!(
        "connecting to {host}:{port}: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn build_request_line_and_headers(
    method: &str,
    target: &ParsedTarget,
    headers: &[(String, String)],
    body: &[u8],
) -> Result<Vec<u8>, HullError> {
    reject_crlf(method, "method")?;
    for (name, value) in headers {
        reject_crlf(name, "header name")?;
        reject_crlf(value, "header value")?;
    }

    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(format!("{method} {} HTTP/1.1\r\n", target.path_and_query).as_bytes());
    out.extend_from_slice(format!("Host: {}\r\n", target.host).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n");
    if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-length")) && !body.is_empty() {
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);

    const MAX_REQUEST_LINE: usize = 64 * 1024;
    if out.len() > MAX_REQUEST_LINE + body.len() {
        return Err(HullError::invalid_argument("request header block too large"));
    }
    Ok(out)
}

/// Issue one outbound HTTP(S) request. `tls` is only consulted when the
/// URL scheme is `https`.
pub fn request(
    config: &ClientConfig,
    manifest: &Manifest,
    tls: &dyn TlsConnector,
    method: &str,
    url: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> Result<ClientResponse, HullError> {
    let target = parse_url(url)?;

    if !manifest.is_host_allowed(&target.host) {
        return Err(HullError::not_permitted(format!(
            "host '{}' is not in the manifest allowlist",
            target.host
        )));
    }

    let stream = connect_with_timeout(&target.host, target.port, config.connect_timeout)?;
    let request_bytes = build_request_line_and_headers(method, &target, headers, body)?;

    let mut conn: Box<dyn ReadWrite> = if target.use_tls {
        tls.handshake(&target.host, stream)?
    } else {
        Box::new(stream)
    };

    conn.write_all(&request_bytes)
        .map_err(|e| HullError::IoError(e.to_string()))?;

    let mut parser = IncrementalHttpParser::new(ParserLimits {
        max_headers: config.limits.max_headers,
        max_header_bytes: config.limits.max_header_bytes,
        max_body_bytes: config.limits.max_body_bytes,
    });

    let mut read_buf = [0u8; 8192];
    loop {
        let n = conn
            .read(&mut read_buf)
            .map_err(|e| HullError::IoError(e.to_string()))?;
        if n == 0 {
            // Connection closed; if we were waiting on an unbounded body
            // (no Content-Length), that's how the response ends.
            let (status, _) = parser.parse(&[])?;
            if status == ParseStatus::Complete {
                break;
            }
            return Err(HullError::IoError("connection closed before response completed".into()));
        }
        let (status, _) = parser.parse(&read_buf[..n])?;
        if status == ParseStatus::Complete {
            break;
        }
    }

    let ParsedResponse { status, headers, mut body, .. } = parser.into_response();
    body.push(0); // NUL-terminated on success
    Ok(ClientResponse { status, headers, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_crlf_in_host() {
        let result = parse_url("http://evil.com\r\nHost: other/path");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let result = parse_url("ftp://example.com/");
        assert!(result.is_err());
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let target = parse_url("http://[::1]:8080/path").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 8080);
    }

    #[test]
    fn defaults_port_from_scheme() {
        let http = parse_url("http://example.com/").unwrap();
        assert_eq!(http.port, 80);
        let https = parse_url("https://example.com/").unwrap();
        assert_eq!(https.port, 443);
    }

    #[test]
    fn rejects_crlf_in_header_value() {
        let target = parse_url("http://example.com/").unwrap();
        let result = build_request_line_and_headers(
            "GET",
            &target,
            &[("X-Evil".to_string(), "value\r\nX-Injected: 1".to_string())],
            &[],
        );
        assert!(result.is_err());
    }

    #[test]
    fn host_not_in_manifest_is_rejected_before_connecting() {
        let manifest = Manifest {
            hosts: vec!["allowed.example.com".to_string()],
            present: true,
            ..Default::default()
        };
        let tls = RustlsConnectorStub;
        let result = request(
            &ClientConfig::default(),
            &manifest,
            &tls,
            "GET",
            "http://not-allowed.example.com/",
            &[],
            &[],
        );
        assert!(matches!(result, Err(HullError::NotPermitted(_))));
    }

    struct RustlsConnectorStub;
    impl TlsConnector for RustlsConnectorStub {
        fn handshake(&self, _host: &str, _stream: TcpStream) -> Result<Box<dyn ReadWrite>, HullError> {
            unreachable!("TLS should not be attempted when the host check fails first")
        }
    }
}
