//! Minimal HTTP/1.1 client shared by the KLAP, AES and camera transports.
//!
//! Devices only accept title-case header names ("Content-Type", "Cookie"),
//! so requests are written by hand onto a TCP stream.
//!
//! HTTPS goes through rustls and accepts the devices' self-signed
//! certificates. The rustls stream is synchronous and runs on the blocking
//! thread pool.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::Error;

/// Upper bound on a response we are willing to buffer.
const MAX_RESPONSE_LEN: usize = 4 * 1024 * 1024;

/// A parsed HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body with any chunked encoding removed.
    pub body: Vec<u8>,
    /// Every `name=value` pair found in `Set-Cookie` headers.
    pub cookies: HashMap<String, String>,
}

impl HttpResponse {
    /// Returns a cookie value by name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// HTTP client bound to one device endpoint.
#[derive(Clone)]
pub struct HttpClient {
    host: String,
    port: u16,
    timeout: Duration,
    tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl HttpClient {
    /// Creates a client for `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] if the TLS configuration cannot be
    /// built.
    pub fn new(host: impl Into<String>, port: u16, https: bool, timeout: Duration) -> Result<Self, Error> {
        let tls_config = if https {
            Some(Arc::new(create_tls_config()?))
        } else {
            None
        };
        Ok(Self {
            host: host.into(),
            port,
            timeout,
            tls_config,
        })
    }

    /// Device host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Device port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `true` when requests go over TLS.
    pub fn is_https(&self) -> bool {
        self.tls_config.is_some()
    }

    /// Sends a POST request.
    ///
    /// # Arguments
    ///
    /// * `path` - Request target including any query string
    /// * `body` - Raw request body
    /// * `headers` - Extra headers, written verbatim in the given case
    pub async fn post(
        &self,
        path: &str,
        body: &[u8],
        headers: &[(&str, String)],
    ) -> Result<HttpResponse, Error> {
        let request = build_request(&self.host, self.port, path, body, headers);
        debug!(host = %self.host, port = self.port, path, bytes = body.len(), "HTTP POST");

        let raw = match &self.tls_config {
            None => self.exchange_plain(&request).await?,
            Some(config) => {
                let host = self.host.clone();
                let port = self.port;
                let io_timeout = self.timeout;
                let config = config.clone();
                tokio::task::spawn_blocking(move || {
                    exchange_tls(&host, port, &request, config, io_timeout)
                })
                .await
                .map_err(|e| Error::IoError(format!("Task join error: {e}")))??
            }
        };

        let response = parse_response(&raw)?;
        debug!(host = %self.host, status = response.status, bytes = response.body.len(), "HTTP response");
        Ok(response)
    }

    async fn exchange_plain(&self, request: &[u8]) -> Result<Vec<u8>, Error> {
        let addr = format!("{}:{}", self.host, self.port);
        let mut stream = timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout(format!("Connection to {addr} timed out")))?
            .map_err(|e| Error::ConnectionFailed(format!("Connection to {addr} failed: {e}")))?;

        timeout(self.timeout, stream.write_all(request))
            .await
            .map_err(|_| Error::Timeout("Write timed out".into()))??;

        let mut response = Vec::with_capacity(1024);
        let mut buf = [0u8; 4096];
        loop {
            let n = timeout(self.timeout, stream.read(&mut buf))
                .await
                .map_err(|_| Error::Timeout("Read timed out".into()))??;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
            if response_complete(&response)? {
                break;
            }
        }
        Ok(response)
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("https", &self.is_https())
            .finish()
    }
}

fn exchange_tls(
    host: &str,
    port: u16,
    request: &[u8],
    tls_config: Arc<rustls::ClientConfig>,
    io_timeout: Duration,
) -> Result<Vec<u8>, Error> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::ConnectionFailed(format!("Cannot resolve {host}: {e}")))?
        .next()
        .ok_or_else(|| Error::ConnectionFailed(format!("No address for {host}")))?;

    let mut tcp_stream = std::net::TcpStream::connect_timeout(&addr, io_timeout)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => Error::Timeout(format!("Connection to {addr} timed out")),
            _ => Error::ConnectionFailed(format!("TCP connect to {addr} failed: {e}")),
        })?;
    tcp_stream.set_read_timeout(Some(io_timeout))?;
    tcp_stream.set_write_timeout(Some(io_timeout))?;

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::ConnectionFailed(format!("Invalid server name {host}")))?;
    let mut conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| Error::ConnectionFailed(format!("TLS connection failed: {e}")))?;
    let mut tls_stream = rustls::Stream::new(&mut conn, &mut tcp_stream);

    tls_stream.write_all(request).map_err(map_blocking_io)?;
    tls_stream.flush().map_err(map_blocking_io)?;

    let mut response = Vec::with_capacity(4096);
    let mut buf = [0u8; 4096];
    loop {
        match tls_stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset && !response.is_empty() => {
                break;
            }
            Err(e) => return Err(map_blocking_io(e)),
        }
        if response_complete(&response)? {
            break;
        }
    }
    Ok(response)
}

fn map_blocking_io(err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
            Error::Timeout(format!("TLS I/O timed out: {err}"))
        }
        _ => Error::from(err),
    }
}

/// Builds a POST request with title-case headers.
fn build_request(
    host: &str,
    port: u16,
    path: &str,
    body: &[u8],
    headers: &[(&str, String)],
) -> Vec<u8> {
    let mut head = format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Content-Length: {}\r\n",
        body.len()
    );
    if !headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("Accept")) {
        head.push_str("Accept: */*\r\n");
    }
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    let mut request = head.into_bytes();
    request.extend_from_slice(body);
    request
}

/// Find the position of "\r\n\r\n" in the response (end of headers).
fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn header_value<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    headers.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

fn is_chunked(headers: &str) -> bool {
    header_value(headers, "transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
}

/// Decides whether enough bytes have arrived to stop reading.
fn response_complete(data: &[u8]) -> Result<bool, Error> {
    if data.len() > MAX_RESPONSE_LEN {
        return Err(Error::Protocol(format!(
            "Response too large: {} bytes",
            data.len()
        )));
    }
    let Some(header_end) = find_header_end(data) else {
        return Ok(false);
    };
    let headers = String::from_utf8_lossy(&data[..header_end]);
    let body = &data[header_end + 4..];
    if let Some(len) = header_value(&headers, "content-length").and_then(|v| v.parse::<usize>().ok()) {
        return Ok(body.len() >= len);
    }
    if is_chunked(&headers) {
        return Ok(body.ends_with(b"0\r\n\r\n"));
    }
    Ok(false)
}

/// Parses a raw HTTP response.
fn parse_response(raw: &[u8]) -> Result<HttpResponse, Error> {
    let header_end = find_header_end(raw)
        .ok_or_else(|| Error::Protocol("Invalid HTTP response: no header end".into()))?;
    let headers = String::from_utf8_lossy(&raw[..header_end]);

    let status = headers
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| Error::Protocol("Invalid HTTP response: no status code".into()))?;

    let mut body = raw[header_end + 4..].to_vec();
    if is_chunked(&headers) {
        body = decode_chunked(&body)?;
    } else if let Some(len) = header_value(&headers, "content-length").and_then(|v| v.parse::<usize>().ok()) {
        body.truncate(len);
    }

    Ok(HttpResponse {
        status,
        body,
        cookies: parse_cookies(&headers),
    })
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut body = Vec::with_capacity(data.len());
    loop {
        let line_end = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| Error::Protocol("Truncated chunked body".into()))?;
        let size_line = String::from_utf8_lossy(&data[..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| Error::Protocol(format!("Invalid chunk size {size_hex:?}")))?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(body);
        }
        let chunk = data
            .get(..size)
            .ok_or_else(|| Error::Protocol("Truncated chunk".into()))?;
        body.extend_from_slice(chunk);
        data = data.get(size + 2..).unwrap_or_default();
    }
}

/// Collects `name=value` pairs from every `Set-Cookie` header.
///
/// Devices send `TP_SESSIONID=...;TIMEOUT=86400` in a single header, so every
/// `;`-separated pair is kept rather than only the first.
fn parse_cookies(headers: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for line in headers.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("set-cookie") {
            continue;
        }
        for pair in value.split(';') {
            if let Some((key, val)) = pair.split_once('=') {
                cookies.insert(key.trim().to_string(), val.trim().to_string());
            }
        }
    }
    cookies
}

/// Trusts any device certificate but still checks handshake signatures.
#[derive(Debug)]
struct DeviceCertVerifier(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for DeviceCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn create_tls_config() -> Result<rustls::ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(DeviceCertVerifier(provider.clone()));
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| Error::ConnectionFailed(format!("TLS configuration failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();

    Ok(config)
}
