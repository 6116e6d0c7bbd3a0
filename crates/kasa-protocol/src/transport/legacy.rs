//! Plain TCP transport for IOT devices that predate KLAP.
//!
//! Frames are XOR-obfuscated JSON behind a 4-byte big-endian length on
//! port 9999, with no authentication. One TCP connection is held open
//! between requests; any failure or [`Transport::reset`] drops it.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

use crate::{
    config::{DeviceConfig, EncryptionType, XOR_PORT},
    crypto::xor::{FRAME_HEADER_LEN, decrypt, encrypt},
    error::Error,
    transport::{Transport, parse_json},
};

/// Default port for legacy TP-Link Smart Home Protocol.
pub const DEFAULT_PORT: u16 = XOR_PORT;

/// Largest response payload accepted from a device.
const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

/// Transport using the legacy XOR protocol over TCP.
///
/// # Example
///
/// ```no_run
/// use kasa_protocol::{DeviceConfig, transport::{LegacyTransport, Transport}};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut transport = LegacyTransport::new(&DeviceConfig::new("192.168.1.100"));
///     let response = transport.send(r#"{"system":{"get_sysinfo":{}}}"#).await?;
///     println!("{}", response);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct LegacyTransport {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl LegacyTransport {
    /// Creates a new legacy transport. No connection is made until the first send.
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port(),
            timeout: config.timeout,
            stream: None,
        }
    }

    async fn connect(&mut self) -> Result<&mut TcpStream, Error> {
        if self.stream.is_none() {
            let addr = format!("{}:{}", self.host, self.port);
            debug!(addr = %addr, "connecting");
            let stream = timeout(self.timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| Error::Timeout("Connection timed out".into()))?
                .map_err(|e| Error::ConnectionFailed(format!("{addr}: {e}")))?;
            debug!(addr = %addr, "connected");
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| Error::ConnectionFailed("connection unavailable".into()))
    }

    async fn exchange(&mut self, request: &str) -> Result<Vec<u8>, Error> {
        let io_timeout = self.timeout;
        let stream = self.connect().await?;

        let encrypted = encrypt(request.as_bytes());
        debug!(bytes = encrypted.len(), "sending request");

        timeout(io_timeout, stream.write_all(&encrypted))
            .await
            .map_err(|_| Error::Timeout("Write timed out".into()))??;

        let mut len_buf = [0u8; FRAME_HEADER_LEN];
        timeout(io_timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| Error::Timeout("Read timed out".into()))??;

        let payload_len = u32::from_be_bytes(len_buf) as usize;
        debug!(payload_bytes = payload_len, "response payload length");

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(Error::Protocol(format!(
                "Response too large: {payload_len} bytes"
            )));
        }

        let mut payload = vec![0u8; payload_len];
        timeout(io_timeout, stream.read_exact(&mut payload))
            .await
            .map_err(|_| Error::Timeout("Read timed out".into()))??;

        debug!(bytes = payload_len, "received response");
        Ok(decrypt(&payload))
    }
}

#[async_trait]
impl Transport for LegacyTransport {
    async fn send(&mut self, request: &str) -> Result<Value, Error> {
        match self.exchange(request).await {
            Ok(payload) => parse_json(&payload),
            Err(err) => {
                // A half-read frame leaves the stream unusable.
                self.stream = None;
                Err(err)
            }
        }
    }

    async fn reset(&mut self) {
        self.close().await;
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    fn encryption_type(&self) -> EncryptionType {
        EncryptionType::Xor
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn serve_once(listener: &TcpListener, reply: &str) -> Vec<u8> {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut len_buf = [0u8; 4];
        socket.read_exact(&mut len_buf).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        socket.read_exact(&mut payload).await.unwrap();
        socket.write_all(&encrypt(reply.as_bytes())).await.unwrap();
        decrypt(&payload)
    }

    #[tokio::test]
    async fn test_send_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            serve_once(&listener, r#"{"system":{"get_sysinfo":{"alias":"Lamp"}}}"#).await
        });

        let config = DeviceConfig::new("127.0.0.1").with_port(port);
        let mut transport = LegacyTransport::new(&config);
        let response = transport
            .send(r#"{"system":{"get_sysinfo":{}}}"#)
            .await
            .unwrap();

        assert_eq!(response["system"]["get_sysinfo"]["alias"], "Lamp");
        assert_eq!(
            server.await.unwrap(),
            br#"{"system":{"get_sysinfo":{}}}"#.to_vec()
        );
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = DeviceConfig::new("127.0.0.1").with_port(port);
        let mut transport = LegacyTransport::new(&config);
        let err = transport.send("{}").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let mut transport = LegacyTransport::new(&DeviceConfig::new("127.0.0.1"));
        transport.reset().await;
        transport.reset().await;
        assert!(transport.stream.is_none());
        assert_eq!(transport.port(), DEFAULT_PORT);
    }
}
