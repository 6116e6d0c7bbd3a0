//! Transport layer for communicating with TP-Link Kasa and Tapo devices.
//!
//! A transport owns the connection and session state for one device and
//! turns a serialized request into a decoded JSON response:
//!
//! - [`LegacyTransport`]: XOR-obfuscated TCP on port 9999 (older firmware)
//! - [`KlapTransport`]: KLAP handshake and AES over HTTP (newer firmware)
//! - [`AesTransport`]: RSA handshake and `securePassthrough` over HTTP (Tapo)
//! - [`SslAesTransport`]: nonce login and AES over HTTPS (Tapo cameras)
//!
//! Connection is lazy: the first [`Transport::send`] connects and performs
//! any handshake. [`Transport::reset`] drops the session so the next send
//! starts a fresh handshake.

pub mod aes;
pub mod http;
pub mod klap;
pub mod legacy;
pub mod ssl_aes;

pub use self::aes::AesTransport;
pub use klap::{KlapTransport, KlapVersion};
pub use legacy::LegacyTransport;
pub use ssl_aes::SslAesTransport;

use async_trait::async_trait;
use serde_json::Value;

use crate::{config::EncryptionType, error::Error};

/// Trait for device transport protocols.
///
/// This trait abstracts over the different wire protocols to provide a
/// unified interface for sending requests to devices.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a serialized JSON request and returns the decoded response.
    ///
    /// # Arguments
    ///
    /// * `request` - JSON request string
    async fn send(&mut self, request: &str) -> Result<Value, Error>;

    /// Drops session state so the next send performs a fresh handshake.
    ///
    /// Calling this repeatedly has the same effect as calling it once.
    async fn reset(&mut self);

    /// Releases the underlying connection.
    async fn close(&mut self);

    /// Returns the encryption type used by this transport.
    fn encryption_type(&self) -> EncryptionType;

    /// Returns the device host.
    fn host(&self) -> &str;

    /// Returns the device port.
    fn port(&self) -> u16;

    /// Returns a base64 blob that can stand in for credentials on the next
    /// connection (see [`crate::DeviceConfig::credentials_hash`]).
    fn credentials_hash(&self) -> Option<String> {
        None
    }
}

/// Base64 (standard alphabet) helpers shared by the transports.
pub(crate) mod b64 {
    use base64::{Engine, engine::general_purpose::STANDARD};

    use crate::error::Error;

    pub fn encode(data: impl AsRef<[u8]>) -> String {
        STANDARD.encode(data)
    }

    pub fn decode(data: &str) -> Result<Vec<u8>, Error> {
        STANDARD
            .decode(data.trim())
            .map_err(|e| Error::Protocol(format!("Base64 decode failed: {e}")))
    }
}

/// Parses a response body as JSON.
pub(crate) fn parse_json(body: &[u8]) -> Result<Value, Error> {
    serde_json::from_slice(body).map_err(|e| {
        Error::ParseError(format!(
            "{e}: {}",
            String::from_utf8_lossy(&body[..body.len().min(200)])
        ))
    })
}

/// Milliseconds since the Unix epoch, as sent in `request_time_milis`.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
