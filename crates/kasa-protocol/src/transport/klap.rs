//! KLAP transport for newer TP-Link Kasa and Tapo devices.
//!
//! KLAP (Kasa Local Authentication Protocol) is used by newer firmware versions.
//! It operates over HTTP on port 80 and requires authentication.
//!
//! # Protocol Overview
//!
//! 1. **Handshake 1**: Client sends 16 random bytes, device responds with 16 bytes + hash
//! 2. **Handshake 2**: Client sends confirmation hash, device responds with session cookie
//! 3. **Request**: Client sends encrypted command, device responds with encrypted response
//!
//! # Authentication
//!
//! The device proves in handshake 1 that it knows the auth hash. The client
//! tries, in order, a pre-hashed credential blob, the user's credentials,
//! the default Kasa and Tapo credentials, and blank credentials, until one
//! reproduces the device's proof.
//!
//! # Sessions
//!
//! The handshake runs lazily on the first send and again whenever the
//! session has been reset or is about to expire. The device's `TIMEOUT`
//! cookie sets the session lifetime; the transport renews 20 minutes early.

use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    Credentials,
    config::{DeviceConfig, EncryptionType},
    credentials::fallback_chain,
    crypto::klap::{
        KlapEncryptionSession, generate_auth_hash, generate_auth_hash_v2,
        handshake1_seed_auth_hash, handshake1_seed_auth_hash_v2, handshake2_seed_auth_hash,
        handshake2_seed_auth_hash_v2,
    },
    error::Error,
    transport::{Transport, b64, http::HttpClient, parse_json},
};

/// Default HTTP port for KLAP protocol.
pub const DEFAULT_PORT: u16 = 80;

/// Session cookie name used by KLAP.
pub const SESSION_COOKIE_NAME: &str = "TP_SESSIONID";

/// Cookie carrying the session lifetime in seconds.
pub const TIMEOUT_COOKIE_NAME: &str = "TIMEOUT";

/// Session lifetime assumed when the device sends no `TIMEOUT` cookie.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(86400);

/// How long before the advertised expiry the session is renewed.
pub const SESSION_EXPIRE_BUFFER: Duration = Duration::from_secs(20 * 60);

/// Hash generation used for the handshake.
///
/// v1: MD5 auth hash, `sha256(local_seed + auth_hash)` - IOT devices
/// v2: SHA-256 auth hash, `sha256(local_seed + remote_seed + auth_hash)` - SMART devices
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KlapVersion {
    V1,
    V2,
}

impl KlapVersion {
    fn auth_hash(self, credentials: &Credentials) -> Vec<u8> {
        match self {
            KlapVersion::V1 => generate_auth_hash(credentials).to_vec(),
            KlapVersion::V2 => generate_auth_hash_v2(credentials).to_vec(),
        }
    }

    fn server_proof(self, local_seed: &[u8], remote_seed: &[u8], auth_hash: &[u8]) -> [u8; 32] {
        match self {
            KlapVersion::V1 => handshake1_seed_auth_hash(local_seed, auth_hash),
            KlapVersion::V2 => handshake1_seed_auth_hash_v2(local_seed, remote_seed, auth_hash),
        }
    }

    fn client_proof(self, local_seed: &[u8], remote_seed: &[u8], auth_hash: &[u8]) -> [u8; 32] {
        match self {
            KlapVersion::V1 => handshake2_seed_auth_hash(remote_seed, auth_hash),
            KlapVersion::V2 => handshake2_seed_auth_hash_v2(local_seed, remote_seed, auth_hash),
        }
    }
}

struct KlapSession {
    encryption: KlapEncryptionSession,
    cookie: Option<String>,
    expires_at: Instant,
}

/// Transport using the KLAP protocol over HTTP.
///
/// # Example
///
/// ```no_run
/// use kasa_protocol::{Credentials, DeviceConfig, transport::{KlapTransport, KlapVersion, Transport}};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DeviceConfig::new("192.168.1.100")
///         .with_credentials(Credentials::new("user@example.com", "password"));
///     let mut transport = KlapTransport::new(&config, KlapVersion::V2)?;
///
///     let response = transport.send(r#"{"method":"get_device_info"}"#).await?;
///     println!("{}", response);
///     Ok(())
/// }
/// ```
pub struct KlapTransport {
    http: HttpClient,
    version: KlapVersion,
    credentials: Credentials,
    stored_auth_hash: Option<Vec<u8>>,
    auth_hash: Option<Vec<u8>>,
    session: Option<KlapSession>,
}

impl KlapTransport {
    /// Creates a KLAP transport. No connection is made until the first send.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `credentials_hash` is not valid base64.
    pub fn new(config: &DeviceConfig, version: KlapVersion) -> Result<Self, Error> {
        let stored_auth_hash = config
            .credentials_hash
            .as_deref()
            .map(b64::decode)
            .transpose()?;
        Ok(Self {
            http: HttpClient::new(
                config.host.clone(),
                config.port(),
                config.connection_type.https,
                config.timeout,
            )?,
            version,
            credentials: config.credentials.clone().unwrap_or_default(),
            stored_auth_hash,
            auth_hash: None,
            session: None,
        })
    }

    /// KLAP hash generation in use.
    pub fn version(&self) -> KlapVersion {
        self.version
    }

    fn session_valid(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| Instant::now() < session.expires_at)
    }

    /// Candidate auth hashes in the order they are tried.
    fn candidate_hashes(&self) -> Vec<(&'static str, Vec<u8>)> {
        let mut candidates = Vec::new();
        if let Some(hash) = &self.stored_auth_hash {
            candidates.push(("stored", hash.clone()));
        }
        candidates.push(("user", self.version.auth_hash(&self.credentials)));
        candidates.extend(
            fallback_chain(&self.credentials)
                .into_iter()
                .map(|(label, credentials)| (label, self.version.auth_hash(&credentials))),
        );
        candidates
    }

    async fn handshake(&mut self) -> Result<(), Error> {
        self.session = None;

        let mut local_seed = [0u8; 16];
        rand::rng().fill_bytes(&mut local_seed);

        let (remote_seed, server_hash, cookie, lifetime) = self.handshake1(&local_seed).await?;

        let auth_hash = self
            .candidate_hashes()
            .into_iter()
            .find_map(|(label, hash)| {
                let expected = self.version.server_proof(&local_seed, &remote_seed, &hash);
                (expected == server_hash).then(|| {
                    debug!(host = %self.http.host(), credential_type = label, "Auth hash matched");
                    hash
                })
            })
            .ok_or_else(|| {
                debug!(
                    host = %self.http.host(),
                    server_hash = %hex::encode(server_hash),
                    "No auth hash combination matched server response"
                );
                Error::AuthenticationFailed(
                    "KLAP handshake1 proof did not match any credentials. \
                     Check that your email and password (both case-sensitive) are correct."
                        .into(),
                )
            })?;

        let payload = self
            .version
            .client_proof(&local_seed, &remote_seed, &auth_hash);
        let response = self
            .http
            .post("/app/handshake2", &payload, &self.headers(cookie.as_deref()))
            .await?;
        if response.status != 200 {
            return Err(Error::AuthenticationFailed(format!(
                "Handshake2 returned status {}",
                response.status
            )));
        }

        debug!(
            host = %self.http.host(),
            port = self.http.port(),
            version = ?self.version,
            "KLAP handshake completed successfully"
        );

        self.session = Some(KlapSession {
            encryption: KlapEncryptionSession::new(&local_seed, &remote_seed, &auth_hash),
            cookie,
            expires_at: Instant::now() + lifetime.saturating_sub(SESSION_EXPIRE_BUFFER),
        });
        self.auth_hash = Some(auth_hash);
        Ok(())
    }

    async fn handshake1(
        &self,
        local_seed: &[u8; 16],
    ) -> Result<([u8; 16], [u8; 32], Option<String>, Duration), Error> {
        debug!(
            host = %self.http.host(),
            local_seed = %hex::encode(local_seed),
            "Performing KLAP handshake1"
        );

        let response = self
            .http
            .post("/app/handshake1", local_seed, &self.headers(None))
            .await?;

        if response.status != 200 {
            return Err(Error::AuthenticationFailed(format!(
                "Handshake1 returned status {}",
                response.status
            )));
        }

        let (remote_seed, server_hash) = response
            .body
            .split_first_chunk::<16>()
            .and_then(|(seed, rest)| Some((*seed, <[u8; 32]>::try_from(rest).ok()?)))
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "Handshake1 response has unexpected length: {} (expected 48)",
                    response.body.len()
                ))
            })?;

        let cookie = response.cookie(SESSION_COOKIE_NAME).map(str::to_string);
        let lifetime = response
            .cookie(TIMEOUT_COOKIE_NAME)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SESSION_TIMEOUT);

        debug!(
            remote_seed = %hex::encode(remote_seed),
            has_cookie = cookie.is_some(),
            lifetime_secs = lifetime.as_secs(),
            "Handshake1 received response"
        );

        Ok((remote_seed, server_hash, cookie, lifetime))
    }

    fn headers(&self, cookie: Option<&str>) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Content-Type", "application/octet-stream".to_string())];
        if let Some(cookie) = cookie {
            headers.push(("Cookie", format!("{SESSION_COOKIE_NAME}={cookie}")));
        }
        headers
    }

    async fn send_request(&mut self, request: &str) -> Result<Value, Error> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::Protocol("No active session".into()))?;
        let (payload, seq) = session.encryption.encrypt(request.as_bytes());
        let cookie = session.cookie.clone();

        let path = format!("/app/request?seq={seq}");
        debug!(host = %self.http.host(), port = self.http.port(), seq, "Sending KLAP request");

        let response = self
            .http
            .post(&path, &payload, &self.headers(cookie.as_deref()))
            .await?;

        match response.status {
            200 => {}
            403 => {
                debug!(host = %self.http.host(), "KLAP session rejected, will re-handshake");
                self.session = None;
                return Err(Error::Retryable {
                    code: None,
                    message: "KLAP request returned 403".into(),
                });
            }
            status => {
                return Err(Error::Protocol(format!("Request returned status {status}")));
            }
        }

        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::Protocol("No active session".into()))?;
        let decrypted = session
            .encryption
            .decrypt(&response.body, seq)
            .map_err(|e| Error::Protocol(format!("Failed to decrypt response: {e}")))?;
        parse_json(&decrypted)
    }
}

#[async_trait]
impl Transport for KlapTransport {
    async fn send(&mut self, request: &str) -> Result<Value, Error> {
        if !self.session_valid() {
            self.handshake().await?;
        }
        self.send_request(request).await
    }

    async fn reset(&mut self) {
        self.session = None;
    }

    async fn close(&mut self) {
        self.session = None;
    }

    fn encryption_type(&self) -> EncryptionType {
        EncryptionType::Klap
    }

    fn host(&self) -> &str {
        self.http.host()
    }

    fn port(&self) -> u16 {
        self.http.port()
    }

    fn credentials_hash(&self) -> Option<String> {
        self.auth_hash.as_ref().map(b64::encode)
    }
}

// Implement Debug manually to avoid exposing sensitive session data
impl std::fmt::Debug for KlapTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KlapTransport")
            .field("host", &self.http.host())
            .field("port", &self.http.port())
            .field("version", &self.version)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_order() {
        let config = DeviceConfig::new("127.0.0.1")
            .with_credentials(Credentials::new("user@example.com", "pw"))
            .with_credentials_hash(b64::encode([1u8; 32]));
        let transport = KlapTransport::new(&config, KlapVersion::V2).unwrap();
        let labels: Vec<_> = transport
            .candidate_hashes()
            .into_iter()
            .map(|(label, _)| label)
            .collect();
        assert_eq!(
            labels,
            vec!["stored", "user", "kasa default", "tapo default", "blank"]
        );
    }

    #[test]
    fn test_blank_user_skips_duplicate_blank() {
        let transport = KlapTransport::new(&DeviceConfig::new("h"), KlapVersion::V1).unwrap();
        let labels: Vec<_> = transport
            .candidate_hashes()
            .into_iter()
            .map(|(label, hash)| {
                assert_eq!(hash.len(), 16);
                label
            })
            .collect();
        assert_eq!(labels, vec!["user", "kasa default", "tapo default"]);
    }

    #[test]
    fn test_invalid_stored_hash_rejected() {
        let config = DeviceConfig::new("h").with_credentials_hash("%%%");
        assert!(KlapTransport::new(&config, KlapVersion::V2).is_err());
    }

    #[test]
    fn test_debug_hides_session() {
        let transport = KlapTransport::new(&DeviceConfig::new("h"), KlapVersion::V2).unwrap();
        let debug = format!("{transport:?}");
        assert!(debug.contains("has_session: false"));
    }
}
