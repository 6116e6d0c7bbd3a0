//! SSL-AES transport for Tapo cameras and camera-protocol hubs.
//!
//! Cameras speak HTTPS on port 443 and use a two-round nonce login instead
//! of an RSA handshake:
//!
//! 1. `login` with a client nonce and `encrypt_type` 3. The device answers
//!    with `INVALID_NONCE`, its own nonce and a `device_confirm` proof that
//!    identifies which password hash (MD5 or SHA-256) it holds.
//! 2. `login` again with `digest_passwd`; the device returns the `stok`
//!    session token and the starting request sequence number.
//!
//! Requests are `securePassthrough` envelopes posted to `/stok=<stok>/ds`
//! with `Seq` and `Tapo_tag` headers authenticating the body.

use async_trait::async_trait;
use md5::Md5;
use rand::RngCore;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{
    Credentials,
    config::{CAMERA_HTTPS_PORT, DeviceConfig, EncryptionType},
    credentials::DefaultCredentials,
    crypto::aes::AesSession,
    error::Error,
    error_code::{SmartErrorCode, response_error_code},
    transport::{Transport, b64, http::HttpClient, parse_json},
};

/// Default HTTPS port of cameras.
pub const DEFAULT_PORT: u16 = CAMERA_HTTPS_PORT;

/// Local account name used by cameras.
pub const CAMERA_USERNAME: &str = "admin";

fn sha256_upper(data: &str) -> String {
    hex::encode_upper(Sha256::digest(data.as_bytes()))
}

fn md5_upper(data: &str) -> String {
    hex::encode_upper(Md5::digest(data.as_bytes()))
}

/// Device proof expected from login round 1.
fn device_confirm(cnonce: &str, nonce: &str, pwd_hash: &str) -> String {
    format!("{}{nonce}{cnonce}", sha256_upper(&format!("{cnonce}{pwd_hash}{nonce}")))
}

/// Client proof sent in login round 2.
fn digest_passwd(cnonce: &str, nonce: &str, pwd_hash: &str) -> String {
    format!("{}{cnonce}{nonce}", sha256_upper(&format!("{pwd_hash}{cnonce}{nonce}")))
}

/// Session key or IV derived from the login nonces.
fn session_token(label: &str, cnonce: &str, nonce: &str, pwd_hash: &str) -> [u8; 16] {
    let hashed_key = sha256_upper(&format!("{cnonce}{pwd_hash}{nonce}"));
    let digest = Sha256::digest(format!("{label}{cnonce}{nonce}{hashed_key}").as_bytes());
    let mut token = [0u8; 16];
    token.copy_from_slice(&digest[..16]);
    token
}

/// Body authentication tag sent in the `Tapo_tag` header.
fn tapo_tag(pwd_hash: &str, cnonce: &str, body: &str, seq: i64) -> String {
    let pwd_nonce_hash = sha256_upper(&format!("{pwd_hash}{cnonce}"));
    sha256_upper(&format!("{pwd_nonce_hash}{body}{seq}"))
}

struct CameraSession {
    aes: AesSession,
    stok: String,
    seq: i64,
    cnonce: String,
    pwd_hash: String,
}

/// Transport for SMART cameras (HTTPS, nonce login, AES passthrough).
pub struct SslAesTransport {
    http: HttpClient,
    username: String,
    pwd_hash_candidates: Vec<(&'static str, String)>,
    chosen_pwd_hash: Option<String>,
    session: Option<CameraSession>,
}

impl SslAesTransport {
    /// Creates a camera transport. No connection is made until the first send.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `credentials_hash` cannot be decoded.
    pub fn new(config: &DeviceConfig) -> Result<Self, Error> {
        let mut username = CAMERA_USERNAME.to_string();
        let mut candidates = Vec::new();

        if config.credentials.is_none()
            && let Some(hash) = &config.credentials_hash
        {
            let stored: Value = serde_json::from_slice(&b64::decode(hash)?)
                .map_err(|e| Error::Protocol(format!("Invalid credentials hash: {e}")))?;
            if let Some(un) = stored.get("un").and_then(Value::as_str) {
                username = un.to_string();
            }
            if let Some(pwd) = stored.get("pwd").and_then(Value::as_str) {
                candidates.push(("stored", pwd.to_string()));
            }
        }

        if let Some(credentials) = config.credentials.as_ref().filter(|c| !c.is_blank()) {
            let password = credentials.expose_password();
            candidates.push(("user md5", md5_upper(password)));
            candidates.push(("user sha256", sha256_upper(password)));
        }
        let camera_default: Credentials = DefaultCredentials::Camera.credentials();
        candidates.push((
            DefaultCredentials::Camera.label(),
            camera_default.expose_password().to_ascii_uppercase(),
        ));

        let port = config
            .port_override
            .or(config.connection_type.http_port)
            .unwrap_or(DEFAULT_PORT);
        Ok(Self {
            http: HttpClient::new(config.host.clone(), port, true, config.timeout)?,
            username,
            pwd_hash_candidates: candidates,
            chosen_pwd_hash: None,
            session: None,
        })
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Content-Type", "application/json; charset=UTF-8".to_string()),
            ("requestByApp", "true".to_string()),
            ("Accept", "application/json".to_string()),
            ("Connection", "close".to_string()),
            (
                "Referer",
                format!("https://{}:{}", self.http.host(), self.http.port()),
            ),
            ("User-Agent", "Tapo CameraClient Android".to_string()),
        ]
    }

    async fn post_json(&self, path: &str, body: &str, extra: &[(&'static str, String)]) -> Result<Value, Error> {
        let mut headers = self.headers();
        headers.extend_from_slice(extra);
        let response = self.http.post(path, body.as_bytes(), &headers).await?;
        if response.status != 200 {
            return Err(Error::Protocol(format!(
                "{path} returned status {}",
                response.status
            )));
        }
        parse_json(&response.body)
    }

    async fn handshake(&mut self) -> Result<(), Error> {
        self.session = None;

        let mut nonce_bytes = [0u8; 8];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let cnonce = hex::encode_upper(nonce_bytes);

        debug!(host = %self.http.host(), "Performing camera login round 1");
        let round1 = json!({
            "method": "login",
            "params": {"cnonce": cnonce, "encrypt_type": "3", "username": self.username},
        });
        let response = self.post_json("/", &round1.to_string(), &[]).await?;

        let code = response_error_code(&response);
        let data = response.pointer("/result/data");
        let nonce = data.and_then(|d| d.get("nonce")).and_then(Value::as_str);
        let confirm = data
            .and_then(|d| d.get("device_confirm"))
            .and_then(Value::as_str);
        let (Some(nonce), Some(confirm), SmartErrorCode::InvalidNonce) = (nonce, confirm, code) else {
            return Err(Error::AuthenticationFailed(format!(
                "Camera login round 1 failed with {code:?}"
            )));
        };

        let (label, pwd_hash) = self
            .pwd_hash_candidates
            .iter()
            .find(|(_, hash)| device_confirm(&cnonce, nonce, hash) == confirm)
            .cloned()
            .ok_or_else(|| {
                Error::AuthenticationFailed(
                    "Device confirmation did not match any credentials".into(),
                )
            })?;
        debug!(host = %self.http.host(), credential_type = label, "Device confirmation matched");

        let round2 = json!({
            "method": "login",
            "params": {
                "cnonce": cnonce,
                "encrypt_type": "3",
                "digest_passwd": digest_passwd(&cnonce, nonce, &pwd_hash),
                "username": self.username,
            },
        });
        let response = self.post_json("/", &round2.to_string(), &[]).await?;
        let code = response_error_code(&response);
        if !code.is_success() {
            return Err(Error::from_code(code, "Camera login round 2 failed"));
        }

        let stok = response
            .pointer("/result/stok")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("Login response has no stok".into()))?;
        let seq = response
            .pointer("/result/start_seq")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Protocol("Login response has no start_seq".into()))?;

        let aes = AesSession::new(
            session_token("lsk", &cnonce, nonce, &pwd_hash),
            session_token("ivb", &cnonce, nonce, &pwd_hash),
        );
        self.session = Some(CameraSession {
            aes,
            stok: stok.to_string(),
            seq,
            cnonce,
            pwd_hash: pwd_hash.clone(),
        });
        self.chosen_pwd_hash = Some(pwd_hash);

        debug!(host = %self.http.host(), seq, "Camera login completed");
        Ok(())
    }

    async fn secure_passthrough(&mut self, request: &str) -> Result<Value, Error> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::Protocol("No active session".into()))?;

        let body = json!({
            "method": "securePassthrough",
            "params": {"request": session.aes.encrypt_b64(request.as_bytes())},
        })
        .to_string();
        let seq = session.seq;
        session.seq += 1;
        let extra = [
            ("Seq", seq.to_string()),
            (
                "Tapo_tag",
                tapo_tag(&session.pwd_hash, &session.cnonce, &body, seq),
            ),
        ];
        let path = format!("/stok={}/ds", session.stok);
        let aes = session.aes.clone();

        let envelope = self.post_json(&path, &body, &extra).await?;
        let code = response_error_code(&envelope);
        if !code.is_success() {
            if code == SmartErrorCode::SessionExpired || code.is_auth_error() {
                warn!(host = %self.http.host(), ?code, "Camera session rejected");
                self.session = None;
            }
            return Err(Error::from_code(code, "Error sending secure_passthrough message"));
        }

        match envelope.pointer("/result/response").and_then(Value::as_str) {
            Some(encrypted) => parse_json(&aes.decrypt_b64(encrypted)?),
            None => Ok(envelope),
        }
    }
}

#[async_trait]
impl Transport for SslAesTransport {
    async fn send(&mut self, request: &str) -> Result<Value, Error> {
        if self.session.is_none() {
            self.handshake().await?;
        }
        self.secure_passthrough(request).await
    }

    async fn reset(&mut self) {
        self.session = None;
    }

    async fn close(&mut self) {
        self.session = None;
    }

    fn encryption_type(&self) -> EncryptionType {
        EncryptionType::Aes
    }

    fn host(&self) -> &str {
        self.http.host()
    }

    fn port(&self) -> u16 {
        self.http.port()
    }

    fn credentials_hash(&self) -> Option<String> {
        let pwd = self.chosen_pwd_hash.as_ref()?;
        Some(b64::encode(
            json!({"un": self.username, "pwd": pwd}).to_string(),
        ))
    }
}

impl std::fmt::Debug for SslAesTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SslAesTransport")
            .field("host", &self.http.host())
            .field("port", &self.http.port())
            .field("username", &self.username)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}
