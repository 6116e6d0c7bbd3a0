//! AES transport for Tapo devices using `securePassthrough`.
//!
//! # Protocol Overview
//!
//! 1. **Handshake**: client posts its RSA public key to `/app`; the device
//!    answers with a 32-byte AES key + IV wrapped with PKCS#1 v1.5 and a
//!    session cookie.
//! 2. **Login**: `login_device` is sent through `securePassthrough`; the
//!    device returns a token appended to every later URL as `?token=`.
//! 3. **Request**: every request is AES encrypted, base64 encoded and wrapped
//!    in `{"method":"securePassthrough","params":{"request": ...}}`.
//!
//! Login version 2 devices expect `password2 = base64(sha1_hex(password))`;
//! older devices expect `password = base64(password)`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use sha1::{Digest, Sha1};
use tokio::time::Instant;
use tracing::debug;

use crate::{
    Credentials,
    config::{DeviceConfig, EncryptionType},
    credentials::DefaultCredentials,
    crypto::{
        aes::AesSession,
        rsa::{HANDSHAKE_KEY_BITS, KeyPair},
    },
    error::Error,
    error_code::{SmartErrorCode, response_error_code},
    transport::{
        Transport, b64,
        http::{HttpClient, HttpResponse},
        klap::{DEFAULT_SESSION_TIMEOUT, SESSION_EXPIRE_BUFFER, TIMEOUT_COOKIE_NAME},
        now_millis, parse_json,
    },
};

/// Cookie names devices use for the session id.
const SESSION_COOKIE_NAMES: [&str; 2] = ["TP_SESSIONID", "SESSIONID"];

fn sha1_hex(data: &str) -> String {
    hex::encode(Sha1::digest(data.as_bytes()))
}

/// Builds the `login_device` parameters for a login version.
pub(crate) fn login_params(credentials: &Credentials, login_version: u32) -> Map<String, Value> {
    let username = b64::encode(sha1_hex(&credentials.username));
    let mut params = Map::new();
    if login_version == 2 {
        params.insert(
            "password2".into(),
            b64::encode(sha1_hex(credentials.expose_password())).into(),
        );
    } else {
        params.insert(
            "password".into(),
            b64::encode(credentials.expose_password()).into(),
        );
    }
    params.insert("username".into(), username.into());
    params
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    HandshakeRequired,
    LoginRequired,
    Established,
}

/// Transport using RSA handshake and AES `securePassthrough` over HTTP(S).
///
/// # Example
///
/// ```no_run
/// use kasa_protocol::{Credentials, DeviceConfig, transport::{AesTransport, Transport}};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DeviceConfig::new("192.168.1.100")
///         .with_credentials(Credentials::new("user@example.com", "password"));
///     let mut transport = AesTransport::new(&config)?;
///     let response = transport.send(r#"{"method":"get_device_info"}"#).await?;
///     println!("{}", response);
///     Ok(())
/// }
/// ```
pub struct AesTransport {
    http: HttpClient,
    login_version: u32,
    login_params: Map<String, Value>,
    key_pair: Option<KeyPair>,
    state: State,
    session: Option<AesSession>,
    cookie: Option<String>,
    token: Option<String>,
    expires_at: Option<Instant>,
}

impl AesTransport {
    /// Creates an AES transport. No connection is made until the first send.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `credentials_hash` cannot be decoded.
    pub fn new(config: &DeviceConfig) -> Result<Self, Error> {
        let login_version = config.connection_type.login_version.unwrap_or(2);
        let login_params = match (&config.credentials, &config.credentials_hash) {
            (None, Some(hash)) => {
                let decoded = b64::decode(hash)?;
                serde_json::from_slice(&decoded)
                    .map_err(|e| Error::Protocol(format!("Invalid credentials hash: {e}")))?
            }
            (credentials, _) => login_params(&credentials.clone().unwrap_or_default(), login_version),
        };

        Ok(Self {
            http: HttpClient::new(
                config.host.clone(),
                config.port(),
                config.connection_type.https,
                config.timeout,
            )?,
            login_version,
            login_params,
            key_pair: None,
            state: State::HandshakeRequired,
            session: None,
            cookie: None,
            token: None,
            expires_at: None,
        })
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Content-Type", "application/json".to_string()),
            ("requestByApp", "true".to_string()),
            ("Accept", "application/json".to_string()),
        ];
        if let Some(cookie) = &self.cookie {
            headers.push(("Cookie", format!("{}={cookie}", SESSION_COOKIE_NAMES[0])));
        }
        headers
    }

    fn session_expired(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() >= at)
    }

    fn check_status(response: &HttpResponse, what: &str) -> Result<(), Error> {
        if response.status != 200 {
            return Err(Error::Protocol(format!(
                "{what} returned status {}",
                response.status
            )));
        }
        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), Error> {
        debug!(host = %self.http.host(), "Performing AES handshake");
        self.state = State::HandshakeRequired;
        self.session = None;
        self.cookie = None;
        self.token = None;

        let key_pair = match &self.key_pair {
            Some(pair) => pair.clone(),
            None => {
                let pair = KeyPair::generate(HANDSHAKE_KEY_BITS).await?;
                self.key_pair = Some(pair.clone());
                pair
            }
        };

        let body = json!({
            "method": "handshake",
            "params": {"key": key_pair.public_pem()},
            "request_time_milis": now_millis(),
        });
        let response = self
            .http
            .post("/app", body.to_string().as_bytes(), &self.headers())
            .await?;
        Self::check_status(&response, "Handshake")?;

        let json = parse_json(&response.body)?;
        self.check_code(response_error_code(&json), "Handshake failed")?;

        let wrapped_key = json
            .pointer("/result/key")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("Handshake response has no key".into()))?;
        let key_material = key_pair.decrypt_handshake_key(&b64::decode(wrapped_key)?)?;
        let session = AesSession::from_key_material(&key_material)?;

        self.cookie = SESSION_COOKIE_NAMES
            .iter()
            .find_map(|name| response.cookie(name))
            .map(str::to_string);
        let lifetime = response
            .cookie(TIMEOUT_COOKIE_NAME)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SESSION_TIMEOUT);
        self.expires_at = Some(Instant::now() + lifetime.saturating_sub(SESSION_EXPIRE_BUFFER));
        self.session = Some(session);
        self.state = State::LoginRequired;

        debug!(host = %self.http.host(), "AES handshake completed");
        Ok(())
    }

    /// Sends `login_device` and returns the device's verdict.
    async fn try_login(&mut self, params: Map<String, Value>) -> Result<SmartErrorCode, Error> {
        let request = json!({
            "method": "login_device",
            "params": params,
            "request_time_milis": now_millis(),
        });
        let response = match self.passthrough(&request.to_string()).await? {
            Ok(response) => response,
            Err(code) => return Ok(code),
        };
        let code = response_error_code(&response);
        if !code.is_success() {
            return Ok(code);
        }

        let token = response
            .pointer("/result/token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("Login response has no token".into()))?;
        self.token = Some(token.to_string());
        self.state = State::Established;
        Ok(SmartErrorCode::Success)
    }

    async fn login(&mut self) -> Result<(), Error> {
        let mut code = self.try_login(self.login_params.clone()).await?;
        if code == SmartErrorCode::LoginError {
            debug!(host = %self.http.host(), "Login failed, trying default credentials");
            self.handshake().await?;
            let defaults =
                login_params(&DefaultCredentials::Tapo.credentials(), self.login_version);
            code = self.try_login(defaults).await?;
            if code.is_success() {
                debug!(host = %self.http.host(), "Logged in with default credentials");
            }
        }
        self.check_code(code, "Error logging in")
    }

    fn check_code(&mut self, code: SmartErrorCode, what: &str) -> Result<(), Error> {
        if code.is_success() {
            return Ok(());
        }
        Err(self.code_error(code, what))
    }

    fn code_error(&mut self, code: SmartErrorCode, what: &str) -> Error {
        if code.is_auth_error() {
            self.state = State::HandshakeRequired;
        }
        Error::from_code(code, what)
    }

    /// Sends a request through `securePassthrough`.
    ///
    /// A non-zero envelope `error_code` is returned as the inner `Err`.
    async fn passthrough(&mut self, request: &str) -> Result<Result<Value, SmartErrorCode>, Error> {
        let session = self
            .session
            .clone()
            .ok_or_else(|| Error::Protocol("No active session".into()))?;

        let path = match &self.token {
            Some(token) => format!("/app?token={token}"),
            None => "/app".to_string(),
        };
        let body = json!({
            "method": "securePassthrough",
            "params": {"request": session.encrypt_b64(request.as_bytes())},
        });
        let response = self
            .http
            .post(&path, body.to_string().as_bytes(), &self.headers())
            .await?;
        Self::check_status(&response, "securePassthrough")?;

        let envelope = parse_json(&response.body)?;
        let code = response_error_code(&envelope);
        if !code.is_success() {
            return Ok(Err(code));
        }

        let inner = envelope
            .pointer("/result/response")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("securePassthrough response has no payload".into()))?;
        let value = match session.decrypt_b64(inner) {
            Ok(decrypted) => parse_json(&decrypted)?,
            // Some firmware answers unencrypted after an error.
            Err(err) => serde_json::from_str(inner).map_err(|_| err)?,
        };
        Ok(Ok(value))
    }

    async fn secure_passthrough(&mut self, request: &str) -> Result<Value, Error> {
        match self.passthrough(request).await? {
            Ok(value) => Ok(value),
            Err(code) => Err(self.code_error(code, "Error sending secure_passthrough message")),
        }
    }
}

#[async_trait]
impl Transport for AesTransport {
    async fn send(&mut self, request: &str) -> Result<Value, Error> {
        if self.state == State::HandshakeRequired || self.session_expired() {
            self.handshake().await?;
        }
        if self.state == State::LoginRequired {
            self.login().await?;
        }
        self.secure_passthrough(request).await
    }

    async fn reset(&mut self) {
        self.state = State::HandshakeRequired;
        self.session = None;
        self.token = None;
        self.cookie = None;
        self.expires_at = None;
    }

    async fn close(&mut self) {
        self.reset().await;
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
        serde_json::to_vec(&self.login_params).ok().map(b64::encode)
    }
}

impl std::fmt::Debug for AesTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesTransport")
            .field("host", &self.http.host())
            .field("port", &self.http.port())
            .field("login_version", &self.login_version)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_login_params_v2() {
        let params = login_params(&Credentials::new("user", "pass"), 2);
        assert_eq!(params["username"], b64::encode(sha1_hex("user")));
        assert_eq!(params["password2"], b64::encode(sha1_hex("pass")));
        assert!(!params.contains_key("password"));
    }

    #[test]
    fn test_login_params_v1() {
        let params = login_params(&Credentials::new("user", "pass"), 1);
        assert_eq!(params["password"], "cGFzcw==");
        assert!(!params.contains_key("password2"));
    }

    #[test]
    fn test_sha1_hex() {
        assert_eq!(sha1_hex("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_credentials_hash_roundtrip() {
        let config = DeviceConfig::new("h").with_credentials(Credentials::new("user", "pass"));
        let transport = AesTransport::new(&config).unwrap();
        let hash = transport.credentials_hash().unwrap();

        let restored = AesTransport::new(&DeviceConfig::new("h").with_credentials_hash(hash)).unwrap();
        assert_eq!(restored.login_params, transport.login_params);
    }

    #[tokio::test]
    async fn test_reset_requires_handshake() {
        let mut transport = AesTransport::new(&DeviceConfig::new("h")).unwrap();
        transport.state = State::Established;
        transport.reset().await;
        transport.reset().await;
        assert_eq!(transport.state, State::HandshakeRequired);
        assert!(transport.session_expired());
    }
}
