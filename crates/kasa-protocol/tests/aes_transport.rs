#![allow(clippy::unwrap_used)]
// AES handshake, login and securePassthrough against a wiremock device.

use base64::{Engine, engine::general_purpose::STANDARD};
use kasa_protocol::{
    Credentials, DeviceConfig, ErrorKind, Transport, crypto::AesSession,
    transport::AesTransport,
};
use rsa::{Pkcs1v15Encrypt, RsaPublicKey, pkcs8::DecodePublicKey, rand_core::OsRng};
use serde_json::{Value, json};
use sha1::{Digest, Sha1};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const KEY: [u8; 16] = *b"0123456789abcdef";
const IV: [u8; 16] = *b"fedcba9876543210";
const TOKEN: &str = "8A1F0C2D";

// ── Fake device ─────────────────────────────────────────────────────

struct TapoDevice {
    username: String,
    password2: String,
}

impl TapoDevice {
    fn new(credentials: &Credentials) -> Self {
        let digest = |value: &str| STANDARD.encode(hex::encode(Sha1::digest(value.as_bytes())));
        Self {
            username: digest(&credentials.username),
            password2: digest(credentials.expose_password()),
        }
    }

    fn handshake(&self, body: &Value) -> ResponseTemplate {
        let pem = body["params"]["key"].as_str().unwrap();
        let public_key = RsaPublicKey::from_public_key_pem(pem).unwrap();
        let mut material = KEY.to_vec();
        material.extend_from_slice(&IV);
        let wrapped = public_key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, &material)
            .unwrap();

        ResponseTemplate::new(200)
            .insert_header("Set-Cookie", "TP_SESSIONID=5E55104;TIMEOUT=86400")
            .set_body_json(json!({"error_code": 0, "result": {"key": STANDARD.encode(wrapped)}}))
    }

    fn passthrough(&self, request: &Request, body: &Value) -> ResponseTemplate {
        let session = AesSession::new(KEY, IV);
        let inner = session
            .decrypt_b64(body["params"]["request"].as_str().unwrap())
            .unwrap();
        let inner: Value = serde_json::from_slice(&inner).unwrap();
        let token = request
            .url
            .query_pairs()
            .find(|(name, _)| name == "token")
            .map(|(_, value)| value.into_owned());

        let reply = match (inner["method"].as_str().unwrap(), token.as_deref()) {
            ("login_device", _) => {
                let params = &inner["params"];
                if params["username"] == self.username.as_str()
                    && params["password2"] == self.password2.as_str()
                {
                    json!({"error_code": 0, "result": {"token": TOKEN}})
                } else {
                    json!({"error_code": -1501})
                }
            }
            (_, Some(TOKEN)) => json!({"error_code": 0, "result": {"echo": inner["method"]}}),
            _ => return ResponseTemplate::new(200).set_body_json(json!({"error_code": 9999})),
        };

        let encrypted = session.encrypt_b64(reply.to_string().as_bytes());
        ResponseTemplate::new(200)
            .set_body_json(json!({"error_code": 0, "result": {"response": encrypted}}))
    }
}

impl Respond for TapoDevice {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        match body["method"].as_str() {
            Some("handshake") => self.handshake(&body),
            Some("securePassthrough") => self.passthrough(request, &body),
            _ => ResponseTemplate::new(400),
        }
    }
}

fn credentials() -> Credentials {
    Credentials::new("user@example.com", "tapo-secret")
}

async fn setup(device_credentials: &Credentials) -> (MockServer, DeviceConfig) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app"))
        .respond_with(TapoDevice::new(device_credentials))
        .mount(&server)
        .await;

    let config = DeviceConfig::new("127.0.0.1")
        .with_port(server.address().port())
        .with_credentials(credentials());
    (server, config)
}

async fn handshakes(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| {
            serde_json::from_slice::<Value>(&request.body)
                .is_ok_and(|body| body["method"] == "handshake")
        })
        .count()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_and_send() {
    let (server, config) = setup(&credentials()).await;
    let mut transport = AesTransport::new(&config).unwrap();

    let response = transport
        .send(r#"{"method":"get_device_info"}"#)
        .await
        .unwrap();
    transport
        .send(r#"{"method":"get_device_usage"}"#)
        .await
        .unwrap();

    assert_eq!(response["result"]["echo"], "get_device_info");
    assert_eq!(handshakes(&server).await, 1);
}

#[tokio::test]
async fn test_reset_runs_a_new_handshake() {
    let (server, config) = setup(&credentials()).await;
    let mut transport = AesTransport::new(&config).unwrap();

    transport.send(r#"{"method":"get_device_info"}"#).await.unwrap();
    transport.reset().await;
    transport.reset().await;
    transport.send(r#"{"method":"get_device_info"}"#).await.unwrap();

    assert_eq!(handshakes(&server).await, 2);
}

#[tokio::test]
async fn test_wrong_password_fails_after_default_fallback() {
    let (server, config) = setup(&Credentials::new("user@example.com", "other")).await;
    let mut transport = AesTransport::new(&config).unwrap();

    let err = transport
        .send(r#"{"method":"get_device_info"}"#)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(handshakes(&server).await, 2);
}

#[tokio::test]
async fn test_credentials_hash_logs_in_without_credentials() {
    let (_server, config) = setup(&credentials()).await;
    let mut transport = AesTransport::new(&config).unwrap();
    transport.send(r#"{"method":"get_device_info"}"#).await.unwrap();
    let stored = transport.credentials_hash().unwrap();

    let mut config = config;
    config.credentials = None;
    let mut transport = AesTransport::new(&config.with_credentials_hash(stored)).unwrap();
    let response = transport
        .send(r#"{"method":"get_device_info"}"#)
        .await
        .unwrap();

    assert_eq!(response["result"]["echo"], "get_device_info");
}
