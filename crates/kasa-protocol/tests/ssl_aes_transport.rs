#![allow(clippy::unwrap_used)]
// Camera nonce login and securePassthrough against a local HTTPS device.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use kasa_protocol::{
    Credentials, DeviceConfig, ErrorKind, SmartErrorCode, Transport, crypto::AesSession,
    transport::SslAesTransport,
};
use md5::Md5;
use rcgen::{CertifiedKey, generate_simple_self_signed};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use tokio_rustls::TlsAcceptor;

const NONCE: &str = "5F3A9C0E1B7D2486";
const START_SEQ: i64 = 731;
const PASSWORD: &str = "camera-secret";

fn sha256_upper(data: &str) -> String {
    hex::encode_upper(Sha256::digest(data.as_bytes()))
}

fn session_token(label: &str, cnonce: &str, pwd_hash: &str) -> [u8; 16] {
    let hashed_key = sha256_upper(&format!("{cnonce}{pwd_hash}{NONCE}"));
    let digest = Sha256::digest(format!("{label}{cnonce}{NONCE}{hashed_key}").as_bytes());
    digest[..16].try_into().unwrap()
}

// ── Fake camera ─────────────────────────────────────────────────────

struct HttpRequest {
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

struct Session {
    stok: String,
    cnonce: String,
    aes: AesSession,
    next_seq: i64,
}

#[derive(Default)]
struct Camera {
    pwd_hash: String,
    cnonce: Option<String>,
    session: Option<Session>,
    logins: usize,
    seqs: Vec<i64>,
    expire_next: bool,
}

impl Camera {
    fn handle(&mut self, request: &HttpRequest) -> Value {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        if request.path == "/" {
            self.login(&body["params"])
        } else {
            self.passthrough(request, &body)
        }
    }

    fn login(&mut self, params: &Value) -> Value {
        let cnonce = params["cnonce"].as_str().unwrap().to_string();
        let Some(digest) = params["digest_passwd"].as_str() else {
            let proof = sha256_upper(&format!("{cnonce}{}{NONCE}", self.pwd_hash));
            self.cnonce = Some(cnonce.clone());
            return json!({
                "error_code": SmartErrorCode::InvalidNonce.code(),
                "result": {"data": {
                    "code": SmartErrorCode::InvalidNonce.code(),
                    "encrypt_type": ["3"],
                    "nonce": NONCE,
                    "device_confirm": format!("{proof}{NONCE}{cnonce}"),
                }},
            });
        };

        let expected = format!(
            "{}{cnonce}{NONCE}",
            sha256_upper(&format!("{}{cnonce}{NONCE}", self.pwd_hash))
        );
        if self.cnonce.as_deref() != Some(cnonce.as_str()) || digest != expected {
            return json!({"error_code": SmartErrorCode::LoginError.code()});
        }

        self.logins += 1;
        let stok = format!("stok{}", self.logins);
        self.session = Some(Session {
            stok: stok.clone(),
            aes: AesSession::new(
                session_token("lsk", &cnonce, &self.pwd_hash),
                session_token("ivb", &cnonce, &self.pwd_hash),
            ),
            cnonce,
            next_seq: START_SEQ,
        });
        json!({"error_code": 0, "result": {"stok": stok, "start_seq": START_SEQ, "user_group": "root"}})
    }

    fn passthrough(&mut self, request: &HttpRequest, body: &Value) -> Value {
        if std::mem::take(&mut self.expire_next) {
            self.session = None;
        }
        let Some(session) = self
            .session
            .as_mut()
            .filter(|session| request.path == format!("/stok={}/ds", session.stok))
        else {
            return json!({"error_code": SmartErrorCode::SessionExpired.code()});
        };

        let seq: i64 = request.headers["seq"].parse().unwrap();
        let pwd_nonce_hash = sha256_upper(&format!("{}{}", self.pwd_hash, session.cnonce));
        let raw = String::from_utf8_lossy(&request.body);
        let tag = sha256_upper(&format!("{pwd_nonce_hash}{raw}{seq}"));
        if seq != session.next_seq || request.headers["tapo_tag"] != tag {
            return json!({"error_code": SmartErrorCode::ProtocolFormatError.code()});
        }
        session.next_seq += 1;
        self.seqs.push(seq);

        let inner = session
            .aes
            .decrypt_b64(body["params"]["request"].as_str().unwrap())
            .unwrap();
        let inner: Value = serde_json::from_slice(&inner).unwrap();
        let reply = json!({"error_code": 0, "result": {"echo": inner["method"]}});
        json!({
            "error_code": 0,
            "result": {"response": session.aes.encrypt_b64(reply.to_string().as_bytes())},
        })
    }
}

async fn read_request(stream: &mut (impl AsyncRead + Unpin)) -> Option<HttpRequest> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);

        let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&data[..end]).into_owned();
        let mut lines = head.lines();
        let path = lines.next()?.split_whitespace().nth(1)?.to_string();
        let headers: HashMap<String, String> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();
        let len: usize = headers.get("content-length")?.parse().ok()?;
        if data.len() >= end + 4 + len {
            let body = data[end + 4..end + 4 + len].to_vec();
            return Some(HttpRequest {
                path,
                headers,
                body,
            });
        }
    }
}

fn tls_acceptor() -> TlsAcceptor {
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert.der().clone()], key)
    .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Serves one request per TLS connection. Returns the port and the state.
async fn spawn_camera(pwd_hash: String) -> (u16, Arc<Mutex<Camera>>) {
    let acceptor = tls_acceptor();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let camera = Arc::new(Mutex::new(Camera {
        pwd_hash,
        ..Camera::default()
    }));

    let state = Arc::clone(&camera);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(stream).await else {
                    return;
                };
                let Some(request) = read_request(&mut tls).await else {
                    return;
                };
                let body = state.lock().unwrap().handle(&request).to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                );
                let _ = tls.write_all(response.as_bytes()).await;
                let _ = tls.shutdown().await;
            });
        }
    });
    (port, camera)
}

fn config(port: u16) -> DeviceConfig {
    DeviceConfig::new("127.0.0.1")
        .with_port(port)
        .with_credentials(Credentials::new("admin", PASSWORD))
}

fn get_device_info() -> &'static str {
    r#"{"method":"getDeviceInfo","params":{"device_info":{"name":["basic_info"]}}}"#
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_then_reuse_session() {
    let (port, camera) = spawn_camera(sha256_upper(PASSWORD)).await;
    let mut transport = SslAesTransport::new(&config(port)).unwrap();

    let first = transport.send(get_device_info()).await.unwrap();
    let second = transport.send(get_device_info()).await.unwrap();

    assert_eq!(first["result"]["echo"], "getDeviceInfo");
    assert_eq!(first, second);
    let camera = camera.lock().unwrap();
    assert_eq!(camera.logins, 1);
    assert_eq!(camera.seqs, vec![START_SEQ, START_SEQ + 1]);
    assert!(transport.credentials_hash().is_some());
}

#[tokio::test]
async fn test_repeated_reset_logs_in_once() {
    let (port, camera) = spawn_camera(sha256_upper(PASSWORD)).await;
    let mut transport = SslAesTransport::new(&config(port)).unwrap();

    transport.send(get_device_info()).await.unwrap();
    transport.reset().await;
    transport.reset().await;
    transport.send(get_device_info()).await.unwrap();

    let camera = camera.lock().unwrap();
    assert_eq!(camera.logins, 2);
    assert_eq!(camera.seqs, vec![START_SEQ, START_SEQ]);
}

#[tokio::test]
async fn test_session_expired_forces_new_login() {
    let (port, camera) = spawn_camera(sha256_upper(PASSWORD)).await;
    let mut transport = SslAesTransport::new(&config(port)).unwrap();

    transport.send(get_device_info()).await.unwrap();
    camera.lock().unwrap().expire_next = true;

    let err = transport.send(get_device_info()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Retryable);
    assert_eq!(err.code(), Some(SmartErrorCode::SessionExpired));

    let response = transport.send(get_device_info()).await.unwrap();
    assert_eq!(response["result"]["echo"], "getDeviceInfo");
    assert_eq!(camera.lock().unwrap().logins, 2);
}

#[tokio::test]
async fn test_unknown_password_fails_authentication() {
    let (port, camera) = spawn_camera(sha256_upper("someone-elses-password")).await;
    let mut transport = SslAesTransport::new(&config(port)).unwrap();

    let err = transport.send(get_device_info()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(camera.lock().unwrap().logins, 0);
}

#[tokio::test]
async fn test_factory_camera_accepts_default_account() {
    let (port, camera) = spawn_camera(hex::encode_upper(Md5::digest(b"admin"))).await;
    let config = DeviceConfig::new("127.0.0.1").with_port(port);
    let mut transport = SslAesTransport::new(&config).unwrap();

    let response = transport.send(get_device_info()).await.unwrap();

    assert_eq!(response["result"]["echo"], "getDeviceInfo");
    assert_eq!(camera.lock().unwrap().logins, 1);
}
