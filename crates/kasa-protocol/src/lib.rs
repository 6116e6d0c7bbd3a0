//! Client library for the TP-Link Kasa and Tapo LAN protocols.
//!
//! This crate discovers devices on the local network, negotiates the
//! session each device family requires and exchanges JSON requests with
//! retry, batching and pagination handled for the caller.
//!
//! # Overview
//!
//! Several generations of firmware are in the field:
//!
//! | Family | Encryption | Transport                                   |
//! |--------|------------|---------------------------------------------|
//! | IOT    | XOR        | [`transport::LegacyTransport`] (TCP 9999)   |
//! | IOT    | KLAP       | [`transport::KlapTransport`] v1 (HTTP)      |
//! | SMART  | KLAP       | [`transport::KlapTransport`] v2 (HTTP)      |
//! | SMART  | AES        | [`transport::AesTransport`] (HTTP)          |
//! | SMART  | AES, HTTPS | [`transport::SslAesTransport`] (cameras)    |
//!
//! [`DeviceProtocol::from_config`] picks the right combination from a
//! [`DeviceConfig`], usually built from a [`discovery`] result.
//!
//! # Example
//!
//! ```no_run
//! use kasa_protocol::{
//!     Credentials, DeviceConfig, Protocol,
//!     discovery::{DiscoveryOptions, discover_single},
//!     protocol::{DEFAULT_RETRY_COUNT, request},
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> kasa_protocol::Result<()> {
//!     let options = DiscoveryOptions::new()
//!         .with_credentials(Credentials::new("user@example.com", "password"));
//!     let device = discover_single("192.168.1.100", options).await?;
//!
//!     let protocol = device.connect()?;
//!     let response = protocol
//!         .query(&request(json!({"get_device_info": null}))?, DEFAULT_RETRY_COUNT)
//!         .await?;
//!     println!("{response:?}");
//!
//!     protocol.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod error_code;
pub mod protocol;
pub mod redact;
pub mod transport;

pub use config::{ConnectionParameters, DeviceConfig, DeviceFamily, EncryptionType};
pub use credentials::{Credentials, DefaultCredentials};
pub use error::{Error, ErrorKind};
pub use error_code::SmartErrorCode;
pub use protocol::{DeviceProtocol, MethodResult, Protocol, Request, Response};
pub use transport::Transport;

/// The version of the kasa-protocol library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
