//! Request dispatch for the device protocol families.
//!
//! A protocol sits on top of exactly one [`Transport`] and turns a
//! [`Request`] (method name → parameters) into a [`Response`] (method name →
//! [`MethodResult`]). Every family shares the same retry state machine:
//!
//! | Error kind       | Action                                  |
//! |------------------|-----------------------------------------|
//! | `Connection`     | reset transport, retry                  |
//! | `Timeout`        | reset transport, wait 1 s, retry        |
//! | `Retryable`      | reset transport, retry                  |
//! | `Authentication` | reset transport, raise                  |
//! | `Fatal`          | reset transport, raise                  |
//!
//! Queries on one protocol are serialized by a mutex around the transport,
//! so at most one request per device is in flight.

pub mod child;
pub mod iot;
pub mod smart;

pub use child::ChildProtocol;
pub use iot::IotProtocol;
pub use smart::{SmartFlavor, SmartProtocol};

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    config::{ConnectionParameters, DeviceConfig, DeviceFamily, EncryptionType},
    error::{Error, ErrorKind},
    error_code::SmartErrorCode,
    transport::{AesTransport, KlapTransport, KlapVersion, LegacyTransport, SslAesTransport, Transport},
};

/// Default number of retries after the first attempt.
pub const DEFAULT_RETRY_COUNT: usize = 3;

/// Wait applied before retrying a timed out request.
pub const BACKOFF_AFTER_TIMEOUT: Duration = Duration::from_secs(1);

/// A request: method (or IOT module) name mapped to its parameters.
pub type Request = serde_json::Map<String, Value>;

/// Outcome of one method in a [`Response`].
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResult {
    /// The method succeeded with this result value.
    Ok(Value),
    /// The device reported an error for this method.
    Err(SmartErrorCode),
}

impl MethodResult {
    /// Returns the result value, or `None` for an error marker.
    pub fn ok(&self) -> Option<&Value> {
        match self {
            MethodResult::Ok(value) => Some(value),
            MethodResult::Err(_) => None,
        }
    }

    /// Returns the error code, or `None` for a success.
    pub fn err(&self) -> Option<SmartErrorCode> {
        match self {
            MethodResult::Ok(_) => None,
            MethodResult::Err(code) => Some(*code),
        }
    }

    /// Converts into a `Result`, attaching `method` to the error message.
    ///
    /// # Errors
    ///
    /// Returns the error [`Error::from_code`] builds for the marker.
    pub fn into_result(self, method: &str) -> Result<Value, Error> {
        match self {
            MethodResult::Ok(value) => Ok(value),
            MethodResult::Err(code) => Err(Error::from_code(code, method)),
        }
    }
}

/// A response: method name mapped to its outcome.
pub type Response = BTreeMap<String, MethodResult>;

/// Builds a [`Request`] from a JSON object literal.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if `value` is not a JSON object.
///
/// # Example
///
/// ```
/// use kasa_protocol::protocol::request;
/// use serde_json::json;
///
/// let req = request(json!({"get_device_info": null})).unwrap();
/// assert!(req.contains_key("get_device_info"));
/// ```
pub fn request(value: Value) -> Result<Request, Error> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::Protocol(format!(
            "request must be a JSON object, got {other}"
        ))),
    }
}

/// Query interface shared by every protocol family.
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Sends `request` to the device, retrying up to `retry_count` times.
    ///
    /// # Arguments
    ///
    /// * `request` - Method names mapped to their parameters
    /// * `retry_count` - Retries after the first attempt
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or immediately for
    /// authentication and fatal errors.
    async fn query(&self, request: &Request, retry_count: usize) -> Result<Response, Error>;

    /// Closes the transport. The next query reconnects.
    async fn close(&self);

    /// Drops session state so the next query performs a fresh handshake.
    async fn reset(&self);

    /// Configuration the protocol was built from.
    fn config(&self) -> &DeviceConfig;
}

/// What the retry loop does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again, optionally after waiting.
    Retry {
        /// Delay before the next attempt.
        backoff: Option<Duration>,
    },
    /// Give up and surface the error.
    Raise,
}

/// Decides whether attempt number `attempt` (zero based) should be retried.
///
/// # Example
///
/// ```
/// use kasa_protocol::{ErrorKind, protocol::{RetryDecision, retry_decision}};
///
/// assert_eq!(
///     retry_decision(ErrorKind::Connection, 0, 3),
///     RetryDecision::Retry { backoff: None },
/// );
/// assert_eq!(retry_decision(ErrorKind::Connection, 3, 3), RetryDecision::Raise);
/// assert_eq!(retry_decision(ErrorKind::Authentication, 0, 3), RetryDecision::Raise);
/// ```
pub fn retry_decision(kind: ErrorKind, attempt: usize, retry_count: usize) -> RetryDecision {
    if attempt >= retry_count {
        return RetryDecision::Raise;
    }
    match kind {
        ErrorKind::Connection | ErrorKind::Retryable => RetryDecision::Retry { backoff: None },
        ErrorKind::Timeout => RetryDecision::Retry {
            backoff: Some(BACKOFF_AFTER_TIMEOUT),
        },
        ErrorKind::Authentication | ErrorKind::Fatal => RetryDecision::Raise,
    }
}

/// One attempt of a family-specific query, run under the transport lock.
#[async_trait]
pub(crate) trait Execute: Send + Sync {
    async fn execute(
        &self,
        transport: &mut dyn Transport,
        request: &Request,
    ) -> Result<Response, Error>;
}

/// Runs `protocol.execute` under the transport lock with the shared retry
/// policy.
pub(crate) async fn query_with_retries<P: Execute + ?Sized>(
    protocol: &P,
    transport: &Mutex<Box<dyn Transport>>,
    request: &Request,
    retry_count: usize,
) -> Result<Response, Error> {
    let mut transport = transport.lock().await;
    let mut attempt = 0;
    loop {
        let err = match protocol
            .execute(transport.as_mut(), request)
            .await
        {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };

        transport.reset().await;
        match retry_decision(err.kind(), attempt, retry_count) {
            RetryDecision::Raise => {
                warn!(
                    host = %transport.host(),
                    attempt,
                    kind = ?err.kind(),
                    error = %err,
                    "Query failed"
                );
                return Err(err);
            }
            RetryDecision::Retry { backoff } => {
                debug!(
                    host = %transport.host(),
                    attempt,
                    kind = ?err.kind(),
                    error = %err,
                    "Retrying query"
                );
                if let Some(delay) = backoff {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

/// Protocol and transport combination for a set of connection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// IOT requests over the legacy XOR transport.
    IotXor,
    /// IOT requests over KLAP v1.
    IotKlap,
    /// SMART requests over KLAP v2.
    SmartKlap,
    /// SMART requests over the AES transport.
    SmartAes,
    /// SMART camera requests over SSL-AES.
    SmartCamSslAes,
}

impl ProtocolKind {
    /// Looks up the protocol for `params`.
    ///
    /// | Family | Encryption | HTTPS | Protocol / transport   |
    /// |--------|------------|-------|------------------------|
    /// | IOT    | XOR        | any   | IOT / legacy           |
    /// | IOT    | KLAP       | any   | IOT / KLAP v1          |
    /// | SMART  | KLAP       | any   | SMART / KLAP v2        |
    /// | SMART  | AES        | no    | SMART / AES            |
    /// | SMART  | AES        | yes   | SMART camera / SSL-AES |
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedDevice`] for any other combination.
    pub fn select(params: &ConnectionParameters) -> Result<Self, Error> {
        let family = params.device_family;
        match (family.is_iot(), params.encryption_type, params.https) {
            (true, EncryptionType::Xor, _) => Ok(Self::IotXor),
            (true, EncryptionType::Klap, _) => Ok(Self::IotKlap),
            (false, EncryptionType::Klap, _) => Ok(Self::SmartKlap),
            (false, EncryptionType::Aes, false) => Ok(Self::SmartAes),
            (false, EncryptionType::Aes, true) => Ok(Self::SmartCamSslAes),
            (_, encryption, https) => Err(Error::UnsupportedDevice(format!(
                "{family} with {encryption} encryption (https: {https})"
            ))),
        }
    }
}

/// The protocol family of one device, selected from its
/// [`ConnectionParameters`](crate::ConnectionParameters).
///
/// # Example
///
/// ```no_run
/// use kasa_protocol::{
///     ConnectionParameters, Credentials, DeviceConfig, DeviceFamily, EncryptionType,
///     protocol::{DEFAULT_RETRY_COUNT, DeviceProtocol, Protocol, request},
/// };
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DeviceConfig::new("192.168.1.100")
///         .with_credentials(Credentials::new("user@example.com", "password"))
///         .with_connection_type(ConnectionParameters::new(
///             DeviceFamily::SmartTapoPlug,
///             EncryptionType::Klap,
///         ));
///     let protocol = DeviceProtocol::from_config(config)?;
///     let response = protocol
///         .query(&request(json!({"get_device_info": null}))?, DEFAULT_RETRY_COUNT)
///         .await?;
///     println!("{response:?}");
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub enum DeviceProtocol {
    /// Legacy IOT JSON over XOR or KLAP.
    Iot(IotProtocol),
    /// SMART `method`/`params` requests over KLAP or AES.
    Smart(SmartProtocol),
    /// SMART camera requests over SSL-AES.
    SmartCam(SmartProtocol),
    /// A child device reached through its parent.
    Child(ChildProtocol),
}

impl DeviceProtocol {
    /// Selects the protocol and transport for `config` through
    /// [`ProtocolKind::select`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedDevice`] for an unknown combination, or
    /// the transport's construction error.
    pub fn from_config(config: DeviceConfig) -> Result<Self, Error> {
        let kind = ProtocolKind::select(&config.connection_type)?;
        let protocol = match kind {
            ProtocolKind::IotXor => {
                let transport = LegacyTransport::new(&config);
                Self::Iot(IotProtocol::new(Box::new(transport), config))
            }
            ProtocolKind::IotKlap => {
                let transport = KlapTransport::new(&config, KlapVersion::V1)?;
                Self::Iot(IotProtocol::new(Box::new(transport), config))
            }
            ProtocolKind::SmartKlap => {
                let transport = KlapTransport::new(&config, KlapVersion::V2)?;
                Self::Smart(SmartProtocol::new(Box::new(transport), config, SmartFlavor::Smart))
            }
            ProtocolKind::SmartAes => {
                let transport = AesTransport::new(&config)?;
                Self::Smart(SmartProtocol::new(Box::new(transport), config, SmartFlavor::Smart))
            }
            ProtocolKind::SmartCamSslAes => {
                let transport = SslAesTransport::new(&config)?;
                Self::SmartCam(SmartProtocol::new(
                    Box::new(transport),
                    config,
                    SmartFlavor::Camera,
                ))
            }
        };
        debug!(host = %protocol.config().host, ?kind, "Selected protocol");
        Ok(protocol)
    }

    /// Returns a protocol for the child `device_id` of `parent`.
    pub fn child(parent: Arc<DeviceProtocol>, device_id: impl Into<String>) -> Self {
        Self::Child(ChildProtocol::new(parent, device_id))
    }

    /// Device family of the underlying device.
    pub fn device_family(&self) -> DeviceFamily {
        self.config().connection_type.device_family
    }
}

#[async_trait]
impl Protocol for DeviceProtocol {
    async fn query(&self, request: &Request, retry_count: usize) -> Result<Response, Error> {
        match self {
            Self::Iot(p) => p.query(request, retry_count).await,
            Self::Smart(p) | Self::SmartCam(p) => p.query(request, retry_count).await,
            Self::Child(p) => p.query(request, retry_count).await,
        }
    }

    async fn close(&self) {
        match self {
            Self::Iot(p) => p.close().await,
            Self::Smart(p) | Self::SmartCam(p) => p.close().await,
            Self::Child(p) => p.close().await,
        }
    }

    async fn reset(&self) {
        match self {
            Self::Iot(p) => p.reset().await,
            Self::Smart(p) | Self::SmartCam(p) => p.reset().await,
            Self::Child(p) => p.reset().await,
        }
    }

    fn config(&self) -> &DeviceConfig {
        match self {
            Self::Iot(p) => p.config(),
            Self::Smart(p) | Self::SmartCam(p) => p.config(),
            Self::Child(p) => p.config(),
        }
    }
}
