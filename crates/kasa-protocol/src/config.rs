//! Connection configuration for a single device.
//!
//! A [`DeviceConfig`] describes everything needed to talk to one device: the
//! host, optional credentials and the [`ConnectionParameters`] that select
//! the protocol and transport. Configs are plain values built with `with_*`
//! methods, either by hand or from a discovery result.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Credentials, discovery::DiscoveryResult, error::Error};

/// Default timeout for transport operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of methods sent in one `multipleRequest` batch.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Default TCP port of the legacy XOR protocol.
pub const XOR_PORT: u16 = 9999;

/// Default HTTP port of the KLAP and AES protocols.
pub const HTTP_PORT: u16 = 80;

/// Default HTTPS port of KLAP devices.
pub const KLAP_HTTPS_PORT: u16 = 4433;

/// Default HTTPS port of SMART cameras.
pub const CAMERA_HTTPS_PORT: u16 = 443;

/// Encryption type used by a device.
///
/// Reported by discovery in `mgt_encrypt_schm.encrypt_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EncryptionType {
    /// Legacy XOR cipher on port 9999 (no authentication).
    #[default]
    #[serde(rename = "XOR")]
    Xor,
    /// KLAP handshake over HTTP.
    #[serde(rename = "KLAP")]
    Klap,
    /// RSA handshake + AES session over HTTP(S).
    #[serde(rename = "AES")]
    Aes,
}

impl EncryptionType {
    /// Wire name of the encryption type.
    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionType::Xor => "XOR",
            EncryptionType::Klap => "KLAP",
            EncryptionType::Aes => "AES",
        }
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "XOR" => Ok(EncryptionType::Xor),
            "KLAP" => Ok(EncryptionType::Klap),
            "AES" => Ok(EncryptionType::Aes),
            other => Err(Error::UnsupportedDevice(format!(
                "unknown encryption type {other}"
            ))),
        }
    }
}

/// Device family as reported in discovery `device_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceFamily {
    #[serde(rename = "IOT.SMARTPLUGSWITCH")]
    IotSmartPlugSwitch,
    #[serde(rename = "IOT.SMARTBULB")]
    IotSmartBulb,
    #[serde(rename = "IOT.IPCAMERA")]
    IotIpCamera,
    #[serde(rename = "SMART.KASAPLUG")]
    SmartKasaPlug,
    #[serde(rename = "SMART.KASASWITCH")]
    SmartKasaSwitch,
    #[serde(rename = "SMART.KASAHUB")]
    SmartKasaHub,
    #[serde(rename = "SMART.TAPOPLUG")]
    SmartTapoPlug,
    #[serde(rename = "SMART.TAPOBULB")]
    SmartTapoBulb,
    #[serde(rename = "SMART.TAPOSWITCH")]
    SmartTapoSwitch,
    #[serde(rename = "SMART.TAPOHUB")]
    SmartTapoHub,
    #[serde(rename = "SMART.IPCAMERA")]
    SmartIpCamera,
    #[serde(rename = "SMART.TAPOROBOVAC")]
    SmartTapoRobovac,
    #[serde(rename = "SMART.TAPOCHIME")]
    SmartTapoChime,
    #[serde(rename = "SMART.TAPODOORBELL")]
    SmartTapoDoorbell,
}

impl DeviceFamily {
    const ALL: [DeviceFamily; 14] = [
        DeviceFamily::IotSmartPlugSwitch,
        DeviceFamily::IotSmartBulb,
        DeviceFamily::IotIpCamera,
        DeviceFamily::SmartKasaPlug,
        DeviceFamily::SmartKasaSwitch,
        DeviceFamily::SmartKasaHub,
        DeviceFamily::SmartTapoPlug,
        DeviceFamily::SmartTapoBulb,
        DeviceFamily::SmartTapoSwitch,
        DeviceFamily::SmartTapoHub,
        DeviceFamily::SmartIpCamera,
        DeviceFamily::SmartTapoRobovac,
        DeviceFamily::SmartTapoChime,
        DeviceFamily::SmartTapoDoorbell,
    ];

    /// Wire name of the family.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceFamily::IotSmartPlugSwitch => "IOT.SMARTPLUGSWITCH",
            DeviceFamily::IotSmartBulb => "IOT.SMARTBULB",
            DeviceFamily::IotIpCamera => "IOT.IPCAMERA",
            DeviceFamily::SmartKasaPlug => "SMART.KASAPLUG",
            DeviceFamily::SmartKasaSwitch => "SMART.KASASWITCH",
            DeviceFamily::SmartKasaHub => "SMART.KASAHUB",
            DeviceFamily::SmartTapoPlug => "SMART.TAPOPLUG",
            DeviceFamily::SmartTapoBulb => "SMART.TAPOBULB",
            DeviceFamily::SmartTapoSwitch => "SMART.TAPOSWITCH",
            DeviceFamily::SmartTapoHub => "SMART.TAPOHUB",
            DeviceFamily::SmartIpCamera => "SMART.IPCAMERA",
            DeviceFamily::SmartTapoRobovac => "SMART.TAPOROBOVAC",
            DeviceFamily::SmartTapoChime => "SMART.TAPOCHIME",
            DeviceFamily::SmartTapoDoorbell => "SMART.TAPODOORBELL",
        }
    }

    /// Returns `true` for the legacy `IOT.*` families.
    pub fn is_iot(self) -> bool {
        matches!(
            self,
            DeviceFamily::IotSmartPlugSwitch | DeviceFamily::IotSmartBulb | DeviceFamily::IotIpCamera
        )
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|family| family.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnsupportedDevice(format!("unknown device family {s}")))
    }
}

/// Parameters selecting the protocol and transport for a device.
///
/// Usually filled in from discovery's `mgt_encrypt_schm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    /// Device family.
    pub device_family: DeviceFamily,
    /// Encryption type.
    pub encryption_type: EncryptionType,
    /// Login version (`lv`) for AES devices; 2 means SHA1-hashed password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_version: Option<u32>,
    /// Whether the device must be reached over HTTPS.
    #[serde(default)]
    pub https: bool,
    /// HTTP port advertised by the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
}

impl ConnectionParameters {
    /// Creates parameters for the given family and encryption type.
    pub fn new(device_family: DeviceFamily, encryption_type: EncryptionType) -> Self {
        Self {
            device_family,
            encryption_type,
            login_version: None,
            https: false,
            http_port: None,
        }
    }

    /// Parses parameters from their wire string values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedDevice`] for unknown families or
    /// encryption types.
    ///
    /// # Example
    ///
    /// ```
    /// use kasa_protocol::{ConnectionParameters, DeviceFamily, EncryptionType};
    ///
    /// let params = ConnectionParameters::from_values("SMART.TAPOPLUG", "KLAP", None, false, None)?;
    /// assert_eq!(params.device_family, DeviceFamily::SmartTapoPlug);
    /// assert_eq!(params.encryption_type, EncryptionType::Klap);
    /// # Ok::<(), kasa_protocol::Error>(())
    /// ```
    pub fn from_values(
        device_family: &str,
        encryption_type: &str,
        login_version: Option<u32>,
        https: bool,
        http_port: Option<u16>,
    ) -> Result<Self, Error> {
        Ok(Self {
            device_family: device_family.parse()?,
            encryption_type: encryption_type.parse()?,
            login_version,
            https,
            http_port,
        })
    }

    /// Sets the login version.
    pub fn with_login_version(mut self, login_version: u32) -> Self {
        self.login_version = Some(login_version);
        self
    }

    /// Enables HTTPS.
    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    /// Sets the advertised HTTP port.
    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = Some(port);
        self
    }

    /// Port used when the config carries no override.
    ///
    /// XOR devices always listen on 9999; the HTTP-based transports use the
    /// advertised `http_port` when there is one.
    pub fn default_port(&self) -> u16 {
        match (self.encryption_type, self.http_port, self.https) {
            (EncryptionType::Xor, _, _) => XOR_PORT,
            (_, Some(port), _) => port,
            (EncryptionType::Klap, None, true) => KLAP_HTTPS_PORT,
            (EncryptionType::Aes, None, true) => CAMERA_HTTPS_PORT,
            (_, None, false) => HTTP_PORT,
        }
    }
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self::new(DeviceFamily::IotSmartPlugSwitch, EncryptionType::Xor)
    }
}

/// Configuration for connecting to a device.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use kasa_protocol::{ConnectionParameters, Credentials, DeviceConfig, DeviceFamily, EncryptionType};
///
/// let config = DeviceConfig::new("192.168.1.100")
///     .with_credentials(Credentials::new("user@example.com", "password"))
///     .with_connection_type(ConnectionParameters::new(
///         DeviceFamily::SmartTapoPlug,
///         EncryptionType::Klap,
///     ))
///     .with_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.port(), 80);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// The device hostname or IP address.
    pub host: String,
    /// Optional port override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_override: Option<u16>,
    /// Credentials for authenticated transports. Never serialized.
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    /// Pre-hashed credentials produced by a previous session
    /// (see [`crate::Transport::credentials_hash`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_hash: Option<String>,
    /// Protocol selection parameters.
    #[serde(default)]
    pub connection_type: ConnectionParameters,
    /// Connection and I/O timeout.
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
    /// Number of methods per `multipleRequest` batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl DeviceConfig {
    /// Creates a new device configuration for a legacy XOR device.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port_override: None,
            credentials: None,
            credentials_hash: None,
            connection_type: ConnectionParameters::default(),
            timeout: DEFAULT_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port_override = Some(port);
        self
    }

    /// Sets the credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets a pre-hashed credentials blob.
    pub fn with_credentials_hash(mut self, hash: impl Into<String>) -> Self {
        self.credentials_hash = Some(hash.into());
        self
    }

    /// Sets the connection parameters.
    pub fn with_connection_type(mut self, connection_type: ConnectionParameters) -> Self {
        self.connection_type = connection_type;
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the `multipleRequest` batch size. Values below 1 are clamped to 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Port the transport connects to.
    pub fn port(&self) -> u16 {
        self.port_override
            .unwrap_or_else(|| self.connection_type.default_port())
    }

    /// Creates a device configuration from a discovery result.
    ///
    /// Credentials must still be added separately if required:
    ///
    /// ```no_run
    /// use kasa_protocol::{Credentials, DeviceConfig, discovery::DiscoveryResult};
    ///
    /// fn connect_to_discovered(result: &DiscoveryResult) -> kasa_protocol::Result<DeviceConfig> {
    ///     Ok(DeviceConfig::from_discovered(result)?
    ///         .with_credentials(Credentials::new("user@example.com", "password")))
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedDevice`] when the reported family or
    /// encryption type is unknown.
    pub fn from_discovered(result: &DiscoveryResult) -> Result<Self, Error> {
        Ok(Self::new(result.ip.clone()).with_connection_type(result.connection_parameters()?))
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("host", &self.host)
            .field("port_override", &self.port_override)
            .field("credentials", &self.credentials)
            .field(
                "credentials_hash",
                &self.credentials_hash.as_ref().map(|_| "[REDACTED]"),
            )
            .field("connection_type", &self.connection_type)
            .field("timeout", &self.timeout)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
