//! Decoded discovery replies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::{ConnectionParameters, DeviceConfig},
    crypto::{aes::AesSession, rsa::KeyPair},
    error::Error,
    protocol::{DeviceProtocol, ProtocolKind},
    transport::{b64, parse_json},
};

/// `mgt_encrypt_schm` of a discovery reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionScheme {
    /// Whether the device must be reached over HTTPS.
    #[serde(default)]
    pub is_support_https: bool,
    /// `KLAP`, `AES` or `XOR`.
    #[serde(default)]
    pub encrypt_type: Option<String>,
    /// HTTP(S) port of the device.
    #[serde(default)]
    pub http_port: Option<u16>,
    /// Login version.
    #[serde(default)]
    pub lv: Option<u32>,
}

/// `encrypt_info` blob: an RSA-wrapped AES key and an encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    /// Symmetric scheme; only `AES` is known.
    pub sym_schm: String,
    /// Base64 RSA-OAEP wrapped `key || iv`.
    pub key: String,
    /// Base64 AES-CBC payload.
    pub data: String,
}

/// The `result` object of a port 20002 reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    /// Device family, for example `SMART.TAPOPLUG`.
    pub device_type: String,
    /// Model, for example `P110(EU)`.
    pub device_model: String,
    /// Device id.
    pub device_id: String,
    /// IP address reported by the device.
    pub ip: String,
    /// MAC address.
    pub mac: String,
    /// Encryption scheme. Devices that omit it cannot be connected to.
    #[serde(default)]
    pub mgt_encrypt_schm: Option<EncryptionScheme>,
    #[serde(default)]
    pub hw_ver: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub factory_default: bool,
    #[serde(default)]
    pub is_support_iot_cloud: Option<bool>,
    #[serde(default)]
    pub obd_src: Option<String>,
    #[serde(default)]
    pub protocol_version: Option<u32>,
    /// Encrypted extra information, present on newer firmware.
    #[serde(default)]
    pub encrypt_info: Option<EncryptionInfo>,
    /// `encrypt_info` payload after decryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decrypted_data: Option<Value>,
}

impl DiscoveryResult {
    /// Connection parameters advertised by the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedDevice`] if the family or encryption type
    /// is unknown or missing.
    pub fn connection_parameters(&self) -> Result<ConnectionParameters, Error> {
        let scheme = self.mgt_encrypt_schm.as_ref().ok_or_else(|| {
            Error::UnsupportedDevice(format!(
                "{} reported no encryption scheme",
                self.device_model
            ))
        })?;
        let encrypt_type = scheme.encrypt_type.as_deref().ok_or_else(|| {
            Error::UnsupportedDevice(format!(
                "{} reported no encryption type",
                self.device_model
            ))
        })?;
        ConnectionParameters::from_values(
            &self.device_type,
            encrypt_type,
            scheme.lv,
            scheme.is_support_https,
            scheme.http_port,
        )
    }

    /// Decrypts `encrypt_info` into [`Self::decrypted_data`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for an unknown scheme or undecryptable
    /// key, and [`Error::ParseError`] if the payload is not JSON.
    pub fn decrypt(&mut self, key_pair: &KeyPair) -> Result<(), Error> {
        let Some(info) = &self.encrypt_info else {
            return Ok(());
        };
        if info.sym_schm != "AES" {
            return Err(Error::Protocol(format!(
                "unknown discovery encryption scheme {}",
                info.sym_schm
            )));
        }
        let key_material = key_pair.decrypt_discovery_key(&b64::decode(&info.key)?)?;
        let session = AesSession::from_key_material(&key_material)?;
        let payload = session.decrypt_b64(&info.data)?;
        self.decrypted_data = Some(parse_json(&payload)?);
        Ok(())
    }
}

/// Reply details of a discovered device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceInfo {
    /// `system.get_sysinfo` of a port 9999 reply.
    Legacy(Value),
    /// Decoded port 20002 reply.
    Smart(Box<DiscoveryResult>),
}

/// A device that answered discovery with a supported protocol.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Address the reply came from.
    pub host: String,
    /// Configuration for connecting to the device.
    pub config: DeviceConfig,
    /// What the device reported.
    pub info: DeviceInfo,
}

impl DiscoveredDevice {
    /// Device model, when reported.
    pub fn model(&self) -> Option<&str> {
        match &self.info {
            DeviceInfo::Legacy(sysinfo) => sysinfo.get("model").and_then(Value::as_str),
            DeviceInfo::Smart(result) => Some(&result.device_model),
        }
    }

    /// Protocol kind selected for the device.
    ///
    /// # Errors
    ///
    /// Never fails for devices produced by discovery; returns
    /// [`Error::UnsupportedDevice`] if `config` was changed to an unknown
    /// combination.
    pub fn protocol_kind(&self) -> Result<ProtocolKind, Error> {
        ProtocolKind::select(&self.config.connection_type)
    }

    /// Builds the protocol for talking to the device.
    ///
    /// # Errors
    ///
    /// See [`DeviceProtocol::from_config`].
    pub fn connect(&self) -> Result<DeviceProtocol, Error> {
        DeviceProtocol::from_config(self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{DeviceFamily, EncryptionType},
        crypto::aes::aes_cbc_encrypt,
    };
    use rsa::{Oaep, rand_core::OsRng};
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "device_id": "abc123",
            "device_type": "SMART.TAPOPLUG",
            "device_model": "P110(EU)",
            "ip": "192.168.1.50",
            "mac": "AA-BB-CC-DD-EE-FF",
            "factory_default": false,
            "mgt_encrypt_schm": {"is_support_https": false, "encrypt_type": "KLAP", "http_port": 80, "lv": 2},
        })
    }

    #[test]
    fn test_connection_parameters() {
        let result: DiscoveryResult = serde_json::from_value(sample()).unwrap();
        let params = result.connection_parameters().unwrap();
        assert_eq!(params.device_family, DeviceFamily::SmartTapoPlug);
        assert_eq!(params.encryption_type, EncryptionType::Klap);
        assert_eq!(params.login_version, Some(2));
        assert_eq!(params.http_port, Some(80));

        let config = DeviceConfig::from_discovered(&result).unwrap();
        assert_eq!(config.host, "192.168.1.50");
        assert_eq!(config.port(), 80);
    }

    #[test]
    fn test_missing_encrypt_type_is_unsupported() {
        let mut value = sample();
        value["mgt_encrypt_schm"] = json!({"is_support_https": false});
        let result: DiscoveryResult = serde_json::from_value(value).unwrap();
        assert!(matches!(
            result.connection_parameters(),
            Err(Error::UnsupportedDevice(_))
        ));
    }

    #[test]
    fn test_missing_scheme_is_unsupported() {
        let mut value = sample();
        value.as_object_mut().unwrap().remove("mgt_encrypt_schm");
        let result: DiscoveryResult = serde_json::from_value(value).unwrap();
        assert_eq!(result.mgt_encrypt_schm, None);
        assert!(matches!(
            result.connection_parameters(),
            Err(Error::UnsupportedDevice(_))
        ));
    }

    #[test]
    fn test_decrypt_encrypt_info() {
        let key_pair = KeyPair::generate_blocking(1024).unwrap();
        let key = *b"0123456789abcdef";
        let iv = *b"fedcba9876543210";
        let mut material = key.to_vec();
        material.extend_from_slice(&iv);

        let wrapped = key_pair
            .public_key()
            .encrypt(&mut OsRng, Oaep::new::<sha1::Sha1>(), &material)
            .unwrap();
        let data = aes_cbc_encrypt(&key, &iv, br#"{"connect_ssid":"home"}"#);

        let mut value = sample();
        value["encrypt_info"] = json!({
            "sym_schm": "AES",
            "key": b64::encode(wrapped),
            "data": b64::encode(data),
        });
        let mut result: DiscoveryResult = serde_json::from_value(value).unwrap();
        result.decrypt(&key_pair).unwrap();
        assert_eq!(result.decrypted_data, Some(json!({"connect_ssid": "home"})));
    }

    #[test]
    fn test_decrypt_rejects_unknown_scheme() {
        let key_pair = KeyPair::generate_blocking(1024).unwrap();
        let mut value = sample();
        value["encrypt_info"] = json!({"sym_schm": "DES", "key": "", "data": ""});
        let mut result: DiscoveryResult = serde_json::from_value(value).unwrap();
        assert!(result.decrypt(&key_pair).is_err());
    }
}
