//! UDP discovery of TP-Link Kasa and Tapo devices.
//!
//! Discovery sends two probes per round from one broadcast socket:
//! - **Port 9999 (legacy)**: XOR `get_sysinfo`, answered by IOT devices.
//! - **Port 20002 (TDP)**: TDP header + RSA public key, answered by KLAP,
//!   AES and camera devices with their encryption scheme.
//!
//! Replies are decoded as they arrive and delivered as [`DiscoveryEvent`]s.
//! Every host is handled once; later datagrams from the same address are
//! ignored. Decode failures and unsupported devices become events and never
//! abort the run.
//!
//! # Example
//!
//! ```no_run
//! use kasa_protocol::discovery::{DiscoveryOptions, discover_all};
//!
//! #[tokio::main]
//! async fn main() -> kasa_protocol::Result<()> {
//!     let report = discover_all(DiscoveryOptions::new()).await?;
//!     for device in &report.devices {
//!         println!("{} {:?}", device.host, device.model());
//!     }
//!     Ok(())
//! }
//! ```

pub mod packet;
pub mod result;

pub use result::{DeviceInfo, DiscoveredDevice, DiscoveryResult, EncryptionInfo, EncryptionScheme};

use std::{
    collections::HashSet,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::{
    net::UdpSocket,
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::{
    Credentials,
    config::{ConnectionParameters, DEFAULT_TIMEOUT, DeviceConfig, DeviceFamily, EncryptionType},
    crypto::{
        rsa::{DISCOVERY_KEY_BITS, KeyPair},
        xor,
    },
    error::Error,
    protocol::ProtocolKind,
    redact::Redactor,
};

/// Port for legacy XOR discovery.
pub const LEGACY_DISCOVERY_PORT: u16 = 9999;

/// Port for TDP discovery.
pub const TDP_DISCOVERY_PORT: u16 = 20002;

/// Broadcast address for discovery.
pub const BROADCAST_ADDR: &str = "255.255.255.255";

/// Default time to wait for replies.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of probe rounds.
pub const DEFAULT_DISCOVERY_PACKETS: u32 = 3;

const RECV_BUFFER_LEN: usize = 16 * 1024;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Discovery settings.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use kasa_protocol::discovery::DiscoveryOptions;
///
/// let options = DiscoveryOptions::new()
///     .with_target("192.168.1.255")
///     .with_timeout(Duration::from_secs(3))
///     .with_packets(2);
/// assert_eq!(options.target, "192.168.1.255");
/// ```
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Address probes are sent to.
    pub target: String,
    /// How long to collect replies.
    pub timeout: Duration,
    /// Number of probe rounds, spread over the timeout.
    pub packets: u32,
    /// Port for legacy probes and replies.
    pub discovery_port: u16,
    /// Port for TDP probes and replies.
    pub tdp_port: u16,
    /// Credentials copied into every discovered device's config.
    pub credentials: Option<Credentials>,
    /// Timeout copied into every discovered device's config.
    pub device_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            target: BROADCAST_ADDR.to_string(),
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            packets: DEFAULT_DISCOVERY_PACKETS,
            discovery_port: LEGACY_DISCOVERY_PORT,
            tdp_port: TDP_DISCOVERY_PORT,
            credentials: None,
            device_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl DiscoveryOptions {
    /// Creates options with the defaults: broadcast, 5 s, 3 rounds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the probe target.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Sets the overall timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of probe rounds, clamped to `1..=u32::MAX`.
    pub fn with_packets(mut self, packets: usize) -> Self {
        self.packets = u32::try_from(packets).unwrap_or(u32::MAX).max(1);
        self
    }

    /// Overrides the legacy discovery port.
    pub fn with_discovery_port(mut self, port: u16) -> Self {
        self.discovery_port = port;
        self
    }

    /// Overrides the TDP discovery port.
    pub fn with_tdp_port(mut self, port: u16) -> Self {
        self.tdp_port = port;
        self
    }

    /// Sets credentials for discovered devices.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the connection timeout for discovered devices.
    pub fn with_device_timeout(mut self, timeout: Duration) -> Self {
        self.device_timeout = timeout;
        self
    }
}

/// Outcome of one reply.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A device with a supported protocol.
    Device(DiscoveredDevice),
    /// A device whose family or encryption is not supported.
    Unsupported {
        /// Address the reply came from.
        host: String,
        /// Redacted reply.
        info: Value,
        /// Why it is unsupported.
        reason: String,
    },
    /// A reply that could not be decoded.
    DecodeError {
        /// Address the reply came from.
        host: String,
        /// Port the reply came from.
        port: u16,
        /// What went wrong.
        error: String,
    },
}

impl DiscoveryEvent {
    /// Address the reply came from.
    pub fn host(&self) -> &str {
        match self {
            DiscoveryEvent::Device(device) => &device.host,
            DiscoveryEvent::Unsupported { host, .. } | DiscoveryEvent::DecodeError { host, .. } => {
                host
            }
        }
    }
}

/// Everything collected by [`discover_all`].
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    /// Supported devices in arrival order.
    pub devices: Vec<DiscoveredDevice>,
    /// Unsupported replies.
    pub unsupported: Vec<DiscoveryEvent>,
    /// Undecodable replies.
    pub errors: Vec<DiscoveryEvent>,
}

impl DiscoveryReport {
    fn push(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Device(device) => self.devices.push(device),
            event @ DiscoveryEvent::Unsupported { .. } => self.unsupported.push(event),
            event @ DiscoveryEvent::DecodeError { .. } => self.errors.push(event),
        }
    }
}

/// Decodes and classifies datagrams for one discovery run.
pub struct DatagramHandler {
    key_pair: KeyPair,
    redactor: Redactor,
    seen: HashSet<IpAddr>,
    discovery_port: u16,
    tdp_port: u16,
    credentials: Option<Credentials>,
    device_timeout: Duration,
}

impl DatagramHandler {
    /// Creates a handler decrypting TDP replies with `key_pair`.
    pub fn new(key_pair: KeyPair, options: &DiscoveryOptions) -> Self {
        Self {
            key_pair,
            redactor: Redactor::discovery(),
            seen: HashSet::new(),
            discovery_port: options.discovery_port,
            tdp_port: options.tdp_port,
            credentials: options.credentials.clone(),
            device_timeout: options.device_timeout,
        }
    }

    /// Handles one datagram from `addr`.
    ///
    /// Returns `None` for repeated hosts and for datagrams from ports other
    /// than the discovery ports.
    pub fn handle(&mut self, data: &[u8], addr: SocketAddr) -> Option<DiscoveryEvent> {
        let port = addr.port();
        if port != self.discovery_port && port != self.tdp_port {
            debug!(%addr, "Ignoring datagram from unexpected port");
            return None;
        }
        if !self.seen.insert(addr.ip()) {
            return None;
        }

        let host = addr.ip().to_string();
        let decoded = if port == self.discovery_port {
            self.decode_legacy(&host, data)
        } else {
            self.decode_tdp(&host, data)
        };

        Some(match decoded {
            Ok(event) => event,
            Err(err) => {
                debug!(host = %host, port, error = %err, "Failed to decode discovery reply");
                DiscoveryEvent::DecodeError {
                    host,
                    port,
                    error: err.to_string(),
                }
            }
        })
    }

    fn device_config(&self, host: &str, params: ConnectionParameters) -> DeviceConfig {
        let config = DeviceConfig::new(host)
            .with_connection_type(params)
            .with_timeout(self.device_timeout);
        match &self.credentials {
            Some(credentials) => config.with_credentials(credentials.clone()),
            None => config,
        }
    }

    fn decode_legacy(&self, host: &str, data: &[u8]) -> Result<DiscoveryEvent, Error> {
        let reply: Value = serde_json::from_slice(&xor::decrypt(data))?;
        let sysinfo = reply
            .pointer("/system/get_sysinfo")
            .ok_or_else(|| Error::ParseError("reply has no system.get_sysinfo".into()))?;
        let device_type = sysinfo
            .get("type")
            .or_else(|| sysinfo.get("mic_type"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::ParseError("sysinfo has no type or mic_type".into()))?;

        debug!(host, info = %self.redactor.redact(sysinfo), "Legacy discovery reply");

        let params = ConnectionParameters::new(legacy_family(host, device_type), EncryptionType::Xor);
        let classified = ProtocolKind::select(&params).map(|_| params);
        Ok(match classified {
            Ok(params) => DiscoveryEvent::Device(DiscoveredDevice {
                host: host.to_string(),
                config: self.device_config(host, params),
                info: DeviceInfo::Legacy(sysinfo.clone()),
            }),
            Err(err) => DiscoveryEvent::Unsupported {
                host: host.to_string(),
                info: self.redactor.redact(sysinfo),
                reason: err.to_string(),
            },
        })
    }

    fn decode_tdp(&self, host: &str, data: &[u8]) -> Result<DiscoveryEvent, Error> {
        let reply: Value = serde_json::from_slice(packet::tdp_body(data)?)?;
        let raw = reply
            .get("result")
            .ok_or_else(|| Error::ParseError("TDP reply has no result".into()))?;
        let mut result: DiscoveryResult = serde_json::from_value(raw.clone())?;

        if result.encrypt_info.is_some()
            && let Err(err) = result.decrypt(&self.key_pair)
        {
            warn!(host, error = %err, "Unable to decrypt discovery data");
        }

        let redacted = serde_json::to_value(&result)
            .map(|value| self.redactor.redact(&value))
            .unwrap_or(Value::Null);
        debug!(host, info = %redacted, "TDP discovery reply");

        let classified = result
            .connection_parameters()
            .and_then(|params| ProtocolKind::select(&params).map(|_| params));
        Ok(match classified {
            Ok(params) => DiscoveryEvent::Device(DiscoveredDevice {
                host: host.to_string(),
                config: self.device_config(host, params),
                info: DeviceInfo::Smart(Box::new(result)),
            }),
            Err(err) => DiscoveryEvent::Unsupported {
                host: host.to_string(),
                info: redacted,
                reason: err.to_string(),
            },
        })
    }
}

impl std::fmt::Debug for DatagramHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramHandler")
            .field("seen", &self.seen.len())
            .field("discovery_port", &self.discovery_port)
            .field("tdp_port", &self.tdp_port)
            .finish()
    }
}

/// A running discovery, yielding events as replies arrive.
///
/// Dropping the stream stops the run.
pub struct DiscoveryStream {
    events: mpsc::Receiver<DiscoveryEvent>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), Error>>,
    _guard: DropGuard,
}

impl DiscoveryStream {
    /// Stops the run early.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the run to end and returns its error, if any.
    ///
    /// # Errors
    ///
    /// Returns the socket or key generation error that ended the run.
    pub async fn finish(self) -> Result<(), Error> {
        let Self { task, _guard, .. } = self;
        task.await
            .map_err(|e| Error::IoError(format!("Discovery task failed: {e}")))?
    }
}

impl Stream for DiscoveryStream {
    type Item = DiscoveryEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// Starts a discovery run on the current tokio runtime.
pub fn discover(options: DiscoveryOptions) -> DiscoveryStream {
    let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(options, tx, cancel.clone()));
    DiscoveryStream {
        events,
        cancel: cancel.clone(),
        task,
        _guard: cancel.drop_guard(),
    }
}

/// Discovers every device answering within the timeout.
///
/// # Errors
///
/// Returns an error if the socket cannot be opened. Per-device problems are
/// reported in [`DiscoveryReport`].
pub async fn discover_all(options: DiscoveryOptions) -> Result<DiscoveryReport, Error> {
    let mut stream = discover(options);
    let mut report = DiscoveryReport::default();
    while let Some(event) = stream.next().await {
        report.push(event);
    }
    stream.finish().await?;
    debug!(
        devices = report.devices.len(),
        unsupported = report.unsupported.len(),
        errors = report.errors.len(),
        "Discovery finished"
    );
    Ok(report)
}

/// Discovers one device by address, returning as soon as it answers.
///
/// # Errors
///
/// - [`Error::Timeout`] if the device does not answer in time
/// - [`Error::UnsupportedDevice`] if it answers with an unsupported protocol
/// - [`Error::ParseError`] if its reply cannot be decoded
/// - [`Error::ConnectionFailed`] if `host` does not resolve
pub async fn discover_single(host: &str, options: DiscoveryOptions) -> Result<DiscoveredDevice, Error> {
    let target = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| Error::ConnectionFailed(format!("{host}: {e}")))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::ConnectionFailed(format!("{host} did not resolve")))?;
    let target_host = target.to_string();

    let mut stream = discover(options.with_target(target_host.clone()));
    while let Some(event) = stream.next().await {
        if event.host() != target_host {
            continue;
        }
        stream.cancel();
        return match event {
            DiscoveryEvent::Device(device) => Ok(device),
            DiscoveryEvent::Unsupported { reason, .. } => Err(Error::UnsupportedDevice(reason)),
            DiscoveryEvent::DecodeError { error, .. } => Err(Error::ParseError(error)),
        };
    }
    stream.finish().await?;
    Err(Error::Timeout(format!(
        "Timed out getting discovery response for {host}"
    )))
}

/// Maps a port 9999 `type`/`mic_type` to a family. Every responder there
/// speaks XOR, so unknown types such as `IOT.RANGEEXTENDER.SMARTPLUG` are
/// matched loosely and default to a plug.
fn legacy_family(host: &str, device_type: &str) -> DeviceFamily {
    if let Ok(family) = device_type.parse() {
        return family;
    }
    let lowered = device_type.to_ascii_lowercase();
    if lowered.contains("smartbulb") {
        DeviceFamily::IotSmartBulb
    } else if lowered.contains("smartplug") {
        DeviceFamily::IotSmartPlugSwitch
    } else {
        warn!(host, device_type, "Unknown legacy device type, treating it as a plug");
        DeviceFamily::IotSmartPlugSwitch
    }
}

async fn send_probes(socket: &UdpSocket, options: &DiscoveryOptions, tdp_probe: &[u8]) {
    let legacy_addr = format!("{}:{}", options.target, options.discovery_port);
    let tdp_addr = format!("{}:{}", options.target, options.tdp_port);
    for (addr, probe) in [(legacy_addr, packet::legacy_probe()), (tdp_addr, tdp_probe.to_vec())] {
        if let Err(err) = socket.send_to(&probe, &addr).await {
            warn!(addr = %addr, error = %err, "Failed to send discovery probe");
        }
    }
}

async fn run(
    options: DiscoveryOptions,
    events: mpsc::Sender<DiscoveryEvent>,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let key_pair = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        key_pair = KeyPair::generate(DISCOVERY_KEY_BITS) => key_pair?,
    };
    let tdp_probe = packet::tdp_probe(key_pair.public_pem())?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    debug!(target = %options.target, timeout = ?options.timeout, "Starting discovery");

    let mut handler = DatagramHandler::new(key_pair, &options);
    let packets = options.packets.max(1);
    let interval = options.timeout / packets;
    let deadline = Instant::now() + options.timeout;
    let mut next_probe = Instant::now();
    let mut probes_sent = 0;
    let mut buf = vec![0u8; RECV_BUFFER_LEN];

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Discovery cancelled");
                break;
            }
            _ = sleep_until(deadline) => {
                debug!("Discovery timeout reached");
                break;
            }
            _ = sleep_until(next_probe), if probes_sent < packets => {
                send_probes(&socket, &options, &tdp_probe).await;
                probes_sent += 1;
                next_probe += interval;
            }
            received = socket.recv_from(&mut buf) => {
                let (len, addr) = match received {
                    Ok(received) => received,
                    Err(err) => {
                        debug!(error = %err, "Error receiving discovery reply");
                        continue;
                    }
                };
                if let Some(event) = handler.handle(&buf[..len], addr)
                    && events.send(event).await.is_err()
                {
                    break;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::xor::encrypt_udp;
    use serde_json::json;

    fn handler() -> DatagramHandler {
        let key_pair = KeyPair::generate_blocking(1024).unwrap();
        DatagramHandler::new(key_pair, &DiscoveryOptions::new())
    }

    fn addr(ip: &str, port: u16) -> SocketAddr {
        SocketAddr::new(ip.parse().unwrap(), port)
    }

    fn tdp_reply(result: Value) -> Vec<u8> {
        let mut datagram = vec![0u8; packet::TDP_HEADER_LEN];
        datagram.extend(serde_json::to_vec(&json!({"error_code": 0, "result": result})).unwrap());
        datagram
    }

    fn legacy_reply(sysinfo: Value) -> Vec<u8> {
        encrypt_udp(&serde_json::to_vec(&json!({"system": {"get_sysinfo": sysinfo}})).unwrap())
    }

    #[test]
    fn test_good_malformed_and_unsupported_replies() {
        let mut handler = handler();

        let good = legacy_reply(json!({"type": "IOT.SMARTPLUGSWITCH", "model": "HS100(US)", "mac": "AA:BB:CC:DD:EE:FF"}));
        let malformed = b"\x00\x01garbage".to_vec();
        let unsupported = tdp_reply(json!({
            "device_id": "id",
            "device_type": "SMART.TAPOPLUG",
            "device_model": "P100",
            "ip": "10.0.0.3",
            "mac": "AA-BB-CC-DD-EE-01",
            "mgt_encrypt_schm": {"is_support_https": false, "encrypt_type": "XOR"},
        }));

        let events: Vec<_> = [
            (good, addr("10.0.0.1", LEGACY_DISCOVERY_PORT)),
            (malformed, addr("10.0.0.2", TDP_DISCOVERY_PORT)),
            (unsupported, addr("10.0.0.3", TDP_DISCOVERY_PORT)),
        ]
        .into_iter()
        .filter_map(|(data, from)| handler.handle(&data, from))
        .collect();

        assert_eq!(events.len(), 3);
        match &events[0] {
            DiscoveryEvent::Device(device) => {
                assert_eq!(device.host, "10.0.0.1");
                assert_eq!(device.model(), Some("HS100(US)"));
                assert_eq!(device.protocol_kind().unwrap(), ProtocolKind::IotXor);
                assert_eq!(device.config.port(), 9999);
            }
            other => panic!("expected device, got {other:?}"),
        }
        assert!(matches!(&events[1], DiscoveryEvent::DecodeError { port: TDP_DISCOVERY_PORT, .. }));
        match &events[2] {
            DiscoveryEvent::Unsupported { host, info, .. } => {
                assert_eq!(host, "10.0.0.3");
                assert_eq!(info["mac"], "AA-BB-CC-00-00-00");
            }
            other => panic!("expected unsupported, got {other:?}"),
        }
    }

    #[test]
    fn test_first_datagram_per_host_wins() {
        let mut handler = handler();
        let reply = legacy_reply(json!({"mic_type": "IOT.SMARTBULB"}));
        let from = addr("10.0.0.9", LEGACY_DISCOVERY_PORT);
        assert!(handler.handle(&reply, from).is_some());
        assert!(handler.handle(&reply, from).is_none());
        assert!(handler.handle(&reply, addr("10.0.0.9", TDP_DISCOVERY_PORT)).is_none());
    }

    #[test]
    fn test_tdp_reply_classification() {
        let mut handler = handler();
        let reply = tdp_reply(json!({
            "device_id": "id",
            "device_type": "SMART.IPCAMERA",
            "device_model": "C200",
            "ip": "10.0.0.4",
            "mac": "AA-BB-CC-DD-EE-02",
            "mgt_encrypt_schm": {"is_support_https": true, "encrypt_type": "AES", "http_port": 443, "lv": 2},
        }));
        let Some(DiscoveryEvent::Device(device)) =
            handler.handle(&reply, addr("10.0.0.4", TDP_DISCOVERY_PORT))
        else {
            panic!("expected device");
        };
        assert_eq!(device.protocol_kind().unwrap(), ProtocolKind::SmartCamSslAes);
        assert_eq!(device.config.port(), 443);
    }

    #[test]
    fn test_legacy_types_match_loosely() {
        let mut handler = handler();
        let cases = [
            ("IOT.RANGEEXTENDER.SMARTPLUG", DeviceFamily::IotSmartPlugSwitch),
            ("IOT.SMARTBULB.LIGHTSTRIP", DeviceFamily::IotSmartBulb),
            ("IOT.SOMETHINGNEW", DeviceFamily::IotSmartPlugSwitch),
        ];
        for (index, (device_type, family)) in cases.into_iter().enumerate() {
            let reply = legacy_reply(json!({"type": device_type, "model": "RE370K(US)"}));
            let from = addr(&format!("10.0.1.{index}"), LEGACY_DISCOVERY_PORT);
            let Some(DiscoveryEvent::Device(device)) = handler.handle(&reply, from) else {
                panic!("expected device for {device_type}");
            };
            assert_eq!(device.config.connection_type.device_family, family);
            assert_eq!(device.protocol_kind().unwrap(), ProtocolKind::IotXor);
        }
    }

    #[test]
    fn test_tdp_reply_without_scheme_is_unsupported() {
        let mut handler = handler();
        let reply = tdp_reply(json!({
            "device_id": "id",
            "device_type": "SMART.TAPOPLUG",
            "device_model": "P100",
            "ip": "10.0.0.7",
            "mac": "AA-BB-CC-DD-EE-03",
        }));
        assert!(matches!(
            handler.handle(&reply, addr("10.0.0.7", TDP_DISCOVERY_PORT)),
            Some(DiscoveryEvent::Unsupported { .. })
        ));
    }

    #[test]
    fn test_legacy_reply_without_type() {
        let mut handler = handler();
        let reply = legacy_reply(json!({"model": "HS100"}));
        assert!(matches!(
            handler.handle(&reply, addr("10.0.0.5", LEGACY_DISCOVERY_PORT)),
            Some(DiscoveryEvent::DecodeError { .. })
        ));
    }

    #[test]
    fn test_unexpected_port_ignored() {
        let mut handler = handler();
        assert!(handler.handle(b"{}", addr("10.0.0.6", 1234)).is_none());
    }

    #[test]
    fn test_packets_are_clamped() {
        assert_eq!(DiscoveryOptions::new().with_packets(0).packets, 1);
        assert_eq!(DiscoveryOptions::new().with_packets(5).packets, 5);
        assert_eq!(DiscoveryOptions::new().with_packets(usize::MAX).packets, u32::MAX);
    }

    #[test]
    fn test_report_buckets() {
        let mut report = DiscoveryReport::default();
        report.push(DiscoveryEvent::DecodeError {
            host: "h".into(),
            port: 1,
            error: "e".into(),
        });
        assert_eq!(report.errors.len(), 1);
        assert!(report.devices.is_empty());
    }
}
