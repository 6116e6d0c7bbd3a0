#![allow(clippy::unwrap_used)]
// Discovery against a fake legacy device on the loopback interface.

use std::time::Duration;

use kasa_protocol::{
    EncryptionType, Error,
    crypto::xor,
    discovery::{DiscoveryOptions, discover_all, discover_single, packet::LEGACY_QUERY},
    protocol::ProtocolKind,
};
use serde_json::json;
use tokio::net::UdpSocket;

/// Answers legacy probes with a fixed sysinfo. Returns the bound port.
async fn spawn_legacy_device() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let reply = xor::encrypt_udp(
        json!({"system": {"get_sysinfo": {
            "type": "IOT.SMARTPLUGSWITCH",
            "model": "HS100(US)",
            "alias": "Lamp",
            "mac": "50:C7:BF:00:11:22",
        }}})
        .to_string()
        .as_bytes(),
    );

    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
            if xor::decrypt(&buf[..len]) == LEGACY_QUERY.as_bytes() {
                let _ = socket.send_to(&reply, peer).await;
            }
        }
    });
    port
}

/// A bound socket that never answers, so probes are not refused.
async fn silent_port() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

#[tokio::test]
async fn test_discover_single_legacy_device() {
    let legacy_port = spawn_legacy_device().await;
    let (_tdp, tdp_port) = silent_port().await;

    let device = discover_single(
        "127.0.0.1",
        DiscoveryOptions::new()
            .with_timeout(Duration::from_secs(3))
            .with_discovery_port(legacy_port)
            .with_tdp_port(tdp_port),
    )
    .await
    .unwrap();

    assert_eq!(device.host, "127.0.0.1");
    assert_eq!(device.model(), Some("HS100(US)"));
    assert_eq!(device.protocol_kind().unwrap(), ProtocolKind::IotXor);
    assert_eq!(device.config.connection_type.encryption_type, EncryptionType::Xor);
}

#[tokio::test]
async fn test_discover_single_times_out() {
    let (_legacy, legacy_port) = silent_port().await;
    let (_tdp, tdp_port) = silent_port().await;

    let err = discover_single(
        "127.0.0.1",
        DiscoveryOptions::new()
            .with_timeout(Duration::from_millis(300))
            .with_discovery_port(legacy_port)
            .with_tdp_port(tdp_port),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Timeout(_)));
}

#[tokio::test]
async fn test_discover_all_reports_each_host_once() {
    let legacy_port = spawn_legacy_device().await;
    let (_tdp, tdp_port) = silent_port().await;

    let report = discover_all(
        DiscoveryOptions::new()
            .with_target("127.0.0.1")
            .with_timeout(Duration::from_millis(600))
            .with_packets(3)
            .with_discovery_port(legacy_port)
            .with_tdp_port(tdp_port),
    )
    .await
    .unwrap();

    assert_eq!(report.devices.len(), 1);
    assert!(report.unsupported.is_empty());
    assert!(report.errors.is_empty());
}
