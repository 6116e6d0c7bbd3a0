//! Discovery probe packets.
//!
//! ## Legacy probe (port 9999)
//!
//! `{"system":{"get_sysinfo":{}}}` XOR-obfuscated, without the TCP length
//! prefix.
//!
//! ## TDP probe (port 20002)
//!
//! A 16-byte header followed by a JSON body carrying the run's RSA public
//! key:
//!
//! | Offset | Size | Field                        |
//! |--------|------|------------------------------|
//! | 0      | 1    | version (2)                  |
//! | 1      | 1    | message type (0)             |
//! | 2      | 2    | op code (1 = probe), BE      |
//! | 4      | 2    | body length, BE              |
//! | 6      | 1    | flags (17)                   |
//! | 7      | 1    | padding                      |
//! | 8      | 4    | random serial, BE            |
//! | 12     | 4    | CRC32 of the whole packet, BE |
//!
//! The CRC is computed with the seed `0x5A6B7C8D` in the CRC field and then
//! written over it. Replies use the same header layout.

use serde_json::json;

use crate::{crypto::xor, error::Error};

/// Length of the TDP header.
pub const TDP_HEADER_LEN: usize = 16;

const TDP_VERSION: u8 = 2;
const TDP_MSG_TYPE: u8 = 0;
const TDP_OP_PROBE: u16 = 1;
const TDP_FLAGS: u8 = 17;
const TDP_CRC_SEED: u32 = 0x5A6B7C8D;

/// Request sent to legacy devices.
pub const LEGACY_QUERY: &str = r#"{"system":{"get_sysinfo":{}}}"#;

#[derive(Debug)]
struct TdpHeader {
    msg_size: u16,
    serial: u32,
    crc32: u32,
}

impl TdpHeader {
    fn to_bytes(&self) -> [u8; TDP_HEADER_LEN] {
        let mut bytes = [0u8; TDP_HEADER_LEN];
        bytes[0] = TDP_VERSION;
        bytes[1] = TDP_MSG_TYPE;
        bytes[2..4].copy_from_slice(&TDP_OP_PROBE.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.msg_size.to_be_bytes());
        bytes[6] = TDP_FLAGS;
        bytes[7] = 0;
        bytes[8..12].copy_from_slice(&self.serial.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.crc32.to_be_bytes());
        bytes
    }
}

/// Builds the XOR probe for port 9999.
pub fn legacy_probe() -> Vec<u8> {
    xor::encrypt_udp(LEGACY_QUERY.as_bytes())
}

/// Builds the TDP probe for port 20002 carrying `public_pem`.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the body does not fit the 16-bit length
/// field.
pub fn tdp_probe(public_pem: &str) -> Result<Vec<u8>, Error> {
    let body = serde_json::to_vec(&json!({"params": {"rsa_key": public_pem}}))?;
    let msg_size = u16::try_from(body.len())
        .map_err(|_| Error::Protocol(format!("TDP body too large: {} bytes", body.len())))?;

    let header = TdpHeader {
        msg_size,
        serial: rand::random(),
        crc32: TDP_CRC_SEED,
    };

    let mut packet = Vec::with_capacity(TDP_HEADER_LEN + body.len());
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(&body);

    let crc = crc32fast::hash(&packet);
    packet[12..16].copy_from_slice(&crc.to_be_bytes());
    Ok(packet)
}

/// Returns the JSON body of a TDP reply.
///
/// # Errors
///
/// Returns [`Error::ParseError`] if the datagram is shorter than the header.
pub fn tdp_body(datagram: &[u8]) -> Result<&[u8], Error> {
    datagram.get(TDP_HEADER_LEN..).ok_or_else(|| {
        Error::ParseError(format!(
            "TDP reply too short: {} bytes",
            datagram.len()
        ))
    })
}
