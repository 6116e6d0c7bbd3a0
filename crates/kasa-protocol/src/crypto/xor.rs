//! XOR autokey cipher for the legacy TP-Link Smart Home Protocol.
//!
//! The legacy protocol uses a simple XOR autokey cipher with a starting key of 171.
//! TCP frames on port 9999 carry a 4-byte big-endian length prefix; UDP
//! discovery datagrams carry none.

/// Initial key for the XOR autokey cipher.
const INITIAL_KEY: u8 = 171;

/// Length of the TCP frame header.
pub const FRAME_HEADER_LEN: usize = 4;

fn obfuscate(plaintext: &[u8], out: &mut Vec<u8>) {
    let mut key = INITIAL_KEY;
    for &byte in plaintext {
        key ^= byte;
        out.push(key);
    }
}

/// Encrypts a payload into a TCP frame.
///
/// The result includes a 4-byte big-endian length prefix followed by the
/// encrypted payload.
///
/// # Example
///
/// ```
/// use kasa_protocol::crypto::xor::encrypt;
///
/// let command = br#"{"system":{"get_sysinfo":{}}}"#;
/// let encrypted = encrypt(command);
///
/// // First 4 bytes are the length header
/// assert_eq!(encrypted.len(), 4 + command.len());
/// ```
pub fn encrypt(plaintext: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(FRAME_HEADER_LEN + plaintext.len());
    result.extend_from_slice(&(plaintext.len() as u32).to_be_bytes());
    obfuscate(plaintext, &mut result);
    result
}

/// Encrypts for UDP broadcast (no length prefix).
///
/// # Example
///
/// ```
/// use kasa_protocol::crypto::xor::encrypt_udp;
///
/// let command = br#"{"system":{"get_sysinfo":{}}}"#;
/// assert_eq!(encrypt_udp(command).len(), command.len());
/// ```
pub fn encrypt_udp(plaintext: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(plaintext.len());
    obfuscate(plaintext, &mut result);
    result
}

/// Decrypts an XOR payload **without** the length prefix.
pub fn decrypt(ciphertext: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    ciphertext
        .iter()
        .map(|&byte| {
            let plain = key ^ byte;
            key = byte;
            plain
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let original = br#"{"system":{"get_sysinfo":{}}}"#;
        let encrypted = encrypt(original);
        assert_eq!(decrypt(&encrypted[4..]), original);
    }

    #[test]
    fn test_known_ciphertext() {
        // '{' ^ 171 = 0xd0, '"' ^ 0xd0 = 0xf2
        assert_eq!(encrypt_udp(b"{\""), vec![0xd0, 0xf2]);
    }

    #[test]
    fn test_encrypt_has_length_header() {
        let encrypted = encrypt(b"test");
        assert_eq!(&encrypted[..4], &[0, 0, 0, 4]);
    }

    #[test]
    fn test_empty_payload() {
        assert!(decrypt(&[]).is_empty());
        assert_eq!(encrypt(b""), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_udp_roundtrip_arbitrary_bytes() {
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(decrypt(&encrypt_udp(&data)), data);
    }
}
