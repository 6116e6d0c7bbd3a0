//! AES-128-CBC with PKCS#7 padding.
//!
//! Shared by the AES (securePassthrough) session, the camera session, KLAP
//! request encryption and discovery payload decryption.

use aes::Aes128;
use base64::{Engine, engine::general_purpose::STANDARD};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};

use crate::error::Error;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Encrypts `data` with AES-128-CBC and PKCS#7 padding.
pub fn aes_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(data)
}

/// Decrypts AES-128-CBC ciphertext and strips PKCS#7 padding.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the ciphertext is not block aligned or
/// the padding is invalid.
pub fn aes_cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, Error> {
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| Error::Protocol("AES decryption failed: bad padding or length".into()))
}

/// Symmetric session key negotiated by the AES and camera transports.
#[derive(Clone)]
pub struct AesSession {
    key: [u8; 16],
    iv: [u8; 16],
}

impl AesSession {
    /// Creates a session from an explicit key and IV.
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// Creates a session from the 32-byte `key || iv` blob sent by devices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the blob is not exactly 32 bytes.
    pub fn from_key_material(material: &[u8]) -> Result<Self, Error> {
        let (key, iv) = material
            .split_first_chunk::<16>()
            .ok_or_else(|| Error::Protocol("session key material too short".into()))?;
        let iv: [u8; 16] = iv.try_into().map_err(|_| {
            Error::Protocol(format!(
                "session key material has unexpected length: {}",
                material.len()
            ))
        })?;
        Ok(Self::new(*key, iv))
    }

    /// Encrypts raw bytes.
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        aes_cbc_encrypt(&self.key, &self.iv, data)
    }

    /// Decrypts raw bytes.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        aes_cbc_decrypt(&self.key, &self.iv, data)
    }

    /// Encrypts and base64-encodes, as used in `securePassthrough` requests.
    pub fn encrypt_b64(&self, data: &[u8]) -> String {
        STANDARD.encode(self.encrypt(data))
    }

    /// Base64-decodes and decrypts a `securePassthrough` response.
    pub fn decrypt_b64(&self, data: &str) -> Result<Vec<u8>, Error> {
        let raw = STANDARD
            .decode(data.trim())
            .map_err(|e| Error::Protocol(format!("Base64 decode failed: {e}")))?;
        self.decrypt(&raw)
    }
}

impl std::fmt::Debug for AesSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesSession")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = *b"0123456789abcdef";
    const IV: [u8; 16] = *b"fedcba9876543210";

    #[test]
    fn test_roundtrip_lengths() {
        for len in [0usize, 1, 15, 16, 17, 31, 32, 33, 1000] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let encrypted = aes_cbc_encrypt(&KEY, &IV, &data);
            assert_eq!(encrypted.len() % 16, 0);
            assert!(encrypted.len() > data.len());
            assert_eq!(aes_cbc_decrypt(&KEY, &IV, &encrypted).unwrap(), data);
        }
    }

    #[test]
    fn test_decrypt_rejects_unaligned() {
        assert!(aes_cbc_decrypt(&KEY, &IV, &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_session_b64_roundtrip() {
        let mut material = KEY.to_vec();
        material.extend_from_slice(&IV);
        let session = AesSession::from_key_material(&material).unwrap();
        let encoded = session.encrypt_b64(br#"{"method":"get_device_info"}"#);
        assert_eq!(
            session.decrypt_b64(&encoded).unwrap(),
            br#"{"method":"get_device_info"}"#
        );
    }

    #[test]
    fn test_session_rejects_short_material() {
        assert!(AesSession::from_key_material(&[0u8; 20]).is_err());
        assert!(AesSession::from_key_material(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let session = AesSession::new(KEY, IV);
        assert!(!format!("{session:?}").contains("0123"));
    }
}
