//! RSA key pairs for the AES handshake and for discovery.
//!
//! The AES transport sends a 1024-bit public key and receives its session
//! key wrapped with PKCS#1 v1.5. Discovery sends a 2048-bit key and receives
//! the `encrypt_info` key wrapped with OAEP/SHA-1.

use rsa::{
    Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
    pkcs8::{EncodePublicKey, LineEnding},
    rand_core::OsRng,
};

use crate::error::Error;

/// Key size used by the AES transport handshake.
pub const HANDSHAKE_KEY_BITS: usize = 1024;

/// Key size used by discovery.
pub const DISCOVERY_KEY_BITS: usize = 2048;

/// An RSA key pair together with its PEM-encoded public key.
#[derive(Clone)]
pub struct KeyPair {
    private_key: RsaPrivateKey,
    public_pem: String,
}

impl KeyPair {
    /// Generates a key pair of the given size on the current thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if key generation or PEM encoding fails.
    pub fn generate_blocking(bits: usize) -> Result<Self, Error> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| Error::Protocol(format!("RSA key generation failed: {e}")))?;
        let public_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::Protocol(format!("PEM encoding failed: {e}")))?;
        Ok(Self {
            private_key,
            public_pem,
        })
    }

    /// Generates a key pair on the blocking thread pool.
    pub async fn generate(bits: usize) -> Result<Self, Error> {
        tokio::task::spawn_blocking(move || Self::generate_blocking(bits))
            .await
            .map_err(|e| Error::IoError(format!("Task join error: {e}")))?
    }

    /// PEM-encoded SubjectPublicKeyInfo.
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    /// Public half of the key pair.
    pub fn public_key(&self) -> RsaPublicKey {
        RsaPublicKey::from(&self.private_key)
    }

    /// Decrypts the session key sent in the AES handshake response.
    pub fn decrypt_handshake_key(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.private_key
            .decrypt(Pkcs1v15Encrypt, data)
            .map_err(|e| Error::AuthenticationFailed(format!("RSA decryption failed: {e}")))
    }

    /// Decrypts the `encrypt_info.key` blob of a discovery response.
    pub fn decrypt_discovery_key(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.private_key
            .decrypt(Oaep::new::<sha1::Sha1>(), data)
            .map_err(|e| Error::Protocol(format!("RSA decryption failed: {e}")))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_pem", &self.public_pem)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_key_roundtrip() {
        let pair = KeyPair::generate_blocking(HANDSHAKE_KEY_BITS).unwrap();
        assert!(pair.public_pem().starts_with("-----BEGIN PUBLIC KEY-----"));

        let secret = [5u8; 32];
        let wrapped = pair
            .public_key()
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, &secret)
            .unwrap();
        assert_eq!(pair.decrypt_handshake_key(&wrapped).unwrap(), secret);
    }

    #[test]
    fn test_discovery_key_roundtrip() {
        let pair = KeyPair::generate_blocking(HANDSHAKE_KEY_BITS).unwrap();
        let secret = [9u8; 32];
        let wrapped = pair
            .public_key()
            .encrypt(&mut OsRng, Oaep::new::<sha1::Sha1>(), &secret)
            .unwrap();
        assert_eq!(pair.decrypt_discovery_key(&wrapped).unwrap(), secret);
        assert!(pair.decrypt_handshake_key(&wrapped).is_err());
    }

    #[tokio::test]
    async fn test_generate_on_blocking_pool() {
        let pair = KeyPair::generate(HANDSHAKE_KEY_BITS).await.unwrap();
        assert!(!pair.public_pem().is_empty());
    }
}
