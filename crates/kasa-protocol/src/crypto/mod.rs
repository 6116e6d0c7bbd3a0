//! Cryptographic primitives used by the device protocols.
//!
//! - [`xor`]: Legacy XOR autokey cipher for older devices
//! - [`aes`]: AES-128-CBC/PKCS#7 shared by the SMART, camera and KLAP sessions
//! - [`klap`]: KLAP handshake hashes and request encryption
//! - [`rsa`]: RSA key pairs for the AES handshake and discovery

pub mod aes;
pub mod klap;
pub mod rsa;
pub mod xor;

pub use self::aes::{AesSession, aes_cbc_decrypt, aes_cbc_encrypt};
pub use klap::{KlapEncryptionSession, generate_auth_hash, generate_auth_hash_v2};
pub use self::rsa::KeyPair;
