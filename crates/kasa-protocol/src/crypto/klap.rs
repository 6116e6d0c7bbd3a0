//! KLAP key derivation and request encryption.
//!
//! KLAP derives a per-session AES key, IV prefix, sequence number and
//! signature key from the two handshake seeds and the credential hash. Each
//! request increments the sequence number, which becomes the last four bytes
//! of the IV and is signed together with the ciphertext.
//!
//! Two hash generations exist:
//!
//! | | v1 (IOT) | v2 (SMART) |
//! |---|---|---|
//! | auth hash | `md5(md5(user) + md5(pass))` | `sha256(sha1(user) + sha1(pass))` |
//! | handshake1 | `sha256(local + auth)` | `sha256(local + remote + auth)` |
//! | handshake2 | `sha256(remote + auth)` | `sha256(remote + local + auth)` |

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::{
    Credentials,
    crypto::aes::{aes_cbc_decrypt, aes_cbc_encrypt},
    error::Error,
};

/// Length of the SHA-256 signature prepended to every request payload.
pub const SIGNATURE_LEN: usize = 32;

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// KLAP v1 auth hash: `md5(md5(username) + md5(password))`.
pub fn generate_auth_hash(credentials: &Credentials) -> [u8; 16] {
    let user = Md5::digest(credentials.username.as_bytes());
    let pass = Md5::digest(credentials.expose_password().as_bytes());
    let mut hasher = Md5::new();
    hasher.update(user);
    hasher.update(pass);
    hasher.finalize().into()
}

/// KLAP v2 auth hash: `sha256(sha1(username) + sha1(password))`.
pub fn generate_auth_hash_v2(credentials: &Credentials) -> [u8; 32] {
    let user = Sha1::digest(credentials.username.as_bytes());
    let pass = Sha1::digest(credentials.expose_password().as_bytes());
    sha256(&[user.as_slice(), pass.as_slice()])
}

/// Server proof expected from handshake1 (v1).
pub fn handshake1_seed_auth_hash(local_seed: &[u8], auth_hash: &[u8]) -> [u8; 32] {
    sha256(&[local_seed, auth_hash])
}

/// Server proof expected from handshake1 (v2).
pub fn handshake1_seed_auth_hash_v2(
    local_seed: &[u8],
    remote_seed: &[u8],
    auth_hash: &[u8],
) -> [u8; 32] {
    sha256(&[local_seed, remote_seed, auth_hash])
}

/// Client proof sent in handshake2 (v1).
pub fn handshake2_seed_auth_hash(remote_seed: &[u8], auth_hash: &[u8]) -> [u8; 32] {
    sha256(&[remote_seed, auth_hash])
}

/// Client proof sent in handshake2 (v2).
pub fn handshake2_seed_auth_hash_v2(
    local_seed: &[u8],
    remote_seed: &[u8],
    auth_hash: &[u8],
) -> [u8; 32] {
    sha256(&[remote_seed, local_seed, auth_hash])
}

/// Encryption state of an established KLAP session.
///
/// # Example
///
/// ```
/// use kasa_protocol::crypto::klap::KlapEncryptionSession;
///
/// let mut client = KlapEncryptionSession::new(&[1; 16], &[2; 16], &[3; 16]);
/// let server = client.clone();
///
/// let (payload, seq) = client.encrypt(b"hello");
/// assert_eq!(server.decrypt(&payload, seq).unwrap(), b"hello");
/// ```
#[derive(Clone)]
pub struct KlapEncryptionSession {
    key: [u8; 16],
    iv: [u8; 12],
    seq: i32,
    sig: [u8; 28],
}

impl KlapEncryptionSession {
    /// Derives the session from handshake seeds and the auth hash.
    pub fn new(local_seed: &[u8], remote_seed: &[u8], auth_hash: &[u8]) -> Self {
        let key_digest = sha256(&[b"lsk".as_slice(), local_seed, remote_seed, auth_hash]);
        let iv_digest = sha256(&[b"iv".as_slice(), local_seed, remote_seed, auth_hash]);
        let sig_digest = sha256(&[b"ldk".as_slice(), local_seed, remote_seed, auth_hash]);

        let mut key = [0u8; 16];
        key.copy_from_slice(&key_digest[..16]);
        let mut iv = [0u8; 12];
        iv.copy_from_slice(&iv_digest[..12]);
        let mut seq_bytes = [0u8; 4];
        seq_bytes.copy_from_slice(&iv_digest[28..]);
        let mut sig = [0u8; 28];
        sig.copy_from_slice(&sig_digest[..28]);

        Self {
            key,
            iv,
            seq: i32::from_be_bytes(seq_bytes),
            sig,
        }
    }

    /// Current sequence number (the one used by the last request).
    pub fn seq(&self) -> i32 {
        self.seq
    }

    fn iv_for(&self, seq: i32) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..12].copy_from_slice(&self.iv);
        iv[12..].copy_from_slice(&seq.to_be_bytes());
        iv
    }

    /// Encrypts a request, advancing the sequence number.
    ///
    /// Returns the signed payload and the sequence number to put in the URL.
    pub fn encrypt(&mut self, msg: &[u8]) -> (Vec<u8>, i32) {
        self.seq = self.seq.wrapping_add(1);
        (self.seal(msg, self.seq), self.seq)
    }

    /// Encrypts and signs `msg` for sequence number `seq` without touching
    /// the session's own counter. Devices answer with the request's `seq`.
    pub fn seal(&self, msg: &[u8], seq: i32) -> Vec<u8> {
        let ciphertext = aes_cbc_encrypt(&self.key, &self.iv_for(seq), msg);
        let signature = sha256(&[self.sig.as_slice(), &seq.to_be_bytes(), &ciphertext]);

        let mut payload = Vec::with_capacity(SIGNATURE_LEN + ciphertext.len());
        payload.extend_from_slice(&signature);
        payload.extend_from_slice(&ciphertext);
        payload
    }

    /// Decrypts a response produced for request `seq`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the payload is shorter than the
    /// signature or does not decrypt.
    pub fn decrypt(&self, payload: &[u8], seq: i32) -> Result<Vec<u8>, Error> {
        let ciphertext = payload.get(SIGNATURE_LEN..).ok_or_else(|| {
            Error::Protocol(format!("KLAP payload too short: {} bytes", payload.len()))
        })?;
        aes_cbc_decrypt(&self.key, &self.iv_for(seq), ciphertext)
    }

    /// Verifies the signature of a request payload. Used by test servers.
    pub fn verify(&self, payload: &[u8], seq: i32) -> bool {
        match payload.split_first_chunk::<SIGNATURE_LEN>() {
            Some((signature, ciphertext)) => {
                *signature == sha256(&[self.sig.as_slice(), &seq.to_be_bytes(), ciphertext])
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for KlapEncryptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KlapEncryptionSession")
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
