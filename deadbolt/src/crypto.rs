//! AES-256-GCM crypto box for opaque state tokens and stored credentials.
//!
//! The key is derived once by hashing the configured secret with SHA-256, which
//! normalises secrets of any length into a 32-byte key. Every call to `encrypt`
//! draws a fresh random nonce; the nonce is prepended to the ciphertext and the
//! result is base64-encoded so it can travel in cookies and query strings.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::{crypto_error, CryptoErrorKind, Error, ErrorKind};

/// 12-byte nonce size for AES-GCM
const NONCE_SIZE: usize = 12;

/// Symmetric authenticated encryption of opaque strings.
///
/// Implementations may be backed by an off-thread or remote cryptography provider,
/// hence the async signatures. `decrypt` must fail with
/// `CryptoErrorKind::Decryption` on malformed or tampered input.
#[async_trait]
pub trait Cipher: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> Result<String, Error>;

    async fn decrypt(&self, ciphertext: &str) -> Result<String, Error>;
}

/// Default `Cipher` keyed from the shared secret.
pub struct CryptoBox {
    cipher: Aes256Gcm,
}

impl CryptoBox {
    /// Derive the key from `secret` and build the cipher.
    pub fn new(secret: &SecretString) -> Self {
        let key = Sha256::digest(secret.expose_secret().as_bytes());
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Encrypts plaintext using a fresh random nonce.
    ///
    /// # Returns
    /// Base64-encoded string containing nonce + ciphertext
    pub fn seal(&self, plaintext: &str) -> Result<String, Error> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| crypto_error(CryptoErrorKind::Encryption))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);

        Ok(BASE64.encode(combined))
    }

    /// Decrypts a base64-encoded ciphertext that was produced by `seal()`.
    pub fn open(&self, ciphertext_b64: &str) -> Result<String, Error> {
        let combined = BASE64.decode(ciphertext_b64).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Crypto(CryptoErrorKind::Decryption),
        })?;

        if combined.len() < NONCE_SIZE {
            return Err(crypto_error(CryptoErrorKind::Decryption));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| crypto_error(CryptoErrorKind::Decryption))?;

        String::from_utf8(plaintext_bytes).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Crypto(CryptoErrorKind::Decryption),
        })
    }
}

#[async_trait]
impl Cipher for CryptoBox {
    async fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
        self.seal(plaintext)
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String, Error> {
        self.open(ciphertext)
    }
}

/// Generate `len` random bytes and encode them as base64.
pub fn random_string(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill(bytes.as_mut_slice());
    BASE64.encode(bytes)
}
