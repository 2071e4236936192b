//! Cryptographic facility for credential protection.
//!
//! This module provides:
//! - `CipherKey`: a 256-bit symmetric key, loaded from the OS keychain or
//!   generated per process
//! - `encrypt`/`decrypt`: authenticated encryption of opaque byte blobs
//!   (XChaCha20-Poly1305, random nonce embedded in the blob)
//! - `digest_password`/`verify_password`: one-way Argon2id password digests
//!   with a per-user random salt
//!
//! Decryption failures never fall back to plaintext - callers must treat
//! them as "stored state unusable" and force a fresh login.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Key, XChaCha20Poly1305, XNonce,
};
use keyring::Entry;
use thiserror::Error;
use tracing::{debug, warn};

/// Symmetric key length in bytes (256 bits)
pub const KEY_LEN: usize = 32;

/// XChaCha20-Poly1305 nonce length in bytes.
/// The extended 24-byte nonce is large enough to be chosen at random
/// per message without collision concerns.
const NONCE_LEN: usize = 24;

/// Keyring entry name under which the encryption key is stored
const KEY_ENTRY_NAME: &str = "encryption-key";

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("ciphertext is malformed")]
    Malformed,

    #[error("ciphertext failed authentication")]
    AuthenticationFailed,

    #[error("encryption failed")]
    EncryptFailed,

    #[error("password digest failed: {0}")]
    Digest(String),
}

/// Process-wide symmetric key for credential encryption.
///
/// The raw key material never leaves this module; `Debug` output is
/// redacted.
#[derive(Clone)]
pub struct CipherKey([u8; KEY_LEN]);

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(..)")
    }
}

impl CipherKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self(XChaCha20Poly1305::generate_key(&mut OsRng).into())
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Load the profile encryption key from the OS keychain, generating and
    /// storing a new one on first run.
    ///
    /// If the keychain is unavailable the key falls back to process lifetime
    /// only: previously encrypted state then fails closed on the next load
    /// and the user is asked to log in again.
    pub fn load_or_generate(service: &str) -> Self {
        let entry = match Entry::new(service, KEY_ENTRY_NAME) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "keychain unavailable, using process-lifetime key");
                return Self::generate();
            }
        };

        match entry.get_secret() {
            Ok(secret) if secret.len() == KEY_LEN => {
                let mut bytes = [0u8; KEY_LEN];
                bytes.copy_from_slice(&secret);
                debug!("loaded encryption key from keychain");
                Self(bytes)
            }
            Ok(_) | Err(keyring::Error::NoEntry) => {
                let key = Self::generate();
                if let Err(e) = entry.set_secret(&key.0) {
                    warn!(error = %e, "failed to store encryption key in keychain");
                }
                key
            }
            Err(e) => {
                warn!(error = %e, "failed to read encryption key from keychain, using process-lifetime key");
                Self::generate()
            }
        }
    }
}

/// Encrypt a plaintext under the given key.
///
/// The returned blob embeds the random nonce, so the caller stores a single
/// opaque byte string.
pub fn encrypt(key: &CipherKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key.0));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::EncryptFailed)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(nonce.as_slice());
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a blob produced by [`encrypt`].
///
/// `Malformed` means the blob is too short to contain a nonce;
/// `AuthenticationFailed` means the authentication tag did not verify
/// (tampering or corruption). Callers treat both the same way.
pub fn decrypt(key: &CipherKey, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < NONCE_LEN {
        return Err(CryptoError::Malformed);
    }

    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key.0));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Produce a one-way Argon2id digest of a password with a fresh random salt.
///
/// The result is a PHC string embedding the salt and parameters, suitable
/// for storage and later verification.
pub fn digest_password(password: &str) -> Result<String, CryptoError> {
    use argon2::password_hash::{rand_core::OsRng as SaltRng, PasswordHasher, SaltString};
    use argon2::Argon2;

    let salt = SaltString::generate(&mut SaltRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CryptoError::Digest(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against a PHC digest produced by [`digest_password`]
pub fn verify_password(password: &str, digest: &str) -> Result<bool, CryptoError> {
    use argon2::password_hash::{PasswordHash, PasswordVerifier};
    use argon2::Argon2;

    let parsed = PasswordHash::new(digest).map_err(|e| CryptoError::Digest(e.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CryptoError::Digest(e.to_string())),
    }
}
