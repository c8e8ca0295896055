//! AES-256-GCM with random nonces.
//!
//! Used directly for group messages and file bodies, and internally by the
//! envelope layer once the ECDH-derived key is available.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand_core::CryptoRngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce (IV) size in bytes
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size
const TAG_SIZE: usize = 16;

/// A raw 256-bit AES key. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Generate a fresh random key.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        let mut key = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut key);
        Self(key)
    }

    /// Wrap raw key bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength`: `bytes` is not exactly [`KEY_SIZE`] long
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength { expected: KEY_SIZE, got: bytes.len() })?;
        Ok(Self(key))
    }

    /// Raw key bytes, e.g. as the plaintext of a wrapping envelope.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SymmetricKey {}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Ciphertext plus the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// Random 96-bit nonce
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext including the 16-byte GCM tag
    pub ciphertext: Vec<u8>,
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt<R: CryptoRngCore>(key: &SymmetricKey, plaintext: &[u8], rng: &mut R) -> SealedPayload {
    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);

    let ciphertext = aes_seal(key.as_bytes(), &nonce, plaintext);
    SealedPayload { nonce, ciphertext }
}

/// Decrypt a payload sealed by [`encrypt`].
///
/// # Errors
///
/// - `DecryptionFailed`: wrong key, tampered ciphertext or tampered nonce
pub fn decrypt(key: &SymmetricKey, payload: &SealedPayload) -> Result<Vec<u8>, CryptoError> {
    aes_open(key.as_bytes(), &payload.nonce, &payload.ciphertext)
}

pub(crate) fn aes_seal(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(key.into());

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(nonce), plaintext) else {
        unreachable!("AES-256-GCM encryption cannot fail for messaging-sized inputs");
    };

    ciphertext
}

pub(crate) fn aes_open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed { reason: "ciphertext shorter than tag".into() });
    }

    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication failed".to_string() })
}
