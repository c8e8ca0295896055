//! P-256 identity and prekey material.
//!
//! Public keys are exchanged as 65-byte uncompressed SEC1 points. Secret keys
//! are exported as PKCS#8 DER so they can be synced between devices; the
//! exported buffer is wrapped in [`Zeroizing`] and wiped when dropped.

use std::fmt;

use p256::{
    ecdsa::{
        Signature, SigningKey, VerifyingKey,
        signature::{Signer, Verifier},
    },
    elliptic_curve::sec1::ToEncodedPoint,
    pkcs8::{DecodePrivateKey, EncodePrivateKey},
};
use rand_core::CryptoRngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Length of an uncompressed SEC1 P-256 point (0x04 || X || Y)
pub const PUBLIC_KEY_LEN: usize = 65;

/// A P-256 public key suitable for ECDH.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(pub(crate) p256::PublicKey);

impl PublicKey {
    /// Parse a SEC1-encoded point (compressed or uncompressed).
    ///
    /// # Errors
    ///
    /// - `InvalidPublicKey`: bytes are not a point on the curve (including the
    ///   identity point and truncated encodings)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        p256::PublicKey::from_sec1_bytes(bytes).map(Self).map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Uncompressed SEC1 encoding, [`PUBLIC_KEY_LEN`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Verify a 64-byte ECDSA P-256 signature over `message`.
    ///
    /// # Errors
    ///
    /// - `InvalidSignature`: malformed signature or verification failure
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
        VerifyingKey::from(&self.0)
            .verify(message, &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        write!(f, "PublicKey(")?;
        for byte in &bytes[1..9] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "…)")
    }
}

/// A P-256 secret key. Zeroized on drop by the underlying curve type.
#[derive(Clone)]
pub struct SecretKey(pub(crate) p256::SecretKey);

impl SecretKey {
    /// Import a PKCS#8 DER-encoded secret key.
    ///
    /// # Errors
    ///
    /// - `InvalidSecretKey`: malformed DER, wrong algorithm or wrong curve
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        p256::SecretKey::from_pkcs8_der(der)
            .map(Self)
            .map_err(|e| CryptoError::InvalidSecretKey { reason: e.to_string() })
    }

    /// Export as PKCS#8 DER.
    ///
    /// # Errors
    ///
    /// - `InvalidSecretKey`: the encoder rejected the key (not expected for
    ///   keys produced by this crate)
    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let document = self
            .0
            .to_pkcs8_der()
            .map_err(|e| CryptoError::InvalidSecretKey { reason: e.to_string() })?;
        Ok(Zeroizing::new(document.as_bytes().to_vec()))
    }

    /// Public half of this key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }

    /// Deterministic (RFC 6979) ECDSA signature, 64 bytes `r || s`.
    ///
    /// Used by an identity to sign its signed prekey.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = SigningKey::from(&self.0).sign(message);
        signature.to_bytes().to_vec()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// A long-lived or one-time P-256 key pair.
#[derive(Clone, Debug)]
pub struct KeyPair {
    /// Published half
    pub public: PublicKey,
    /// Private half; never leaves the owning device unless exported
    pub secret: SecretKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the given CSPRNG.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        let secret = p256::SecretKey::random(rng);
        let public = PublicKey(secret.public_key());
        Self { public, secret: SecretKey(secret) }
    }

    /// Rebuild a key pair from its secret half.
    pub fn from_secret(secret: SecretKey) -> Self {
        Self { public: secret.public_key(), secret }
    }
}

/// One-time prekey: a key pair tagged with an identity-scoped id.
#[derive(Clone, Debug)]
pub struct PreKeyPair {
    /// Unique within one identity's prekey set
    pub key_id: u64,
    /// The key material
    pub pair: KeyPair,
}

/// Generate `count` independent prekeys with ids `first_key_id..first_key_id +
/// count`.
///
/// Ids are consecutive so a caller that tracks the next free id per identity
/// never hands out the same id twice.
///
/// # Errors
///
/// - `KeyIdOverflow`: the id range would exceed `u64::MAX`
pub fn generate_pre_keys<R: CryptoRngCore>(
    rng: &mut R,
    first_key_id: u64,
    count: usize,
) -> Result<Vec<PreKeyPair>, CryptoError> {
    first_key_id.checked_add(count as u64).ok_or(CryptoError::KeyIdOverflow)?;

    Ok((0..count as u64)
        .map(|offset| PreKeyPair { key_id: first_key_id + offset, pair: KeyPair::generate(rng) })
        .collect())
}
