//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors produced by key handling and AEAD operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Bytes do not encode a valid point on P-256
    #[error("invalid public key: not a valid SEC1-encoded P-256 point")]
    InvalidPublicKey,

    /// Secret key bytes could not be parsed
    #[error("invalid secret key: {reason}")]
    InvalidSecretKey {
        /// What was wrong with the encoding
        reason: String,
    },

    /// Raw key material had the wrong length
    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength {
        /// Required length
        expected: usize,
        /// Provided length
        got: usize,
    },

    /// Authentication tag mismatch or otherwise undecryptable input
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Short description; never contains key material
        reason: String,
    },

    /// ECDSA signature is malformed or does not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// Prekey id space exhausted for this identity
    #[error("prekey id overflow")]
    KeyIdOverflow,
}
