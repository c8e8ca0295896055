//! Sealpost Cryptographic Primitives
//!
//! Cryptographic building blocks for Sealpost. Every function is pure apart
//! from the randomness it draws from a caller-provided RNG, so tests can seed
//! a deterministic generator and production passes a freshly seeded CSPRNG.
//!
//! # Key Lifecycle
//!
//! Each account owns one long-lived P-256 identity key pair. Every payload
//! addressed to that identity is sealed with a brand-new ephemeral key pair:
//!
//! ```text
//! Ephemeral Secret (fresh per call)  ×  Recipient Identity Public Key
//!        │
//!        ▼
//! ECDH → Shared Secret (32 bytes, zeroized on drop)
//!        │
//!        ▼
//! HKDF-SHA256 (empty salt, fixed info) → AES-256 Key
//!        │
//!        ▼
//! AES-256-GCM (random 96-bit nonce) → Ciphertext + Tag
//! ```
//!
//! The envelope carries `{ciphertext, nonce, ephemeral public key}`. The
//! ephemeral secret and the shared secret never leave [`seal`].
//!
//! Symmetric keys (group keys, per-file keys) are ordinary 256-bit AES keys.
//! They travel to their holders as the plaintext of an envelope and are then
//! used directly with AES-256-GCM and a random nonce per payload.
//!
//! # Security
//!
//! Forward Secrecy (per operation):
//! - One ephemeral key pair per [`seal`] call, dropped before it returns
//! - There is no chain between envelopes: each one is independently
//!   decryptable with the recipient's identity secret alone
//!
//! Authenticity:
//! - AES-GCM tag covers the ciphertext; any bit flip in ciphertext or nonce is
//!   rejected as [`CryptoError::DecryptionFailed`]
//!
//! Nonces:
//! - 96-bit nonces are drawn from the RNG for every encryption, never derived
//!   from counters, so reuse under one key is negligible at messaging volumes

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod envelope;
mod error;
mod file;
mod keys;
mod symmetric;

pub use envelope::{ENVELOPE_KDF_INFO, EncryptedEnvelope, open, seal};
pub use error::CryptoError;
pub use file::{EncryptedFile, decrypt_file, encrypt_file};
pub use keys::{KeyPair, PUBLIC_KEY_LEN, PreKeyPair, PublicKey, SecretKey, generate_pre_keys};
pub use symmetric::{KEY_SIZE, NONCE_SIZE, SealedPayload, SymmetricKey, decrypt, encrypt};
