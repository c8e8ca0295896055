//! Sealpost protocol core.
//!
//! Client-side key management and encryption for 1:1 and group messaging,
//! plus the message lifecycle state machine shared with the server.
//!
//! # Architecture
//!
//! Everything here is synchronous and free of I/O. Time and randomness come
//! from an [`Environment`], so the same code runs in production with the
//! system clock and `getrandom`, and in simulation with a seeded RNG and a
//! manually advanced clock.
//!
//! # Components
//!
//! - [`KeyStore`]: an identity's secrets (identity key, signed prekey,
//!   one-time prekeys) with explicit export/import
//! - [`registration`]: initial key bundle and prekey replenishment
//! - [`pairwise`]: 1:1 message and file encryption against an identity key
//! - [`group`]: group key creation, distribution, rotation and repair
//! - [`lifecycle`]: scheduling, self-destruct, edit, delete, pin
//! - [`message`]: persisted message records
//!
//! # Errors
//!
//! Every crypto or decoding failure is translated into a [`CoreError`] at the
//! operation boundary. [`pairwise::Rendered`] folds decryption results into
//! what the user sees, so no raw error reaches the transport.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod error;
pub mod group;
pub mod keystore;
pub mod lifecycle;
pub mod message;
pub mod pairwise;
pub mod registration;

pub use env::Environment;
pub use error::CoreError;
pub use group::{
    GroupKey, GroupKeyRecord, GroupKeyState, KeyDirectory, RemovalPolicy, RepairReport, WrappedKey,
    decrypt_group_message, encrypt_group_message,
};
pub use keystore::KeyStore;
pub use lifecycle::{Audience, Lifecycle, Release, TransitionError};
pub use message::{GroupMessage, Message};
pub use pairwise::{
    CANNOT_DECRYPT, FirstContactPolicy, ForwardSecrecy, OutgoingMessage, RecipientKeys, Rendered,
    decrypt_message, encrypt_message,
};
pub use registration::{DEFAULT_PRE_KEY_COUNT, register, replenish};
