//! Published key bundles.

use sealpost_crypto::PublicKey;
use serde::{Deserialize, Serialize};

use crate::{b64, error::ProtocolError};

/// A one-time prekey as published by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyWire {
    /// Unique within the owner's prekey set
    pub key_id: u64,
    /// Base64 SEC1 public key
    pub public_key: String,
}

impl PreKeyWire {
    /// Build from a typed key.
    pub fn new(key_id: u64, public_key: &PublicKey) -> Self {
        Self { key_id, public_key: b64::encode(&public_key.to_bytes()) }
    }

    /// Decode and validate the public key.
    ///
    /// # Errors
    ///
    /// - `InvalidBase64` / `InvalidPublicKey` on malformed input
    pub fn decode(&self) -> Result<PublicKey, ProtocolError> {
        b64::decode_public_key("publicKey", &self.public_key)
    }
}

/// Medium-term prekey. Returned as-is on every fetch and never consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKeyWire {
    /// Key identifier
    pub key_id: u64,
    /// Base64 SEC1 public key
    pub public_key: String,
    /// Optional base64 signature by the identity key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Keys an identity publishes at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterKeysRequest {
    /// Base64 SEC1 identity public key
    pub identity_public_key: String,
    /// Optional signed prekey
    #[serde(default)]
    pub signed_pre_key: Option<SignedPreKeyWire>,
    /// Initial batch of one-time prekeys
    pub pre_keys: Vec<PreKeyWire>,
}

/// Additional one-time prekeys uploaded after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplenishPreKeysRequest {
    /// New batch; ids must not collide with any previously published id
    pub pre_keys: Vec<PreKeyWire>,
}

/// Response to `GET /identity/{id}/keys`.
///
/// A returned `one_time_pre_key` has already been marked used server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityKeysResponse {
    /// Base64 SEC1 identity public key
    pub identity_public_key: String,
    /// Signed prekey, if the identity published one
    pub signed_pre_key: Option<SignedPreKeyWire>,
    /// At most one unused one-time prekey, or `null` when exhausted
    pub one_time_pre_key: Option<PreKeyWire>,
}

/// Per-user privacy settings stored alongside the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    /// Whether marking a message read notifies its sender
    pub read_receipts_enabled: bool,
    /// Whether this user's typing state is relayed
    pub typing_indicators_enabled: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self { read_receipts_enabled: true, typing_indicators_enabled: true }
    }
}
