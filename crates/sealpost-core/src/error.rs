//! Error taxonomy for protocol operations.
//!
//! Every failure inside a crypto operation is converted to one of these kinds
//! at the operation boundary. Raw decoder or AEAD errors never reach the
//! transport: they arrive here as [`CoreError::Decrypt`] or
//! [`CoreError::InvalidKeyMaterial`].

use sealpost_crypto::CryptoError;
use sealpost_proto::{GroupId, ProtocolError, UserId};
use thiserror::Error;

/// Errors produced by key management, pairwise and group encryption.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No secure randomness source. Blocks registration and every send.
    #[error("unsupported environment: no secure random source available")]
    UnsupportedEnvironment,

    /// Authentication failure or malformed envelope. Per-message; render a
    /// placeholder.
    #[error("cannot decrypt: {reason}")]
    Decrypt {
        /// Short description; never contains key material or plaintext
        reason: String,
    },

    /// The local secret key for this identity is absent (fresh device,
    /// identity not yet synced).
    #[error("missing key material for user {owner}")]
    MissingKeyMaterial {
        /// Identity whose secret is missing
        owner: UserId,
    },

    /// The member's wrapped group key is still a placeholder.
    #[error("group key not ready for user {user_id} in group {group_id}")]
    GroupKeyNotReady {
        /// Group
        group_id: GroupId,
        /// Member holding the placeholder
        user_id: UserId,
    },

    /// No unused one-time prekey and the policy forbids identity-only first
    /// contact.
    #[error("no one-time prekey available for user {user_id}")]
    PreKeyExhausted {
        /// Recipient whose supply is exhausted
        user_id: UserId,
    },

    /// Group message and local group key are at different versions.
    #[error("stale group key: holding version {held}, message requires {required}")]
    StaleGroupKey {
        /// Version held locally
        held: u32,
        /// Version the operation requires
        required: u32,
    },

    /// User has no record in the group.
    #[error("user {user_id} is not a member of group {group_id}")]
    NotAMember {
        /// Group
        group_id: GroupId,
        /// Non-member
        user_id: UserId,
    },

    /// Published or imported key material is unusable.
    #[error("invalid key material: {reason}")]
    InvalidKeyMaterial {
        /// What was rejected
        reason: String,
    },
}

impl CoreError {
    /// The user should be routed to device sync / key recovery rather than
    /// shown a corruption error.
    pub fn requires_key_recovery(&self) -> bool {
        matches!(self, Self::MissingKeyMaterial { .. })
    }

    /// The client should re-fetch the group and unwrap its current key.
    pub fn requires_key_refresh(&self) -> bool {
        matches!(self, Self::StaleGroupKey { .. } | Self::GroupKeyNotReady { .. })
    }

    /// The failure affects a single message or group and the session can
    /// continue.
    ///
    /// `UnsupportedEnvironment` and `InvalidKeyMaterial` are not recoverable:
    /// nothing succeeds until the environment or the keys are fixed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Decrypt { .. }
                | Self::MissingKeyMaterial { .. }
                | Self::GroupKeyNotReady { .. }
                | Self::PreKeyExhausted { .. }
                | Self::StaleGroupKey { .. }
                | Self::NotAMember { .. }
        )
    }
}

impl From<CryptoError> for CoreError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed { reason } => Self::Decrypt { reason },
            CryptoError::InvalidPublicKey
            | CryptoError::InvalidSecretKey { .. }
            | CryptoError::InvalidKeyLength { .. }
            | CryptoError::InvalidSignature
            | CryptoError::KeyIdOverflow => Self::InvalidKeyMaterial { reason: err.to_string() },
        }
    }
}

/// Malformed envelope fields make the envelope undecryptable.
impl From<ProtocolError> for CoreError {
    fn from(err: ProtocolError) -> Self {
        Self::Decrypt { reason: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_distinct_from_corruption() {
        let missing = CoreError::MissingKeyMaterial { owner: UserId(1) };
        let corrupt = CoreError::from(CryptoError::DecryptionFailed { reason: "tag".into() });

        assert!(missing.requires_key_recovery());
        assert!(!corrupt.requires_key_recovery());
        assert!(matches!(corrupt, CoreError::Decrypt { .. }));
    }

    #[test]
    fn version_problems_request_refresh() {
        assert!(CoreError::StaleGroupKey { held: 1, required: 2 }.requires_key_refresh());
        assert!(
            CoreError::GroupKeyNotReady { group_id: GroupId(1), user_id: UserId(2) }
                .requires_key_refresh()
        );
        assert!(!CoreError::Decrypt { reason: String::new() }.requires_key_refresh());
    }

    #[test]
    fn environment_failure_is_fatal() {
        assert!(!CoreError::UnsupportedEnvironment.is_recoverable());
        assert!(!CoreError::from(CryptoError::InvalidPublicKey).is_recoverable());
        assert!(CoreError::PreKeyExhausted { user_id: UserId(3) }.is_recoverable());
    }

    #[test]
    fn malformed_wire_fields_become_decrypt_errors() {
        let err = CoreError::from(ProtocolError::InvalidBase64 { field: "nonce" });
        assert_eq!(err, CoreError::Decrypt { reason: "field nonce is not valid base64".into() });
    }
}
