//! Pairwise send and receive.
//!
//! Every envelope targets the recipient's long-lived identity key, so the
//! recipient decrypts every message with the one identity secret it holds,
//! independent of any other message. A fetched one-time prekey is consumed
//! at most once by the server and reported through [`ForwardSecrecy`].
//!
//! # First contact
//!
//! When the server has no unused one-time prekey left, [`FirstContactPolicy`]
//! decides whether the send proceeds identity-only (logged at `warn`) or fails
//! with [`CoreError::PreKeyExhausted`].

use std::fmt;

use sealpost_crypto::{PublicKey, decrypt_file as open_file, encrypt_file as seal_file, open, seal};
use sealpost_proto::{
    EnvelopeBytes, FileBytes, IdentityKeysResponse, MessageType, SendMessageRequest, Timestamp,
    UserId, WireEnvelope, b64,
};

use crate::{env::Environment, error::CoreError, keystore::KeyStore};

/// Marker rendered in place of content that could not be decrypted.
pub const CANNOT_DECRYPT: &str = "cannot decrypt";

/// Prekey situation of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardSecrecy {
    /// A one-time prekey was handed out for this first contact
    OneTimePreKey {
        /// Consumed prekey id
        key_id: u64,
    },
    /// The recipient's supply was exhausted
    IdentityOnly,
}

/// What to do when no one-time prekey is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstContactPolicy {
    /// Proceed with identity-only ECDH
    #[default]
    AllowIdentityFallback,
    /// Refuse with `PreKeyExhausted`
    RequireOneTimePreKey,
}

/// Decoded and verified key bundle of a recipient.
#[derive(Debug, Clone)]
pub struct RecipientKeys {
    /// Recipient
    pub user_id: UserId,
    /// Long-lived identity key every envelope targets
    pub identity: PublicKey,
    /// Signed prekey, if published; its signature has been checked
    pub signed_pre_key: Option<(u64, PublicKey)>,
    /// One-time prekey handed out by this fetch
    pub one_time_pre_key: Option<(u64, PublicKey)>,
}

impl RecipientKeys {
    /// Decode a key fetch response.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyMaterial`: a key is malformed or the signed prekey's
    ///   signature does not verify under the identity key
    pub fn from_response(
        user_id: UserId,
        response: &IdentityKeysResponse,
    ) -> Result<Self, CoreError> {
        let invalid = |err: &dyn fmt::Display| CoreError::InvalidKeyMaterial {
            reason: format!("user {user_id}: {err}"),
        };

        let identity = b64::decode_public_key("identityPublicKey", &response.identity_public_key)
            .map_err(|e| invalid(&e))?;

        let signed_pre_key = match &response.signed_pre_key {
            Some(signed) => {
                let public = b64::decode_public_key("signedPreKey", &signed.public_key)
                    .map_err(|e| invalid(&e))?;
                if let Some(signature) = &signed.signature {
                    let signature = b64::decode("signature", signature).map_err(|e| invalid(&e))?;
                    identity.verify(&public.to_bytes(), &signature).map_err(|e| invalid(&e))?;
                }
                Some((signed.key_id, public))
            },
            None => None,
        };

        let one_time_pre_key = match &response.one_time_pre_key {
            Some(pre_key) => Some((pre_key.key_id, pre_key.decode().map_err(|e| invalid(&e))?)),
            None => None,
        };

        Ok(Self { user_id, identity, signed_pre_key, one_time_pre_key })
    }
}

/// An encrypted 1:1 payload ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Recipient
    pub recipient_id: UserId,
    /// Envelope for the recipient's identity key
    pub envelope: EnvelopeBytes,
    /// Prekey situation at encryption time
    pub forward_secrecy: ForwardSecrecy,
}

impl OutgoingMessage {
    /// Build the send request.
    pub fn into_request(
        self,
        message_type: MessageType,
        scheduled_for: Option<Timestamp>,
        self_destruct_at: Option<Timestamp>,
    ) -> SendMessageRequest {
        SendMessageRequest {
            recipient_id: self.recipient_id,
            envelope: self.envelope.to_wire(),
            message_type,
            scheduled_for,
            self_destruct_at,
        }
    }
}

/// Encrypt `plaintext` for `recipient`.
///
/// # Errors
///
/// - `UnsupportedEnvironment`: no secure entropy
/// - `PreKeyExhausted`: no one-time prekey and the policy requires one
pub fn encrypt_message<E: Environment>(
    env: &E,
    recipient: &RecipientKeys,
    plaintext: &[u8],
    policy: FirstContactPolicy,
) -> Result<OutgoingMessage, CoreError> {
    let forward_secrecy = match (recipient.one_time_pre_key.as_ref(), policy) {
        (Some((key_id, _)), _) => ForwardSecrecy::OneTimePreKey { key_id: *key_id },
        (None, FirstContactPolicy::AllowIdentityFallback) => {
            tracing::warn!(
                recipient = %recipient.user_id,
                "no one-time prekey available, sending identity-only"
            );
            ForwardSecrecy::IdentityOnly
        },
        (None, FirstContactPolicy::RequireOneTimePreKey) => {
            return Err(CoreError::PreKeyExhausted { user_id: recipient.user_id });
        },
    };

    let mut rng = env.crypto_rng()?;
    let envelope = EnvelopeBytes::from_envelope(&seal(&recipient.identity, plaintext, &mut rng));

    tracing::debug!(recipient = %recipient.user_id, ?forward_secrecy, "sealed message");

    Ok(OutgoingMessage { recipient_id: recipient.user_id, envelope, forward_secrecy })
}

/// Decrypt a stored envelope addressed to `store`'s identity.
///
/// # Errors
///
/// - `MissingKeyMaterial`: the identity secret is not on this device
/// - `Decrypt`: the envelope is malformed, altered or addressed elsewhere
pub fn decrypt_message(store: &KeyStore, envelope: &EnvelopeBytes) -> Result<Vec<u8>, CoreError> {
    let secret = store.identity_secret()?;
    let envelope = envelope.to_envelope()?;
    Ok(open(&envelope, secret)?)
}

/// Decode and decrypt a wire envelope.
///
/// # Errors
///
/// Same as [`decrypt_message`]; undecodable fields are `Decrypt`.
pub fn decrypt_wire(store: &KeyStore, wire: &WireEnvelope) -> Result<Vec<u8>, CoreError> {
    store.identity_secret()?;
    decrypt_message(store, &EnvelopeBytes::from_wire(wire)?)
}

/// Two-layer encrypt `contents` for `recipient`.
///
/// # Errors
///
/// - `UnsupportedEnvironment`: no secure entropy
pub fn encrypt_file<E: Environment>(
    env: &E,
    recipient: &PublicKey,
    contents: &[u8],
) -> Result<FileBytes, CoreError> {
    let mut rng = env.crypto_rng()?;
    Ok(FileBytes::from_encrypted(&seal_file(recipient, contents, &mut rng)))
}

/// Decrypt a file addressed to `store`'s identity.
///
/// # Errors
///
/// - `MissingKeyMaterial`: the identity secret is not on this device
/// - `Decrypt`: key envelope or body failed authentication
pub fn decrypt_file(store: &KeyStore, file: &FileBytes) -> Result<Vec<u8>, CoreError> {
    let secret = store.identity_secret()?;
    Ok(open_file(&file.to_encrypted()?, secret)?)
}

/// How a decrypted (or undecryptable) payload is shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// Decrypted content
    Plaintext(Vec<u8>),
    /// Per-message failure; shown as [`CANNOT_DECRYPT`]
    CannotDecrypt,
    /// This device lacks the identity secret; route to device sync
    KeyRecoveryRequired,
}

impl Rendered {
    /// Fold a decryption result into a displayable state. Never fails.
    pub fn from_result(result: Result<Vec<u8>, CoreError>) -> Self {
        match result {
            Ok(plaintext) => Self::Plaintext(plaintext),
            Err(err) if err.requires_key_recovery() => Self::KeyRecoveryRequired,
            Err(err) => {
                tracing::debug!(%err, "rendering undecryptable payload");
                Self::CannotDecrypt
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use sealpost_proto::{PreKeyWire, SignedPreKeyWire};

    use super::*;
    use crate::{env::test_env::TestEnv, registration::register};

    fn response_for(store: &KeyStore, one_time: Option<PreKeyWire>) -> IdentityKeysResponse {
        IdentityKeysResponse {
            identity_public_key: b64::encode(&store.identity_public_key().unwrap().to_bytes()),
            signed_pre_key: None,
            one_time_pre_key: one_time,
        }
    }

    #[test]
    fn message_roundtrip_reports_consumed_pre_key() {
        let env = TestEnv::new(20);
        let (alice, bundle) = register(UserId(1), &env, 5).unwrap();

        let response = response_for(&alice, Some(bundle.pre_keys[0].clone()));
        let keys = RecipientKeys::from_response(UserId(1), &response).unwrap();
        let outgoing =
            encrypt_message(&env, &keys, b"hi", FirstContactPolicy::default()).unwrap();

        assert_eq!(outgoing.forward_secrecy, ForwardSecrecy::OneTimePreKey {
            key_id: bundle.pre_keys[0].key_id
        });
        assert_eq!(decrypt_message(&alice, &outgoing.envelope).unwrap(), b"hi");
    }

    #[test]
    fn exhausted_supply_follows_policy() {
        let env = TestEnv::new(21);
        let (alice, _) = register(UserId(1), &env, 0).unwrap();
        let keys = RecipientKeys::from_response(UserId(1), &response_for(&alice, None)).unwrap();

        let fallback =
            encrypt_message(&env, &keys, b"x", FirstContactPolicy::AllowIdentityFallback).unwrap();
        assert_eq!(fallback.forward_secrecy, ForwardSecrecy::IdentityOnly);
        assert_eq!(decrypt_message(&alice, &fallback.envelope).unwrap(), b"x");

        assert_eq!(
            encrypt_message(&env, &keys, b"x", FirstContactPolicy::RequireOneTimePreKey),
            Err(CoreError::PreKeyExhausted { user_id: UserId(1) })
        );
    }

    #[test]
    fn missing_secret_is_distinct_from_corruption() {
        let env = TestEnv::new(22);
        let (alice, _) = register(UserId(1), &env, 1).unwrap();
        let keys = RecipientKeys::from_response(UserId(1), &response_for(&alice, None)).unwrap();
        let mut outgoing =
            encrypt_message(&env, &keys, b"secret", FirstContactPolicy::default()).unwrap();

        let fresh_device = KeyStore::empty(UserId(1));
        assert_eq!(
            Rendered::from_result(decrypt_message(&fresh_device, &outgoing.envelope)),
            Rendered::KeyRecoveryRequired
        );

        outgoing.envelope.ciphertext[0] ^= 1;
        let result = decrypt_message(&alice, &outgoing.envelope);
        assert!(matches!(result, Err(CoreError::Decrypt { .. })));
        assert_eq!(Rendered::from_result(result), Rendered::CannotDecrypt);
    }

    #[test]
    fn malformed_wire_envelope_is_a_decrypt_error() {
        let env = TestEnv::new(23);
        let (alice, _) = register(UserId(1), &env, 0).unwrap();
        let wire = WireEnvelope {
            ciphertext: "!!".into(),
            nonce: "AAAA".into(),
            ephemeral_public_key: "AAAA".into(),
        };
        assert!(matches!(decrypt_wire(&alice, &wire), Err(CoreError::Decrypt { .. })));
    }

    #[test]
    fn forged_signed_pre_key_is_rejected() {
        let env = TestEnv::new(24);
        let (alice, bundle) = register(UserId(1), &env, 0).unwrap();
        let (mallory, _) = register(UserId(9), &env, 0).unwrap();

        let mut response = response_for(&alice, None);
        response.signed_pre_key = bundle.signed_pre_key.clone();
        assert!(RecipientKeys::from_response(UserId(1), &response).unwrap().signed_pre_key.is_some());

        // Alice's signed prekey presented under Mallory's identity
        response.identity_public_key =
            b64::encode(&mallory.identity_public_key().unwrap().to_bytes());
        assert!(matches!(
            RecipientKeys::from_response(UserId(1), &response),
            Err(CoreError::InvalidKeyMaterial { .. })
        ));
    }

    #[test]
    fn unsigned_signed_pre_key_is_accepted() {
        let env = TestEnv::new(25);
        let (alice, bundle) = register(UserId(1), &env, 0).unwrap();
        let signed = bundle.signed_pre_key.unwrap();

        let mut response = response_for(&alice, None);
        response.signed_pre_key = Some(SignedPreKeyWire { signature: None, ..signed });
        assert!(RecipientKeys::from_response(UserId(1), &response).is_ok());
    }

    #[test]
    fn file_roundtrip_and_foreign_reader() {
        let env = TestEnv::new(26);
        let (bob, _) = register(UserId(2), &env, 0).unwrap();
        let (eve, _) = register(UserId(3), &env, 0).unwrap();

        let file = encrypt_file(&env, &bob.identity_public_key().unwrap(), b"voice.ogg").unwrap();
        assert_eq!(decrypt_file(&bob, &file).unwrap(), b"voice.ogg");
        assert!(matches!(decrypt_file(&eve, &file), Err(CoreError::Decrypt { .. })));
    }
}
