//! Pairwise envelopes on the wire and at rest.
//!
//! [`WireEnvelope`] is the base64 form carried in JSON bodies. [`EnvelopeBytes`]
//! is the validated binary form that is persisted: ciphertext, nonce and
//! ephemeral public key always travel together, since losing any one of them
//! makes the record permanently undecryptable.

use sealpost_crypto::{EncryptedEnvelope, NONCE_SIZE, PublicKey};
use serde::{Deserialize, Serialize};

use crate::{b64, error::ProtocolError};

/// Base64 envelope fields as sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    /// AES-GCM ciphertext including tag
    pub ciphertext: String,
    /// 12-byte nonce
    pub nonce: String,
    /// 65-byte uncompressed SEC1 point
    pub ephemeral_public_key: String,
}

/// Validated envelope bytes.
///
/// Construction through [`EnvelopeBytes::from_wire`] or
/// [`EnvelopeBytes::from_envelope`] guarantees the nonce length and that the
/// ephemeral key is a curve point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeBytes {
    /// AES-GCM ciphertext including tag
    pub ciphertext: Vec<u8>,
    /// AES-GCM nonce
    pub nonce: [u8; NONCE_SIZE],
    /// SEC1-encoded ephemeral public key
    pub ephemeral_public_key: Vec<u8>,
}

impl EnvelopeBytes {
    /// Decode and validate a wire envelope.
    ///
    /// # Errors
    ///
    /// - `InvalidBase64`: any field is not base64
    /// - `InvalidLength`: nonce is not 12 bytes
    /// - `InvalidPublicKey`: ephemeral key is not a P-256 point
    pub fn from_wire(wire: &WireEnvelope) -> Result<Self, ProtocolError> {
        Self::from_fields(
            ("ciphertext", &wire.ciphertext),
            ("nonce", &wire.nonce),
            ("ephemeralPublicKey", &wire.ephemeral_public_key),
        )
    }

    /// Decode envelope fields that use different JSON names (group member keys,
    /// file keys). Each pair is `(field name, base64 value)`.
    ///
    /// # Errors
    ///
    /// Same as [`EnvelopeBytes::from_wire`], naming the supplied fields.
    pub fn from_fields(
        ciphertext: (&'static str, &str),
        nonce: (&'static str, &str),
        ephemeral_public_key: (&'static str, &str),
    ) -> Result<Self, ProtocolError> {
        let ciphertext = b64::decode(ciphertext.0, ciphertext.1)?;
        let nonce = b64::decode_array::<NONCE_SIZE>(nonce.0, nonce.1)?;
        let ephemeral = b64::decode_public_key(ephemeral_public_key.0, ephemeral_public_key.1)?;

        Ok(Self { ciphertext, nonce, ephemeral_public_key: ephemeral.to_bytes() })
    }

    /// Encode for the wire.
    pub fn to_wire(&self) -> WireEnvelope {
        WireEnvelope {
            ciphertext: b64::encode(&self.ciphertext),
            nonce: b64::encode(&self.nonce),
            ephemeral_public_key: b64::encode(&self.ephemeral_public_key),
        }
    }

    /// Capture an envelope produced by `sealpost_crypto::seal`.
    pub fn from_envelope(envelope: &EncryptedEnvelope) -> Self {
        Self {
            ciphertext: envelope.ciphertext.clone(),
            nonce: envelope.nonce,
            ephemeral_public_key: envelope.ephemeral_public_key.to_bytes(),
        }
    }

    /// Rebuild the crypto envelope for opening.
    ///
    /// # Errors
    ///
    /// - `InvalidPublicKey`: stored ephemeral key is not a curve point
    pub fn to_envelope(&self) -> Result<EncryptedEnvelope, ProtocolError> {
        let ephemeral_public_key = PublicKey::from_bytes(&self.ephemeral_public_key)
            .map_err(|_| ProtocolError::InvalidPublicKey { field: "ephemeralPublicKey" })?;

        Ok(EncryptedEnvelope {
            ciphertext: self.ciphertext.clone(),
            nonce: self.nonce,
            ephemeral_public_key,
        })
    }
}
