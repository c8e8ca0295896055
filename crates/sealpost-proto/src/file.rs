//! Two-layer encrypted file transfer.
//!
//! The file body is AES-256-GCM under a per-file key (`encryptedFile`,
//! `fileIv`); the per-file key is a pairwise envelope for the recipient
//! (`encryptedFileKey`, `ephemeralPublicKey`, `fileKeyNonce`).

use sealpost_crypto::{EncryptedFile, NONCE_SIZE, SealedPayload};
use serde::{Deserialize, Serialize};

use crate::{
    b64,
    envelope::EnvelopeBytes,
    error::ProtocolError,
    ids::{FileId, Timestamp, UserId},
};

/// Validated file ciphertext as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBytes {
    /// Encrypted file body including tag
    pub body: Vec<u8>,
    /// Body nonce
    pub iv: [u8; NONCE_SIZE],
    /// Wrapped per-file key
    pub wrapped_key: EnvelopeBytes,
}

impl FileBytes {
    /// Capture the output of `sealpost_crypto::encrypt_file`.
    pub fn from_encrypted(file: &EncryptedFile) -> Self {
        Self {
            body: file.body.ciphertext.clone(),
            iv: file.body.nonce,
            wrapped_key: EnvelopeBytes::from_envelope(&file.wrapped_key),
        }
    }

    /// Rebuild the crypto value for `sealpost_crypto::decrypt_file`.
    ///
    /// # Errors
    ///
    /// - `InvalidPublicKey`: stored ephemeral key is not a curve point
    pub fn to_encrypted(&self) -> Result<EncryptedFile, ProtocolError> {
        Ok(EncryptedFile {
            body: SealedPayload { nonce: self.iv, ciphertext: self.body.clone() },
            wrapped_key: self.wrapped_key.to_envelope()?,
        })
    }
}

/// `POST /files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadRequest {
    /// Recipient the file key is wrapped for
    pub recipient_id: UserId,
    /// Original file name
    pub filename: String,
    /// MIME type
    pub mime_type: String,
    /// Plaintext size in bytes
    #[serde(default)]
    pub size: u64,
    /// Base64 encrypted body
    pub encrypted_file: String,
    /// Base64 body nonce
    pub file_iv: String,
    /// Base64 wrapped file key
    pub encrypted_file_key: String,
    /// Base64 ephemeral public key of the key envelope
    pub ephemeral_public_key: String,
    /// Base64 nonce of the key envelope
    pub file_key_nonce: String,
}

impl FileUploadRequest {
    /// Decode and validate the ciphertext fields.
    ///
    /// # Errors
    ///
    /// - `InvalidBase64` / `InvalidLength` / `InvalidPublicKey` naming the
    ///   malformed field
    pub fn decode(&self) -> Result<FileBytes, ProtocolError> {
        decode_fields(
            &self.encrypted_file,
            &self.file_iv,
            &self.encrypted_file_key,
            &self.ephemeral_public_key,
            &self.file_key_nonce,
        )
    }
}

/// Metadata pushed to the recipient on upload. Carries no ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNotice {
    /// File id
    pub id: FileId,
    /// Uploader
    pub sender_id: UserId,
    /// Recipient
    pub recipient_id: UserId,
    /// Original file name
    pub filename: String,
    /// MIME type
    pub mime_type: String,
    /// Plaintext size in bytes
    pub size: u64,
    /// Upload time
    pub timestamp: Timestamp,
}

/// A file as fetched by its sender or recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWire {
    /// Metadata
    #[serde(flatten)]
    pub notice: FileNotice,
    /// Base64 encrypted body
    pub encrypted_file: String,
    /// Base64 body nonce
    pub file_iv: String,
    /// Base64 wrapped file key
    pub encrypted_file_key: String,
    /// Base64 ephemeral public key of the key envelope
    pub ephemeral_public_key: String,
    /// Base64 nonce of the key envelope
    pub file_key_nonce: String,
}

impl FileWire {
    /// Encode a stored file for the wire.
    pub fn new(notice: FileNotice, bytes: &FileBytes) -> Self {
        let key = bytes.wrapped_key.to_wire();
        Self {
            notice,
            encrypted_file: b64::encode(&bytes.body),
            file_iv: b64::encode(&bytes.iv),
            encrypted_file_key: key.ciphertext,
            ephemeral_public_key: key.ephemeral_public_key,
            file_key_nonce: key.nonce,
        }
    }

    /// Decode the ciphertext fields for local decryption.
    ///
    /// # Errors
    ///
    /// Same as [`FileUploadRequest::decode`].
    pub fn decode(&self) -> Result<FileBytes, ProtocolError> {
        decode_fields(
            &self.encrypted_file,
            &self.file_iv,
            &self.encrypted_file_key,
            &self.ephemeral_public_key,
            &self.file_key_nonce,
        )
    }
}

fn decode_fields(
    encrypted_file: &str,
    file_iv: &str,
    encrypted_file_key: &str,
    ephemeral_public_key: &str,
    file_key_nonce: &str,
) -> Result<FileBytes, ProtocolError> {
    let body = b64::decode("encryptedFile", encrypted_file)?;
    let iv = b64::decode_array::<NONCE_SIZE>("fileIv", file_iv)?;
    let wrapped_key = EnvelopeBytes::from_fields(
        ("encryptedFileKey", encrypted_file_key),
        ("fileKeyNonce", file_key_nonce),
        ("ephemeralPublicKey", ephemeral_public_key),
    )?;

    Ok(FileBytes { body, iv, wrapped_key })
}

#[cfg(test)]
mod tests {
    use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};
    use sealpost_crypto::{KeyPair, decrypt_file, encrypt_file};

    use super::*;

    #[test]
    fn fetched_file_decrypts() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let bob = KeyPair::generate(&mut rng);
        let encrypted = encrypt_file(&bob.public, b"%PDF-1.7", &mut rng);

        let notice = FileNotice {
            id: FileId(1),
            sender_id: UserId(1),
            recipient_id: UserId(2),
            filename: "a.pdf".into(),
            mime_type: "application/pdf".into(),
            size: 8,
            timestamp: Timestamp::from_millis(0),
        };
        let wire = FileWire::new(notice, &FileBytes::from_encrypted(&encrypted));
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["filename"], "a.pdf");

        let restored = wire.decode().unwrap().to_encrypted().unwrap();
        assert_eq!(decrypt_file(&restored, &bob.secret).unwrap(), b"%PDF-1.7");
    }

    #[test]
    fn bad_iv_is_rejected() {
        let request = FileUploadRequest {
            recipient_id: UserId(2),
            filename: "x".into(),
            mime_type: "text/plain".into(),
            size: 1,
            encrypted_file: "AAAA".into(),
            file_iv: "AAAA".into(),
            encrypted_file_key: "AAAA".into(),
            ephemeral_public_key: "AAAA".into(),
            file_key_nonce: "AAAA".into(),
        };
        assert_eq!(
            request.decode(),
            Err(ProtocolError::InvalidLength { field: "fileIv", expected: 12, got: 3 })
        );
    }
}
