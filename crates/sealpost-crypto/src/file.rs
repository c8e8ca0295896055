//! Two-layer file encryption.
//!
//! The file body is sealed with a random per-file AES key; that key is then
//! wrapped for the recipient with a pairwise envelope.

use rand_core::CryptoRngCore;

use crate::{
    envelope::{EncryptedEnvelope, open, seal},
    error::CryptoError,
    keys::{PublicKey, SecretKey},
    symmetric::{SealedPayload, SymmetricKey, decrypt, encrypt},
};

/// An encrypted file ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFile {
    /// File bytes under the per-file key
    pub body: SealedPayload,
    /// Per-file key wrapped for the recipient
    pub wrapped_key: EncryptedEnvelope,
}

/// Encrypt `contents` for `recipient`.
pub fn encrypt_file<R: CryptoRngCore>(
    recipient: &PublicKey,
    contents: &[u8],
    rng: &mut R,
) -> EncryptedFile {
    let file_key = SymmetricKey::generate(rng);
    let body = encrypt(&file_key, contents, rng);
    let wrapped_key = seal(recipient, file_key.as_bytes(), rng);

    EncryptedFile { body, wrapped_key }
}

/// Decrypt a file with the recipient's secret key.
///
/// # Errors
///
/// - `DecryptionFailed`: the wrapped key or the body fails authentication
/// - `InvalidKeyLength`: the unwrapped key is not 32 bytes
pub fn decrypt_file(file: &EncryptedFile, own_secret: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    let raw_key = zeroize::Zeroizing::new(open(&file.wrapped_key, own_secret)?);
    let file_key = SymmetricKey::from_bytes(&raw_key)?;

    decrypt(&file_key, &file.body)
}

#[cfg(test)]
mod tests {
    use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};

    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn file_roundtrip() {
        let mut rng = ChaCha20Rng::seed_from_u64(30);
        let bob = KeyPair::generate(&mut rng);
        let contents = vec![0x5Au8; 256 * 1024];

        let file = encrypt_file(&bob.public, &contents, &mut rng);
        assert_eq!(decrypt_file(&file, &bob.secret).unwrap(), contents);
    }

    #[test]
    fn wrapped_key_is_a_32_byte_aes_key() {
        let mut rng = ChaCha20Rng::seed_from_u64(31);
        let bob = KeyPair::generate(&mut rng);

        let file = encrypt_file(&bob.public, b"voice note", &mut rng);
        let raw = open(&file.wrapped_key, &bob.secret).unwrap();
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn tampered_body_fails() {
        let mut rng = ChaCha20Rng::seed_from_u64(32);
        let bob = KeyPair::generate(&mut rng);

        let mut file = encrypt_file(&bob.public, b"picture", &mut rng);
        file.body.ciphertext[0] ^= 0x01;
        assert!(matches!(
            decrypt_file(&file, &bob.secret),
            Err(CryptoError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn wrapped_non_key_is_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(33);
        let bob = KeyPair::generate(&mut rng);

        let mut file = encrypt_file(&bob.public, b"doc", &mut rng);
        file.wrapped_key = seal(&bob.public, b"too short", &mut rng);
        assert_eq!(
            decrypt_file(&file, &bob.secret).unwrap_err(),
            CryptoError::InvalidKeyLength { expected: 32, got: 9 }
        );
    }
}
