//! Pairwise envelopes: ephemeral ECDH + HKDF-SHA256 + AES-256-GCM.
//!
//! [`seal`] generates a fresh ephemeral key pair per call and discards it
//! before returning. [`open`] recomputes the same shared secret from the
//! recipient's identity secret and the envelope's ephemeral public key.

use hkdf::Hkdf;
use p256::ecdh::{EphemeralSecret, diffie_hellman};
use rand_core::CryptoRngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    keys::{PublicKey, SecretKey},
    symmetric::{KEY_SIZE, NONCE_SIZE, aes_open, aes_seal},
};

/// HKDF info string. Constant across every client so both ends derive the
/// same key.
pub const ENVELOPE_KDF_INFO: &[u8] = b"SecureChat-AES-v1";

/// The unit produced by [`seal`].
///
/// Meaningless without the recipient identity it targets: only that
/// identity's secret key can open it. All three fields must be persisted
/// together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// AES-GCM ciphertext including the 16-byte tag
    pub ciphertext: Vec<u8>,
    /// Random 96-bit AES-GCM nonce
    pub nonce: [u8; NONCE_SIZE],
    /// Public half of the one-time key generated for this envelope
    pub ephemeral_public_key: PublicKey,
}

/// Encrypt `plaintext` so that only the holder of `recipient`'s secret key can
/// read it.
///
/// # Security
///
/// - Exactly one ephemeral key pair per call; its secret is dropped (and
///   zeroized) before this function returns
/// - The raw ECDH output and the derived AES key are zeroized on drop
/// - Caller MUST pass a cryptographically secure RNG in production
pub fn seal<R: CryptoRngCore>(
    recipient: &PublicKey,
    plaintext: &[u8],
    rng: &mut R,
) -> EncryptedEnvelope {
    let ephemeral = EphemeralSecret::random(rng);
    let ephemeral_public_key = PublicKey(ephemeral.public_key());

    let key = {
        let shared = ephemeral.diffie_hellman(&recipient.0);
        derive_envelope_key(shared.raw_secret_bytes())
    };
    drop(ephemeral);

    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);

    let ciphertext = aes_seal(&key, &nonce, plaintext);

    EncryptedEnvelope { ciphertext, nonce, ephemeral_public_key }
}

/// Decrypt an envelope with the recipient's own secret key.
///
/// # Errors
///
/// - `DecryptionFailed`: the envelope was not addressed to `own_secret`, or
///   ciphertext/nonce/ephemeral key were altered. Never returns partial
///   plaintext.
pub fn open(envelope: &EncryptedEnvelope, own_secret: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    let shared = diffie_hellman(
        own_secret.0.to_nonzero_scalar(),
        envelope.ephemeral_public_key.0.as_affine(),
    );
    let key = derive_envelope_key(shared.raw_secret_bytes());

    aes_open(&key, &envelope.nonce, &envelope.ciphertext)
}

/// HKDF-SHA256 with an empty salt and [`ENVELOPE_KDF_INFO`].
///
/// An absent salt and a zero-length salt yield the same PRK (HMAC pads the
/// key with zeros either way).
fn derive_envelope_key(shared_secret: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
    let salt: &[u8] = &[];
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared_secret);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    let Ok(()) = hkdf.expand(ENVELOPE_KDF_INFO, &mut key[..]) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    key
}

#[cfg(test)]
mod tests {
    use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};

    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn seal_open_roundtrip() {
        let mut rng = ChaCha20Rng::seed_from_u64(20);
        let bob = KeyPair::generate(&mut rng);

        let envelope = seal(&bob.public, b"hi", &mut rng);
        assert_eq!(open(&envelope, &bob.secret).unwrap(), b"hi");
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let mut rng = ChaCha20Rng::seed_from_u64(21);
        let bob = KeyPair::generate(&mut rng);

        let envelope = seal(&bob.public, b"", &mut rng);
        assert_eq!(open(&envelope, &bob.secret).unwrap(), b"");
    }

    #[test]
    fn ephemeral_key_is_not_the_recipient_key() {
        let mut rng = ChaCha20Rng::seed_from_u64(22);
        let bob = KeyPair::generate(&mut rng);

        let envelope = seal(&bob.public, b"hi", &mut rng);
        assert_ne!(envelope.ephemeral_public_key, bob.public);
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let mut rng = ChaCha20Rng::seed_from_u64(23);
        let bob = KeyPair::generate(&mut rng);
        let eve = KeyPair::generate(&mut rng);

        let envelope = seal(&bob.public, b"for bob only", &mut rng);
        assert!(matches!(open(&envelope, &eve.secret), Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn swapped_ephemeral_key_fails() {
        let mut rng = ChaCha20Rng::seed_from_u64(24);
        let bob = KeyPair::generate(&mut rng);
        let stranger = KeyPair::generate(&mut rng);

        let mut envelope = seal(&bob.public, b"hi", &mut rng);
        envelope.ephemeral_public_key = stranger.public;
        assert!(open(&envelope, &bob.secret).is_err());
    }

    #[test]
    fn key_derivation_is_deterministic() {
        let first = derive_envelope_key(&[7u8; 32]);
        let second = derive_envelope_key(&[7u8; 32]);
        let other = derive_envelope_key(&[8u8; 32]);

        assert_eq!(*first, *second);
        assert_ne!(*first, *other);
    }

    #[test]
    fn envelope_opens_after_secret_export() {
        let mut rng = ChaCha20Rng::seed_from_u64(25);
        let bob = KeyPair::generate(&mut rng);
        let envelope = seal(&bob.public, b"synced device", &mut rng);

        let der = bob.secret.to_pkcs8_der().unwrap();
        let restored = SecretKey::from_pkcs8_der(&der).unwrap();

        assert_eq!(open(&envelope, &restored).unwrap(), b"synced device");
    }
}
