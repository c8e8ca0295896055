//! Fuzz target for envelope opening
//!
//! Seals a payload for a fresh key pair, applies an arbitrary mutation and
//! opens the result.
//!
//! # Invariants
//!
//! - An unmodified envelope opens to the original plaintext
//! - Any modified ciphertext, nonce or ephemeral key fails authentication
//! - NEVER panic, never return a wrong plaintext

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};
use sealpost_crypto::{KeyPair, PublicKey, open, seal};

#[derive(Debug, Clone, Arbitrary)]
enum Mutation {
    None,
    FlipCiphertextBit { index: usize, bit: u8 },
    FlipNonceBit { index: usize, bit: u8 },
    TruncateCiphertext { len: usize },
    ReplaceEphemeral { seed: u64 },
    WrongRecipient { seed: u64 },
}

#[derive(Debug, Clone, Arbitrary)]
struct Input {
    seed: u64,
    plaintext: Vec<u8>,
    mutation: Mutation,
}

fuzz_target!(|input: Input| {
    let mut rng = ChaCha20Rng::seed_from_u64(input.seed);
    let recipient = KeyPair::generate(&mut rng);
    let mut envelope = seal(&recipient.public, &input.plaintext, &mut rng);
    let mut secret = &recipient.secret;
    let other;

    let untouched = match input.mutation {
        Mutation::None => true,
        Mutation::FlipCiphertextBit { index, bit } => {
            let index = index % envelope.ciphertext.len();
            envelope.ciphertext[index] ^= 1 << (bit % 8);
            false
        },
        Mutation::FlipNonceBit { index, bit } => {
            let index = index % envelope.nonce.len();
            envelope.nonce[index] ^= 1 << (bit % 8);
            false
        },
        Mutation::TruncateCiphertext { len } => {
            let len = len % envelope.ciphertext.len();
            envelope.ciphertext.truncate(len);
            false
        },
        Mutation::ReplaceEphemeral { seed } => {
            let replacement: PublicKey =
                KeyPair::generate(&mut ChaCha20Rng::seed_from_u64(seed)).public;
            let same = replacement == envelope.ephemeral_public_key;
            envelope.ephemeral_public_key = replacement;
            same
        },
        Mutation::WrongRecipient { seed } => {
            other = KeyPair::generate(&mut ChaCha20Rng::seed_from_u64(seed));
            let same = other.public == recipient.public;
            secret = &other.secret;
            same
        },
    };

    match open(&envelope, secret) {
        Ok(plaintext) => {
            assert!(untouched, "modified envelope opened");
            assert_eq!(plaintext, input.plaintext);
        },
        Err(_) => assert!(!untouched, "unmodified envelope failed to open"),
    }
});
