//! Fuzz target for persisted record decoding
//!
//! The redb backend stores CBOR records. A corrupted database file must
//! surface as a decoding error, never as a crash.
//!
//! # Invariants
//!
//! - Arbitrary bytes decode to a record or return an error
//! - Deeply nested or huge-length CBOR is rejected without exhausting memory
//! - NEVER panic

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealpost_core::{GroupKeyState, GroupMessage, KeyStore, Message};

fuzz_target!(|data: &[u8]| {
    let _ = ciborium::from_reader::<Message, _>(data);
    let _ = ciborium::from_reader::<GroupMessage, _>(data);
    let _ = ciborium::from_reader::<GroupKeyState, _>(data);

    // Key store import validates every key it reads
    let _ = KeyStore::import(data);
});
