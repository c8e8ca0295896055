//! Fuzz target for wire request decoding
//!
//! Feeds arbitrary bytes through JSON parsing and then through the base64 and
//! length validation every request passes before it reaches the driver.
//!
//! # Invariants
//!
//! - Malformed JSON, base64 or key material returns an error
//! - A decoded envelope always has a 12-byte nonce and a curve point
//! - NEVER panic

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealpost_crypto::PUBLIC_KEY_LEN;
use sealpost_proto::{
    EnvelopeBytes, Event, FileUploadRequest, GroupWire, RegisterKeysRequest, SendMessageRequest,
};

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = serde_json::from_slice::<SendMessageRequest>(data) {
        if let Ok(envelope) = EnvelopeBytes::from_wire(&request.envelope) {
            assert_eq!(envelope.ephemeral_public_key.len(), PUBLIC_KEY_LEN);
            assert_eq!(EnvelopeBytes::from_wire(&envelope.to_wire()).ok(), Some(envelope));
        }
    }

    if let Ok(request) = serde_json::from_slice::<FileUploadRequest>(data) {
        let _ = request.decode();
    }

    if let Ok(request) = serde_json::from_slice::<RegisterKeysRequest>(data) {
        for pre_key in &request.pre_keys {
            let _ = pre_key.decode();
        }
    }

    if let Ok(group) = serde_json::from_slice::<GroupWire>(data) {
        let _ = sealpost_core::GroupKeyState::from_wire(&group);
    }

    let _ = serde_json::from_slice::<Event>(data);
});
