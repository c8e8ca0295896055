//! Base64 octet-string helpers.

use base64::{Engine, engine::general_purpose::STANDARD};
use sealpost_crypto::PublicKey;

use crate::error::ProtocolError;

/// Encode bytes for the wire.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 field.
///
/// # Errors
///
/// - `InvalidBase64`: `value` is not standard base64
pub fn decode(field: &'static str, value: &str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD.decode(value).map_err(|_| ProtocolError::InvalidBase64 { field })
}

/// Decode a base64 field of fixed length.
///
/// # Errors
///
/// - `InvalidBase64`: `value` is not standard base64
/// - `InvalidLength`: decoded length differs from `N`
pub fn decode_array<const N: usize>(
    field: &'static str,
    value: &str,
) -> Result<[u8; N], ProtocolError> {
    let bytes = decode(field, value)?;
    let got = bytes.len();
    bytes.try_into().map_err(|_| ProtocolError::InvalidLength { field, expected: N, got })
}

/// Decode a base64 SEC1 public key and check that it lies on the curve.
///
/// # Errors
///
/// - `InvalidBase64`: `value` is not standard base64
/// - `InvalidPublicKey`: decoded bytes are not a P-256 point
pub fn decode_public_key(field: &'static str, value: &str) -> Result<PublicKey, ProtocolError> {
    let bytes = decode(field, value)?;
    PublicKey::from_bytes(&bytes).map_err(|_| ProtocolError::InvalidPublicKey { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reports_field() {
        assert_eq!(decode("nonce", "***"), Err(ProtocolError::InvalidBase64 { field: "nonce" }));
    }

    #[test]
    fn fixed_length_is_enforced() {
        let short = encode(&[1, 2, 3]);
        assert_eq!(
            decode_array::<12>("nonce", &short),
            Err(ProtocolError::InvalidLength { field: "nonce", expected: 12, got: 3 })
        );

        let exact = encode(&[9u8; 12]);
        assert_eq!(decode_array::<12>("nonce", &exact), Ok([9u8; 12]));
    }

    #[test]
    fn public_key_must_be_on_curve() {
        let zeros = encode(&[0u8; 65]);
        assert_eq!(
            decode_public_key("ephemeralPublicKey", &zeros),
            Err(ProtocolError::InvalidPublicKey { field: "ephemeralPublicKey" })
        );
    }
}
