//! Error types for wire decoding.

use thiserror::Error;

/// A wire value could not be translated into typed bytes.
///
/// Variants name the JSON field so the transport can report which input was
/// rejected without echoing its content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Field is not valid standard base64
    #[error("field {field} is not valid base64")]
    InvalidBase64 {
        /// JSON field name
        field: &'static str,
    },

    /// Decoded field has the wrong length
    #[error("field {field} has length {got}, expected {expected}")]
    InvalidLength {
        /// JSON field name
        field: &'static str,
        /// Required length in bytes
        expected: usize,
        /// Decoded length in bytes
        got: usize,
    },

    /// Decoded field is not a P-256 point
    #[error("field {field} is not a valid public key")]
    InvalidPublicKey {
        /// JSON field name
        field: &'static str,
    },
}
