//! Server error types.

use sealpost_core::CoreError;
use sealpost_proto::ProtocolError;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors returned by [`ServerDriver`](crate::ServerDriver) operations.
///
/// Caller-facing variants carry no ciphertext, key material or plaintext.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// The addressed record does not exist, or is no longer visible
    #[error("{resource} not found")]
    NotFound {
        /// Kind of record
        resource: &'static str,
    },

    /// The caller may not perform this operation
    #[error("forbidden: {reason}")]
    Forbidden {
        /// Which rule refused it
        reason: &'static str,
    },

    /// The request is well-formed JSON but semantically invalid
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What is wrong with it
        reason: String,
    },

    /// A binary field failed to decode
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A protocol rule was violated
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage backend failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServerError {
    /// Whether the caller can fix the request. Everything else is a server
    /// fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest { reason: reason.into() }
    }
}
