//! Storage errors.

use sealpost_proto::UserId;
use thiserror::Error;

/// Errors from a [`Storage`](super::Storage) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend I/O or transaction failure
    #[error("storage I/O error: {0}")]
    Io(String),

    /// A stored record could not be encoded or decoded
    #[error("storage serialization error: {0}")]
    Serialization(String),

    /// A prekey id is already taken for this user
    #[error("prekey {key_id} already exists for user {user_id}")]
    Conflict {
        /// Owner
        user_id: UserId,
        /// Duplicate id
        key_id: u64,
    },
}
