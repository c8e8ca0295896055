//! Sealpost wire types.
//!
//! Every binary field crosses the wire as a standard-alphabet base64 string
//! inside a camelCase JSON body. This crate owns the translation between those
//! strings and typed bytes: malformed base64, wrong nonce lengths and points
//! that are not on the curve are rejected here with a [`ProtocolError`] naming
//! the offending field, so nothing downstream ever sees raw decoder errors.
//!
//! # Layout
//!
//! - [`ids`]: typed identifiers and millisecond timestamps
//! - [`envelope`]: pairwise envelopes, wire form and byte form
//! - [`keys`]: published key bundles and user settings
//! - [`message`]: 1:1 message requests and views
//! - [`group`]: group records, requests and group messages
//! - [`file`]: two-layer encrypted file transfer
//! - [`event`]: real-time push events

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod b64;
pub mod envelope;
pub mod error;
pub mod event;
pub mod file;
pub mod group;
pub mod ids;
pub mod keys;
pub mod message;

pub use envelope::{EnvelopeBytes, WireEnvelope};
pub use error::ProtocolError;
pub use event::Event;
pub use file::{FileBytes, FileNotice, FileUploadRequest, FileWire};
pub use group::{
    CreateGroupRequest, GroupMemberKeyWire, GroupMemberWire, GroupMessageRequest, GroupMessageWire,
    GroupWire, ReadReceiptWire, Role, UpdateGroupRequest,
};
pub use ids::{FileId, GroupId, MessageId, Timestamp, UserId};
pub use keys::{
    IdentityKeysResponse, PreKeyWire, RegisterKeysRequest, ReplenishPreKeysRequest,
    SignedPreKeyWire, UserSettings,
};
pub use message::{EditMessageRequest, MessageType, MessageWire, SendMessageRequest};
