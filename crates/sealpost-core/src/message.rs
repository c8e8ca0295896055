//! Persisted message records.
//!
//! Records keep ciphertext, nonce and ephemeral key together as
//! [`EnvelopeBytes`]; lifecycle flags live in [`Lifecycle`].

use std::collections::BTreeMap;

use sealpost_crypto::NONCE_SIZE;
use sealpost_proto::{
    EnvelopeBytes, GroupId, GroupMessageRequest, GroupMessageWire, MessageId, MessageType,
    MessageWire, ProtocolError, ReadReceiptWire, Timestamp, UserId, b64,
};
use serde::{Deserialize, Serialize};

use crate::lifecycle::{Lifecycle, TransitionError};

/// A 1:1 message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Id, allocated in send order
    pub id: MessageId,
    /// Author
    pub sender_id: UserId,
    /// Addressee; the envelope targets this identity
    pub recipient_id: UserId,
    /// Current envelope
    pub content: EnvelopeBytes,
    /// Envelope before the first edit; never overwritten afterwards
    pub original_content: Option<EnvelopeBytes>,
    /// Payload kind
    pub message_type: MessageType,
    /// Send time
    pub timestamp: Timestamp,
    /// Visibility and mutability
    pub lifecycle: Lifecycle,
}

impl Message {
    /// Replace the envelope. The pre-edit envelope is kept on the first edit
    /// only.
    pub fn edit(&mut self, content: EnvelopeBytes, now: Timestamp) -> Result<(), TransitionError> {
        self.lifecycle.mark_edited(now)?;

        let previous = std::mem::replace(&mut self.content, content);
        if self.original_content.is_none() {
            self.original_content = Some(previous);
        }
        Ok(())
    }

    /// Whether `user_id` is the sender or the recipient.
    pub fn involves(&self, user_id: UserId) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }

    /// The other party, if `user_id` is one of them.
    pub fn counterpart(&self, user_id: UserId) -> Option<UserId> {
        if user_id == self.sender_id {
            Some(self.recipient_id)
        } else if user_id == self.recipient_id {
            Some(self.sender_id)
        } else {
            None
        }
    }

    /// Between `a` and `b` in either direction.
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.recipient_id == b)
            || (self.sender_id == b && self.recipient_id == a)
    }

    /// Wire view.
    pub fn to_wire(&self) -> MessageWire {
        let lc = &self.lifecycle;
        MessageWire {
            id: self.id,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            envelope: self.content.to_wire(),
            message_type: self.message_type,
            timestamp: self.timestamp,
            delivered: lc.delivered,
            read: lc.read,
            read_at: lc.read_at,
            edited: lc.edited,
            edited_at: lc.edited_at,
            pinned: lc.pinned,
            pinned_at: lc.pinned_at,
            self_destruct_at: lc.self_destruct_at,
            scheduled_for: lc.scheduled_for,
            is_scheduled: lc.is_scheduled,
        }
    }
}

/// A group message. Encrypted directly under the group key of `key_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    /// Id
    pub id: MessageId,
    /// Group
    pub group_id: GroupId,
    /// Author
    pub sender_id: UserId,
    /// Group key version used
    pub key_version: u32,
    /// AES-GCM ciphertext including tag
    pub ciphertext: Vec<u8>,
    /// AES-GCM nonce
    pub nonce: [u8; NONCE_SIZE],
    /// Payload kind
    pub message_type: MessageType,
    /// Send time
    pub timestamp: Timestamp,
    /// Soft-deleted
    pub deleted: bool,
    /// First fetch time per member
    pub read_by: BTreeMap<UserId, Timestamp>,
}

impl GroupMessage {
    /// Validate and record a posted group message.
    ///
    /// # Errors
    ///
    /// - `InvalidBase64` / `InvalidLength` for malformed fields
    pub fn from_request(
        id: MessageId,
        group_id: GroupId,
        sender_id: UserId,
        request: &GroupMessageRequest,
        now: Timestamp,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            id,
            group_id,
            sender_id,
            key_version: request.key_version,
            ciphertext: b64::decode("ciphertext", &request.ciphertext)?,
            nonce: b64::decode_array("nonce", &request.nonce)?,
            message_type: request.message_type,
            timestamp: now,
            deleted: false,
            read_by: BTreeMap::new(),
        })
    }

    /// Record `user_id`'s first fetch. Returns whether it was new.
    pub fn mark_read_by(&mut self, user_id: UserId, now: Timestamp) -> bool {
        if self.read_by.contains_key(&user_id) {
            return false;
        }
        self.read_by.insert(user_id, now);
        true
    }

    /// Wire view.
    pub fn to_wire(&self) -> GroupMessageWire {
        GroupMessageWire {
            id: self.id,
            group_id: self.group_id,
            sender_id: self.sender_id,
            key_version: self.key_version,
            ciphertext: b64::encode(&self.ciphertext),
            nonce: b64::encode(&self.nonce),
            message_type: self.message_type,
            timestamp: self.timestamp,
            read_by: self
                .read_by
                .iter()
                .map(|(user_id, read_at)| ReadReceiptWire { user_id: *user_id, read_at: *read_at })
                .collect(),
        }
    }
}
