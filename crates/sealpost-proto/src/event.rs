//! Real-time push events.
//!
//! Serialized as `{"type": "<snake_case name>", "data": {...}}`. The server
//! decides who receives each event; this type only fixes its shape.

use serde::{Deserialize, Serialize};

use crate::{
    envelope::WireEnvelope,
    file::FileNotice,
    group::{GroupMessageWire, GroupWire},
    ids::{GroupId, MessageId, Timestamp, UserId},
    message::MessageWire,
};

/// A push event delivered to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    /// A 1:1 message became visible to its recipient
    NewMessage(MessageWire),
    /// The sender replaced a message's envelope
    MessageEdited {
        /// Edited message
        message_id: MessageId,
        /// Replacement envelope
        #[serde(flatten)]
        envelope: WireEnvelope,
        /// Edit time
        edited_at: Timestamp,
    },
    /// A message was soft-deleted by the other party
    MessageDeleted {
        /// Deleted message
        message_id: MessageId,
    },
    /// A message was pinned or unpinned by the other party
    MessagePinned {
        /// Affected message
        message_id: MessageId,
        /// New pin state
        pinned: bool,
    },
    /// The recipient read a message
    MessageRead {
        /// Read message
        message_id: MessageId,
        /// Read time
        read_at: Timestamp,
    },
    /// The other party started or stopped typing
    UserTyping {
        /// Typist
        user_id: UserId,
        /// Current state
        is_typing: bool,
    },
    /// An encrypted file was uploaded for the recipient
    NewFile(FileNotice),
    /// The recipient was made a member of a new group
    GroupCreated(GroupWire),
    /// Membership, metadata or keys of a group changed
    GroupUpdated(GroupWire),
    /// The recipient left, or the group was deleted
    GroupLeft {
        /// Group that is gone for this user
        group_id: GroupId,
    },
    /// A group message was posted
    NewGroupMessage(GroupMessageWire),
}

impl Event {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::MessagePinned { .. } => "message_pinned",
            Self::MessageRead { .. } => "message_read",
            Self::UserTyping { .. } => "user_typing",
            Self::NewFile(_) => "new_file",
            Self::GroupCreated(_) => "group_created",
            Self::GroupUpdated(_) => "group_updated",
            Self::GroupLeft { .. } => "group_left",
            Self::NewGroupMessage(_) => "new_group_message",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_name() {
        let event = Event::MessagePinned { message_id: MessageId(4), pinned: true };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], event.name());
        assert_eq!(json["data"]["messageId"], 4);
        assert_eq!(json["data"]["pinned"], true);
    }

    #[test]
    fn typing_event_roundtrips() {
        let event = Event::UserTyping { user_id: UserId(9), is_typing: false };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""isTyping":false"#));
        assert_eq!(serde_json::from_str::<Event>(&json).unwrap(), event);
    }

    #[test]
    fn edited_event_flattens_envelope() {
        let event = Event::MessageEdited {
            message_id: MessageId(1),
            envelope: WireEnvelope {
                ciphertext: "c".into(),
                nonce: "n".into(),
                ephemeral_public_key: "e".into(),
            },
            edited_at: Timestamp::from_millis(5),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["ephemeralPublicKey"], "e");
        assert_eq!(json["data"]["editedAt"], 5);
    }
}
