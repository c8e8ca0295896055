//! Group records, requests and group messages.
//!
//! Each member's copy of the group key is a pairwise envelope serialized as
//! `{userId, encryptedGroupKey, ephemeralPublicKey, keyNonce}`. A member whose
//! key has not been distributed yet carries the `"pending"` placeholder (or,
//! for members added by an update, empty strings); [`GroupMemberKeyWire::decode`]
//! turns both into `None` so no caller ever tries to open a placeholder.

use serde::{Deserialize, Serialize};

use crate::{
    envelope::EnvelopeBytes,
    error::ProtocolError,
    ids::{GroupId, MessageId, Timestamp, UserId},
    message::MessageType,
};

/// Placeholder stored for a member whose key is not yet wrapped.
pub const PENDING: &str = "pending";

/// Member role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May update membership and keys
    Admin,
    /// Regular member
    #[default]
    Member,
}

/// One member's wrapped copy of the group key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberKeyWire {
    /// Member the envelope targets
    pub user_id: UserId,
    /// Envelope ciphertext of the raw group key
    pub encrypted_group_key: String,
    /// Envelope ephemeral public key
    pub ephemeral_public_key: String,
    /// Envelope nonce
    pub key_nonce: String,
}

impl GroupMemberKeyWire {
    /// Placeholder record for `user_id`.
    pub fn pending(user_id: UserId) -> Self {
        Self {
            user_id,
            encrypted_group_key: PENDING.to_string(),
            ephemeral_public_key: PENDING.to_string(),
            key_nonce: PENDING.to_string(),
        }
    }

    /// Wire form of a wrapped key.
    pub fn wrapped(user_id: UserId, envelope: &EnvelopeBytes) -> Self {
        let wire = envelope.to_wire();
        Self {
            user_id,
            encrypted_group_key: wire.ciphertext,
            ephemeral_public_key: wire.ephemeral_public_key,
            key_nonce: wire.nonce,
        }
    }

    /// Whether any field still holds a placeholder.
    pub fn is_pending(&self) -> bool {
        [&self.encrypted_group_key, &self.ephemeral_public_key, &self.key_nonce]
            .iter()
            .any(|field| field.is_empty() || field.as_str() == PENDING)
    }

    /// Decode the wrapped key; `None` for a placeholder.
    ///
    /// # Errors
    ///
    /// - `InvalidBase64` / `InvalidLength` / `InvalidPublicKey` when a
    ///   non-placeholder field is malformed
    pub fn decode(&self) -> Result<Option<EnvelopeBytes>, ProtocolError> {
        if self.is_pending() {
            return Ok(None);
        }

        EnvelopeBytes::from_fields(
            ("encryptedGroupKey", &self.encrypted_group_key),
            ("keyNonce", &self.key_nonce),
            ("ephemeralPublicKey", &self.ephemeral_public_key),
        )
        .map(Some)
    }
}

/// A group member as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberWire {
    /// Wrapped key (or placeholder)
    #[serde(flatten)]
    pub key: GroupMemberKeyWire,
    /// Role in the group
    pub role: Role,
    /// When the member joined
    pub joined_at: Timestamp,
}

/// A group as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupWire {
    /// Group id
    pub id: GroupId,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Creator; always an admin, may not leave
    pub creator_id: UserId,
    /// Current members
    pub members: Vec<GroupMemberWire>,
    /// Version of the group key members should hold
    pub group_key_version: u32,
    /// Time of the latest rotation (creation counts)
    pub last_key_rotation: Timestamp,
    /// Creation time
    pub created_at: Timestamp,
    /// Time of the latest update
    pub updated_at: Timestamp,
}

/// `POST /groups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Initial members; the creator is added if absent
    pub member_ids: Vec<UserId>,
}

/// `PATCH /groups/{id}`.
///
/// Applied in order: metadata, additions, removals, rotation, then `members`
/// key updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupRequest {
    /// New display name
    #[serde(default)]
    pub name: Option<String>,
    /// New description
    #[serde(default)]
    pub description: Option<String>,
    /// Members to add with a placeholder key
    #[serde(default)]
    pub add_members: Vec<UserId>,
    /// Members to remove
    #[serde(default)]
    pub remove_members: Vec<UserId>,
    /// Bump the key version
    #[serde(default)]
    pub rotate_key: bool,
    /// Key version `members` are wrapped under, after any rotation; must
    /// match the group's version whenever `members` is non-empty
    #[serde(default)]
    pub key_version: u32,
    /// Wrapped keys to store for existing members
    #[serde(default)]
    pub members: Vec<GroupMemberKeyWire>,
}

/// `POST /groups/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessageRequest {
    /// Group key version the sender encrypted under
    pub key_version: u32,
    /// Base64 AES-GCM ciphertext
    pub ciphertext: String,
    /// Base64 12-byte nonce
    pub nonce: String,
    /// Payload kind
    #[serde(default)]
    pub message_type: MessageType,
}

/// A member's read receipt on a group message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptWire {
    /// Reader
    pub user_id: UserId,
    /// First fetch time
    pub read_at: Timestamp,
}

/// A group message as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessageWire {
    /// Message id
    pub id: MessageId,
    /// Group
    pub group_id: GroupId,
    /// Author
    pub sender_id: UserId,
    /// Key version used to encrypt
    pub key_version: u32,
    /// Base64 ciphertext
    pub ciphertext: String,
    /// Base64 nonce
    pub nonce: String,
    /// Payload kind
    pub message_type: MessageType,
    /// Creation time
    pub timestamp: Timestamp,
    /// Members that fetched it
    pub read_by: Vec<ReadReceiptWire>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_decode_to_none() {
        let pending = GroupMemberKeyWire::pending(UserId(1));
        assert!(pending.is_pending());
        assert_eq!(pending.decode(), Ok(None));

        let blank = GroupMemberKeyWire {
            user_id: UserId(2),
            encrypted_group_key: String::new(),
            ephemeral_public_key: String::new(),
            key_nonce: String::new(),
        };
        assert_eq!(blank.decode(), Ok(None));
    }

    #[test]
    fn malformed_member_key_names_its_field() {
        let record = GroupMemberKeyWire {
            user_id: UserId(3),
            encrypted_group_key: "AAAA".into(),
            ephemeral_public_key: "AAAA".into(),
            key_nonce: "AAAA".into(),
        };
        assert_eq!(
            record.decode(),
            Err(ProtocolError::InvalidLength { field: "keyNonce", expected: 12, got: 3 })
        );
    }

    #[test]
    fn update_request_fields_default() {
        let update: UpdateGroupRequest = serde_json::from_str(r#"{"rotateKey":true}"#).unwrap();
        assert!(update.rotate_key);
        assert_eq!(update.key_version, 0);
        assert!(update.add_members.is_empty());
        assert!(update.members.is_empty());
    }
}
