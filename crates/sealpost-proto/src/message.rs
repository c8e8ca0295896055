//! 1:1 message requests and views.

use serde::{Deserialize, Serialize};

use crate::{
    envelope::WireEnvelope,
    ids::{MessageId, Timestamp, UserId},
};

/// What the encrypted payload contains. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Text
    #[default]
    Text,
    /// Voice note
    Voice,
    /// File reference
    File,
    /// Image
    Image,
}

/// `POST /messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Recipient identity the envelope targets
    pub recipient_id: UserId,
    /// Pairwise envelope for the recipient
    #[serde(flatten)]
    pub envelope: WireEnvelope,
    /// Payload kind
    #[serde(default)]
    pub message_type: MessageType,
    /// Deliver no earlier than this instant
    #[serde(default)]
    pub scheduled_for: Option<Timestamp>,
    /// Remove from every read path at this instant
    #[serde(default)]
    pub self_destruct_at: Option<Timestamp>,
}

/// `PATCH /messages/{id}/edit`.
///
/// An edit replaces the whole envelope: the new ciphertext was sealed under a
/// new ephemeral key and nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageRequest {
    /// Replacement envelope
    #[serde(flatten)]
    pub envelope: WireEnvelope,
}

/// A message as returned to its sender or recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageWire {
    /// Message id
    pub id: MessageId,
    /// Author
    pub sender_id: UserId,
    /// Addressee
    pub recipient_id: UserId,
    /// Current envelope
    #[serde(flatten)]
    pub envelope: WireEnvelope,
    /// Payload kind
    pub message_type: MessageType,
    /// Creation time
    pub timestamp: Timestamp,
    /// Recipient has fetched it
    pub delivered: bool,
    /// Recipient has marked it read
    pub read: bool,
    /// When it was marked read
    pub read_at: Option<Timestamp>,
    /// Content was replaced at least once
    pub edited: bool,
    /// Time of the latest edit
    pub edited_at: Option<Timestamp>,
    /// Pinned by either party
    pub pinned: bool,
    /// Time it was pinned
    pub pinned_at: Option<Timestamp>,
    /// Self-destruct instant
    pub self_destruct_at: Option<Timestamp>,
    /// Scheduled delivery instant
    pub scheduled_for: Option<Timestamp>,
    /// Still waiting for its scheduled delivery
    pub is_scheduled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_parses_flattened_envelope() {
        let json = r#"{
            "recipientId": 2,
            "ciphertext": "AAAA",
            "nonce": "AAAAAAAAAAAAAAAA",
            "ephemeralPublicKey": "BA==",
            "scheduledFor": 60000
        }"#;
        let request: SendMessageRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.recipient_id, UserId(2));
        assert_eq!(request.envelope.ciphertext, "AAAA");
        assert_eq!(request.message_type, MessageType::Text);
        assert_eq!(request.scheduled_for, Some(Timestamp::from_millis(60_000)));
        assert_eq!(request.self_destruct_at, None);
    }

    #[test]
    fn message_type_is_lowercase() {
        assert_eq!(serde_json::to_string(&MessageType::Voice).unwrap(), r#""voice""#);
    }
}
