//! Protocol invariant checks.

use std::collections::{BTreeMap, BTreeSet};

use sealpost_crypto::PUBLIC_KEY_LEN;

use super::{Invariant, InvariantResult, SystemSnapshot};

/// AES-GCM authentication tag length; every ciphertext is at least this long.
const TAG_LEN: usize = 16;

/// A one-time prekey is handed out at most once.
///
/// Across every fetch of one owner's bundle, no key id repeats. A repeat means
/// two senders share first-contact key material.
pub struct PreKeysHandedOutOnce;

impl Invariant for PreKeysHandedOutOnce {
    fn name(&self) -> &'static str {
        "PreKeysHandedOutOnce"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (owner, ids) in &state.handed_out_pre_keys {
            let mut seen = BTreeSet::new();
            for id in ids {
                if !seen.insert(id) {
                    return Err(self.violation(format!("user {owner}: prekey {id} handed out twice")));
                }
            }
        }
        Ok(())
    }
}

/// Every stored envelope carries a curve point and an authenticated
/// ciphertext.
pub struct EnvelopesComplete;

impl Invariant for EnvelopesComplete {
    fn name(&self) -> &'static str {
        "EnvelopesComplete"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for message in &state.messages {
            let envelopes = std::iter::once(&message.content).chain(&message.original_content);
            for envelope in envelopes {
                if envelope.ephemeral_public_key.len() != PUBLIC_KEY_LEN {
                    return Err(self.violation(format!(
                        "message {}: ephemeral key has {} bytes",
                        message.id,
                        envelope.ephemeral_public_key.len()
                    )));
                }
                if envelope.ciphertext.len() < TAG_LEN {
                    return Err(self.violation(format!(
                        "message {}: ciphertext shorter than the tag",
                        message.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Edited messages keep their pre-edit envelope and an edit time; unedited
/// ones have neither.
pub struct EditAuditTrail;

impl Invariant for EditAuditTrail {
    fn name(&self) -> &'static str {
        "EditAuditTrail"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for message in &state.messages {
            let lc = &message.lifecycle;
            let trail = message.original_content.is_some() && lc.edited_at.is_some();
            if lc.edited != trail {
                return Err(self.violation(format!(
                    "message {}: edited={} but original kept={} edited_at={:?}",
                    message.id,
                    lc.edited,
                    message.original_content.is_some(),
                    lc.edited_at
                )));
            }
        }
        Ok(())
    }
}

/// Every member whose record is wrapped opens it, and all of them open the
/// same raw key.
pub struct GroupKeyAgreement;

impl Invariant for GroupKeyAgreement {
    fn name(&self) -> &'static str {
        "GroupKeyAgreement"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for group in &state.groups {
            let mut first: Option<(_, &[u8; 32])> = None;
            for (member, key) in &group.opened_keys {
                let Some(key) = key else {
                    return Err(self.violation(format!(
                        "group {} v{}: member {member} cannot open its record",
                        group.group_id, group.key_version
                    )));
                };
                match first {
                    None => first = Some((member, key)),
                    Some((other, expected)) if expected != key => {
                        return Err(self.violation(format!(
                            "group {} v{}: members {other} and {member} hold different keys",
                            group.group_id, group.key_version
                        )));
                    },
                    Some(_) => {},
                }
            }
        }
        Ok(())
    }
}

/// No `new_message` push reaches anyone for a message still waiting for its
/// scheduled delivery, and no message is pushed to the same user twice.
pub struct ScheduledStaysHidden;

impl Invariant for ScheduledStaysHidden {
    fn name(&self) -> &'static str {
        "ScheduledStaysHidden"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let scheduled: BTreeSet<_> =
            state.messages.iter().filter(|m| m.lifecycle.is_scheduled).map(|m| m.id).collect();

        for (user, ids) in &state.pushed_messages {
            let mut counts = BTreeMap::new();
            for id in ids {
                if scheduled.contains(id) {
                    return Err(self.violation(format!(
                        "user {user}: message {id} pushed before its release"
                    )));
                }
                *counts.entry(id).or_insert(0usize) += 1;
            }
            if let Some((id, n)) = counts.into_iter().find(|(_, n)| *n > 1) {
                return Err(self.violation(format!("user {user}: message {id} pushed {n} times")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sealpost_core::{Lifecycle, Message};
    use sealpost_proto::{EnvelopeBytes, GroupId, MessageId, MessageType, Timestamp, UserId};

    use super::*;
    use crate::invariants::GroupSnapshot;

    fn message(id: u64) -> Message {
        Message {
            id: MessageId(id),
            sender_id: UserId(1),
            recipient_id: UserId(2),
            content: EnvelopeBytes {
                ciphertext: vec![0; 20],
                nonce: [0; 12],
                ephemeral_public_key: vec![4; PUBLIC_KEY_LEN],
            },
            original_content: None,
            message_type: MessageType::Text,
            timestamp: Timestamp::EPOCH,
            lifecycle: Lifecycle::default(),
        }
    }

    #[test]
    fn repeated_pre_key_is_flagged() {
        let mut state = SystemSnapshot::default();
        state.handed_out_pre_keys.insert(UserId(1), vec![1, 2, 1]);
        assert_eq!(PreKeysHandedOutOnce.check(&state).unwrap_err().invariant, "PreKeysHandedOutOnce");

        state.handed_out_pre_keys.insert(UserId(1), vec![1, 2, 3]);
        assert!(PreKeysHandedOutOnce.check(&state).is_ok());
    }

    #[test]
    fn edit_without_original_is_flagged() {
        let mut edited = message(1);
        edited.lifecycle.edited = true;
        edited.lifecycle.edited_at = Some(Timestamp::from_millis(5));
        let state = SystemSnapshot { messages: vec![edited], ..SystemSnapshot::default() };

        assert!(EditAuditTrail.check(&state).is_err());
        assert!(EnvelopesComplete.check(&state).is_ok());
    }

    #[test]
    fn truncated_envelope_is_flagged() {
        let mut short = message(1);
        short.content.ephemeral_public_key.truncate(33);
        let state = SystemSnapshot { messages: vec![short], ..SystemSnapshot::default() };
        assert!(EnvelopesComplete.check(&state).is_err());
    }

    #[test]
    fn diverging_group_keys_are_flagged() {
        let group = GroupSnapshot {
            group_id: GroupId(1),
            key_version: 2,
            opened_keys: [(UserId(1), Some([1; 32])), (UserId(2), Some([2; 32]))].into(),
        };
        let state = SystemSnapshot { groups: vec![group], ..SystemSnapshot::default() };
        assert!(GroupKeyAgreement.check(&state).is_err());
    }

    #[test]
    fn push_of_scheduled_message_is_flagged() {
        let mut pending = message(7);
        pending.lifecycle.is_scheduled = true;
        let mut state = SystemSnapshot { messages: vec![pending], ..SystemSnapshot::default() };
        state.pushed_messages.insert(UserId(2), vec![MessageId(7)]);
        assert!(ScheduledStaysHidden.check(&state).is_err());

        state.messages[0].lifecycle.is_scheduled = false;
        assert!(ScheduledStaysHidden.check(&state).is_ok());

        state.pushed_messages.insert(UserId(2), vec![MessageId(7), MessageId(7)]);
        assert!(ScheduledStaysHidden.check(&state).is_err());
    }
}
