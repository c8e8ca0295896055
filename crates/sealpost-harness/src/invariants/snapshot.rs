//! Observable state snapshots for invariant checking.

use std::collections::BTreeMap;

use sealpost_core::Message;
use sealpost_crypto::KEY_SIZE;
use sealpost_proto::{GroupId, MessageId, UserId};

/// Snapshot of the simulated system.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// One-time prekey ids handed out per owner, in fetch order.
    pub handed_out_pre_keys: BTreeMap<UserId, Vec<u64>>,
    /// Every stored 1:1 message involving a snapshotted client.
    pub messages: Vec<Message>,
    /// Group key state as the members see it.
    pub groups: Vec<GroupSnapshot>,
    /// Ids of `new_message` pushes received per user.
    pub pushed_messages: BTreeMap<UserId, Vec<MessageId>>,
}

/// One group's key state from its members' side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSnapshot {
    /// Group id.
    pub group_id: GroupId,
    /// Version members should hold.
    pub key_version: u32,
    /// Raw key each member with a wrapped record opened. `None` if the record
    /// did not open.
    pub opened_keys: BTreeMap<UserId, Option<[u8; KEY_SIZE]>>,
}
