//! Group key distribution.
//!
//! A group shares one 256-bit AES key. Each member holds its own copy wrapped
//! in a pairwise envelope for its identity key ([`WrappedKey::Wrapped`]), or a
//! [`WrappedKey::Pending`] placeholder until someone distributes it.
//!
//! # State machine
//!
//! ```text
//! create ──► v1 ──add──► v1 (same key, new records)
//!             │
//!             ├─rotate──► v2 (new key, every record re-wrapped)
//!             │
//!             ├─repair──► v1 (same key, every record re-wrapped)
//!             │
//!             └─remove──► v1 (KeepKey) or v2 (RotateKey)
//! ```
//!
//! # Invariants
//!
//! - Every `Wrapped` record opens to the same raw key, which is the key of
//!   version `key_version`
//! - Rotation and member addition build every new record before touching the
//!   state; a failure leaves the state unchanged
//! - Group messages are encrypted with the sender's held version and carry it,
//!   so a receiver at another version gets `StaleGroupKey`, never garbage

use std::collections::{BTreeMap, BTreeSet};

use sealpost_crypto::{PublicKey, SealedPayload, SymmetricKey, decrypt, encrypt, seal};
use sealpost_proto::{
    EnvelopeBytes, GroupId, GroupMemberKeyWire, GroupMemberWire, GroupMessageRequest,
    GroupMessageWire, GroupWire, MessageType, ProtocolError, Role, Timestamp, UpdateGroupRequest,
    UserId, b64,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{env::Environment, error::CoreError, keystore::KeyStore, pairwise};

/// A member's copy of the group key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrappedKey {
    /// Not distributed yet; the member cannot send or read
    Pending,
    /// Envelope for the member's identity key
    Wrapped(EnvelopeBytes),
}

impl WrappedKey {
    /// Decode the wire record; blank and `"pending"` fields become `Pending`.
    ///
    /// # Errors
    ///
    /// - Any `ProtocolError` from a malformed non-placeholder field
    pub fn from_wire(wire: &GroupMemberKeyWire) -> Result<Self, ProtocolError> {
        Ok(wire.decode()?.map_or(Self::Pending, Self::Wrapped))
    }

    /// Wire record for `user_id`.
    pub fn to_wire(&self, user_id: UserId) -> GroupMemberKeyWire {
        match self {
            Self::Pending => GroupMemberKeyWire::pending(user_id),
            Self::Wrapped(envelope) => GroupMemberKeyWire::wrapped(user_id, envelope),
        }
    }

    /// Whether this is a placeholder.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// One member of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupKeyRecord {
    /// Member
    pub user_id: UserId,
    /// Role
    pub role: Role,
    /// Member's copy of the group key
    pub wrapped_key: WrappedKey,
    /// Join time
    pub joined_at: Timestamp,
}

/// Resolves members' identity public keys.
pub trait KeyDirectory {
    /// Identity key of `user_id`.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyMaterial` if the user has no usable published key
    fn identity_key(&self, user_id: UserId) -> Result<PublicKey, CoreError>;
}

impl KeyDirectory for BTreeMap<UserId, PublicKey> {
    fn identity_key(&self, user_id: UserId) -> Result<PublicKey, CoreError> {
        self.get(&user_id).cloned().ok_or_else(|| CoreError::InvalidKeyMaterial {
            reason: format!("no identity key published for user {user_id}"),
        })
    }
}

/// A raw group key together with its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKey {
    /// Version this key belongs to
    pub version: u32,
    /// Raw AES-256 key
    pub key: SymmetricKey,
}

/// What to do with the group key when a member is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalPolicy {
    /// Rotate and re-wrap for the remaining members
    #[default]
    RotateKey,
    /// Keep the key; the removed member may still hold a cached copy
    KeepKey,
}

/// Outcome of [`GroupKeyState::repair`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Members whose record was re-wrapped
    pub rewrapped: Vec<UserId>,
    /// Of those, members that were `Pending` before
    pub resolved_pending: Vec<UserId>,
    /// Members left untouched because their key could not be resolved;
    /// re-run repair once they are
    pub failed: Vec<(UserId, CoreError)>,
}

impl RepairReport {
    /// Every member now holds the current key.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Membership and key records of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupKeyState {
    group_id: GroupId,
    creator_id: UserId,
    records: BTreeMap<UserId, GroupKeyRecord>,
    key_version: u32,
    last_key_rotation: Timestamp,
}

impl GroupKeyState {
    /// Server-side creation: the creator is an admin, every member starts
    /// `Pending`, version 1.
    pub fn new_pending(
        group_id: GroupId,
        creator_id: UserId,
        member_ids: &[UserId],
        now: Timestamp,
    ) -> Self {
        let mut state = Self {
            group_id,
            creator_id,
            records: BTreeMap::new(),
            key_version: 1,
            last_key_rotation: now,
        };

        state.insert_pending(creator_id, Role::Admin, now);
        for member in member_ids {
            state.insert_pending(*member, Role::Member, now);
        }
        state
    }

    /// Client-side creation: generate a fresh group key and wrap it for the
    /// creator and every member.
    ///
    /// # Errors
    ///
    /// - `UnsupportedEnvironment`: no secure entropy
    /// - `InvalidKeyMaterial`: a member's identity key is unknown
    pub fn create<E: Environment, D: KeyDirectory>(
        env: &E,
        directory: &D,
        group_id: GroupId,
        creator_id: UserId,
        member_ids: &[UserId],
    ) -> Result<(Self, GroupKey), CoreError> {
        let now = env.now();
        let mut state = Self::new_pending(group_id, creator_id, member_ids, now);
        let key = GroupKey { version: 1, key: SymmetricKey::generate(&mut env.crypto_rng()?) };

        let members: Vec<UserId> = state.records.keys().copied().collect();
        for (user_id, wrapped) in wrap_for(env, directory, &key, &members)? {
            state.set_wrapped(user_id, wrapped);
        }

        tracing::info!(group = %group_id, members = members.len(), "created group key");
        Ok((state, key))
    }

    /// Group id.
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Creator.
    pub fn creator_id(&self) -> UserId {
        self.creator_id
    }

    /// Current key version.
    pub fn key_version(&self) -> u32 {
        self.key_version
    }

    /// Time of the latest rotation.
    pub fn last_key_rotation(&self) -> Timestamp {
        self.last_key_rotation
    }

    /// Member record.
    pub fn record(&self, user_id: UserId) -> Option<&GroupKeyRecord> {
        self.records.get(&user_id)
    }

    /// All records in user id order.
    pub fn records(&self) -> impl Iterator<Item = &GroupKeyRecord> {
        self.records.values()
    }

    /// Whether `user_id` is a member.
    pub fn is_member(&self, user_id: UserId) -> bool {
        self.records.contains_key(&user_id)
    }

    /// Whether `user_id` may administer the group.
    pub fn is_admin(&self, user_id: UserId) -> bool {
        user_id == self.creator_id
            || self.records.get(&user_id).is_some_and(|r| r.role == Role::Admin)
    }

    /// Member ids in order.
    pub fn member_ids(&self) -> Vec<UserId> {
        self.records.keys().copied().collect()
    }

    /// Members still holding a placeholder.
    pub fn pending_members(&self) -> Vec<UserId> {
        self.records.values().filter(|r| r.wrapped_key.is_pending()).map(|r| r.user_id).collect()
    }

    /// Wrap the existing key for `new_members`. Existing records are not
    /// touched and members already present are skipped.
    ///
    /// # Errors
    ///
    /// - `StaleGroupKey`: `key` is not the current version
    /// - `UnsupportedEnvironment` / `InvalidKeyMaterial`: nothing is added
    pub fn add_members<E: Environment, D: KeyDirectory>(
        &mut self,
        env: &E,
        directory: &D,
        key: &GroupKey,
        new_members: &[UserId],
    ) -> Result<(), CoreError> {
        self.require_current(key)?;

        let fresh: Vec<UserId> =
            new_members.iter().copied().filter(|user| !self.is_member(*user)).collect();
        let wrapped = wrap_for(env, directory, key, &fresh)?;

        let now = env.now();
        for (user_id, wrapped_key) in wrapped {
            self.records.insert(user_id, GroupKeyRecord {
                user_id,
                role: Role::Member,
                wrapped_key,
                joined_at: now,
            });
        }

        tracing::debug!(group = %self.group_id, added = fresh.len(), "added group members");
        Ok(())
    }

    /// Remove `user_id`. Under [`RemovalPolicy::RotateKey`] the key is rotated
    /// for the remaining members and the new key returned.
    ///
    /// # Errors
    ///
    /// - `NotAMember`: `user_id` has no record
    /// - Rotation errors; the member is then not removed
    pub fn remove_member<E: Environment, D: KeyDirectory>(
        &mut self,
        env: &E,
        directory: &D,
        user_id: UserId,
        policy: RemovalPolicy,
    ) -> Result<Option<GroupKey>, CoreError> {
        if !self.is_member(user_id) {
            return Err(CoreError::NotAMember { group_id: self.group_id, user_id });
        }

        match policy {
            RemovalPolicy::KeepKey => {
                self.records.remove(&user_id);
                tracing::warn!(
                    group = %self.group_id,
                    removed = %user_id,
                    "member removed without key rotation"
                );
                Ok(None)
            },
            RemovalPolicy::RotateKey => {
                let mut next = self.clone();
                next.records.remove(&user_id);
                let key = next.rotate(env, directory)?;
                *self = next;
                Ok(Some(key))
            },
        }
    }

    /// Generate a new key, wrap it for every current member and bump the
    /// version. All-or-nothing.
    ///
    /// # Errors
    ///
    /// - `UnsupportedEnvironment` / `InvalidKeyMaterial`: state unchanged
    pub fn rotate<E: Environment, D: KeyDirectory>(
        &mut self,
        env: &E,
        directory: &D,
    ) -> Result<GroupKey, CoreError> {
        let version = self.key_version.checked_add(1).ok_or_else(|| {
            CoreError::InvalidKeyMaterial { reason: "group key version overflow".to_string() }
        })?;
        let key = GroupKey { version, key: SymmetricKey::generate(&mut env.crypto_rng()?) };

        let members = self.member_ids();
        let wrapped = wrap_for(env, directory, &key, &members)?;

        for (user_id, wrapped_key) in wrapped {
            if let Some(record) = self.records.get_mut(&user_id) {
                record.wrapped_key = wrapped_key;
            }
        }
        self.key_version = version;
        self.last_key_rotation = env.now();

        tracing::info!(group = %self.group_id, version, members = members.len(), "rotated group key");
        Ok(key)
    }

    /// Re-wrap the current key for every member without rotating.
    ///
    /// Members whose identity key cannot be resolved keep their record and are
    /// listed in [`RepairReport::failed`]; running repair again is safe.
    ///
    /// # Errors
    ///
    /// - `StaleGroupKey`: `key` is not the current version
    /// - `UnsupportedEnvironment`: no secure entropy
    pub fn repair<E: Environment, D: KeyDirectory>(
        &mut self,
        env: &E,
        directory: &D,
        key: &GroupKey,
    ) -> Result<RepairReport, CoreError> {
        self.require_current(key)?;

        let mut rng = env.crypto_rng()?;
        let mut report = RepairReport::default();

        for record in self.records.values_mut() {
            let public = match directory.identity_key(record.user_id) {
                Ok(public) => public,
                Err(err) => {
                    tracing::warn!(group = %self.group_id, member = %record.user_id, %err, "repair skipped member");
                    report.failed.push((record.user_id, err));
                    continue;
                },
            };

            if record.wrapped_key.is_pending() {
                report.resolved_pending.push(record.user_id);
            }
            let envelope = seal(&public, key.key.as_bytes(), &mut rng);
            record.wrapped_key = WrappedKey::Wrapped(EnvelopeBytes::from_envelope(&envelope));
            report.rewrapped.push(record.user_id);
        }

        tracing::info!(
            group = %self.group_id,
            rewrapped = report.rewrapped.len(),
            failed = report.failed.len(),
            "repaired group key records"
        );
        Ok(report)
    }

    /// Open the caller's copy of the group key.
    ///
    /// # Errors
    ///
    /// - `NotAMember`: the store's owner has no record
    /// - `GroupKeyNotReady`: the record is a placeholder
    /// - `MissingKeyMaterial`: the identity secret is not on this device
    /// - `Decrypt`: the record does not open
    pub fn unwrap_key(&self, store: &KeyStore) -> Result<GroupKey, CoreError> {
        let user_id = store.owner();
        let record = self
            .records
            .get(&user_id)
            .ok_or(CoreError::NotAMember { group_id: self.group_id, user_id })?;

        let WrappedKey::Wrapped(envelope) = &record.wrapped_key else {
            return Err(CoreError::GroupKeyNotReady { group_id: self.group_id, user_id });
        };

        let raw = Zeroizing::new(pairwise::decrypt_message(store, envelope)?);
        let key = SymmetricKey::from_bytes(&raw).map_err(|_| CoreError::Decrypt {
            reason: format!("unwrapped group key has length {}", raw.len()),
        })?;

        Ok(GroupKey { version: self.key_version, key })
    }

    /// Add `user_id` with a placeholder record. No-op for existing members.
    pub fn insert_pending(&mut self, user_id: UserId, role: Role, now: Timestamp) -> bool {
        if self.records.contains_key(&user_id) {
            return false;
        }
        self.records.insert(user_id, GroupKeyRecord {
            user_id,
            role,
            wrapped_key: WrappedKey::Pending,
            joined_at: now,
        });
        true
    }

    /// Drop `user_id`'s record without touching the key.
    pub fn remove(&mut self, user_id: UserId) -> bool {
        self.records.remove(&user_id).is_some()
    }

    /// Store a wrapped key for an existing member.
    pub fn set_wrapped(&mut self, user_id: UserId, wrapped_key: WrappedKey) -> bool {
        match self.records.get_mut(&user_id) {
            Some(record) => {
                record.wrapped_key = wrapped_key;
                true
            },
            None => false,
        }
    }

    /// Record a rotation performed by a client: bump the version and reset
    /// every member not in `supplied` to `Pending`, since their record was
    /// wrapped under the previous key.
    pub fn bump_version(&mut self, now: Timestamp, supplied: &BTreeSet<UserId>) {
        self.key_version = self.key_version.saturating_add(1);
        self.last_key_rotation = now;

        let mut reset = 0usize;
        for record in self.records.values_mut() {
            if !supplied.contains(&record.user_id) && !record.wrapped_key.is_pending() {
                record.wrapped_key = WrappedKey::Pending;
                reset += 1;
            }
        }

        if reset > 0 {
            tracing::warn!(group = %self.group_id, reset, "rotation left members pending");
        }
    }

    /// Rebuild from a fetched group.
    ///
    /// # Errors
    ///
    /// - Any `ProtocolError` from a malformed member record
    pub fn from_wire(group: &GroupWire) -> Result<Self, ProtocolError> {
        let mut records = BTreeMap::new();
        for member in &group.members {
            records.insert(member.key.user_id, GroupKeyRecord {
                user_id: member.key.user_id,
                role: member.role,
                wrapped_key: WrappedKey::from_wire(&member.key)?,
                joined_at: member.joined_at,
            });
        }

        Ok(Self {
            group_id: group.id,
            creator_id: group.creator_id,
            records,
            key_version: group.group_key_version,
            last_key_rotation: group.last_key_rotation,
        })
    }

    /// Member records for a [`GroupWire`].
    pub fn member_wires(&self) -> Vec<GroupMemberWire> {
        self.records
            .values()
            .map(|r| GroupMemberWire {
                key: r.wrapped_key.to_wire(r.user_id),
                role: r.role,
                joined_at: r.joined_at,
            })
            .collect()
    }

    /// Update publishing every wrapped record held locally.
    pub fn key_update(&self, rotate_key: bool) -> UpdateGroupRequest {
        UpdateGroupRequest {
            rotate_key,
            key_version: self.key_version,
            members: self
                .records
                .values()
                .filter(|r| !r.wrapped_key.is_pending())
                .map(|r| r.wrapped_key.to_wire(r.user_id))
                .collect(),
            ..UpdateGroupRequest::default()
        }
    }

    fn require_current(&self, key: &GroupKey) -> Result<(), CoreError> {
        if key.version == self.key_version {
            Ok(())
        } else {
            Err(CoreError::StaleGroupKey { held: key.version, required: self.key_version })
        }
    }
}

/// Wrap `key` for each of `members`. Fails as a whole if any member's
/// identity key is unknown.
fn wrap_for<E: Environment, D: KeyDirectory>(
    env: &E,
    directory: &D,
    key: &GroupKey,
    members: &[UserId],
) -> Result<Vec<(UserId, WrappedKey)>, CoreError> {
    let mut rng = env.crypto_rng()?;

    members
        .iter()
        .map(|user_id| -> Result<(UserId, WrappedKey), CoreError> {
            let public = directory.identity_key(*user_id)?;
            let envelope = seal(&public, key.key.as_bytes(), &mut rng);
            Ok((*user_id, WrappedKey::Wrapped(EnvelopeBytes::from_envelope(&envelope))))
        })
        .collect()
}

/// Encrypt a group message under the sender's held key.
///
/// # Errors
///
/// - `UnsupportedEnvironment`: no secure entropy
pub fn encrypt_group_message<E: Environment>(
    env: &E,
    key: &GroupKey,
    plaintext: &[u8],
    message_type: MessageType,
) -> Result<GroupMessageRequest, CoreError> {
    let payload = encrypt(&key.key, plaintext, &mut env.crypto_rng()?);

    Ok(GroupMessageRequest {
        key_version: key.version,
        ciphertext: b64::encode(&payload.ciphertext),
        nonce: b64::encode(&payload.nonce),
        message_type,
    })
}

/// Decrypt a group message.
///
/// # Errors
///
/// - `StaleGroupKey`: the message was sent under another version; refresh
/// - `Decrypt`: malformed fields or failed authentication
pub fn decrypt_group_message(
    key: &GroupKey,
    message: &GroupMessageWire,
) -> Result<Vec<u8>, CoreError> {
    if message.key_version != key.version {
        return Err(CoreError::StaleGroupKey { held: key.version, required: message.key_version });
    }

    let payload = SealedPayload {
        nonce: b64::decode_array("nonce", &message.nonce)?,
        ciphertext: b64::decode("ciphertext", &message.ciphertext)?,
    };
    Ok(decrypt(&key.key, &payload)?)
}
