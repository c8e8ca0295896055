//! Storage abstraction for the Sealpost relay.
//!
//! Trait-based abstraction for persisting identities, prekeys, messages,
//! groups and files. The trait is synchronous (no async): the driver is
//! Sans-IO and the runtime serializes access to it.
//!
//! Everything persisted is ciphertext or public metadata. No secret key
//! material ever reaches this layer.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
use sealpost_core::{GroupKeyState, GroupMessage, Message};
use sealpost_proto::{
    FileBytes, FileId, FileNotice, GroupId, GroupWire, MessageId, Timestamp, UserId, UserSettings,
};
use serde::{Deserialize, Serialize};

pub use self::redb::RedbStorage;

/// A registered identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIdentity {
    /// Owner
    pub user_id: UserId,
    /// SEC1 identity public key
    pub identity_public_key: Vec<u8>,
    /// Medium-term prekey, returned on every fetch
    pub signed_pre_key: Option<StoredSignedPreKey>,
    /// Privacy settings
    pub settings: UserSettings,
    /// First registration time
    pub registered_at: Timestamp,
}

/// Signed prekey as published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSignedPreKey {
    /// Key identifier
    pub key_id: u64,
    /// SEC1 public key
    pub public_key: Vec<u8>,
    /// Signature by the identity key, if supplied
    pub signature: Option<Vec<u8>>,
}

/// One-time prekey as published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPreKey {
    /// Unique within the owner's prekey set
    pub key_id: u64,
    /// SEC1 public key
    pub public_key: Vec<u8>,
    /// Handed out by a key fetch
    pub used: bool,
}

/// A group and its key bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredGroup {
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Membership, roles and wrapped keys
    pub state: GroupKeyState,
    /// Creation time
    pub created_at: Timestamp,
    /// Last metadata or membership change
    pub updated_at: Timestamp,
}

impl StoredGroup {
    /// Group id.
    pub fn id(&self) -> GroupId {
        self.state.group_id()
    }

    /// Wire view.
    pub fn to_wire(&self) -> GroupWire {
        GroupWire {
            id: self.state.group_id(),
            name: self.name.clone(),
            description: self.description.clone(),
            creator_id: self.state.creator_id(),
            members: self.state.member_wires(),
            group_key_version: self.state.key_version(),
            last_key_rotation: self.state.last_key_rotation(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// An encrypted file and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Metadata pushed to the recipient
    pub notice: FileNotice,
    /// Encrypted body and wrapped file key
    pub bytes: FileBytes,
}

/// Monotonic id sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    /// 1:1 messages
    Message,
    /// Group messages
    GroupMessage,
    /// Groups
    Group,
    /// Files
    File,
}

impl Sequence {
    /// Stable name used as the persisted counter key.
    pub fn name(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::GroupMessage => "group_message",
            Self::Group => "group",
            Self::File => "file",
        }
    }
}

/// Storage abstraction for the relay.
///
/// Must be Clone (shared between the driver and the sweep tasks), Send + Sync
/// (thread-safe), and synchronous (no async methods). Implementations share
/// internal state via Arc, so clones access the same underlying storage.
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned (a thread panicked while holding a lock).
pub trait Storage: Clone + Send + Sync + 'static {
    /// Next id of `sequence`.
    ///
    /// # Invariants
    ///
    /// - Post: strictly greater than every id previously returned for
    ///   `sequence`, across restarts for durable implementations
    /// - Post: ids start at 1
    fn next_id(&self, sequence: Sequence) -> Result<u64, StorageError>;

    /// Store or replace an identity.
    fn store_identity(&self, identity: &StoredIdentity) -> Result<(), StorageError>;

    /// Load an identity. `None` if the user never registered.
    fn load_identity(&self, user_id: UserId) -> Result<Option<StoredIdentity>, StorageError>;

    /// Add one-time prekeys for `user_id`.
    ///
    /// # Invariants
    ///
    /// - Pre: no `key_id` in `pre_keys` is already stored for `user_id`, used
    ///   or not, and `pre_keys` has no duplicates
    /// - Post: all of `pre_keys` are stored, or none is (`Conflict`)
    fn add_pre_keys(&self, user_id: UserId, pre_keys: &[StoredPreKey])
    -> Result<(), StorageError>;

    /// Store or replace `identity` and add its one-time prekeys in one step.
    ///
    /// # Invariants
    ///
    /// - Pre: as for [`add_pre_keys`](Self::add_pre_keys)
    /// - Post: the identity and every prekey are stored, or nothing is
    fn register(
        &self,
        identity: &StoredIdentity,
        pre_keys: &[StoredPreKey],
    ) -> Result<(), StorageError>;

    /// Hand out one unused prekey of `user_id` and mark it used.
    ///
    /// # Invariants
    ///
    /// - Post: find and mark happen atomically; concurrent callers never
    ///   receive the same prekey
    /// - Post: the lowest unused `key_id` is chosen
    /// - Post: `None` when every prekey is used
    fn take_pre_key(&self, user_id: UserId) -> Result<Option<StoredPreKey>, StorageError>;

    /// Number of unused prekeys of `user_id`.
    fn count_unused_pre_keys(&self, user_id: UserId) -> Result<usize, StorageError>;

    /// Insert or replace a 1:1 message.
    fn store_message(&self, message: &Message) -> Result<(), StorageError>;

    /// Load a 1:1 message.
    fn load_message(&self, id: MessageId) -> Result<Option<Message>, StorageError>;

    /// Every 1:1 message `user_id` sent or received, in id order.
    fn messages_involving(&self, user_id: UserId) -> Result<Vec<Message>, StorageError>;

    /// Messages still waiting for release (`is_scheduled`), in id order.
    fn scheduled_messages(&self) -> Result<Vec<Message>, StorageError>;

    /// Messages with a self-destruct instant that are not yet deleted, in id
    /// order.
    fn destructible_messages(&self) -> Result<Vec<Message>, StorageError>;

    /// Insert or replace a group.
    fn store_group(&self, group: &StoredGroup) -> Result<(), StorageError>;

    /// Load a group.
    fn load_group(&self, id: GroupId) -> Result<Option<StoredGroup>, StorageError>;

    /// Every stored group, in id order.
    fn list_groups(&self) -> Result<Vec<StoredGroup>, StorageError>;

    /// Delete a group and all of its messages. Returns whether it existed.
    fn delete_group(&self, id: GroupId) -> Result<bool, StorageError>;

    /// Insert or replace a group message.
    fn store_group_message(&self, message: &GroupMessage) -> Result<(), StorageError>;

    /// Messages of a group, in id order.
    fn group_messages(&self, group_id: GroupId) -> Result<Vec<GroupMessage>, StorageError>;

    /// Store a file. Files are immutable once stored.
    fn store_file(&self, file: &StoredFile) -> Result<(), StorageError>;

    /// Load a file.
    fn load_file(&self, id: FileId) -> Result<Option<StoredFile>, StorageError>;
}
