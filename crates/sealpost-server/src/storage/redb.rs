//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! All state survives server restarts. Redb serializes write transactions, so
//! a read-modify-write inside one write transaction is atomic with respect to
//! every other writer.

use std::{collections::BTreeSet, path::Path, sync::Arc};

use redb::{Database, ReadableTable, Table, TableDefinition};
use sealpost_core::{GroupMessage, Message};
use sealpost_proto::{FileId, GroupId, MessageId, UserId};
use serde::{Serialize, de::DeserializeOwned};

use super::{
    Sequence, Storage, StorageError, StoredFile, StoredGroup, StoredIdentity, StoredPreKey,
};

/// Byte-keyed table holding CBOR values.
type BytesTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

/// Table: counters
/// Key: sequence name
/// Value: last id handed out
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Table: identities
/// Key: user_id as big-endian bytes [8 bytes]
/// Value: CBOR-encoded StoredIdentity
const IDENTITIES: BytesTable = TableDefinition::new("identities");

/// Table: pre_keys
/// Key: (user_id: u64, key_id: u64) as big-endian bytes [16 bytes]
/// Value: CBOR-encoded StoredPreKey
const PRE_KEYS: BytesTable = TableDefinition::new("pre_keys");

/// Table: messages
/// Key: message_id as big-endian bytes [8 bytes]
/// Value: CBOR-encoded Message
const MESSAGES: BytesTable = TableDefinition::new("messages");

/// Table: groups
/// Key: group_id as big-endian bytes [8 bytes]
/// Value: CBOR-encoded StoredGroup
const GROUPS: BytesTable = TableDefinition::new("groups");

/// Table: group_messages
/// Key: (group_id: u64, message_id: u64) as big-endian bytes [16 bytes]
/// Value: CBOR-encoded GroupMessage
const GROUP_MESSAGES: BytesTable = TableDefinition::new("group_messages");

/// Table: files
/// Key: file_id as big-endian bytes [8 bytes]
/// Value: CBOR-encoded StoredFile
const FILES: BytesTable = TableDefinition::new("files");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates every table if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(COUNTERS).map_err(|e| StorageError::Io(e.to_string()))?;
            for table in [IDENTITIES, PRE_KEYS, MESSAGES, GROUPS, GROUP_MESSAGES, FILES] {
                let _ = txn.open_table(table).map_err(|e| StorageError::Io(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn put<T: Serialize>(
        &self,
        table: BytesTable,
        key: &[u8],
        value: &T,
    ) -> Result<(), StorageError> {
        let bytes = encode(value)?;

        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(table).map_err(|e| StorageError::Io(e.to_string()))?;
            table.insert(key, bytes.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        table: BytesTable,
        key: &[u8],
    ) -> Result<Option<T>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(table).map_err(|e| StorageError::Io(e.to_string()))?;

        match table.get(key).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Decode every value of `table` accepted by `keep`, in key order.
    fn scan<T: DeserializeOwned>(
        &self,
        table: BytesTable,
        keep: impl Fn(&T) -> bool,
    ) -> Result<Vec<T>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(table).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut values = Vec::new();
        for result in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (_, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let value: T = decode(value.value())?;
            if keep(&value) {
                values.push(value);
            }
        }

        Ok(values)
    }
}

impl Storage for RedbStorage {
    fn next_id(&self, sequence: Sequence) -> Result<u64, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let next = {
            let mut table =
                txn.open_table(COUNTERS).map_err(|e| StorageError::Io(e.to_string()))?;

            let last = table
                .get(sequence.name())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .map_or(0, |v| v.value());
            let next = last + 1;

            table.insert(sequence.name(), next).map_err(|e| StorageError::Io(e.to_string()))?;
            next
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(next)
    }

    fn store_identity(&self, identity: &StoredIdentity) -> Result<(), StorageError> {
        self.put(IDENTITIES, &encode_id(identity.user_id.get()), identity)
    }

    fn load_identity(&self, user_id: UserId) -> Result<Option<StoredIdentity>, StorageError> {
        self.get(IDENTITIES, &encode_id(user_id.get()))
    }

    fn add_pre_keys(
        &self,
        user_id: UserId,
        pre_keys: &[StoredPreKey],
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table =
                txn.open_table(PRE_KEYS).map_err(|e| StorageError::Io(e.to_string()))?;
            // Dropping the transaction on error aborts it
            insert_pre_keys(&mut table, user_id, pre_keys)?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn register(
        &self,
        identity: &StoredIdentity,
        pre_keys: &[StoredPreKey],
    ) -> Result<(), StorageError> {
        let bytes = encode(identity)?;
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table =
                txn.open_table(PRE_KEYS).map_err(|e| StorageError::Io(e.to_string()))?;
            insert_pre_keys(&mut table, identity.user_id, pre_keys)?;

            let mut identities =
                txn.open_table(IDENTITIES).map_err(|e| StorageError::Io(e.to_string()))?;
            identities
                .insert(encode_id(identity.user_id.get()).as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn take_pre_key(&self, user_id: UserId) -> Result<Option<StoredPreKey>, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let taken = {
            let mut table =
                txn.open_table(PRE_KEYS).map_err(|e| StorageError::Io(e.to_string()))?;

            let start = encode_pair(user_id.get(), 0);
            let end = encode_pair(user_id.get(), u64::MAX);

            let mut found = None;
            for result in table
                .range(start.as_slice()..=end.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                let (_, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
                let pre_key: StoredPreKey = decode(value.value())?;
                if !pre_key.used {
                    found = Some(pre_key);
                    break;
                }
            }

            if let Some(pre_key) = &mut found {
                pre_key.used = true;
                let key = encode_pair(user_id.get(), pre_key.key_id);
                let bytes = encode(&*pre_key)?;
                table
                    .insert(key.as_slice(), bytes.as_slice())
                    .map_err(|e| StorageError::Io(e.to_string()))?;
            }
            found
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(taken)
    }

    fn count_unused_pre_keys(&self, user_id: UserId) -> Result<usize, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(PRE_KEYS).map_err(|e| StorageError::Io(e.to_string()))?;

        let start = encode_pair(user_id.get(), 0);
        let end = encode_pair(user_id.get(), u64::MAX);

        let mut unused = 0;
        for result in table
            .range(start.as_slice()..=end.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            let (_, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let pre_key: StoredPreKey = decode(value.value())?;
            if !pre_key.used {
                unused += 1;
            }
        }

        Ok(unused)
    }

    fn store_message(&self, message: &Message) -> Result<(), StorageError> {
        self.put(MESSAGES, &encode_id(message.id.get()), message)
    }

    fn load_message(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        self.get(MESSAGES, &encode_id(id.get()))
    }

    fn messages_involving(&self, user_id: UserId) -> Result<Vec<Message>, StorageError> {
        self.scan(MESSAGES, |m: &Message| m.involves(user_id))
    }

    fn scheduled_messages(&self) -> Result<Vec<Message>, StorageError> {
        self.scan(MESSAGES, |m: &Message| m.lifecycle.is_scheduled)
    }

    fn destructible_messages(&self) -> Result<Vec<Message>, StorageError> {
        self.scan(MESSAGES, |m: &Message| {
            m.lifecycle.self_destruct_at.is_some() && !m.lifecycle.deleted
        })
    }

    fn store_group(&self, group: &StoredGroup) -> Result<(), StorageError> {
        self.put(GROUPS, &encode_id(group.id().get()), group)
    }

    fn load_group(&self, id: GroupId) -> Result<Option<StoredGroup>, StorageError> {
        self.get(GROUPS, &encode_id(id.get()))
    }

    fn list_groups(&self) -> Result<Vec<StoredGroup>, StorageError> {
        self.scan(GROUPS, |_: &StoredGroup| true)
    }

    fn delete_group(&self, id: GroupId) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let existed = {
            let mut groups = txn.open_table(GROUPS).map_err(|e| StorageError::Io(e.to_string()))?;
            let existed = groups
                .remove(encode_id(id.get()).as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .is_some();

            let mut messages =
                txn.open_table(GROUP_MESSAGES).map_err(|e| StorageError::Io(e.to_string()))?;
            let start = encode_pair(id.get(), 0);
            let end = encode_pair(id.get(), u64::MAX);

            let mut keys = Vec::new();
            for result in messages
                .range(start.as_slice()..=end.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                let (key, _) = result.map_err(|e| StorageError::Io(e.to_string()))?;
                keys.push(key.value().to_vec());
            }
            for key in keys {
                messages.remove(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
            }

            existed
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(existed)
    }

    fn store_group_message(&self, message: &GroupMessage) -> Result<(), StorageError> {
        self.put(GROUP_MESSAGES, &encode_pair(message.group_id.get(), message.id.get()), message)
    }

    fn group_messages(&self, group_id: GroupId) -> Result<Vec<GroupMessage>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(GROUP_MESSAGES).map_err(|e| StorageError::Io(e.to_string()))?;

        let start = encode_pair(group_id.get(), 0);
        let end = encode_pair(group_id.get(), u64::MAX);

        let mut messages = Vec::new();
        for result in table
            .range(start.as_slice()..=end.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            let (_, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            messages.push(decode(value.value())?);
        }

        Ok(messages)
    }

    fn store_file(&self, file: &StoredFile) -> Result<(), StorageError> {
        self.put(FILES, &encode_id(file.notice.id.get()), file)
    }

    fn load_file(&self, id: FileId) -> Result<Option<StoredFile>, StorageError> {
        self.get(FILES, &encode_id(id.get()))
    }
}

/// Insert a prekey batch into an open table, all or nothing.
///
/// Returns `Conflict` before writing anything if an id is already stored or
/// repeats within the batch.
fn insert_pre_keys(
    table: &mut Table<'_, &'static [u8], &'static [u8]>,
    user_id: UserId,
    pre_keys: &[StoredPreKey],
) -> Result<(), StorageError> {
    let mut incoming = BTreeSet::new();
    for pre_key in pre_keys {
        let key = encode_pair(user_id.get(), pre_key.key_id);
        let exists =
            table.get(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?.is_some();

        if exists || !incoming.insert(pre_key.key_id) {
            return Err(StorageError::Conflict { user_id, key_id: pre_key.key_id });
        }
    }

    for pre_key in pre_keys {
        let key = encode_pair(user_id.get(), pre_key.key_id);
        let bytes = encode(pre_key)?;
        table.insert(key.as_slice(), bytes.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
    }

    Ok(())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Encode an id as 8-byte big-endian key.
fn encode_id(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Encode (owner, id) as 16-byte big-endian key.
///
/// Layout: [owner: 8 bytes BE][id: 8 bytes BE]
/// This ensures lexicographic ordering matches numeric ordering, so one
/// owner's records form a contiguous range.
fn encode_pair(owner: u64, id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&owner.to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, thread};

    use sealpost_core::Lifecycle;
    use sealpost_crypto::NONCE_SIZE;
    use sealpost_proto::{EnvelopeBytes, MessageType, Timestamp, UserSettings};
    use tempfile::tempdir;

    use super::*;

    fn message(id: u64, self_destruct_at: Option<Timestamp>) -> Message {
        Message {
            id: MessageId(id),
            sender_id: UserId(1),
            recipient_id: UserId(2),
            content: EnvelopeBytes {
                ciphertext: vec![1; 24],
                nonce: [2; NONCE_SIZE],
                ephemeral_public_key: vec![4; 65],
            },
            original_content: None,
            message_type: MessageType::Text,
            timestamp: Timestamp::from_millis(0),
            lifecycle: Lifecycle::new(Timestamp::from_millis(0), None, self_destruct_at),
        }
    }

    fn pre_keys(ids: &[u64]) -> Vec<StoredPreKey> {
        ids.iter().map(|id| StoredPreKey { key_id: *id, public_key: vec![4; 65], used: false }).collect()
    }

    #[test]
    fn pair_keys_sort_by_owner_then_id() {
        assert!(encode_pair(1, u64::MAX) < encode_pair(2, 0));
        assert!(encode_pair(1, 2) < encode_pair(1, 10));
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sealpost.redb");

        {
            let storage = RedbStorage::open(&path).unwrap();
            storage
                .store_identity(&StoredIdentity {
                    user_id: UserId(1),
                    identity_public_key: vec![4; 65],
                    signed_pre_key: None,
                    settings: UserSettings::default(),
                    registered_at: Timestamp::from_millis(5),
                })
                .unwrap();
            storage.add_pre_keys(UserId(1), &pre_keys(&[1, 2])).unwrap();
            assert_eq!(storage.take_pre_key(UserId(1)).unwrap().unwrap().key_id, 1);
            storage.store_message(&message(1, None)).unwrap();
            assert_eq!(storage.next_id(Sequence::Message).unwrap(), 1);
        }

        let storage = RedbStorage::open(&path).unwrap();
        assert!(storage.load_identity(UserId(1)).unwrap().is_some());
        assert_eq!(storage.count_unused_pre_keys(UserId(1)).unwrap(), 1);
        assert_eq!(storage.take_pre_key(UserId(1)).unwrap().unwrap().key_id, 2);
        assert_eq!(storage.load_message(MessageId(1)).unwrap(), Some(message(1, None)));
        assert_eq!(storage.next_id(Sequence::Message).unwrap(), 2);
    }

    #[test]
    fn conflicting_batch_is_not_partially_applied() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("db")).unwrap();

        storage.add_pre_keys(UserId(1), &pre_keys(&[2])).unwrap();
        let result = storage.add_pre_keys(UserId(1), &pre_keys(&[1, 2, 3]));

        assert_eq!(result, Err(StorageError::Conflict { user_id: UserId(1), key_id: 2 }));
        assert_eq!(storage.count_unused_pre_keys(UserId(1)).unwrap(), 1);
    }

    #[test]
    fn conflicting_registration_stores_nothing() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("db")).unwrap();
        let identity = StoredIdentity {
            user_id: UserId(1),
            identity_public_key: vec![4; 65],
            signed_pre_key: None,
            settings: UserSettings::default(),
            registered_at: Timestamp::from_millis(5),
        };

        let result = storage.register(&identity, &pre_keys(&[1, 1]));
        assert_eq!(result, Err(StorageError::Conflict { user_id: UserId(1), key_id: 1 }));
        assert!(storage.load_identity(UserId(1)).unwrap().is_none());
        assert_eq!(storage.count_unused_pre_keys(UserId(1)).unwrap(), 0);

        storage.register(&identity, &pre_keys(&[1, 2])).unwrap();
        assert_eq!(storage.load_identity(UserId(1)).unwrap(), Some(identity));
        assert_eq!(storage.count_unused_pre_keys(UserId(1)).unwrap(), 2);
    }

    #[test]
    fn concurrent_fetches_never_share_a_pre_key() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("db")).unwrap();
        let ids: Vec<u64> = (1..=32).collect();
        storage.add_pre_keys(UserId(1), &pre_keys(&ids)).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let storage = storage.clone();
                thread::spawn(move || {
                    (0..10).filter_map(|_| storage.take_pre_key(UserId(1)).unwrap()).map(|k| k.key_id).collect::<Vec<_>>()
                })
            })
            .collect();

        let taken: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let unique: BTreeSet<u64> = taken.iter().copied().collect();
        assert_eq!(taken.len(), 32);
        assert_eq!(unique.len(), 32);
    }

    #[test]
    fn destructible_scan_skips_deleted() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("db")).unwrap();

        let mut swept = message(2, Some(Timestamp::from_millis(10)));
        swept.lifecycle.expire(Timestamp::from_millis(20));
        storage.store_message(&message(1, None)).unwrap();
        storage.store_message(&swept).unwrap();
        storage.store_message(&message(3, Some(Timestamp::from_millis(30)))).unwrap();

        let ids: Vec<_> = storage.destructible_messages().unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![MessageId(3)]);
    }
}
