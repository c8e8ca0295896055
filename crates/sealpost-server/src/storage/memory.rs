#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use sealpost_core::{GroupMessage, Message};
use sealpost_proto::{FileId, GroupId, MessageId, UserId};

use super::{
    Sequence, Storage, StorageError, StoredFile, StoredGroup, StoredIdentity, StoredPreKey,
};

/// In-memory storage for tests and simulation.
///
/// All state lives behind one `Arc<Mutex<>>`, so every trait method is a
/// single critical section and clones share the same data. Uses
/// `lock().expect()`, which panics if the mutex is poisoned.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// Last id handed out per sequence
    counters: HashMap<&'static str, u64>,

    /// Registered identities
    identities: HashMap<UserId, StoredIdentity>,

    /// One-time prekeys per owner, ordered by `key_id`
    pre_keys: HashMap<UserId, BTreeMap<u64, StoredPreKey>>,

    /// 1:1 messages in id order
    messages: BTreeMap<MessageId, Message>,

    /// Groups in id order
    groups: BTreeMap<GroupId, StoredGroup>,

    /// Group messages in `(group, id)` order
    group_messages: BTreeMap<(GroupId, MessageId), GroupMessage>,

    /// Encrypted files
    files: HashMap<FileId, StoredFile>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of 1:1 messages, deleted ones included.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn message_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").messages.len()
    }
}

impl Storage for MemoryStorage {
    #[allow(clippy::expect_used)]
    fn next_id(&self, sequence: Sequence) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let counter = inner.counters.entry(sequence.name()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    #[allow(clippy::expect_used)]
    fn store_identity(&self, identity: &StoredIdentity) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.identities.insert(identity.user_id, identity.clone());
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn load_identity(&self, user_id: UserId) -> Result<Option<StoredIdentity>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.identities.get(&user_id).cloned())
    }

    #[allow(clippy::expect_used)]
    fn add_pre_keys(
        &self,
        user_id: UserId,
        pre_keys: &[StoredPreKey],
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let owned = inner.pre_keys.entry(user_id).or_default();
        let mut incoming = fresh_batch(owned, user_id, pre_keys)?;
        owned.append(&mut incoming);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn register(
        &self,
        identity: &StoredIdentity,
        pre_keys: &[StoredPreKey],
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let owned = inner.pre_keys.entry(identity.user_id).or_default();
        let mut incoming = fresh_batch(owned, identity.user_id, pre_keys)?;
        owned.append(&mut incoming);
        inner.identities.insert(identity.user_id, identity.clone());
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn take_pre_key(&self, user_id: UserId) -> Result<Option<StoredPreKey>, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let Some(owned) = inner.pre_keys.get_mut(&user_id) else {
            return Ok(None);
        };

        Ok(owned.values_mut().find(|k| !k.used).map(|pre_key| {
            pre_key.used = true;
            pre_key.clone()
        }))
    }

    #[allow(clippy::expect_used)]
    fn count_unused_pre_keys(&self, user_id: UserId) -> Result<usize, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.pre_keys.get(&user_id).map_or(0, |owned| owned.values().filter(|k| !k.used).count()))
    }

    #[allow(clippy::expect_used)]
    fn store_message(&self, message: &Message) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.messages.insert(message.id, message.clone());
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn load_message(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.messages.get(&id).cloned())
    }

    #[allow(clippy::expect_used)]
    fn messages_involving(&self, user_id: UserId) -> Result<Vec<Message>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.messages.values().filter(|m| m.involves(user_id)).cloned().collect())
    }

    #[allow(clippy::expect_used)]
    fn scheduled_messages(&self) -> Result<Vec<Message>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.messages.values().filter(|m| m.lifecycle.is_scheduled).cloned().collect())
    }

    #[allow(clippy::expect_used)]
    fn destructible_messages(&self) -> Result<Vec<Message>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner
            .messages
            .values()
            .filter(|m| m.lifecycle.self_destruct_at.is_some() && !m.lifecycle.deleted)
            .cloned()
            .collect())
    }

    #[allow(clippy::expect_used)]
    fn store_group(&self, group: &StoredGroup) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.groups.insert(group.id(), group.clone());
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn load_group(&self, id: GroupId) -> Result<Option<StoredGroup>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.groups.get(&id).cloned())
    }

    #[allow(clippy::expect_used)]
    fn list_groups(&self) -> Result<Vec<StoredGroup>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.groups.values().cloned().collect())
    }

    #[allow(clippy::expect_used)]
    fn delete_group(&self, id: GroupId) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let existed = inner.groups.remove(&id).is_some();
        inner.group_messages.retain(|(group_id, _), _| *group_id != id);
        Ok(existed)
    }

    #[allow(clippy::expect_used)]
    fn store_group_message(&self, message: &GroupMessage) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.group_messages.insert((message.group_id, message.id), message.clone());
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn group_messages(&self, group_id: GroupId) -> Result<Vec<GroupMessage>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner
            .group_messages
            .range((group_id, MessageId(0))..=(group_id, MessageId(u64::MAX)))
            .map(|(_, message)| message.clone())
            .collect())
    }

    #[allow(clippy::expect_used)]
    fn store_file(&self, file: &StoredFile) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.files.insert(file.notice.id, file.clone());
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn load_file(&self, id: FileId) -> Result<Option<StoredFile>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.files.get(&id).cloned())
    }
}

/// Validate a prekey batch against `owned` and index it by id.
fn fresh_batch(
    owned: &BTreeMap<u64, StoredPreKey>,
    user_id: UserId,
    pre_keys: &[StoredPreKey],
) -> Result<BTreeMap<u64, StoredPreKey>, StorageError> {
    let mut incoming = BTreeMap::new();
    for pre_key in pre_keys {
        if owned.contains_key(&pre_key.key_id)
            || incoming.insert(pre_key.key_id, pre_key.clone()).is_some()
        {
            return Err(StorageError::Conflict { user_id, key_id: pre_key.key_id });
        }
    }
    Ok(incoming)
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, thread};

    use super::*;

    fn pre_keys(ids: &[u64]) -> Vec<StoredPreKey> {
        ids.iter().map(|id| StoredPreKey { key_id: *id, public_key: vec![4; 65], used: false }).collect()
    }

    #[test]
    fn sequences_are_independent_and_start_at_one() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.next_id(Sequence::Message).unwrap(), 1);
        assert_eq!(storage.next_id(Sequence::Message).unwrap(), 2);
        assert_eq!(storage.next_id(Sequence::Group).unwrap(), 1);
    }

    #[test]
    fn duplicate_pre_key_rejects_whole_batch() {
        let storage = MemoryStorage::new();
        storage.add_pre_keys(UserId(1), &pre_keys(&[1, 2])).unwrap();

        let result = storage.add_pre_keys(UserId(1), &pre_keys(&[3, 2]));
        assert_eq!(result, Err(StorageError::Conflict { user_id: UserId(1), key_id: 2 }));
        assert_eq!(storage.count_unused_pre_keys(UserId(1)).unwrap(), 2);

        let result = storage.add_pre_keys(UserId(1), &pre_keys(&[4, 4]));
        assert!(matches!(result, Err(StorageError::Conflict { key_id: 4, .. })));
    }

    #[test]
    fn conflicting_registration_stores_no_identity() {
        let storage = MemoryStorage::new();
        let identity = StoredIdentity {
            user_id: UserId(1),
            identity_public_key: vec![4; 65],
            signed_pre_key: None,
            settings: sealpost_proto::UserSettings::default(),
            registered_at: sealpost_proto::Timestamp::from_millis(1),
        };

        assert!(storage.register(&identity, &pre_keys(&[7, 7])).is_err());
        assert!(storage.load_identity(UserId(1)).unwrap().is_none());
        assert_eq!(storage.count_unused_pre_keys(UserId(1)).unwrap(), 0);

        storage.register(&identity, &pre_keys(&[7])).unwrap();
        assert_eq!(storage.load_identity(UserId(1)).unwrap(), Some(identity));
    }

    #[test]
    fn take_pre_key_hands_out_lowest_once() {
        let storage = MemoryStorage::new();
        storage.add_pre_keys(UserId(1), &pre_keys(&[5, 3, 9])).unwrap();

        let taken: Vec<_> =
            std::iter::from_fn(|| storage.take_pre_key(UserId(1)).unwrap()).map(|k| k.key_id).collect();
        assert_eq!(taken, vec![3, 5, 9]);
        assert_eq!(storage.count_unused_pre_keys(UserId(1)).unwrap(), 0);

        // Used ids stay reserved
        assert!(storage.add_pre_keys(UserId(1), &pre_keys(&[3])).is_err());
    }

    #[test]
    fn concurrent_fetches_never_share_a_pre_key() {
        let storage = MemoryStorage::new();
        let ids: Vec<u64> = (1..=64).collect();
        storage.add_pre_keys(UserId(1), &pre_keys(&ids)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                thread::spawn(move || {
                    (0..10).filter_map(|_| storage.take_pre_key(UserId(1)).unwrap()).map(|k| k.key_id).collect::<Vec<_>>()
                })
            })
            .collect();

        let taken: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let unique: BTreeSet<u64> = taken.iter().copied().collect();
        assert_eq!(taken.len(), 64);
        assert_eq!(unique.len(), 64);
    }
}
