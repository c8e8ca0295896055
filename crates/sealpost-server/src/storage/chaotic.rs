//! Fault-injecting storage wrapper.
//!
//! Delegates to an inner backend and fails writes, either once a write budget
//! runs out or at a seeded random rate. A failed write never reaches the
//! inner backend, which matches an aborted transaction. Reads always pass
//! through.

#![allow(clippy::disallowed_types, reason = "Synchronous fault state only")]

use std::sync::{Arc, Mutex};

use rand_chacha::{
    ChaCha8Rng,
    rand_core::{RngCore, SeedableRng},
};
use sealpost_core::{GroupMessage, Message};
use sealpost_proto::{FileId, GroupId, MessageId, UserId};

use super::{
    Sequence, Storage, StorageError, StoredFile, StoredGroup, StoredIdentity, StoredPreKey,
};

/// Storage wrapper that injects write failures.
///
/// Clones share the inner backend and the fault state, so a test can keep a
/// handle while the driver owns another.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    faults: Arc<Mutex<Faults>>,
}

struct Faults {
    rng: ChaCha8Rng,
    /// Probability in [0.0, 1.0] that a write fails
    failure_rate: f64,
    /// Writes still allowed before every write fails
    budget: Option<usize>,
    injected: usize,
}

impl Faults {
    fn should_fail(&mut self) -> bool {
        match self.budget.as_mut() {
            Some(0) => return true,
            Some(left) => *left -= 1,
            None => {},
        }
        if self.failure_rate <= 0.0 {
            return false;
        }
        let roll = f64::from(self.rng.next_u32()) / (f64::from(u32::MAX) + 1.0);
        roll < self.failure_rate
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Wrap `inner`, failing writes at `failure_rate` with a seeded RNG.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0].
    pub fn new(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        let faults = Faults {
            rng: ChaCha8Rng::seed_from_u64(seed),
            failure_rate,
            budget: None,
            injected: 0,
        };
        Self { inner, faults: Arc::new(Mutex::new(faults)) }
    }

    /// Wrap `inner` without injecting anything until told to.
    pub fn reliable(inner: S) -> Self {
        Self::new(inner, 0.0, 0)
    }

    /// Allow `writes` more writes, then fail every write.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn fail_after(&self, writes: usize) {
        self.faults.lock().expect("Mutex poisoned").budget = Some(writes);
    }

    /// Change the random failure rate.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0] or the internal mutex is
    /// poisoned.
    #[allow(clippy::expect_used)]
    pub fn set_failure_rate(&self, failure_rate: f64) {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );
        self.faults.lock().expect("Mutex poisoned").failure_rate = failure_rate;
    }

    /// Stop injecting failures.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn heal(&self) {
        let mut faults = self.faults.lock().expect("Mutex poisoned");
        faults.budget = None;
        faults.failure_rate = 0.0;
    }

    /// Number of writes failed so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn injected(&self) -> usize {
        self.faults.lock().expect("Mutex poisoned").injected
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    #[allow(clippy::expect_used)]
    fn write(&self, operation: &'static str) -> Result<(), StorageError> {
        let mut faults = self.faults.lock().expect("Mutex poisoned");
        if faults.should_fail() {
            faults.injected += 1;
            tracing::debug!(operation, "injected storage failure");
            return Err(StorageError::Io(format!("injected failure: {operation}")));
        }
        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn next_id(&self, sequence: Sequence) -> Result<u64, StorageError> {
        self.write("next_id")?;
        self.inner.next_id(sequence)
    }

    fn store_identity(&self, identity: &StoredIdentity) -> Result<(), StorageError> {
        self.write("store_identity")?;
        self.inner.store_identity(identity)
    }

    fn load_identity(&self, user_id: UserId) -> Result<Option<StoredIdentity>, StorageError> {
        self.inner.load_identity(user_id)
    }

    fn add_pre_keys(
        &self,
        user_id: UserId,
        pre_keys: &[StoredPreKey],
    ) -> Result<(), StorageError> {
        self.write("add_pre_keys")?;
        self.inner.add_pre_keys(user_id, pre_keys)
    }

    fn register(
        &self,
        identity: &StoredIdentity,
        pre_keys: &[StoredPreKey],
    ) -> Result<(), StorageError> {
        self.write("register")?;
        self.inner.register(identity, pre_keys)
    }

    fn take_pre_key(&self, user_id: UserId) -> Result<Option<StoredPreKey>, StorageError> {
        self.write("take_pre_key")?;
        self.inner.take_pre_key(user_id)
    }

    fn count_unused_pre_keys(&self, user_id: UserId) -> Result<usize, StorageError> {
        self.inner.count_unused_pre_keys(user_id)
    }

    fn store_message(&self, message: &Message) -> Result<(), StorageError> {
        self.write("store_message")?;
        self.inner.store_message(message)
    }

    fn load_message(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        self.inner.load_message(id)
    }

    fn messages_involving(&self, user_id: UserId) -> Result<Vec<Message>, StorageError> {
        self.inner.messages_involving(user_id)
    }

    fn scheduled_messages(&self) -> Result<Vec<Message>, StorageError> {
        self.inner.scheduled_messages()
    }

    fn destructible_messages(&self) -> Result<Vec<Message>, StorageError> {
        self.inner.destructible_messages()
    }

    fn store_group(&self, group: &StoredGroup) -> Result<(), StorageError> {
        self.write("store_group")?;
        self.inner.store_group(group)
    }

    fn load_group(&self, id: GroupId) -> Result<Option<StoredGroup>, StorageError> {
        self.inner.load_group(id)
    }

    fn list_groups(&self) -> Result<Vec<StoredGroup>, StorageError> {
        self.inner.list_groups()
    }

    fn delete_group(&self, id: GroupId) -> Result<bool, StorageError> {
        self.write("delete_group")?;
        self.inner.delete_group(id)
    }

    fn store_group_message(&self, message: &GroupMessage) -> Result<(), StorageError> {
        self.write("store_group_message")?;
        self.inner.store_group_message(message)
    }

    fn group_messages(&self, group_id: GroupId) -> Result<Vec<GroupMessage>, StorageError> {
        self.inner.group_messages(group_id)
    }

    fn store_file(&self, file: &StoredFile) -> Result<(), StorageError> {
        self.write("store_file")?;
        self.inner.store_file(file)
    }

    fn load_file(&self, id: FileId) -> Result<Option<StoredFile>, StorageError> {
        self.inner.load_file(id)
    }
}
