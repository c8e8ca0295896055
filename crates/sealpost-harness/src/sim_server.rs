//! Simulation server for deterministic tests.
//!
//! `SimServer` wraps `ServerDriver` over `SimEnv` and `MemoryStorage`. Tests
//! drive it explicitly: every call executes the returned push actions into
//! per-user inboxes, and sweeps run only when the test asks for them.

use std::collections::BTreeMap;

use sealpost_core::{CoreError, KeyDirectory};
use sealpost_crypto::PublicKey;
use sealpost_proto::{Event, IdentityKeysResponse, UserId};
use sealpost_server::{
    MemoryStorage, Outcome, ServerAction, ServerConfig, ServerDriver, ServerError, ServerEvent,
    Storage,
};

use crate::{
    SimEnv,
    invariants::{GroupSnapshot, SystemSnapshot},
    sim_client::SimClient,
};

/// Driver type used throughout the harness.
pub type SimDriver = ServerDriver<SimEnv, MemoryStorage>;

/// Simulation server with recorded pushes.
pub struct SimServer {
    driver: SimDriver,
    /// Pushes received per user, in delivery order
    inboxes: BTreeMap<UserId, Vec<Event>>,
    /// One-time prekey ids handed out per owner, in fetch order
    handed_out: BTreeMap<UserId, Vec<u64>>,
}

impl SimServer {
    /// Server with default config and an environment seeded from `seed`.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, ServerConfig::default())
    }

    /// Server with custom config.
    pub fn with_config(seed: u64, config: ServerConfig) -> Self {
        let driver = ServerDriver::new(SimEnv::with_seed(seed), MemoryStorage::new(), config);
        Self { driver, inboxes: BTreeMap::new(), handed_out: BTreeMap::new() }
    }

    /// Shared simulated environment.
    pub fn env(&self) -> &SimEnv {
        self.driver.env()
    }

    /// Underlying driver, for assertions on storage.
    pub fn driver(&self) -> &SimDriver {
        &self.driver
    }

    /// Run one driver operation and deliver its pushes.
    pub fn call<T>(
        &mut self,
        op: impl FnOnce(&mut SimDriver) -> Result<Outcome<T>, ServerError>,
    ) -> Result<T, ServerError> {
        let outcome = op(&mut self.driver)?;
        self.execute_actions(outcome.actions);
        Ok(outcome.value)
    }

    /// Fetch `target`'s key bundle as `caller`, recording the handed-out
    /// prekey.
    pub fn fetch_keys(
        &mut self,
        caller: UserId,
        target: UserId,
    ) -> Result<IdentityKeysResponse, ServerError> {
        let response = self.call(|driver| driver.fetch_keys(caller, target))?;
        if let Some(pre_key) = &response.one_time_pre_key {
            self.handed_out.entry(target).or_default().push(pre_key.key_id);
        }
        Ok(response)
    }

    /// Run a sweep now. Returns the number of pushes it produced.
    pub fn sweep(&mut self, event: ServerEvent) -> Result<usize, ServerError> {
        let actions = self.driver.process_event(event)?;
        let pushed = actions.len();
        self.execute_actions(actions);
        Ok(pushed)
    }

    /// Pushes received by `user_id` so far.
    pub fn inbox(&self, user_id: UserId) -> &[Event] {
        self.inboxes.get(&user_id).map_or(&[], Vec::as_slice)
    }

    /// Take and clear `user_id`'s inbox.
    pub fn drain_inbox(&mut self, user_id: UserId) -> Vec<Event> {
        self.inboxes.remove(&user_id).unwrap_or_default()
    }

    /// Capture observable state for invariant checks. `clients` supply the
    /// key stores used to open each member's group key record.
    pub fn snapshot(&self, clients: &[&SimClient]) -> Result<SystemSnapshot, ServerError> {
        let storage = self.driver.storage();

        let mut messages = BTreeMap::new();
        for client in clients {
            for message in storage.messages_involving(client.id())? {
                messages.insert(message.id, message);
            }
        }

        let mut groups = Vec::new();
        for group in storage.list_groups()? {
            let mut opened = BTreeMap::new();
            for client in clients {
                let Some(record) = group.state.record(client.id()) else { continue };
                if record.wrapped_key.is_pending() {
                    continue;
                }
                let key = group.state.unwrap_key(client.store()).ok().map(|k| *k.key.as_bytes());
                opened.insert(client.id(), key);
            }
            groups.push(GroupSnapshot {
                group_id: group.id(),
                key_version: group.state.key_version(),
                opened_keys: opened,
            });
        }

        let pushed_messages = self
            .inboxes
            .iter()
            .map(|(user, events)| {
                let ids = events
                    .iter()
                    .filter_map(|event| match event {
                        Event::NewMessage(message) => Some(message.id),
                        _ => None,
                    })
                    .collect();
                (*user, ids)
            })
            .collect();

        Ok(SystemSnapshot {
            handed_out_pre_keys: self.handed_out.clone(),
            messages: messages.into_values().collect(),
            groups,
            pushed_messages,
        })
    }

    fn execute_actions(&mut self, actions: Vec<ServerAction>) {
        for action in actions {
            match action {
                ServerAction::Push { recipient, event } => {
                    tracing::trace!(%recipient, event = event.name(), "sim push");
                    self.inboxes.entry(recipient).or_default().push(event);
                },
            }
        }
    }
}

/// Published identity keys, read straight from storage so that resolving a
/// member never consumes a prekey.
impl KeyDirectory for SimServer {
    fn identity_key(&self, user_id: UserId) -> Result<PublicKey, CoreError> {
        let invalid = |reason: String| CoreError::InvalidKeyMaterial { reason };

        let identity = self
            .driver
            .storage()
            .load_identity(user_id)
            .map_err(|err| invalid(err.to_string()))?
            .ok_or_else(|| invalid(format!("no identity key published for user {user_id}")))?;

        PublicKey::from_bytes(&identity.identity_public_key).map_err(|err| invalid(err.to_string()))
    }
}
