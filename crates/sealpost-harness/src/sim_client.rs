//! Simulated client.
//!
//! Holds one user's key store and runs the client half of each flow: key
//! generation, encryption before upload, decryption after download and group
//! key distribution.

use sealpost_core::{
    CoreError, Environment, FirstContactPolicy, ForwardSecrecy, GroupKey, GroupKeyState, KeyStore,
    RecipientKeys, Rendered, decrypt_group_message, encrypt_group_message, encrypt_message,
    pairwise::decrypt_wire, register, replenish,
};
use sealpost_crypto::SymmetricKey;
use sealpost_proto::{
    CreateGroupRequest, GroupId, GroupMessageWire, GroupWire, MessageType, MessageWire, Timestamp,
    UpdateGroupRequest, UserId,
};
use sealpost_server::ServerError;
use thiserror::Error;

use crate::sim_server::SimServer;

/// Failure of a simulated client step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// Client-side protocol failure
    #[error(transparent)]
    Core(#[from] CoreError),
    /// The server refused the request
    #[error(transparent)]
    Server(#[from] ServerError),
}

/// A message sent by a [`SimClient`].
#[derive(Debug, Clone)]
pub struct Sent {
    /// Stored message as returned to the sender
    pub message: MessageWire,
    /// Prekey situation at encryption time
    pub forward_secrecy: ForwardSecrecy,
}

/// One simulated user.
#[derive(Debug)]
pub struct SimClient {
    store: KeyStore,
    policy: FirstContactPolicy,
}

impl SimClient {
    /// Generate keys for `user_id` and publish them with `pre_keys` one-time
    /// prekeys.
    pub fn register(server: &mut SimServer, user_id: UserId, pre_keys: usize) -> Result<Self, SimError> {
        let env = server.env().clone();
        let (store, request) = register(user_id, &env, pre_keys)?;
        server.call(|driver| driver.register_keys(user_id, &request))?;

        tracing::debug!(user = %user_id, pre_keys, "sim client registered");
        Ok(Self { store, policy: FirstContactPolicy::default() })
    }

    /// Use `policy` for every following first contact.
    #[must_use]
    pub fn with_policy(mut self, policy: FirstContactPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// User id.
    pub fn id(&self) -> UserId {
        self.store.owner()
    }

    /// Key store.
    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// Publish `count` more prekeys. Returns the server's unused count.
    pub fn replenish(&mut self, server: &mut SimServer, count: usize) -> Result<usize, SimError> {
        let env = server.env().clone();
        let request = replenish(&mut self.store, &env, count)?;
        let user_id = self.id();
        Ok(server.call(|driver| driver.replenish_pre_keys(user_id, &request))?)
    }

    /// Fetch `to`'s keys, encrypt `plaintext` and send it now.
    pub fn send(&self, server: &mut SimServer, to: UserId, plaintext: &[u8]) -> Result<Sent, SimError> {
        self.send_timed(server, to, plaintext, None, None)
    }

    /// Like [`SimClient::send`] with scheduling and self-destruct instants.
    pub fn send_timed(
        &self,
        server: &mut SimServer,
        to: UserId,
        plaintext: &[u8],
        scheduled_for: Option<Timestamp>,
        self_destruct_at: Option<Timestamp>,
    ) -> Result<Sent, SimError> {
        let response = server.fetch_keys(self.id(), to)?;
        let recipient = RecipientKeys::from_response(to, &response)?;

        let env = server.env().clone();
        let outgoing = encrypt_message(&env, &recipient, plaintext, self.policy)?;
        let forward_secrecy = outgoing.forward_secrecy;
        let request = outgoing.into_request(MessageType::Text, scheduled_for, self_destruct_at);

        let sender = self.id();
        let message = server.call(|driver| driver.send_message(sender, &request))?;
        Ok(Sent { message, forward_secrecy })
    }

    /// Decrypt and render a received message.
    pub fn read(&self, message: &MessageWire) -> Rendered {
        Rendered::from_result(decrypt_wire(&self.store, &message.envelope))
    }

    /// Conversation with `other` as the server shows it now.
    pub fn conversation(
        &self,
        server: &mut SimServer,
        other: UserId,
    ) -> Result<Vec<MessageWire>, SimError> {
        let caller = self.id();
        Ok(server.call(|driver| driver.list_conversation(caller, other))?)
    }

    /// Create a group with placeholder records, then distribute a fresh key
    /// to every member.
    pub fn create_group(
        &self,
        server: &mut SimServer,
        name: &str,
        members: &[UserId],
    ) -> Result<(GroupWire, GroupKey), SimError> {
        let request = CreateGroupRequest {
            name: name.to_string(),
            description: String::new(),
            member_ids: members.to_vec(),
        };
        let caller = self.id();
        let group = server.call(|driver| driver.create_group(caller, &request))?;

        let env = server.env().clone();
        let key = GroupKey {
            version: group.group_key_version,
            key: SymmetricKey::generate(&mut env.crypto_rng()?),
        };
        self.distribute(server, group.id, &key, false)?;

        let group = server.call(|driver| driver.group(caller, group.id))?;
        Ok((group, key))
    }

    /// Add members as admin and wrap the current key for them.
    pub fn add_members(
        &self,
        server: &mut SimServer,
        group_id: GroupId,
        key: &GroupKey,
        members: &[UserId],
    ) -> Result<GroupWire, SimError> {
        let caller = self.id();
        let request =
            UpdateGroupRequest { add_members: members.to_vec(), ..UpdateGroupRequest::default() };
        server.call(|driver| driver.update_group(caller, group_id, &request))?;
        self.distribute(server, group_id, key, false)
    }

    /// Rotate the group key as admin. Every member gets the new key wrapped
    /// in the same update.
    pub fn rotate(&self, server: &mut SimServer, group_id: GroupId) -> Result<GroupKey, SimError> {
        let caller = self.id();
        let group = server.call(|driver| driver.group(caller, group_id))?;

        let env = server.env().clone();
        let mut state = GroupKeyState::from_wire(&group).map_err(CoreError::from)?;
        let key = state.rotate(&env, &*server)?;
        server.call(|driver| driver.update_group(caller, group_id, &state.key_update(true)))?;
        Ok(key)
    }

    /// Open this client's copy of the group key.
    pub fn group_key(&self, server: &mut SimServer, group_id: GroupId) -> Result<GroupKey, SimError> {
        let caller = self.id();
        let group = server.call(|driver| driver.group(caller, group_id))?;
        let state = GroupKeyState::from_wire(&group).map_err(CoreError::from)?;
        Ok(state.unwrap_key(&self.store)?)
    }

    /// Encrypt and post a group message under `key`.
    pub fn post(
        &self,
        server: &mut SimServer,
        group_id: GroupId,
        key: &GroupKey,
        plaintext: &[u8],
    ) -> Result<GroupMessageWire, SimError> {
        let env = server.env().clone();
        let request = encrypt_group_message(&env, key, plaintext, MessageType::Text)?;
        let caller = self.id();
        Ok(server.call(|driver| driver.post_group_message(caller, group_id, &request))?)
    }

    /// Decrypt a group message with the given key.
    pub fn read_group(&self, key: &GroupKey, message: &GroupMessageWire) -> Rendered {
        Rendered::from_result(decrypt_group_message(key, message))
    }

    /// Re-wrap `key` for every member and publish the records.
    fn distribute(
        &self,
        server: &mut SimServer,
        group_id: GroupId,
        key: &GroupKey,
        rotate: bool,
    ) -> Result<GroupWire, SimError> {
        let caller = self.id();
        let group = server.call(|driver| driver.group(caller, group_id))?;

        let env = server.env().clone();
        let mut state = GroupKeyState::from_wire(&group).map_err(CoreError::from)?;
        let report = state.repair(&env, &*server, key)?;
        if !report.is_complete() {
            tracing::warn!(group = %group_id, failed = report.failed.len(), "incomplete distribution");
        }
        Ok(server.call(|driver| driver.update_group(caller, group_id, &state.key_update(rotate)))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_client_can_be_fetched() {
        let mut server = SimServer::new(2);
        let alice = SimClient::register(&mut server, UserId(1), 3).unwrap();
        let bob = SimClient::register(&mut server, UserId(2), 0).unwrap();

        let sent = bob.send(&mut server, alice.id(), b"ping").unwrap();
        assert!(matches!(sent.forward_secrecy, ForwardSecrecy::OneTimePreKey { .. }));
        assert_eq!(alice.read(&sent.message), Rendered::Plaintext(b"ping".to_vec()));
    }

    #[test]
    fn strict_policy_refuses_without_pre_keys() {
        let mut server = SimServer::new(2);
        let alice = SimClient::register(&mut server, UserId(1), 0).unwrap();
        let bob = SimClient::register(&mut server, UserId(2), 0)
            .unwrap()
            .with_policy(FirstContactPolicy::RequireOneTimePreKey);

        assert!(matches!(
            bob.send(&mut server, alice.id(), b"x").unwrap_err(),
            SimError::Core(CoreError::PreKeyExhausted { .. })
        ));
    }
}
