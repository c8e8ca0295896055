//! Group bookkeeping and group message relay.
//!
//! The server never holds a group key. It stores each member's wrapped copy
//! as supplied by an admin client and enforces membership, roles and key
//! versions.

use std::collections::BTreeSet;

use sealpost_core::{CoreError, Environment, GroupKeyState, GroupMessage, WrappedKey};
use sealpost_proto::{
    CreateGroupRequest, Event, GroupId, GroupMessageRequest, GroupMessageWire, GroupWire,
    MessageId, Role, UpdateGroupRequest, UserId,
};

use crate::{
    driver::{Outcome, ServerDriver},
    error::ServerError,
    storage::{Sequence, Storage, StoredGroup},
};

impl<E: Environment, S: Storage> ServerDriver<E, S> {
    /// Create a group. `caller` becomes its admin and every member starts
    /// with a `Pending` key record until an admin distributes the key.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for an empty name
    /// - `NotFound` if a member never registered
    pub fn create_group(
        &mut self,
        caller: UserId,
        request: &CreateGroupRequest,
    ) -> Result<Outcome<GroupWire>, ServerError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ServerError::invalid("group name is empty"));
        }

        let members: Vec<UserId> = request
            .member_ids
            .iter()
            .copied()
            .filter(|id| *id != caller)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.require_identity(caller)?;
        for member in &members {
            self.require_identity(*member)?;
        }

        let now = self.env.now();
        let group_id = GroupId(self.storage.next_id(Sequence::Group)?);
        let group = StoredGroup {
            name: name.to_string(),
            description: request.description.clone(),
            state: GroupKeyState::new_pending(group_id, caller, &members, now),
            created_at: now,
            updated_at: now,
        };
        self.storage.store_group(&group)?;

        tracing::info!(group = %group_id, creator = %caller, members = members.len() + 1, "created group");

        let wire = group.to_wire();
        let event = Event::GroupCreated(wire.clone());
        Ok(Outcome::new(wire).push_all(group.state.member_ids(), &event))
    }

    /// One group, as seen by a member.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the group does not exist
    /// - `Core(NotAMember)` unless `caller` is a member
    pub fn group(&self, caller: UserId, id: GroupId) -> Result<Outcome<GroupWire>, ServerError> {
        let group = self.load_member_group(caller, id)?;
        Ok(Outcome::new(group.to_wire()))
    }

    /// Every group `caller` belongs to.
    ///
    /// # Errors
    ///
    /// - `Storage` on backend failure
    pub fn list_groups(&self, caller: UserId) -> Result<Outcome<Vec<GroupWire>>, ServerError> {
        let groups = self
            .storage
            .list_groups()?
            .iter()
            .filter(|g| g.state.is_member(caller))
            .map(StoredGroup::to_wire)
            .collect();
        Ok(Outcome::new(groups))
    }

    /// Apply an admin's update.
    ///
    /// Applied in order: metadata, added members (`Pending`), removed members,
    /// key rotation, supplied wrapped keys. A rotation resets every member
    /// whose key is not supplied in the same update to `Pending`. Supplied
    /// keys are accepted only when `key_version` names the version the group
    /// holds after the rotation step. The update is validated as a whole
    /// before anything is stored.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the group or an added user does not exist
    /// - `Forbidden` unless `caller` is an admin
    /// - `InvalidRequest` for an empty name, removing the creator, or a key
    ///   for a non-member
    /// - `Core(NotAMember)` when removing a non-member
    /// - `Core(StaleGroupKey)` when wrapped keys target another key version
    /// - `Protocol` for a malformed wrapped key
    pub fn update_group(
        &mut self,
        caller: UserId,
        id: GroupId,
        request: &UpdateGroupRequest,
    ) -> Result<Outcome<GroupWire>, ServerError> {
        let mut group = self.load_member_group(caller, id)?;
        if !group.state.is_admin(caller) {
            return Err(ServerError::Forbidden { reason: "only admins may update a group" });
        }
        let now = self.env.now();

        if let Some(name) = &request.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(ServerError::invalid("group name is empty"));
            }
            group.name = name.to_string();
        }
        if let Some(description) = &request.description {
            group.description.clone_from(description);
        }

        for user_id in &request.add_members {
            self.require_identity(*user_id)?;
            group.state.insert_pending(*user_id, Role::Member, now);
        }

        let mut removed = Vec::new();
        for user_id in &request.remove_members {
            if *user_id == group.state.creator_id() {
                return Err(ServerError::invalid("the creator cannot be removed"));
            }
            if !group.state.remove(*user_id) {
                return Err(CoreError::NotAMember { group_id: id, user_id: *user_id }.into());
            }
            removed.push(*user_id);
        }

        if request.rotate_key {
            let supplied: BTreeSet<UserId> = request.members.iter().map(|m| m.user_id).collect();
            group.state.bump_version(now, &supplied);
            tracing::info!(group = %id, version = group.state.key_version(), "group key rotated");
        }

        if !request.members.is_empty() && request.key_version != group.state.key_version() {
            return Err(CoreError::StaleGroupKey {
                held: request.key_version,
                required: group.state.key_version(),
            }
            .into());
        }
        for wire in &request.members {
            let wrapped_key = WrappedKey::from_wire(wire)?;
            if !group.state.set_wrapped(wire.user_id, wrapped_key) {
                return Err(ServerError::invalid(format!(
                    "wrapped key supplied for non-member {}",
                    wire.user_id
                )));
            }
        }

        group.updated_at = now;
        self.storage.store_group(&group)?;

        let wire = group.to_wire();
        let updated = Event::GroupUpdated(wire.clone());
        let left = Event::GroupLeft { group_id: id };
        Ok(Outcome::new(wire).push_all(group.state.member_ids(), &updated).push_all(removed, &left))
    }

    /// Leave a group. The creator cannot leave; it deletes instead.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the group does not exist
    /// - `Core(NotAMember)` unless `caller` is a member
    /// - `InvalidRequest` if `caller` created the group
    pub fn leave_group(&mut self, caller: UserId, id: GroupId) -> Result<Outcome<()>, ServerError> {
        let mut group = self.load_member_group(caller, id)?;
        if group.state.creator_id() == caller {
            return Err(ServerError::invalid("the creator cannot leave; delete the group instead"));
        }

        group.state.remove(caller);
        group.updated_at = self.env.now();
        self.storage.store_group(&group)?;

        let updated = Event::GroupUpdated(group.to_wire());
        Ok(Outcome::new(())
            .push(caller, Event::GroupLeft { group_id: id })
            .push_all(group.state.member_ids(), &updated))
    }

    /// Delete a group and its messages.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the group does not exist
    /// - `Core(NotAMember)` unless `caller` is a member
    /// - `Forbidden` unless `caller` created the group
    pub fn delete_group(&mut self, caller: UserId, id: GroupId) -> Result<Outcome<()>, ServerError> {
        let group = self.load_member_group(caller, id)?;
        if group.state.creator_id() != caller {
            return Err(ServerError::Forbidden { reason: "only the creator may delete a group" });
        }

        self.storage.delete_group(id)?;
        tracing::info!(group = %id, "deleted group");

        Ok(Outcome::new(()).push_all(group.state.member_ids(), &Event::GroupLeft { group_id: id }))
    }

    /// Relay a group message encrypted under the current group key.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the group does not exist
    /// - `Core(NotAMember)` unless `caller` is a member
    /// - `Core(GroupKeyNotReady)` while `caller`'s key record is `Pending`
    /// - `Core(StaleGroupKey)` unless the message uses the current version
    /// - `Protocol` for malformed ciphertext or nonce
    pub fn post_group_message(
        &mut self,
        caller: UserId,
        id: GroupId,
        request: &GroupMessageRequest,
    ) -> Result<Outcome<GroupMessageWire>, ServerError> {
        let group = self.load_member_group(caller, id)?;
        if group.state.record(caller).is_some_and(|r| r.wrapped_key.is_pending()) {
            return Err(CoreError::GroupKeyNotReady { group_id: id, user_id: caller }.into());
        }
        if request.key_version != group.state.key_version() {
            return Err(CoreError::StaleGroupKey {
                held: request.key_version,
                required: group.state.key_version(),
            }
            .into());
        }

        let message_id = MessageId(self.storage.next_id(Sequence::GroupMessage)?);
        let message = GroupMessage::from_request(message_id, id, caller, request, self.env.now())?;
        self.storage.store_group_message(&message)?;

        let wire = message.to_wire();
        let event = Event::NewGroupMessage(wire.clone());
        let others = group.state.member_ids().into_iter().filter(|m| *m != caller);
        Ok(Outcome::new(wire).push_all(others, &event))
    }

    /// The most recent non-deleted group messages, oldest first, capped at
    /// `max_conversation_page`. Records `caller`'s first fetch of each.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the group does not exist
    /// - `Core(NotAMember)` unless `caller` is a member
    pub fn list_group_messages(
        &mut self,
        caller: UserId,
        id: GroupId,
    ) -> Result<Outcome<Vec<GroupMessageWire>>, ServerError> {
        self.load_member_group(caller, id)?;
        let now = self.env.now();

        let visible: Vec<GroupMessage> =
            self.storage.group_messages(id)?.into_iter().filter(|m| !m.deleted).collect();
        let skip = visible.len().saturating_sub(self.config.max_conversation_page);

        let mut listed = Vec::with_capacity(visible.len() - skip);
        for mut message in visible.into_iter().skip(skip) {
            if message.sender_id != caller && message.mark_read_by(caller, now) {
                self.storage.store_group_message(&message)?;
            }
            listed.push(message.to_wire());
        }

        Ok(Outcome::new(listed))
    }

    fn load_member_group(&self, caller: UserId, id: GroupId) -> Result<StoredGroup, ServerError> {
        let group = self.storage.load_group(id)?.ok_or(ServerError::NotFound { resource: "group" })?;
        if !group.state.is_member(caller) {
            return Err(CoreError::NotAMember { group_id: id, user_id: caller }.into());
        }
        Ok(group)
    }
}
