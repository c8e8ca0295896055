//! 1:1 message operations.
//!
//! Every read path filters through [`Lifecycle::is_visible_to`] with the
//! request's `now`, so a message past its self-destruct instant is hidden
//! even before the expiry sweep has soft-deleted it.
//!
//! [`Lifecycle::is_visible_to`]: sealpost_core::Lifecycle::is_visible_to

use sealpost_core::{Audience, Environment, Lifecycle, Message, TransitionError};
use sealpost_proto::{
    EditMessageRequest, EnvelopeBytes, Event, MessageId, MessageWire, SendMessageRequest,
    Timestamp, UserId,
};

use crate::{
    driver::{Outcome, ServerDriver},
    error::ServerError,
    storage::{Sequence, Storage},
};

/// How `user_id` sees `message`.
fn audience(message: &Message, user_id: UserId) -> Audience {
    if message.sender_id == user_id { Audience::Sender } else { Audience::Recipient }
}

fn visible_to(message: &Message, user_id: UserId, now: Timestamp) -> bool {
    message.lifecycle.is_visible_to(audience(message, user_id), now)
}

/// A refused transition means the message is gone for every caller.
fn gone(_: TransitionError) -> ServerError {
    ServerError::NotFound { resource: "message" }
}

impl<E: Environment, S: Storage> ServerDriver<E, S> {
    /// Store an envelope for `request.recipient_id`.
    ///
    /// A `scheduled_for` strictly in the future holds the message back until
    /// the delivery sweep releases it; otherwise `NewMessage` is pushed now.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the recipient never registered
    /// - `Protocol` for a malformed envelope
    pub fn send_message(
        &mut self,
        caller: UserId,
        request: &SendMessageRequest,
    ) -> Result<Outcome<MessageWire>, ServerError> {
        self.require_identity(request.recipient_id)?;
        let content = EnvelopeBytes::from_wire(&request.envelope)?;

        let now = self.env.now();
        let message = Message {
            id: MessageId(self.storage.next_id(Sequence::Message)?),
            sender_id: caller,
            recipient_id: request.recipient_id,
            content,
            original_content: None,
            message_type: request.message_type,
            timestamp: now,
            lifecycle: Lifecycle::new(now, request.scheduled_for, request.self_destruct_at),
        };
        self.storage.store_message(&message)?;

        let wire = message.to_wire();
        let outcome = Outcome::new(wire.clone());
        if message.lifecycle.is_visible(now) {
            Ok(outcome.push(message.recipient_id, Event::NewMessage(wire)))
        } else {
            tracing::debug!(
                message = %message.id,
                scheduled_for = ?message.lifecycle.scheduled_for,
                "holding message back"
            );
            Ok(outcome)
        }
    }

    /// Conversation between `caller` and `other`, oldest first.
    ///
    /// Messages addressed to `caller` are marked delivered.
    ///
    /// # Errors
    ///
    /// - `Storage` on backend failure
    pub fn list_conversation(
        &mut self,
        caller: UserId,
        other: UserId,
    ) -> Result<Outcome<Vec<MessageWire>>, ServerError> {
        let now = self.env.now();
        let mut listed = Vec::new();

        for mut message in self.storage.messages_involving(caller)? {
            if !message.is_between(caller, other) || !visible_to(&message, caller, now) {
                continue;
            }
            if message.recipient_id == caller && message.lifecycle.mark_delivered() {
                self.storage.store_message(&message)?;
            }
            listed.push(message.to_wire());
        }

        Ok(Outcome::new(listed))
    }

    /// Pinned messages between `caller` and `other`, most recently pinned
    /// first.
    ///
    /// # Errors
    ///
    /// - `Storage` on backend failure
    pub fn pinned_messages(
        &self,
        caller: UserId,
        other: UserId,
    ) -> Result<Outcome<Vec<MessageWire>>, ServerError> {
        let now = self.env.now();
        let mut pinned: Vec<Message> = self
            .storage
            .messages_involving(caller)?
            .into_iter()
            .filter(|m| m.is_between(caller, other))
            .filter(|m| m.lifecycle.pinned && visible_to(m, caller, now))
            .collect();
        pinned.sort_by(|a, b| b.lifecycle.pinned_at.cmp(&a.lifecycle.pinned_at));

        Ok(Outcome::new(pinned.iter().map(Message::to_wire).collect()))
    }

    /// Replace the envelope of one of `caller`'s messages.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the message is missing, deleted or destructed
    /// - `Forbidden` unless `caller` sent it
    /// - `Protocol` for a malformed envelope
    pub fn edit_message(
        &mut self,
        caller: UserId,
        id: MessageId,
        request: &EditMessageRequest,
    ) -> Result<Outcome<MessageWire>, ServerError> {
        let mut message = self.load_own_message(caller, id)?;
        if message.sender_id != caller {
            return Err(ServerError::Forbidden { reason: "only the sender may edit" });
        }
        let content = EnvelopeBytes::from_wire(&request.envelope)?;

        let now = self.env.now();
        message.edit(content, now).map_err(gone)?;
        self.storage.store_message(&message)?;

        let outcome = Outcome::new(message.to_wire());
        if message.lifecycle.is_visible(now) {
            Ok(outcome.push(message.recipient_id, Event::MessageEdited {
                message_id: id,
                envelope: request.envelope.clone(),
                edited_at: now,
            }))
        } else {
            Ok(outcome)
        }
    }

    /// Soft-delete a message. Either party may delete.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the message is missing, already deleted or destructed,
    ///   or not yet released to `caller`
    pub fn delete_message(
        &mut self,
        caller: UserId,
        id: MessageId,
    ) -> Result<Outcome<()>, ServerError> {
        let mut message = self.load_own_message(caller, id)?;
        let now = self.env.now();
        if !visible_to(&message, caller, now) {
            return Err(ServerError::NotFound { resource: "message" });
        }

        let counterpart = if caller == message.sender_id {
            message.recipient_id
        } else {
            message.sender_id
        };
        let counterpart_saw_it = visible_to(&message, counterpart, now);

        message.lifecycle.delete(now).map_err(gone)?;
        self.storage.store_message(&message)?;
        tracing::debug!(message = %id, by = %caller, "deleted message");

        let outcome = Outcome::new(());
        if counterpart_saw_it {
            Ok(outcome.push(counterpart, Event::MessageDeleted { message_id: id }))
        } else {
            Ok(outcome)
        }
    }

    /// Pin or unpin a message. Either party may pin.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the message is missing, deleted or destructed, or not
    ///   yet released to `caller`
    pub fn pin_message(
        &mut self,
        caller: UserId,
        id: MessageId,
        pinned: bool,
    ) -> Result<Outcome<MessageWire>, ServerError> {
        let mut message = self.load_own_message(caller, id)?;
        let now = self.env.now();
        if !visible_to(&message, caller, now) {
            return Err(ServerError::NotFound { resource: "message" });
        }

        message.lifecycle.set_pinned(pinned, now).map_err(gone)?;
        self.storage.store_message(&message)?;

        let counterpart = if caller == message.sender_id {
            message.recipient_id
        } else {
            message.sender_id
        };
        let outcome = Outcome::new(message.to_wire());
        if visible_to(&message, counterpart, now) {
            Ok(outcome.push(counterpart, Event::MessagePinned { message_id: id, pinned }))
        } else {
            Ok(outcome)
        }
    }

    /// Mark a received message read.
    ///
    /// When `caller` disabled read receipts nothing is recorded and the
    /// sender is not notified.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the message is missing or not visible
    /// - `Forbidden` unless `caller` is the recipient
    pub fn mark_read(
        &mut self,
        caller: UserId,
        id: MessageId,
    ) -> Result<Outcome<MessageWire>, ServerError> {
        let mut message = self.load_own_message(caller, id)?;
        if message.recipient_id != caller {
            return Err(ServerError::Forbidden { reason: "only the recipient may mark read" });
        }
        let now = self.env.now();
        if !message.lifecycle.is_visible(now) {
            return Err(ServerError::NotFound { resource: "message" });
        }

        let settings = self.require_identity(caller)?.settings;
        if !settings.read_receipts_enabled {
            return Ok(Outcome::new(message.to_wire()));
        }

        let changed = message.lifecycle.mark_read(now).map_err(gone)?;
        if !changed {
            return Ok(Outcome::new(message.to_wire()));
        }
        self.storage.store_message(&message)?;

        Ok(Outcome::new(message.to_wire())
            .push(message.sender_id, Event::MessageRead { message_id: id, read_at: now }))
    }

    /// Number of visible, unread messages addressed to `caller`.
    ///
    /// # Errors
    ///
    /// - `Storage` on backend failure
    pub fn unread_count(&self, caller: UserId) -> Result<Outcome<usize>, ServerError> {
        let now = self.env.now();
        let unread = self
            .storage
            .messages_involving(caller)?
            .iter()
            .filter(|m| m.recipient_id == caller && !m.lifecycle.read)
            .filter(|m| m.lifecycle.is_visible(now))
            .count();
        Ok(Outcome::new(unread))
    }

    /// Every message visible to `caller`, oldest first.
    ///
    /// # Errors
    ///
    /// - `Storage` on backend failure
    pub fn export_messages(&self, caller: UserId) -> Result<Outcome<Vec<MessageWire>>, ServerError> {
        let now = self.env.now();
        let exported = self
            .storage
            .messages_involving(caller)?
            .iter()
            .filter(|m| visible_to(m, caller, now))
            .map(Message::to_wire)
            .collect();
        Ok(Outcome::new(exported))
    }

    /// Relay `caller`'s typing state to `to`, unless `caller` disabled
    /// typing indicators.
    ///
    /// # Errors
    ///
    /// - `NotFound` if either user never registered
    pub fn typing(
        &mut self,
        caller: UserId,
        to: UserId,
        is_typing: bool,
    ) -> Result<Outcome<()>, ServerError> {
        let settings = self.require_identity(caller)?.settings;
        self.require_identity(to)?;

        let outcome = Outcome::new(());
        if settings.typing_indicators_enabled {
            Ok(outcome.push(to, Event::UserTyping { user_id: caller, is_typing }))
        } else {
            Ok(outcome)
        }
    }
}
