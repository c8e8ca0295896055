//! Server driver.
//!
//! Ties together the key directory, message store, group bookkeeping and the
//! sweeps over one [`Storage`]. Every operation takes the authenticated caller
//! and returns an [`Outcome`]: the response value plus the push events the
//! runtime must deliver. The driver performs no I/O besides storage calls and
//! reads time only through its [`Environment`].

use sealpost_core::{Environment, Message};
use sealpost_proto::{Event, MessageId, UserId};

use crate::{
    config::ServerConfig,
    error::ServerError,
    storage::{Storage, StoredIdentity},
};

/// Timer events the runtime feeds into the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    /// Release scheduled messages whose instant has come
    DeliverySweep,
    /// Soft-delete messages past their self-destruct instant
    ExpirySweep,
}

/// Actions that the server driver produces.
///
/// These are executed by runtime-specific code (production or simulation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Deliver a push event to every live session of `recipient`
    Push {
        /// Target user
        recipient: UserId,
        /// Event to deliver
        event: Event,
    },
}

/// Response value of an operation plus the actions it triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    /// Response to the caller
    pub value: T,
    /// Side effects for the runtime
    pub actions: Vec<ServerAction>,
}

impl<T> Outcome<T> {
    /// An outcome without side effects.
    pub fn new(value: T) -> Self {
        Self { value, actions: Vec::new() }
    }

    /// Append a push to `recipient`.
    #[must_use]
    pub fn push(mut self, recipient: UserId, event: Event) -> Self {
        self.actions.push(ServerAction::Push { recipient, event });
        self
    }

    /// Append a push of `event` to each of `recipients`.
    #[must_use]
    pub fn push_all(mut self, recipients: impl IntoIterator<Item = UserId>, event: &Event) -> Self {
        for recipient in recipients {
            self.actions.push(ServerAction::Push { recipient, event: event.clone() });
        }
        self
    }
}

/// Action-based relay logic.
///
/// Generic over the environment (clock, entropy) and the storage backend so
/// the same code runs in production and in simulation.
pub struct ServerDriver<E: Environment, S: Storage> {
    pub(crate) env: E,
    pub(crate) storage: S,
    pub(crate) config: ServerConfig,
}

impl<E: Environment, S: Storage> ServerDriver<E, S> {
    /// Create a driver over `storage`.
    pub fn new(env: E, storage: S, config: ServerConfig) -> Self {
        Self { env, storage, config }
    }

    /// Environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Process a timer event.
    ///
    /// # Errors
    ///
    /// - `Storage` if the sweep could not read or write records; records
    ///   already processed stay processed and the next tick resumes
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, ServerError> {
        match event {
            ServerEvent::DeliverySweep => self.deliver_due(),
            ServerEvent::ExpirySweep => self.expire_destructed(),
        }
    }

    pub(crate) fn require_identity(&self, user_id: UserId) -> Result<StoredIdentity, ServerError> {
        self.storage.load_identity(user_id)?.ok_or(ServerError::NotFound { resource: "user" })
    }

    /// Load a message `caller` takes part in. Messages of other users are
    /// reported as missing rather than forbidden.
    pub(crate) fn load_own_message(
        &self,
        caller: UserId,
        id: MessageId,
    ) -> Result<Message, ServerError> {
        self.storage
            .load_message(id)?
            .filter(|m| m.involves(caller))
            .ok_or(ServerError::NotFound { resource: "message" })
    }
}
