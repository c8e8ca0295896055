//! Message lifecycle state machine.
//!
//! Governs visibility and mutability independently of the ciphertext. Flags
//! `edited`, `deleted` and `pinned` are non-exclusive; scheduling is a
//! separate `scheduled → released` axis.
//!
//! # Visibility
//!
//! [`Lifecycle::is_visible`] is the single visibility predicate. Read paths
//! apply it lazily with the request's `now`; the expiry sweep materializes the
//! same cutoff eagerly by setting `deleted`. Both compare `self_destruct_at <=
//! now`, so no message is readable on one path after the other purged it.
//!
//! # Destruct wins
//!
//! A message that is both due for delivery and past its self-destruct instant
//! is destructed by [`Lifecycle::release`], never delivered.

use sealpost_proto::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who is looking at a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Author; sees its own scheduled messages
    Sender,
    /// Addressee; never sees a message before its release
    Recipient,
}

/// Refused lifecycle transition.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    /// The message was soft-deleted
    #[error("message is deleted")]
    Deleted,
    /// The message is past its self-destruct instant
    #[error("message has self-destructed")]
    Destructed,
}

/// Result of offering a message to the delivery sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Became visible; fire exactly one delivery event
    Released,
    /// Was due but already gone; no event
    Destructed,
    /// Not scheduled, or not due yet
    NotDue,
}

/// Lifecycle flags and timestamps of a 1:1 message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    /// Recipient has fetched it
    pub delivered: bool,
    /// Recipient marked it read
    pub read: bool,
    /// Read time
    pub read_at: Option<Timestamp>,
    /// Content replaced at least once
    pub edited: bool,
    /// Latest edit time
    pub edited_at: Option<Timestamp>,
    /// Soft-deleted
    pub deleted: bool,
    /// Deletion time
    pub deleted_at: Option<Timestamp>,
    /// Pinned by either party
    pub pinned: bool,
    /// Pin time
    pub pinned_at: Option<Timestamp>,
    /// Requested delivery instant
    pub scheduled_for: Option<Timestamp>,
    /// Waiting for release
    pub is_scheduled: bool,
    /// Self-destruct instant
    pub self_destruct_at: Option<Timestamp>,
}

impl Lifecycle {
    /// State of a message sent at `now`. Only a `scheduled_for` strictly in
    /// the future schedules it.
    pub fn new(
        now: Timestamp,
        scheduled_for: Option<Timestamp>,
        self_destruct_at: Option<Timestamp>,
    ) -> Self {
        Self {
            scheduled_for,
            is_scheduled: scheduled_for.is_some_and(|at| at > now),
            self_destruct_at,
            ..Self::default()
        }
    }

    /// `!deleted && (self_destruct_at is unset or > now) && (!is_scheduled ||
    /// scheduled_for <= now)`.
    pub fn is_visible(&self, now: Timestamp) -> bool {
        !self.deleted && !self.is_destructed(now) && (!self.is_scheduled || self.is_due(now))
    }

    /// [`Lifecycle::is_visible`], except that a sender also sees its own
    /// not-yet-released messages.
    pub fn is_visible_to(&self, audience: Audience, now: Timestamp) -> bool {
        match audience {
            Audience::Recipient => self.is_visible(now),
            Audience::Sender => !self.deleted && !self.is_destructed(now),
        }
    }

    /// Past its self-destruct instant.
    pub fn is_destructed(&self, now: Timestamp) -> bool {
        self.self_destruct_at.is_some_and(|at| at <= now)
    }

    /// Scheduled and its instant has come.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.is_scheduled && self.scheduled_for.is_none_or(|at| at <= now)
    }

    /// Delivery sweep transition.
    pub fn release(&mut self, now: Timestamp) -> Release {
        if !self.is_due(now) {
            return Release::NotDue;
        }

        self.is_scheduled = false;
        if self.deleted || self.expire(now) {
            Release::Destructed
        } else {
            Release::Released
        }
    }

    /// Expiry sweep transition: soft-delete a message past its self-destruct
    /// instant. Returns whether anything changed.
    pub fn expire(&mut self, now: Timestamp) -> bool {
        if self.deleted || !self.is_destructed(now) {
            return false;
        }
        self.deleted = true;
        self.deleted_at = Some(now);
        true
    }

    /// Whether edit, pin and delete are still allowed.
    pub fn check_mutable(&self, now: Timestamp) -> Result<(), TransitionError> {
        if self.deleted {
            Err(TransitionError::Deleted)
        } else if self.is_destructed(now) {
            Err(TransitionError::Destructed)
        } else {
            Ok(())
        }
    }

    /// Record an edit.
    pub fn mark_edited(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        self.check_mutable(now)?;
        self.edited = true;
        self.edited_at = Some(now);
        Ok(())
    }

    /// Soft-delete. Ciphertext is kept; every read path hides it.
    pub fn delete(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        self.check_mutable(now)?;
        self.deleted = true;
        self.deleted_at = Some(now);
        Ok(())
    }

    /// Pin or unpin.
    pub fn set_pinned(&mut self, pinned: bool, now: Timestamp) -> Result<(), TransitionError> {
        self.check_mutable(now)?;
        self.pinned = pinned;
        self.pinned_at = pinned.then_some(now);
        Ok(())
    }

    /// Mark fetched by the recipient. Returns whether it changed.
    pub fn mark_delivered(&mut self) -> bool {
        !std::mem::replace(&mut self.delivered, true)
    }

    /// Mark read by the recipient. Returns whether it changed.
    pub fn mark_read(&mut self, now: Timestamp) -> Result<bool, TransitionError> {
        self.check_mutable(now)?;
        if self.read {
            return Ok(false);
        }
        self.read = true;
        self.read_at = Some(now);
        Ok(true)
    }
}
