//! Delivery and expiry sweeps.
//!
//! Both sweeps materialize what read paths already compute lazily. A missed
//! tick only delays a push or a soft-delete; it never changes what a reader
//! sees.

use sealpost_core::{Environment, Release};
use sealpost_proto::Event;

use crate::{
    driver::{ServerAction, ServerDriver},
    error::ServerError,
    storage::Storage,
};

impl<E: Environment, S: Storage> ServerDriver<E, S> {
    /// Release scheduled messages whose instant has come.
    ///
    /// Each released message yields exactly one `NewMessage` push. A due
    /// message that is already past its self-destruct instant is destructed
    /// instead and pushes nothing. A message whose write fails stays
    /// scheduled for the next sweep; the pushes of messages already released
    /// are still returned.
    pub(crate) fn deliver_due(&mut self) -> Result<Vec<ServerAction>, ServerError> {
        let now = self.env.now();
        let mut actions = Vec::new();
        let mut destructed = 0usize;
        let mut failed = 0usize;

        for mut message in self.storage.scheduled_messages()? {
            let release = message.lifecycle.release(now);
            if release == Release::NotDue {
                continue;
            }
            if let Err(err) = self.storage.store_message(&message) {
                tracing::warn!(message = %message.id, %err, "release not stored, retrying next sweep");
                failed += 1;
                continue;
            }

            if release == Release::Released {
                actions.push(ServerAction::Push {
                    recipient: message.recipient_id,
                    event: Event::NewMessage(message.to_wire()),
                });
            } else {
                destructed += 1;
            }
        }

        if !actions.is_empty() || destructed > 0 || failed > 0 {
            tracing::info!(released = actions.len(), destructed, failed, "delivery sweep");
        }
        Ok(actions)
    }

    /// Soft-delete every message past its self-destruct instant. No push:
    /// clients enforce the same cutoff locally. A failed write is retried by
    /// the next sweep.
    pub(crate) fn expire_destructed(&mut self) -> Result<Vec<ServerAction>, ServerError> {
        let now = self.env.now();
        let mut expired = 0usize;
        let mut failed = 0usize;

        for mut message in self.storage.destructible_messages()? {
            if !message.lifecycle.expire(now) {
                continue;
            }
            match self.storage.store_message(&message) {
                Ok(()) => expired += 1,
                Err(err) => {
                    tracing::warn!(message = %message.id, %err, "expiry not stored, retrying next sweep");
                    failed += 1;
                },
            }
        }

        if expired > 0 || failed > 0 {
            tracing::info!(expired, failed, "expiry sweep");
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sealpost_core::{FirstContactPolicy, RecipientKeys, encrypt_message};
    use sealpost_proto::{MessageId, MessageType, Timestamp, UserId};

    use super::*;
    use crate::driver::{
        ServerEvent,
        test_support::{TestDriver, driver, registered},
    };

    fn send(
        driver: &mut TestDriver,
        scheduled_for: Option<Timestamp>,
        self_destruct_at: Option<Timestamp>,
    ) -> MessageId {
        let keys = driver.fetch_keys(UserId(1), UserId(2)).unwrap().value;
        let recipient = RecipientKeys::from_response(UserId(2), &keys).unwrap();
        let request = encrypt_message(
            driver.env(),
            &recipient,
            b"timed",
            FirstContactPolicy::AllowIdentityFallback,
        )
        .unwrap()
        .into_request(MessageType::Text, scheduled_for, self_destruct_at);
        driver.send_message(UserId(1), &request).unwrap().value.id
    }

    fn setup() -> TestDriver {
        let mut driver = driver();
        registered(&mut driver, 1, 0);
        registered(&mut driver, 2, 0);
        driver
    }

    fn secs(driver: &TestDriver, n: u64) -> Timestamp {
        driver.env().now().plus(Duration::from_secs(n))
    }

    #[test]
    fn release_happens_once() {
        let mut driver = setup();
        let due = secs(&driver, 60);
        let id = send(&mut driver, Some(due), None);

        driver.env().advance(Duration::from_secs(10));
        assert!(driver.process_event(ServerEvent::DeliverySweep).unwrap().is_empty());

        driver.env().advance(Duration::from_secs(60));
        let actions = driver.process_event(ServerEvent::DeliverySweep).unwrap();
        assert!(matches!(
            actions.as_slice(),
            [ServerAction::Push { recipient: UserId(2), event: Event::NewMessage(m) }] if m.id == id
        ));
        assert!(driver.process_event(ServerEvent::DeliverySweep).unwrap().is_empty());
    }

    #[test]
    fn destruct_wins_over_late_delivery() {
        let mut driver = setup();
        let due = secs(&driver, 60);
        let destruct = secs(&driver, 30);
        let id = send(&mut driver, Some(due), Some(destruct));

        driver.env().advance(Duration::from_secs(120));
        assert!(driver.process_event(ServerEvent::DeliverySweep).unwrap().is_empty());

        let stored = driver.storage().load_message(id).unwrap().unwrap();
        assert!(stored.lifecycle.deleted);
        assert!(!stored.lifecycle.is_scheduled);
    }

    #[test]
    fn expiry_sweep_soft_deletes_at_cutoff() {
        let mut driver = setup();
        let destruct = secs(&driver, 5);
        let id = send(&mut driver, None, Some(destruct));
        let kept = send(&mut driver, None, None);

        driver.env().advance(Duration::from_secs(4));
        driver.process_event(ServerEvent::ExpirySweep).unwrap();
        assert!(!driver.storage().load_message(id).unwrap().unwrap().lifecycle.deleted);

        driver.env().advance(Duration::from_secs(1));
        driver.process_event(ServerEvent::ExpirySweep).unwrap();
        assert!(driver.storage().load_message(id).unwrap().unwrap().lifecycle.deleted);
        assert!(!driver.storage().load_message(kept).unwrap().unwrap().lifecycle.deleted);
    }
}
