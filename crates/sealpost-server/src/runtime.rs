//! Async runtime around the driver: periodic sweeps and push fan-out.
//!
//! The driver sits behind one `tokio::sync::Mutex`, so request handling and
//! the two sweeps never interleave inside a read-modify-write.

use std::{sync::Arc, time::Duration};

use sealpost_core::Environment;
use sealpost_proto::{Event, UserId};
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    config::ServerConfig,
    driver::{ServerAction, ServerDriver, ServerEvent},
    storage::Storage,
};

/// Driver shared between request handlers and sweep tasks.
pub type SharedDriver<E, S> = Arc<Mutex<ServerDriver<E, S>>>;

/// A push addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Push {
    /// Target user
    pub recipient: UserId,
    /// Event to deliver
    pub event: Event,
}

/// Destination of push events, implemented by the session layer.
pub trait PushSink: Send + Sync + 'static {
    /// Deliver `event` to every live session of `recipient`. Users without a
    /// live session miss it; they catch up through the read paths.
    fn deliver(&self, push: Push);
}

/// Forwards pushes into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Push>,
}

impl ChannelSink {
    /// Sink plus the receiving end the session layer drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Push>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl PushSink for ChannelSink {
    fn deliver(&self, push: Push) {
        if self.sender.send(push).is_err() {
            tracing::debug!("push receiver closed, dropping event");
        }
    }
}

/// Execute driver actions against `sink`.
pub fn execute_actions<P: PushSink + ?Sized>(sink: &P, actions: Vec<ServerAction>) {
    for action in actions {
        match action {
            ServerAction::Push { recipient, event } => {
                tracing::trace!(%recipient, event = event.name(), "push");
                sink.deliver(Push { recipient, event });
            },
        }
    }
}

/// Handles of the two sweep tasks.
pub struct Sweeps {
    shutdown: watch::Sender<bool>,
    delivery: JoinHandle<()>,
    expiry: JoinHandle<()>,
}

impl Sweeps {
    /// Spawn the delivery and expiry sweeps on the current runtime.
    ///
    /// Each runs immediately and then every configured interval. A tick that
    /// fires late is not replayed in a burst; the schedule shifts instead.
    pub fn spawn<E, S, P>(
        driver: SharedDriver<E, S>,
        sink: Arc<P>,
        config: &ServerConfig,
    ) -> Self
    where
        E: Environment,
        S: Storage,
        P: PushSink,
    {
        let (shutdown, watcher) = watch::channel(false);

        let delivery = tokio::spawn(sweep_loop(
            Arc::clone(&driver),
            Arc::clone(&sink),
            ServerEvent::DeliverySweep,
            config.delivery_sweep_interval,
            watcher.clone(),
        ));
        let expiry = tokio::spawn(sweep_loop(
            driver,
            sink,
            ServerEvent::ExpirySweep,
            config.expiry_sweep_interval,
            watcher,
        ));

        Self { shutdown, delivery, expiry }
    }

    /// Stop both sweeps and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for (name, handle) in [("delivery", self.delivery), ("expiry", self.expiry)] {
            if let Err(err) = handle.await {
                tracing::error!(sweep = name, %err, "sweep task failed");
            }
        }
    }
}

async fn sweep_loop<E, S, P>(
    driver: SharedDriver<E, S>,
    sink: Arc<P>,
    event: ServerEvent,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    E: Environment,
    S: Storage,
    P: PushSink,
{
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = shutdown.changed() => break,
        }

        let result = driver.lock().await.process_event(event);
        match result {
            Ok(actions) => execute_actions(sink.as_ref(), actions),
            Err(err) => tracing::warn!(?event, %err, "sweep failed, retrying next tick"),
        }
    }

    tracing::debug!(?event, "sweep stopped");
}
