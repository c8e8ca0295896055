//! Deterministic simulation harness for Sealpost protocol testing.
//!
//! [`SimEnv`] replaces the system clock and OS entropy with a manually
//! advanced clock and a seeded ChaCha RNG, so every scenario replays
//! identically from its seed.
//!
//! # Simulation
//!
//! [`SimServer`] wraps the Sans-IO server driver over in-memory storage and
//! executes its push actions into per-user inboxes. [`SimClient`] holds one
//! user's [`KeyStore`](sealpost_core::KeyStore) and drives the client half of
//! each flow against it.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks protocol properties against a
//! [`SystemSnapshot`] of the simulated system. Use
//! [`InvariantRegistry::standard()`] after every step of a scenario.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_client;
pub mod sim_env;
pub mod sim_server;

pub use invariants::{
    EditAuditTrail, EnvelopesComplete, GroupKeyAgreement, GroupSnapshot, Invariant,
    InvariantRegistry, InvariantResult, PreKeysHandedOutOnce, ScheduledStaysHidden, SystemSnapshot,
    Violation,
};
pub use sim_client::{Sent, SimClient, SimError};
pub use sim_env::SimEnv;
pub use sim_server::SimServer;
