//! Sealpost relay server.
//!
//! The server stores and relays ciphertext. It never holds a secret key and
//! never sees plaintext: identities publish public keys, senders upload
//! envelopes, and the server enforces who may read, change or receive what.
//!
//! # Architecture
//!
//! [`ServerDriver`] follows the Sans-IO pattern: every operation takes the
//! authenticated caller, reads time from an [`Environment`], touches
//! [`Storage`] synchronously and returns an [`Outcome`] carrying the response
//! and the push events to deliver. [`runtime`] wraps it with Tokio: the two
//! sweeps run on intervals and pushes flow into a [`PushSink`].
//!
//! # Components
//!
//! - [`ServerDriver`]: key directory, messages, groups, files, sweeps
//! - [`storage`]: [`MemoryStorage`] for tests and simulation, [`RedbStorage`]
//!   for durable deployments
//! - [`runtime`]: sweep tasks and push fan-out
//! - [`SystemEnv`]: production environment (system clock, OS randomness)
//!
//! [`Environment`]: sealpost_core::Environment

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod driver;
mod error;
mod files;
mod groups;
mod keys;
mod messages;
pub mod runtime;
pub mod storage;
mod sweeper;
mod system_env;

pub use config::ServerConfig;
pub use driver::{Outcome, ServerAction, ServerDriver, ServerEvent};
pub use error::ServerError;
pub use runtime::{ChannelSink, Push, PushSink, SharedDriver, Sweeps};
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
pub use system_env::SystemEnv;
