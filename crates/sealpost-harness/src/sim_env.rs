//! Simulated environment.
//!
//! Clones share one clock and one RNG, so a test can hold a handle while the
//! driver owns another and both observe the same time.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rand_chacha::{
    ChaCha20Rng,
    rand_core::{RngCore, SeedableRng},
};
use sealpost_core::{CoreError, Environment};
use sealpost_proto::Timestamp;

/// Start of simulated time: 2023-11-14T22:13:20Z.
pub const SIM_EPOCH: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// Deterministic environment: manual clock, seeded RNG, switchable entropy.
#[derive(Debug, Clone)]
pub struct SimEnv {
    now: Arc<Mutex<Timestamp>>,
    rng: Arc<Mutex<ChaCha20Rng>>,
    entropy: Arc<AtomicBool>,
}

impl SimEnv {
    /// Environment at [`SIM_EPOCH`] with an RNG seeded from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self::starting_at(seed, SIM_EPOCH)
    }

    /// Environment at `start` with an RNG seeded from `seed`.
    pub fn starting_at(seed: u64, start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            entropy: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Move the shared clock forward.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().expect("Mutex poisoned");
        *now = now.plus(duration);
    }

    /// Jump the shared clock to `at`. Refuses to go backwards.
    pub fn set_time(&self, at: Timestamp) {
        let mut now = self.now.lock().expect("Mutex poisoned");
        assert!(at >= *now, "simulated clock cannot go backwards ({at} < {})", *now);
        *now = at;
    }

    /// Simulate a host without (or with restored) secure entropy.
    pub fn set_entropy_available(&self, available: bool) {
        self.entropy.store(available, Ordering::SeqCst);
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Timestamp {
        *self.now.lock().expect("Mutex poisoned")
    }

    fn try_random_bytes(&self, buffer: &mut [u8]) -> Result<(), CoreError> {
        if !self.entropy.load(Ordering::SeqCst) {
            return Err(CoreError::UnsupportedEnvironment);
        }
        self.rng.lock().expect("Mutex poisoned").fill_bytes(buffer);
        Ok(())
    }
}
