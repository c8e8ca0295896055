//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (wall clock, entropy).
//! Production uses the OS clock and `getrandom`; simulation uses a manually
//! advanced clock and a seeded RNG so every scenario replays identically.

use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};
use sealpost_proto::Timestamp;

use crate::error::CoreError;

/// Abstract environment providing time and randomness.
///
/// # Invariants
///
/// - `now()` never goes backwards within one execution context
/// - `try_random_bytes()` uses cryptographically secure entropy in production
/// - Entropy failure is reported, never papered over with weak randomness
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time.
    fn now(&self) -> Timestamp;

    /// Fill `buffer` with secure random bytes.
    ///
    /// # Errors
    ///
    /// - `UnsupportedEnvironment`: no secure entropy source is available
    fn try_random_bytes(&self, buffer: &mut [u8]) -> Result<(), CoreError>;

    /// A CSPRNG for one crypto operation, seeded from 32 bytes of entropy.
    ///
    /// # Errors
    ///
    /// - `UnsupportedEnvironment`: no secure entropy source is available
    fn crypto_rng(&self) -> Result<ChaCha20Rng, CoreError> {
        let mut seed = zeroize::Zeroizing::new([0u8; 32]);
        self.try_random_bytes(&mut seed[..])?;
        Ok(ChaCha20Rng::from_seed(*seed))
    }
}

#[cfg(test)]
pub(crate) mod test_env {
    #![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

    use std::sync::{Arc, Mutex};

    use rand_chacha::{
        ChaCha20Rng,
        rand_core::{RngCore, SeedableRng},
    };
    use sealpost_proto::Timestamp;

    use super::Environment;
    use crate::error::CoreError;

    /// Seeded environment for unit tests.
    #[derive(Clone)]
    pub(crate) struct TestEnv {
        rng: Arc<Mutex<ChaCha20Rng>>,
        now: Arc<Mutex<Timestamp>>,
        entropy: bool,
    }

    impl TestEnv {
        pub(crate) fn new(seed: u64) -> Self {
            Self {
                rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
                now: Arc::new(Mutex::new(Timestamp::from_millis(1_700_000_000_000))),
                entropy: true,
            }
        }

        pub(crate) fn without_entropy() -> Self {
            Self { entropy: false, ..Self::new(0) }
        }
    }

    impl Environment for TestEnv {
        fn now(&self) -> Timestamp {
            *self.now.lock().expect("Mutex poisoned")
        }

        fn try_random_bytes(&self, buffer: &mut [u8]) -> Result<(), CoreError> {
            if !self.entropy {
                return Err(CoreError::UnsupportedEnvironment);
            }
            self.rng.lock().expect("Mutex poisoned").fill_bytes(buffer);
            Ok(())
        }
    }
}
