//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` reads the wall clock for every timestamp and draws entropy from
//! the OS through getrandom. Production behavior is therefore
//! non-deterministic; simulation swaps in a seeded environment instead.

use sealpost_core::{CoreError, Environment};
use sealpost_proto::Timestamp;

/// Production environment using the system clock and OS randomness.
///
/// # Security
///
/// getrandom provides OS-level cryptographic randomness (e.g. `getrandom(2)`
/// on Linux). A failure is reported as `UnsupportedEnvironment` and blocks the
/// operation that needed it; nothing falls back to a weaker source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Timestamp {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        Timestamp::from_millis(millis)
    }

    fn try_random_bytes(&self, buffer: &mut [u8]) -> Result<(), CoreError> {
        getrandom::fill(buffer).map_err(|_| CoreError::UnsupportedEnvironment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::disallowed_methods)]
    fn system_env_time_advances() {
        let env = SystemEnv::new();

        let t1 = env.now();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let t2 = env.now();

        assert!(t2 > t1, "Time should advance");
    }

    #[test]
    fn system_env_random_bytes_are_random() {
        let env = SystemEnv::new();

        let mut bytes1 = [0u8; 32];
        let mut bytes2 = [0u8; 32];

        env.try_random_bytes(&mut bytes1).unwrap();
        env.try_random_bytes(&mut bytes2).unwrap();

        // Extremely unlikely to be equal if random
        assert_ne!(bytes1, bytes2, "Random bytes should differ");
    }

    #[test]
    fn system_env_drives_key_generation() {
        let env = SystemEnv::new();
        let store = sealpost_core::KeyStore::generate(sealpost_proto::UserId(1), &env).unwrap();
        assert!(store.has_identity());
    }
}
