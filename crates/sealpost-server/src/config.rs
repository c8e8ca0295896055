//! Server configuration.

use std::time::Duration;

/// Tunables of the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Period of the scheduled-delivery sweep
    pub delivery_sweep_interval: Duration,
    /// Period of the self-destruct sweep
    pub expiry_sweep_interval: Duration,
    /// Unused prekey count below which a key fetch logs a replenish warning
    pub pre_key_low_watermark: usize,
    /// Maximum group messages returned by one listing
    pub max_conversation_page: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            delivery_sweep_interval: Duration::from_secs(60),
            expiry_sweep_interval: Duration::from_secs(60),
            pre_key_low_watermark: 2,
            max_conversation_page: 100,
        }
    }
}
