//! Configuration types for the core protocol state machines

use std::time::Duration;

use crate::protocol::constants;

/// Protocol-only ARQ settings.
///
/// Contains only the fields the stop-and-wait sender reads; no transport or
/// runtime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArqConfig {
    /// Total transmissions of one packet before giving up
    pub max_retries: u32,
    /// How long each transmission waits for its ACK
    pub ack_timeout: Duration,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            max_retries: constants::DEFAULT_MAX_RETRIES,
            ack_timeout: constants::DEFAULT_ACK_TIMEOUT,
        }
    }
}

impl ArqConfig {
    pub fn new(max_retries: u32, ack_timeout: Duration) -> Self {
        Self {
            max_retries,
            ack_timeout,
        }
    }
}
