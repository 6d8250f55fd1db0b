//! Configuration types.
//!
//! [`RudpConfig`] extends the core [`ArqConfig`] with handshake, table, and
//! runtime settings.

use std::time::Duration;

use rudp_core::{constants, ArqConfig, SeqNum};

use crate::error::{Result, RudpError};

/// What to do when an established peer sends a fresh SYN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RehandshakePolicy {
    /// Keep the existing session and drop the SYN
    #[default]
    Ignore,
    /// Tear down the existing session and accept the SYN as a new connection
    Reset,
}

// ── RudpConfig ──────────────────────────────────────────────────────────

/// Endpoint configuration: ARQ settings plus handshake and table settings.
#[derive(Debug, Clone)]
pub struct RudpConfig {
    // Protocol settings (forwarded to rudp-core)
    pub max_retries: u32,
    pub ack_timeout: Duration,
    pub initial_seq: SeqNum,

    // Handshake
    pub handshake_timeout: Duration,
    pub handshake_retries: u32,
    pub rehandshake: RehandshakePolicy,
    pub accept_backlog: usize,

    // Receive side
    pub ack_duplicates: bool,
    pub recv_buffer_size: usize,
    pub channel_capacity: usize,

    // Connection table
    pub idle_timeout: Option<Duration>,
    pub sweep_interval: Duration,

    // Client
    pub response_timeout: Duration,
}

impl Default for RudpConfig {
    fn default() -> Self {
        Self {
            max_retries: constants::DEFAULT_MAX_RETRIES,
            ack_timeout: constants::DEFAULT_ACK_TIMEOUT,
            initial_seq: constants::DEFAULT_INITIAL_SEQ,
            handshake_timeout: constants::DEFAULT_ACK_TIMEOUT,
            handshake_retries: 5,
            rehandshake: RehandshakePolicy::Ignore,
            accept_backlog: 128,
            ack_duplicates: false,
            recv_buffer_size: constants::MAX_DATAGRAM,
            channel_capacity: 256,
            idle_timeout: Some(Duration::from_secs(300)),
            sweep_interval: Duration::from_secs(30),
            response_timeout: Duration::from_secs(10),
        }
    }
}

/// Extracts the protocol-only fields the core sender reads.
impl From<&RudpConfig> for ArqConfig {
    fn from(c: &RudpConfig) -> Self {
        ArqConfig::new(c.max_retries, c.ack_timeout)
    }
}

// ── Builder methods ─────────────────────────────────────────────────────

impl RudpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // -- ARQ --

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn initial_seq(mut self, seq: SeqNum) -> Self {
        self.initial_seq = seq;
        self
    }

    /// Re-acknowledge a retransmitted copy of the last accepted packet.
    ///
    /// Off by default: duplicates are dropped without an ACK and the sender's
    /// retry budget is the only recovery path.
    pub fn ack_duplicates(mut self, enabled: bool) -> Self {
        self.ack_duplicates = enabled;
        self
    }

    // -- Handshake --

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn handshake_retries(mut self, retries: u32) -> Self {
        self.handshake_retries = retries;
        self
    }

    pub fn rehandshake(mut self, policy: RehandshakePolicy) -> Self {
        self.rehandshake = policy;
        self
    }

    /// SYNs from new peers queued for `accept`; further SYNs are dropped
    /// until the queue drains and the peer retries.
    pub fn accept_backlog(mut self, backlog: usize) -> Self {
        self.accept_backlog = backlog;
        self
    }

    // -- Runtime --

    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Evict table entries idle for longer than `timeout`; `None` keeps them
    /// until explicitly closed.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn arq(&self) -> ArqConfig {
        ArqConfig::from(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(RudpError::config("max_retries must be greater than 0"));
        }
        if self.ack_timeout.is_zero() || self.handshake_timeout.is_zero() {
            return Err(RudpError::config("timeouts must be greater than 0"));
        }
        if self.handshake_retries == 0 {
            return Err(RudpError::config("handshake_retries must be greater than 0"));
        }
        if self.recv_buffer_size == 0 {
            return Err(RudpError::config("recv_buffer_size must be greater than 0"));
        }
        if self.channel_capacity == 0 {
            return Err(RudpError::config("channel_capacity must be greater than 0"));
        }
        if self.accept_backlog == 0 {
            return Err(RudpError::config("accept_backlog must be greater than 0"));
        }
        if self.idle_timeout.is_some() && self.sweep_interval.is_zero() {
            return Err(RudpError::config(
                "sweep_interval must be greater than 0 when idle eviction is on",
            ));
        }
        Ok(())
    }
}

// ── Presets ─────────────────────────────────────────────────────────────

impl RudpConfig {
    /// Five attempts, two seconds each
    pub fn reference() -> Self {
        Self::default()
    }

    /// Short timeouts for a local network
    pub fn lan() -> Self {
        Self::default()
            .ack_timeout(Duration::from_millis(200))
            .handshake_timeout(Duration::from_millis(500))
            .response_timeout(Duration::from_secs(3))
    }

    /// More attempts for links with heavy loss
    pub fn lossy() -> Self {
        Self::default()
            .max_retries(12)
            .handshake_retries(10)
            .ack_duplicates(true)
    }

    /// Sub-second timeouts for tests
    pub fn testing() -> Self {
        Self::default()
            .ack_timeout(Duration::from_millis(150))
            .handshake_timeout(Duration::from_millis(300))
            .response_timeout(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behaviour() {
        let config = RudpConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.ack_timeout, Duration::from_secs(2));
        assert_eq!(config.initial_seq, 0);
        assert_eq!(config.rehandshake, RehandshakePolicy::Ignore);
        assert!(!config.ack_duplicates);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn arq_config_forwards_protocol_fields() {
        let config = RudpConfig::new()
            .max_retries(3)
            .ack_timeout(Duration::from_millis(50));
        let arq = config.arq();
        assert_eq!(arq.max_retries, 3);
        assert_eq!(arq.ack_timeout, Duration::from_millis(50));
    }

    #[test]
    fn validate_rejects_zero_values() {
        assert!(RudpConfig::new().max_retries(0).validate().is_err());
        assert!(RudpConfig::new().ack_timeout(Duration::ZERO).validate().is_err());
        assert!(RudpConfig::new().channel_capacity(0).validate().is_err());
        assert!(RudpConfig::new().accept_backlog(0).validate().is_err());
        assert!(RudpConfig::new()
            .sweep_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(RudpConfig::new()
            .idle_timeout(None)
            .sweep_interval(Duration::ZERO)
            .validate()
            .is_ok());
    }

    #[test]
    fn presets_are_valid() {
        for config in [
            RudpConfig::reference(),
            RudpConfig::lan(),
            RudpConfig::lossy(),
            RudpConfig::testing(),
        ] {
            assert!(config.validate().is_ok());
        }
    }
}
