//! Error types for the async runtime layer.
//!
//! [`RudpError`] extends [`rudp_core::RudpCoreError`] with I/O, timeout,
//! delivery, config, and codec variants.

use std::fmt;
use thiserror::Error;

use rudp_core::{RudpCoreError, SeqNum};

use crate::http::CodecError;

pub type Result<T> = std::result::Result<T, RudpError>;

// ── Error types ─────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RudpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Handshake failed: {kind}")]
    Handshake { kind: HandshakeError },

    #[error("Delivery of seq {seq} failed after {attempts} attempts")]
    DeliveryTimeout { seq: SeqNum, attempts: u32 },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Connection error: {kind}")]
    Connection { kind: ConnectionError },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// No reply within the handshake timeout
    Timeout,
    /// Reply carried the wrong sequence number
    Mismatch { expected: SeqNum, got: SeqNum },
    /// Reply was not the packet the handshake step waits for
    Unexpected { kind: rudp_core::PacketKind },
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "no reply from peer"),
            Self::Mismatch { expected, got } => {
                write!(f, "expected seq {expected}, got {got}")
            }
            Self::Unexpected { kind } => write!(f, "unexpected {kind} packet"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    Closed,
    AlreadyConnected,
    NotEstablished,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::AlreadyConnected => write!(f, "peer already has a connection"),
            Self::NotEstablished => write!(f, "connection not established"),
        }
    }
}

// ── Bridge: core errors → RudpError ─────────────────────────────────────

impl From<RudpCoreError> for RudpError {
    fn from(e: RudpCoreError) -> Self {
        match e {
            RudpCoreError::Malformed { message } => Self::Protocol { message },
            RudpCoreError::HandshakeMismatch { expected, got } => Self::Handshake {
                kind: HandshakeError::Mismatch { expected, got },
            },
            RudpCoreError::UnexpectedPacket { kind } => Self::Handshake {
                kind: HandshakeError::Unexpected { kind },
            },
        }
    }
}

// ── Constructors & classification ───────────────────────────────────────

impl RudpError {
    pub fn handshake(kind: HandshakeError) -> Self {
        Self::Handshake { kind }
    }

    pub fn connection(kind: ConnectionError) -> Self {
        Self::Connection { kind }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Failures the caller may simply retry (the whole handshake or send).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            Self::Handshake { .. } | Self::DeliveryTimeout { .. } | Self::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::Connection {
                kind: ConnectionError::Closed
            }
        )
    }
}
