//! Error types for the core protocol state machines

use std::fmt;

use crate::protocol::{PacketKind, SeqNum};

/// Result type for core protocol operations
pub type RudpCoreResult<T> = std::result::Result<T, RudpCoreError>;

/// Errors produced by the wire codec and the handshake state machines.
///
/// Timeouts are not represented here: the core never waits, so timing out
/// is the runtime layer's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RudpCoreError {
    /// Datagram could not be parsed as a protocol packet
    Malformed { message: String },
    /// A handshake reply carried the wrong sequence number
    HandshakeMismatch { expected: SeqNum, got: SeqNum },
    /// A packet of the wrong kind arrived for the current handshake state
    UnexpectedPacket { kind: PacketKind },
}

impl RudpCoreError {
    /// Create a malformed-packet error
    pub fn malformed(message: impl Into<String>) -> Self {
        RudpCoreError::Malformed {
            message: message.into(),
        }
    }

    /// Create a handshake mismatch error
    pub fn mismatch(expected: SeqNum, got: SeqNum) -> Self {
        RudpCoreError::HandshakeMismatch { expected, got }
    }

    /// Create an unexpected-packet error
    pub fn unexpected(kind: PacketKind) -> Self {
        RudpCoreError::UnexpectedPacket { kind }
    }

    /// Whether the error came from a handshake exchange rather than parsing
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            RudpCoreError::HandshakeMismatch { .. } | RudpCoreError::UnexpectedPacket { .. }
        )
    }
}

impl fmt::Display for RudpCoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RudpCoreError::Malformed { message } => write!(f, "Malformed packet: {message}"),
            RudpCoreError::HandshakeMismatch { expected, got } => {
                write!(f, "Handshake mismatch: expected seq {expected}, got {got}")
            }
            RudpCoreError::UnexpectedPacket { kind } => {
                write!(f, "Unexpected {kind} packet during handshake")
            }
        }
    }
}

impl std::error::Error for RudpCoreError {}
