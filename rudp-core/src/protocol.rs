//! Wire format: text tokens separated by `:`.
//!
//! ```text
//!  SYN:<seq>          handshake open
//!  SYN-ACK:<seq>      handshake reply
//!  ACK:<seq>          handshake completion / data acknowledgment
//!  <seq>:<payload>    data; payload is opaque and may itself contain ':'
//! ```
//!
//! Sequence numbers are ASCII decimal `u32`. Anything else is malformed.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::error::{RudpCoreError, RudpCoreResult};

/// Protocol constants
pub mod constants {
    use std::time::Duration;

    pub const TOKEN_SYN: &[u8] = b"SYN";
    pub const TOKEN_SYN_ACK: &[u8] = b"SYN-ACK";
    pub const TOKEN_ACK: &[u8] = b"ACK";
    pub const SEPARATOR: u8 = b':';

    pub const DEFAULT_MAX_RETRIES: u32 = 5;
    pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);
    pub const DEFAULT_INITIAL_SEQ: u32 = 0;
    /// Receive buffer large enough for any UDP datagram
    pub const MAX_DATAGRAM: usize = 65_536;
    /// `u32::MAX` has ten decimal digits
    pub const MAX_SEQ_DIGITS: usize = 10;
}

/// Sequence number type
pub type SeqNum = u32;

/// Discriminant of a [`Packet`], used for logging and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Syn,
    SynAck,
    Ack,
    Data,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketKind::Syn => "SYN",
            PacketKind::SynAck => "SYN-ACK",
            PacketKind::Ack => "ACK",
            PacketKind::Data => "DATA",
        };
        f.write_str(name)
    }
}

/// One protocol datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Syn(SeqNum),
    SynAck(SeqNum),
    Ack(SeqNum),
    Data { seq: SeqNum, payload: Bytes },
}

impl Packet {
    /// Build a data packet
    pub fn data(seq: SeqNum, payload: impl Into<Bytes>) -> Self {
        Packet::Data {
            seq,
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Syn(_) => PacketKind::Syn,
            Packet::SynAck(_) => PacketKind::SynAck,
            Packet::Ack(_) => PacketKind::Ack,
            Packet::Data { .. } => PacketKind::Data,
        }
    }

    /// Sequence number carried by the packet, whatever its kind
    pub fn seq(&self) -> SeqNum {
        match self {
            Packet::Syn(seq) | Packet::SynAck(seq) | Packet::Ack(seq) => *seq,
            Packet::Data { seq, .. } => *seq,
        }
    }

    /// Serialise into a datagram
    pub fn encode(&self) -> Bytes {
        let payload_len = match self {
            Packet::Data { payload, .. } => payload.len(),
            _ => 0,
        };
        let mut buf = BytesMut::with_capacity(constants::MAX_SEQ_DIGITS + 9 + payload_len);

        match self {
            Packet::Syn(seq) => put_control(&mut buf, constants::TOKEN_SYN, *seq),
            Packet::SynAck(seq) => put_control(&mut buf, constants::TOKEN_SYN_ACK, *seq),
            Packet::Ack(seq) => put_control(&mut buf, constants::TOKEN_ACK, *seq),
            Packet::Data { seq, payload } => {
                buf.put_slice(seq.to_string().as_bytes());
                buf.put_u8(constants::SEPARATOR);
                buf.put_slice(payload);
            }
        }

        buf.freeze()
    }

    /// Parse a datagram.
    ///
    /// The data payload is sliced out of `buf` without copying.
    pub fn decode(buf: Bytes) -> RudpCoreResult<Self> {
        let sep = buf
            .iter()
            .position(|&b| b == constants::SEPARATOR)
            .ok_or_else(|| RudpCoreError::malformed("missing ':' separator"))?;

        let head = &buf[..sep];
        let tail = &buf[sep + 1..];

        match head {
            constants::TOKEN_SYN => Ok(Packet::Syn(parse_seq(tail)?)),
            constants::TOKEN_SYN_ACK => Ok(Packet::SynAck(parse_seq(tail)?)),
            constants::TOKEN_ACK => Ok(Packet::Ack(parse_seq(tail)?)),
            _ => {
                let seq = parse_seq(head)?;
                Ok(Packet::Data {
                    seq,
                    payload: buf.slice(sep + 1..),
                })
            }
        }
    }
}

fn put_control(buf: &mut BytesMut, token: &[u8], seq: SeqNum) {
    buf.put_slice(token);
    buf.put_u8(constants::SEPARATOR);
    buf.put_slice(seq.to_string().as_bytes());
}

fn parse_seq(digits: &[u8]) -> RudpCoreResult<SeqNum> {
    if digits.is_empty() {
        return Err(RudpCoreError::malformed("empty sequence number"));
    }
    if digits.len() > constants::MAX_SEQ_DIGITS || !digits.iter().all(u8::is_ascii_digit) {
        return Err(RudpCoreError::malformed(format!(
            "invalid sequence number {:?}",
            String::from_utf8_lossy(digits)
        )));
    }

    // All bytes are ASCII digits, so the str conversion cannot fail; the
    // parse still can on overflow.
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<SeqNum>().ok())
        .ok_or_else(|| RudpCoreError::malformed("sequence number out of range"))
}
