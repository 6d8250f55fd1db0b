//! Stop-and-wait send state.
//!
//! A [`PendingSend`] is the single packet in flight for one connection. The
//! runtime layer drives it:
//!
//! 1. [`PendingSend::transmit`] hands out the packet and arms a deadline.
//! 2. ACKs are offered to [`PendingSend::on_ack`] until one matches or the
//!    deadline passes.
//! 3. On a deadline, go back to 1. `transmit` returns `None` once the attempt
//!    budget is spent.
//!
//! Every retransmission is the identical packet: same sequence number, same
//! payload. The session counter is committed by the caller only after a
//! matching ACK, so abandoning a `PendingSend` never records progress.

use bytes::Bytes;
use std::time::{Duration, Instant};

use crate::config::ArqConfig;
use crate::protocol::{Packet, SeqNum};

/// An in-flight payload awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct PendingSend {
    seq: SeqNum,
    payload: Bytes,
    retries_remaining: u32,
    attempts: u32,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl PendingSend {
    pub fn new(seq: SeqNum, payload: Bytes, config: ArqConfig) -> Self {
        Self {
            seq,
            payload,
            retries_remaining: config.max_retries,
            attempts: 0,
            timeout: config.ack_timeout,
            deadline: None,
        }
    }

    pub fn seq(&self) -> SeqNum {
        self.seq
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Transmissions made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    /// Deadline of the current attempt, `None` before the first transmit
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume one attempt and return the packet to put on the wire, or
    /// `None` when the budget is exhausted.
    pub fn transmit(&mut self, now: Instant) -> Option<Packet> {
        if self.retries_remaining == 0 {
            return None;
        }
        self.retries_remaining -= 1;
        self.attempts += 1;
        self.deadline = Some(now + self.timeout);
        Some(Packet::Data {
            seq: self.seq,
            payload: self.payload.clone(),
        })
    }

    /// Whether the ACK number acknowledges this packet
    pub fn on_ack(&self, ack: SeqNum) -> bool {
        ack == self.seq
    }

    /// Whether the current attempt's deadline has passed
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// `true` for a retransmission rather than the first send
    pub fn is_retransmit(&self) -> bool {
        self.attempts > 1
    }
}
