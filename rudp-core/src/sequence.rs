//! Sequence counters and the per-connection [`Session`] that owns them.

use crate::protocol::SeqNum;

/// Monotonically increasing sequence number for one direction of a
/// connection. Wrap-around is not expected within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceCounter {
    value: SeqNum,
}

impl SequenceCounter {
    pub fn new(start: SeqNum) -> Self {
        Self { value: start }
    }

    pub fn current(&self) -> SeqNum {
        self.value
    }

    /// Advance by one and return the new value
    pub fn advance(&mut self) -> SeqNum {
        self.value = self.value.wrapping_add(1);
        self.value
    }
}

/// Outcome of offering an inbound data sequence number to a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataVerdict {
    /// In order: deliver and acknowledge
    Accept,
    /// Retransmission of the packet accepted last
    Duplicate,
    /// Anything else; never buffered
    OutOfOrder { expected: SeqNum },
}

/// Sequence state of one established connection.
///
/// Both directions start from the baseline agreed during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    send: SequenceCounter,
    recv: SequenceCounter,
}

impl Session {
    /// Session whose both directions start at `baseline`
    pub fn new(baseline: SeqNum) -> Self {
        Self {
            send: SequenceCounter::new(baseline),
            recv: SequenceCounter::new(baseline),
        }
    }

    /// Sequence number the next outbound payload will carry
    pub fn next_send(&self) -> SeqNum {
        self.send.current()
    }

    /// Sequence number the next inbound payload must carry
    pub fn next_expected(&self) -> SeqNum {
        self.recv.current()
    }

    /// Record that the payload tagged `seq` was acknowledged.
    ///
    /// Returns `false` (and changes nothing) if `seq` is not the number the
    /// session would have sent, e.g. a stale exchange finishing late.
    pub fn commit_send(&mut self, seq: SeqNum) -> bool {
        if seq != self.send.current() {
            return false;
        }
        self.send.advance();
        true
    }

    /// Offer an inbound data sequence number; advances on [`DataVerdict::Accept`].
    pub fn accept_data(&mut self, seq: SeqNum) -> DataVerdict {
        let expected = self.recv.current();
        if seq == expected {
            self.recv.advance();
            DataVerdict::Accept
        } else if seq.wrapping_add(1) == expected {
            DataVerdict::Duplicate
        } else {
            DataVerdict::OutOfOrder { expected }
        }
    }
}
