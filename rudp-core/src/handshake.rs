//! Three-way handshake state machines.
//!
//! ```text
//!  initiator                         responder
//!  Idle ──SYN:isn──────────────────▶ Idle
//!  SynSent                           SynReceived
//!          ◀──────────SYN-ACK:isn+1
//!  Established ──ACK:isn+1─────────▶ Established
//! ```
//!
//! Both sides end up with a [`Session`] whose two directions start at
//! `isn + 1`. Neither machine performs I/O or keeps time; the runtime
//! layer sends the returned packets and decides when to give up.

use crate::error::{RudpCoreError, RudpCoreResult};
use crate::protocol::{Packet, SeqNum};
use crate::sequence::{SequenceCounter, Session};

/// Handshake progress, shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    Idle,
    SynSent,
    SynReceived,
    Established,
}

/// Active-open side.
#[derive(Debug, Clone)]
pub struct Initiator {
    counter: SequenceCounter,
    state: HandshakeState,
}

impl Initiator {
    /// `isn` is the initiator's current sequence counter. It is only advanced
    /// inside the [`Session`] returned on success, so a failed attempt leaves
    /// the caller's counter untouched.
    pub fn new(isn: SeqNum) -> Self {
        Self {
            counter: SequenceCounter::new(isn),
            state: HandshakeState::Idle,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Emit the SYN and move to [`HandshakeState::SynSent`]
    pub fn syn(&mut self) -> Packet {
        self.state = HandshakeState::SynSent;
        Packet::Syn(self.counter.current())
    }

    /// Process the responder's reply.
    ///
    /// On a matching SYN-ACK returns the final ACK to send and the
    /// established session. Any other reply is a failed attempt.
    pub fn on_packet(&mut self, packet: &Packet) -> RudpCoreResult<(Packet, Session)> {
        if self.state != HandshakeState::SynSent {
            return Err(RudpCoreError::unexpected(packet.kind()));
        }

        match packet {
            Packet::SynAck(seq) => {
                let mut next = self.counter;
                let expected = next.advance();
                if *seq != expected {
                    return Err(RudpCoreError::mismatch(expected, *seq));
                }
                self.counter = next;
                self.state = HandshakeState::Established;
                Ok((Packet::Ack(expected), Session::new(expected)))
            }
            other => Err(RudpCoreError::unexpected(other.kind())),
        }
    }
}

/// What the responder wants done after a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderStep {
    /// The initiator retransmitted its SYN; resend this SYN-ACK
    Resend(Packet),
    /// Final ACK matched
    Established(Session),
}

/// Passive-open side, created from an inbound SYN.
#[derive(Debug, Clone)]
pub struct Responder {
    syn_seq: SeqNum,
    counter: SequenceCounter,
    state: HandshakeState,
}

impl Responder {
    /// Start from the initiator's SYN; returns the machine and the SYN-ACK
    /// to send.
    pub fn on_syn(syn_seq: SeqNum) -> (Self, Packet) {
        let mut counter = SequenceCounter::new(syn_seq);
        let reply = Packet::SynAck(counter.advance());
        let responder = Self {
            syn_seq,
            counter,
            state: HandshakeState::SynReceived,
        };
        (responder, reply)
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The sequence number the final ACK must carry
    pub fn expected_ack(&self) -> SeqNum {
        self.counter.current()
    }

    pub fn on_packet(&mut self, packet: &Packet) -> RudpCoreResult<ResponderStep> {
        if self.state != HandshakeState::SynReceived {
            return Err(RudpCoreError::unexpected(packet.kind()));
        }

        match packet {
            Packet::Syn(seq) if *seq == self.syn_seq => {
                Ok(ResponderStep::Resend(Packet::SynAck(self.counter.current())))
            }
            Packet::Ack(seq) => {
                let expected = self.counter.current();
                if *seq != expected {
                    return Err(RudpCoreError::mismatch(expected, *seq));
                }
                self.state = HandshakeState::Established;
                Ok(ResponderStep::Established(Session::new(expected)))
            }
            other => Err(RudpCoreError::unexpected(other.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketKind;

    #[test]
    fn lossless_exchange_agrees_on_baseline() {
        let mut initiator = Initiator::new(0);
        let syn = initiator.syn();
        assert_eq!(syn, Packet::Syn(0));
        assert_eq!(initiator.state(), HandshakeState::SynSent);

        let (mut responder, syn_ack) = Responder::on_syn(syn.seq());
        assert_eq!(syn_ack, Packet::SynAck(1));
        assert_eq!(responder.state(), HandshakeState::SynReceived);

        let (ack, client) = initiator.on_packet(&syn_ack).unwrap();
        assert_eq!(ack, Packet::Ack(1));
        assert_eq!(initiator.state(), HandshakeState::Established);

        let server = match responder.on_packet(&ack).unwrap() {
            ResponderStep::Established(session) => session,
            other => panic!("expected established, got {other:?}"),
        };

        assert_eq!(client.next_send(), server.next_expected());
        assert_eq!(server.next_send(), client.next_expected());
        assert_eq!(client.next_send(), 1);
    }

    #[test]
    fn initiator_rejects_wrong_syn_ack() {
        let mut initiator = Initiator::new(5);
        initiator.syn();
        let err = initiator.on_packet(&Packet::SynAck(9)).unwrap_err();
        assert_eq!(err, RudpCoreError::mismatch(6, 9));
        assert_eq!(initiator.state(), HandshakeState::SynSent);
    }

    #[test]
    fn initiator_rejects_other_packets() {
        let mut initiator = Initiator::new(0);
        initiator.syn();
        let err = initiator.on_packet(&Packet::Ack(1)).unwrap_err();
        assert_eq!(err, RudpCoreError::unexpected(PacketKind::Ack));
    }

    #[test]
    fn initiator_ignores_reply_before_syn() {
        let mut initiator = Initiator::new(0);
        assert!(initiator.on_packet(&Packet::SynAck(1)).is_err());
    }

    #[test]
    fn responder_resends_syn_ack_on_duplicate_syn() {
        let (mut responder, syn_ack) = Responder::on_syn(3);
        let step = responder.on_packet(&Packet::Syn(3)).unwrap();
        assert_eq!(step, ResponderStep::Resend(syn_ack));
    }

    #[test]
    fn responder_rejects_wrong_ack() {
        let (mut responder, _) = Responder::on_syn(3);
        assert_eq!(responder.expected_ack(), 4);
        let err = responder.on_packet(&Packet::Ack(3)).unwrap_err();
        assert_eq!(err, RudpCoreError::mismatch(4, 3));
        assert_eq!(responder.state(), HandshakeState::SynReceived);
    }

    #[test]
    fn responder_rejects_data_before_ack() {
        let (mut responder, _) = Responder::on_syn(0);
        let err = responder.on_packet(&Packet::data(1, "x")).unwrap_err();
        assert!(err.is_handshake_failure());
    }
}
