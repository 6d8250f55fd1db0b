//! Core-only exchange tests without a runtime.
//!
//! Packets travel through their encoded form so the wire codec is exercised
//! along with the state machines.

use bytes::Bytes;
use rudp_core::{
    ArqConfig, DataVerdict, Initiator, Packet, PendingSend, Responder, ResponderStep, Session,
};
use std::time::{Duration, Instant};

/// Encode and decode a packet, as the network would.
fn wire(packet: Packet) -> Packet {
    Packet::decode(packet.encode()).expect("encoded packet must decode")
}

fn handshake(isn: u32) -> (Session, Session) {
    let mut initiator = Initiator::new(isn);
    let (mut responder, syn_ack) = Responder::on_syn(wire(initiator.syn()).seq());
    let (ack, client) = initiator.on_packet(&wire(syn_ack)).unwrap();
    match responder.on_packet(&wire(ack)).unwrap() {
        ResponderStep::Established(server) => (client, server),
        other => panic!("expected established, got {other:?}"),
    }
}

/// Receiver half of `receive_and_ack`: returns the delivered payload and the
/// ACK to send back, if any.
fn receive(session: &mut Session, packet: Packet) -> (Option<Bytes>, Option<Packet>) {
    match packet {
        Packet::Data { seq, payload } => match session.accept_data(seq) {
            DataVerdict::Accept => (Some(payload), Some(Packet::Ack(seq))),
            DataVerdict::Duplicate | DataVerdict::OutOfOrder { .. } => (None, None),
        },
        _ => (None, None),
    }
}

/// Run one stop-and-wait exchange, dropping the first `drops` data packets.
/// Returns the payloads the receiver delivered and whether the send succeeded.
fn exchange(
    sender: &mut Session,
    receiver: &mut Session,
    payload: &'static [u8],
    config: ArqConfig,
    drops: u32,
) -> (Vec<Bytes>, bool) {
    let mut now = Instant::now();
    let mut pending = PendingSend::new(sender.next_send(), Bytes::from_static(payload), config);
    let mut delivered = Vec::new();
    let mut dropped = 0;

    while let Some(packet) = pending.transmit(now) {
        if dropped < drops {
            dropped += 1;
            now += config.ack_timeout;
            assert!(pending.is_expired(now));
            continue;
        }

        let (payload, ack) = receive(receiver, wire(packet));
        delivered.extend(payload);
        if let Some(Packet::Ack(seq)) = ack.map(wire) {
            if pending.on_ack(seq) {
                assert!(sender.commit_send(seq));
                return (delivered, true);
            }
        }
        now += config.ack_timeout;
    }

    (delivered, false)
}

#[test]
fn test_handshake_sessions_agree() {
    let (client, server) = handshake(0);
    assert_eq!(client, server);
    assert_eq!(client.next_send(), 1);

    let (client, server) = handshake(41);
    assert_eq!(client.next_send(), server.next_expected());
    assert_eq!(server.next_send(), client.next_expected());
    assert_eq!(client.next_send(), 42);
}

#[test]
fn test_delivery_survives_bounded_loss() {
    let config = ArqConfig::new(5, Duration::from_millis(100));
    let (mut client, mut server) = handshake(0);

    let (delivered, ok) = exchange(&mut client, &mut server, b"GET /hello HTTP/1.1", config, 4);

    assert!(ok);
    assert_eq!(delivered, vec![Bytes::from_static(b"GET /hello HTTP/1.1")]);
    assert_eq!(client.next_send(), 2);
    assert_eq!(server.next_expected(), 2);
}

#[test]
fn test_delivery_fails_when_every_attempt_is_lost() {
    let config = ArqConfig::new(5, Duration::from_millis(100));
    let (mut client, mut server) = handshake(0);

    let (delivered, ok) = exchange(&mut client, &mut server, b"lost", config, u32::MAX);

    assert!(!ok);
    assert!(delivered.is_empty());
    assert_eq!(client.next_send(), 1, "failed send must not advance the counter");
    assert_eq!(server.next_expected(), 1);
}

#[test]
fn test_back_to_back_payloads_stay_in_order() {
    let config = ArqConfig::default();
    let (mut client, mut server) = handshake(0);

    let mut all = Vec::new();
    for (i, payload) in [&b"first"[..], b"second", b"third"].into_iter().enumerate() {
        let payload: &'static [u8] = payload;
        let (delivered, ok) = exchange(&mut client, &mut server, payload, config, (i % 2) as u32);
        assert!(ok);
        all.extend(delivered);
    }

    assert_eq!(
        all,
        vec![
            Bytes::from_static(b"first"),
            Bytes::from_static(b"second"),
            Bytes::from_static(b"third"),
        ]
    );
    assert_eq!(client.next_send(), 4);
    assert_eq!(server.next_expected(), 4);
}

#[test]
fn test_duplicate_data_is_not_redelivered() {
    let (_, mut server) = handshake(0);

    let packet = Packet::data(1, Bytes::from_static(b"once"));
    let (first, ack) = receive(&mut server, packet.clone());
    assert_eq!(first, Some(Bytes::from_static(b"once")));
    assert_eq!(ack, Some(Packet::Ack(1)));

    let (again, ack) = receive(&mut server, packet);
    assert_eq!(again, None);
    assert_eq!(ack, None);
}
