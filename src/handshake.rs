//! Async drivers for the three-way handshake.
//!
//! The state machines live in `rudp_core::handshake`; this module sends
//! their packets, applies the handshake deadline, and keeps the route map
//! and connection table consistent with the outcome.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use rudp_core::{Initiator, Packet, Responder, ResponderStep, SeqNum, Session};

use crate::connection::Connection;
use crate::endpoint::{RouteRx, Shared};
use crate::error::{ConnectionError, HandshakeError, Result, RudpError};
use crate::table::ConnectionState;
use crate::transport::Transport;

impl<T: Transport> Shared<T> {
    /// Run one initiator attempt against `peer`.
    pub(crate) async fn initiate(self: &Arc<Self>, peer: &T::Addr) -> Result<Connection<T>> {
        let (route_id, mut rx) = self
            .open_route(peer)
            .ok_or_else(|| RudpError::connection(ConnectionError::AlreadyConnected))?;
        self.table.begin_handshake(peer).await;

        let mut initiator = Initiator::new(self.initial_seq());
        let outcome = self
            .drive_initiator(peer, &mut initiator, &mut rx.control_rx)
            .await;
        match outcome {
            Ok(session) => Ok(self.established(peer, route_id, true, session, rx).await),
            Err(e) => {
                self.abandon(peer, route_id, &e).await;
                Err(e)
            }
        }
    }

    /// Complete a handshake for a queued SYN.
    pub(crate) async fn respond(
        self: &Arc<Self>,
        peer: T::Addr,
        syn_seq: SeqNum,
    ) -> Result<Connection<T>> {
        let (route_id, mut rx) = self
            .open_route(&peer)
            .ok_or_else(|| RudpError::connection(ConnectionError::AlreadyConnected))?;
        self.table.begin_handshake(&peer).await;

        let outcome = self.drive_responder(&peer, syn_seq, &mut rx.control_rx).await;
        match outcome {
            Ok(session) => Ok(self.established(&peer, route_id, false, session, rx).await),
            Err(e) => {
                self.abandon(&peer, route_id, &e).await;
                Err(e)
            }
        }
    }

    async fn drive_initiator(
        &self,
        peer: &T::Addr,
        initiator: &mut Initiator,
        control_rx: &mut mpsc::Receiver<Packet>,
    ) -> Result<Session> {
        let syn = initiator.syn();
        self.send_packet(&syn, peer).await?;
        debug!(peer = %peer, seq = syn.seq(), "SYN sent");

        let deadline = Instant::now() + self.config.handshake_timeout;
        let reply = recv_before(deadline, control_rx).await?;

        let (ack, session) = initiator.on_packet(&reply)?;
        self.send_packet(&ack, peer).await?;
        Ok(session)
    }

    async fn drive_responder(
        &self,
        peer: &T::Addr,
        syn_seq: SeqNum,
        control_rx: &mut mpsc::Receiver<Packet>,
    ) -> Result<Session> {
        let (mut responder, syn_ack) = Responder::on_syn(syn_seq);
        self.send_packet(&syn_ack, peer).await?;
        debug!(peer = %peer, seq = syn_ack.seq(), "SYN-ACK sent");

        let mut deadline = Instant::now() + self.config.handshake_timeout;
        loop {
            let packet = recv_before(deadline, control_rx).await?;
            match responder.on_packet(&packet)? {
                ResponderStep::Resend(reply) => {
                    debug!(peer = %peer, seq = reply.seq(), "duplicate SYN, resending SYN-ACK");
                    self.send_packet(&reply, peer).await?;
                    deadline = Instant::now() + self.config.handshake_timeout;
                }
                ResponderStep::Established(session) => return Ok(session),
            }
        }
    }

    async fn established(
        self: &Arc<Self>,
        peer: &T::Addr,
        route_id: u64,
        initiated: bool,
        session: Session,
        rx: RouteRx,
    ) -> Connection<T> {
        self.set_route_state(peer, route_id, ConnectionState::Established);
        self.table.establish(peer).await;
        self.metrics.handshake_completed();
        info!(
            peer = %peer,
            next_seq = session.next_send(),
            "connection established"
        );
        Connection::new(self.clone(), peer.clone(), route_id, initiated, session, rx)
    }

    async fn abandon(&self, peer: &T::Addr, route_id: u64, error: &RudpError) {
        self.close_route(peer, route_id);
        self.table
            .remove_if_state(peer, ConnectionState::Handshaking)
            .await;
        self.metrics.handshake_failed();
        debug!(peer = %peer, error = %error, "handshake failed");
    }
}

async fn recv_before(
    deadline: Instant,
    control_rx: &mut mpsc::Receiver<Packet>,
) -> Result<Packet> {
    match timeout_at(deadline, control_rx.recv()).await {
        Ok(Some(packet)) => Ok(packet),
        Ok(None) => Err(RudpError::connection(ConnectionError::Closed)),
        Err(_) => Err(RudpError::handshake(HandshakeError::Timeout)),
    }
}
