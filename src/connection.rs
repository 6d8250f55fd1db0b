//! An established connection: stop-and-wait sending and in-order receiving.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use rudp_core::{ArqConfig, DataVerdict, Packet, PendingSend, SeqNum, Session};

use crate::endpoint::{RouteRx, Shared};
use crate::error::{ConnectionError, Result, RudpError};
use crate::table::ConnectionState;
use crate::transport::Transport;

/// One peer's session over a shared [`Endpoint`](crate::Endpoint).
///
/// All methods take `&self`. Concurrent `send_reliable` calls are
/// serialized: the ACK channel is held for a whole exchange, so at most one
/// data packet is ever in flight.
pub struct Connection<T: Transport> {
    shared: Arc<Shared<T>>,
    peer: T::Addr,
    route_id: u64,
    initiated: bool,
    session: Mutex<Session>,
    control_rx: Mutex<mpsc::Receiver<Packet>>,
    data_rx: Mutex<mpsc::Receiver<(SeqNum, Bytes)>>,
}

impl<T: Transport> Connection<T> {
    pub(crate) fn new(
        shared: Arc<Shared<T>>,
        peer: T::Addr,
        route_id: u64,
        initiated: bool,
        session: Session,
        rx: RouteRx,
    ) -> Self {
        Self {
            shared,
            peer,
            route_id,
            initiated,
            session: Mutex::new(session),
            control_rx: Mutex::new(rx.control_rx),
            data_rx: Mutex::new(rx.data_rx),
        }
    }

    pub fn peer(&self) -> &T::Addr {
        &self.peer
    }

    /// Current sequence state
    pub async fn session(&self) -> Session {
        *self.session.lock().await
    }

    /// Deliver `payload` with the configured retry budget and ACK timeout.
    pub async fn send_reliable(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send_reliable_with(payload, self.shared.config.arq()).await
    }

    /// Deliver `payload` or fail after `arq.max_retries` transmissions.
    ///
    /// The session's send counter advances only when the matching ACK
    /// arrives. ACKs for any other number are discarded and the current
    /// attempt keeps waiting until its own deadline.
    pub async fn send_reliable_with(
        &self,
        payload: impl Into<Bytes>,
        arq: ArqConfig,
    ) -> Result<()> {
        let mut acks = self.control_rx.lock().await;
        let seq = self.session.lock().await.next_send();
        let mut pending = PendingSend::new(seq, payload.into(), arq);

        while let Some(packet) = pending.transmit(Instant::now().into_std()) {
            if pending.is_retransmit() {
                self.shared.metrics.retransmission();
                debug!(
                    peer = %self.peer,
                    seq,
                    attempt = pending.attempts(),
                    "ACK timeout, retransmitting"
                );
            }
            self.shared.send_packet(&packet, &self.peer).await?;

            let deadline = pending
                .deadline()
                .map(Instant::from_std)
                .unwrap_or_else(|| Instant::now() + arq.ack_timeout);
            if self.wait_for_ack(&mut acks, &pending, deadline).await? {
                self.session.lock().await.commit_send(seq);
                self.shared.table.touch(&self.peer).await;
                self.shared.metrics.delivery_completed();
                trace!(peer = %self.peer, seq, attempts = pending.attempts(), "delivered");
                return Ok(());
            }
        }

        self.shared.metrics.delivery_failed();
        warn!(peer = %self.peer, seq, attempts = pending.attempts(), "delivery failed");
        Err(RudpError::DeliveryTimeout {
            seq,
            attempts: pending.attempts(),
        })
    }

    /// `Ok(true)` on the matching ACK, `Ok(false)` when `deadline` passes.
    async fn wait_for_ack(
        &self,
        acks: &mut mpsc::Receiver<Packet>,
        pending: &PendingSend,
        deadline: Instant,
    ) -> Result<bool> {
        loop {
            match timeout_at(deadline, acks.recv()).await {
                Err(_) => return Ok(false),
                Ok(None) => return Err(RudpError::connection(ConnectionError::Closed)),
                Ok(Some(Packet::Ack(ack))) if pending.on_ack(ack) => return Ok(true),
                Ok(Some(Packet::Ack(ack))) => {
                    debug!(
                        peer = %self.peer,
                        ack,
                        expected = pending.seq(),
                        "discarding stale ACK"
                    );
                }
                Ok(Some(other)) => {
                    trace!(peer = %self.peer, kind = %other.kind(), "ignoring control packet");
                }
            }
        }
    }

    /// Wait for the next in-order payload, acknowledge it, and return it.
    ///
    /// Out-of-sequence packets are dropped without an ACK. Fails with
    /// [`ConnectionError::Closed`] once the connection is closed or evicted.
    ///
    /// Cancel safe: a payload is either returned or left unaccepted, in which
    /// case the sender's retransmission is accepted by a later call.
    pub async fn receive_and_ack(&self) -> Result<Bytes> {
        let mut inbound = self.data_rx.lock().await;
        loop {
            let (seq, payload) = inbound
                .recv()
                .await
                .ok_or_else(|| RudpError::connection(ConnectionError::Closed))?;
            if let Some(payload) = self.on_data(seq, payload).await {
                return Ok(payload);
            }
        }
    }

    /// [`receive_and_ack`](Self::receive_and_ack) bounded by `timeout`.
    pub async fn receive_timeout(&self, timeout: Duration) -> Result<Bytes> {
        tokio::time::timeout(timeout, self.receive_and_ack())
            .await
            .map_err(|_| RudpError::timeout(timeout.as_millis() as u64))?
    }

    async fn on_data(&self, seq: SeqNum, payload: Bytes) -> Option<Bytes> {
        let verdict = self.session.lock().await.accept_data(seq);
        match verdict {
            DataVerdict::Accept => {
                self.ack_accepted(seq);
                trace!(peer = %self.peer, seq, len = payload.len(), "accepted");
                Some(payload)
            }
            DataVerdict::Duplicate => {
                self.shared.metrics.out_of_sequence();
                if self.shared.config.ack_duplicates {
                    debug!(peer = %self.peer, seq, "duplicate data, re-acknowledging");
                    self.ack(seq).await;
                } else {
                    debug!(peer = %self.peer, seq, "duplicate data, dropping");
                }
                None
            }
            DataVerdict::OutOfOrder { expected } => {
                self.shared.metrics.out_of_sequence();
                debug!(peer = %self.peer, seq, expected, "out-of-sequence data, dropping");
                None
            }
        }
    }

    /// ACK `seq` and refresh the table entry on a separate task. The session
    /// has already moved past `seq`, so nothing may await before the payload
    /// is handed back.
    fn ack_accepted(&self, seq: SeqNum) {
        let shared = self.shared.clone();
        let peer = self.peer.clone();
        tokio::spawn(async move {
            if let Err(e) = shared.send_packet(&Packet::Ack(seq), &peer).await {
                warn!(peer = %peer, seq, error = %e, "failed to send ACK");
            }
            shared.table.touch(&peer).await;
        });
    }

    async fn ack(&self, seq: SeqNum) {
        if let Err(e) = self.shared.send_packet(&Packet::Ack(seq), &self.peer).await {
            warn!(peer = %self.peer, seq, error = %e, "failed to send ACK");
        }
    }

    /// Create or refresh the peer's table entry for a keep-alive exchange.
    pub async fn keep_alive(&self) {
        self.shared.table.keep_alive(&self.peer).await;
    }

    /// Mark the connection as closing.
    ///
    /// A SYN from the peer now replaces this connection regardless of the
    /// re-handshake policy.
    pub async fn mark_closing(&self) {
        self.shared
            .set_route_state(&self.peer, self.route_id, ConnectionState::Closing);
        self.shared.table.mark_closing(&self.peer).await;
    }

    /// Remove the connection from the endpoint and the table.
    ///
    /// No-op if it was already replaced by a new handshake or evicted.
    pub async fn close(&self) {
        if self.shared.close_route(&self.peer, self.route_id) {
            self.shared.forget_peer(&self.peer).await;
            info!(peer = %self.peer, "connection closed");
        }
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("route_id", &self.route_id)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        if self.initiated {
            self.shared.retire_session(self.session.get_mut());
        }
        if !self.shared.close_route(&self.peer, self.route_id) {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = self.shared.clone();
            let peer = self.peer.clone();
            handle.spawn(async move {
                shared.forget_peer(&peer).await;
            });
        }
    }
}
