//! Endpoint: one transport, many peers.
//!
//! ```text
//!                       ┌──────────────────────────┐
//!   transport.recv ───▶ │ dispatcher task          │
//!                       │  decode, route by peer   │
//!                       └──┬─────────┬─────────┬───┘
//!             SYN (new)    │         │ control │ data
//!                          ▼         ▼         ▼
//!                   accept queue   Route { control_tx, data_tx }
//!                          │         │         │
//!                     accept()   send_reliable  receive_and_ack
//! ```
//!
//! The dispatcher is the only reader of the transport, so one peer's ACK can
//! never be consumed by another peer's retry loop. Sends go straight to the
//! transport from whichever task owns the exchange.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use rudp_core::{Packet, SeqNum, Session};

use crate::config::{RehandshakePolicy, RudpConfig};
use crate::connection::Connection;
use crate::error::{ConnectionError, Result, RudpError};
use crate::metrics::{EndpointMetrics, MetricsSnapshot};
use crate::table::{ConnectionState, ConnectionTable};
use crate::transport::{Transport, UdpTransport};

/// Pause after a failed `recv_from` so a persistent socket error cannot spin.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// A SYN from a peer with no route, waiting to be accepted.
#[derive(Debug, Clone)]
pub(crate) struct IncomingSyn<A> {
    pub(crate) peer: A,
    pub(crate) seq: SeqNum,
}

/// Per-peer packet sinks, read by the dispatcher on every packet.
pub(crate) struct Route {
    id: u64,
    state: ConnectionState,
    control_tx: mpsc::Sender<Packet>,
    data_tx: mpsc::Sender<(SeqNum, Bytes)>,
}

/// Receiving ends of a [`Route`], owned by the handshake and then the
/// [`Connection`].
pub(crate) struct RouteRx {
    pub(crate) control_rx: mpsc::Receiver<Packet>,
    pub(crate) data_rx: mpsc::Receiver<(SeqNum, Bytes)>,
}

enum SynAction {
    Queue,
    Forward(mpsc::Sender<Packet>),
    Ignore,
    Replace,
}

/// State shared by the endpoint, its background tasks, and its connections.
pub(crate) struct Shared<T: Transport> {
    pub(crate) transport: Arc<T>,
    pub(crate) config: RudpConfig,
    pub(crate) table: ConnectionTable<T::Addr>,
    pub(crate) metrics: EndpointMetrics,
    routes: DashMap<T::Addr, Route>,
    next_route_id: AtomicU64,
    /// ISN for the next initiated handshake; moves past every sequence number
    /// a finished initiated connection used.
    next_isn: AtomicU32,
}

impl<T: Transport> Shared<T> {
    fn new(transport: Arc<T>, config: RudpConfig) -> Self {
        Self {
            transport,
            next_isn: AtomicU32::new(config.initial_seq),
            config,
            table: ConnectionTable::new(),
            metrics: EndpointMetrics::default(),
            routes: DashMap::new(),
            next_route_id: AtomicU64::new(1),
        }
    }

    pub(crate) async fn send_packet(&self, packet: &Packet, peer: &T::Addr) -> Result<()> {
        let bytes = packet.encode();
        self.transport.send_to(&bytes, peer).await?;
        self.metrics.packet_sent();
        trace!(peer = %peer, kind = %packet.kind(), seq = packet.seq(), "sent");
        Ok(())
    }

    /// Register sinks for `peer`; `None` if it already has a route.
    pub(crate) fn open_route(&self, peer: &T::Addr) -> Option<(u64, RouteRx)> {
        match self.routes.entry(peer.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let capacity = self.config.channel_capacity;
                let (control_tx, control_rx) = mpsc::channel(capacity);
                let (data_tx, data_rx) = mpsc::channel(capacity);
                let id = self.next_route_id.fetch_add(1, Ordering::Relaxed);
                slot.insert(Route {
                    id,
                    state: ConnectionState::Handshaking,
                    control_tx,
                    data_tx,
                });
                Some((id, RouteRx { control_rx, data_rx }))
            }
        }
    }

    /// Set the state of the route `id`, if it is still the peer's route.
    pub(crate) fn set_route_state(&self, peer: &T::Addr, id: u64, state: ConnectionState) {
        if let Some(mut route) = self.routes.get_mut(peer) {
            if route.id == id {
                route.state = state;
            }
        }
    }

    /// Remove the route `id`; `false` if it was already replaced or removed.
    pub(crate) fn close_route(&self, peer: &T::Addr, id: u64) -> bool {
        self.routes.remove_if(peer, |_, route| route.id == id).is_some()
    }

    pub(crate) fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Remove the peer's table entry unless a newer route owns the peer.
    pub(crate) async fn forget_peer(&self, peer: &T::Addr) {
        self.table
            .remove_unless(peer, || self.routes.contains_key(peer))
            .await;
    }

    pub(crate) fn initial_seq(&self) -> SeqNum {
        self.next_isn.load(Ordering::Relaxed)
    }

    /// Start later initiated handshakes beyond every number `session` used.
    pub(crate) fn retire_session(&self, session: &Session) {
        let high = session.next_send().max(session.next_expected());
        self.next_isn.fetch_max(high, Ordering::Relaxed);
    }

    /// Complete the handshake for a queued SYN.
    ///
    /// A SYN queued twice for one peer fails the second time with
    /// [`ConnectionError::AlreadyConnected`].
    pub(crate) async fn accept_syn(
        self: &Arc<Self>,
        incoming: IncomingSyn<T::Addr>,
    ) -> Result<Connection<T>> {
        self.respond(incoming.peer, incoming.seq).await
    }

    async fn dispatch(
        &self,
        packet: Packet,
        peer: T::Addr,
        syn_tx: &mpsc::Sender<IncomingSyn<T::Addr>>,
    ) {
        match packet {
            Packet::Syn(seq) => self.dispatch_syn(peer, seq, syn_tx).await,
            Packet::Data { seq, payload } => {
                let data_tx = self.routes.get(&peer).map(|route| route.data_tx.clone());
                match data_tx {
                    Some(tx) => {
                        if tx.try_send((seq, payload)).is_err() {
                            debug!(peer = %peer, seq, "data channel full or closed, dropping");
                        }
                    }
                    None => debug!(peer = %peer, seq, "data from peer without a connection"),
                }
            }
            control => {
                let control_tx = self.routes.get(&peer).map(|route| route.control_tx.clone());
                match control_tx {
                    Some(tx) => {
                        if tx.try_send(control).is_err() {
                            debug!(peer = %peer, "control channel full or closed, dropping");
                        }
                    }
                    None => trace!(
                        peer = %peer,
                        kind = %control.kind(),
                        "control packet without a connection"
                    ),
                }
            }
        }
    }

    async fn dispatch_syn(
        &self,
        peer: T::Addr,
        seq: SeqNum,
        syn_tx: &mpsc::Sender<IncomingSyn<T::Addr>>,
    ) {
        let action = match self.routes.get(&peer) {
            None => SynAction::Queue,
            Some(route) => match route.state {
                ConnectionState::Uninit | ConnectionState::Handshaking => {
                    SynAction::Forward(route.control_tx.clone())
                }
                ConnectionState::Closing => SynAction::Replace,
                ConnectionState::Established => match self.config.rehandshake {
                    RehandshakePolicy::Ignore => SynAction::Ignore,
                    RehandshakePolicy::Reset => SynAction::Replace,
                },
            },
        };

        match action {
            SynAction::Queue => {
                trace!(peer = %peer, seq, "queueing SYN");
                self.queue_syn(IncomingSyn { peer, seq }, syn_tx);
            }
            SynAction::Forward(tx) => {
                let _ = tx.try_send(Packet::Syn(seq));
            }
            SynAction::Ignore => {
                debug!(peer = %peer, seq, "ignoring SYN from established peer");
            }
            SynAction::Replace => {
                info!(peer = %peer, seq, "peer restarted handshake, replacing connection");
                self.routes.remove(&peer);
                self.table.remove(&peer).await;
                self.queue_syn(IncomingSyn { peer, seq }, syn_tx);
            }
        }
    }

    fn queue_syn(
        &self,
        incoming: IncomingSyn<T::Addr>,
        syn_tx: &mpsc::Sender<IncomingSyn<T::Addr>>,
    ) {
        if let Err(TrySendError::Full(incoming)) = syn_tx.try_send(incoming) {
            self.metrics.syn_dropped();
            debug!(peer = %incoming.peer, seq = incoming.seq, "accept queue full, dropping SYN");
        }
    }
}

/// A bound transport endpoint that initiates and accepts connections.
pub struct Endpoint<T: Transport = UdpTransport> {
    shared: Arc<Shared<T>>,
    local_addr: T::Addr,
    syn_rx: Mutex<mpsc::Receiver<IncomingSyn<T::Addr>>>,
    dispatch_task: Option<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
}

// UDP convenience methods

impl Endpoint<UdpTransport> {
    /// Bind a UDP endpoint to `addr`.
    pub async fn bind(addr: SocketAddr, config: RudpConfig) -> Result<Self> {
        let transport = UdpTransport::bind(addr).await?;
        Self::with_transport(Arc::new(transport), config)
    }
}

// Generic methods for any Transport

impl<T: Transport> Endpoint<T> {
    /// Start an endpoint over a custom [`Transport`].
    ///
    /// Spawns the dispatcher and, when idle eviction is on, the sweep task;
    /// must be called within a tokio runtime.
    pub fn with_transport(transport: Arc<T>, config: RudpConfig) -> Result<Self> {
        config.validate()?;
        let local_addr = transport.local_addr()?;
        let shared = Arc::new(Shared::new(transport, config));

        let (syn_tx, syn_rx) = mpsc::channel(shared.config.accept_backlog);
        let dispatch_task = tokio::spawn(dispatch_loop(shared.clone(), syn_tx));
        let sweep_task = shared
            .config
            .idle_timeout
            .map(|idle_timeout| tokio::spawn(sweep_loop(shared.clone(), idle_timeout)));

        info!(addr = %local_addr, "endpoint started");
        Ok(Self {
            shared,
            local_addr,
            syn_rx: Mutex::new(syn_rx),
            dispatch_task: Some(dispatch_task),
            sweep_task,
        })
    }

    pub fn local_addr(&self) -> &T::Addr {
        &self.local_addr
    }

    pub fn config(&self) -> &RudpConfig {
        &self.shared.config
    }

    pub fn table(&self) -> &ConnectionTable<T::Addr> {
        &self.shared.table
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Peers with a live route (handshaking, established, or closing)
    pub fn connection_count(&self) -> usize {
        self.shared.route_count()
    }

    /// One handshake attempt as the initiator.
    ///
    /// Fails with [`RudpError::Handshake`] on timeout or a mismatched reply;
    /// nothing is left behind in the table and the next attempt starts from
    /// the same sequence number.
    pub async fn initiate(&self, peer: &T::Addr) -> Result<Connection<T>> {
        self.shared.initiate(peer).await
    }

    /// [`initiate`](Self::initiate) with up to `handshake_retries` attempts.
    pub async fn connect(&self, peer: &T::Addr) -> Result<Connection<T>> {
        let attempts = self.shared.config.handshake_retries;
        let mut attempt = 1;
        loop {
            match self.initiate(peer).await {
                Ok(connection) => return Ok(connection),
                Err(e @ RudpError::Handshake { .. }) if attempt < attempts => {
                    debug!(peer = %peer, attempt, error = %e, "handshake attempt failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for a SYN and complete the handshake as the responder.
    ///
    /// A failed attempt is returned to the caller; the next call waits for
    /// the next SYN. The handshake runs on the caller's task, so a server
    /// that must not stall on one silent peer should use [`Server`] instead.
    ///
    /// [`Server`]: crate::Server
    pub async fn accept(&self) -> Result<Connection<T>> {
        loop {
            let incoming = self.next_syn().await?;
            let peer = incoming.peer.clone();

            match self.shared.accept_syn(incoming).await {
                Err(RudpError::Connection {
                    kind: ConnectionError::AlreadyConnected,
                }) => {
                    debug!(peer = %peer, "skipping queued SYN from connected peer");
                    continue;
                }
                result => return result,
            }
        }
    }

    /// Next queued SYN, without running its handshake.
    pub(crate) async fn next_syn(&self) -> Result<IncomingSyn<T::Addr>> {
        self.syn_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| RudpError::connection(ConnectionError::Closed))
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<T>> {
        &self.shared
    }

    /// Stop the background tasks. Existing connections stop receiving.
    pub fn close(&mut self) {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
        if let Some(task) = self.sweep_task.take() {
            task.abort();
        }
        info!(addr = %self.local_addr, "endpoint closed");
    }
}

impl<T: Transport> Drop for Endpoint<T> {
    fn drop(&mut self) {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
        if let Some(task) = self.sweep_task.take() {
            task.abort();
        }
    }
}

async fn dispatch_loop<T: Transport>(
    shared: Arc<Shared<T>>,
    syn_tx: mpsc::Sender<IncomingSyn<T::Addr>>,
) {
    let mut buf = vec![0u8; shared.config.recv_buffer_size];

    loop {
        let (size, peer) = match shared.transport.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "recv_from failed");
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                continue;
            }
        };
        shared.metrics.packet_received();

        let packet = match Packet::decode(Bytes::copy_from_slice(&buf[..size])) {
            Ok(packet) => packet,
            Err(e) => {
                shared.metrics.malformed();
                warn!(peer = %peer, size, error = %e, "dropping malformed packet");
                continue;
            }
        };
        trace!(peer = %peer, kind = %packet.kind(), seq = packet.seq(), "received");

        shared.dispatch(packet, peer, &syn_tx).await;
    }
}

async fn sweep_loop<T: Transport>(shared: Arc<Shared<T>>, idle_timeout: Duration) {
    let mut interval = tokio::time::interval(shared.config.sweep_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let evicted = shared.table.sweep_idle(idle_timeout).await;
        if evicted.is_empty() {
            continue;
        }
        for peer in &evicted {
            shared.routes.remove(peer);
            info!(peer = %peer, "evicted idle connection");
        }
        shared.metrics.idle_evicted(evicted.len());
    }
}
