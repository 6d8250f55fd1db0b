//! Fault injection for testing over real sockets.
//!
//! [`LossyTransport`] wraps any [`Transport`] and drops or delays outbound
//! datagrams by packet kind, or drops them at random. Random loss comes from
//! a seeded RNG, so a run is reproducible for a given seed and packet order.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tracing::trace;

use bytes::Bytes;
use rudp_core::{Packet, PacketKind};

use crate::transport::Transport;

/// Outbound counts for one packet kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    /// Datagrams handed to the transport, dropped or not
    pub attempted: u64,
    pub dropped: u64,
}

impl KindStats {
    pub fn delivered(&self) -> u64 {
        self.attempted - self.dropped
    }
}

#[derive(Debug)]
struct FaultState {
    drop_next: HashMap<PacketKind, u32>,
    drop_all: HashMap<PacketKind, bool>,
    delay: HashMap<PacketKind, Duration>,
    loss_rate: f64,
    rng: StdRng,
    stats: HashMap<PacketKind, KindStats>,
}

impl FaultState {
    fn should_drop(&mut self, kind: Option<PacketKind>) -> bool {
        let scripted = match kind {
            Some(kind) if self.drop_all.get(&kind).copied().unwrap_or(false) => true,
            Some(kind) => match self.drop_next.get_mut(&kind) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            },
            None => false,
        };
        scripted || (self.loss_rate > 0.0 && self.rng.gen::<f64>() < self.loss_rate)
    }

    fn record(&mut self, kind: PacketKind, dropped: bool) {
        let stats = self.stats.entry(kind).or_default();
        stats.attempted += 1;
        if dropped {
            stats.dropped += 1;
        }
    }
}

/// A [`Transport`] that loses outbound datagrams on request.
#[derive(Debug)]
pub struct LossyTransport<T: Transport> {
    inner: T,
    faults: Mutex<FaultState>,
}

impl<T: Transport> LossyTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            faults: Mutex::new(FaultState {
                drop_next: HashMap::new(),
                drop_all: HashMap::new(),
                delay: HashMap::new(),
                loss_rate: 0.0,
                rng: StdRng::seed_from_u64(0),
                stats: HashMap::new(),
            }),
        }
    }

    /// Drop the next `count` outbound packets of `kind`.
    pub fn drop_next(mut self, kind: PacketKind, count: u32) -> Self {
        self.faults.get_mut().drop_next.insert(kind, count);
        self
    }

    /// Drop every outbound packet of `kind`.
    pub fn drop_all(mut self, kind: PacketKind) -> Self {
        self.faults.get_mut().drop_all.insert(kind, true);
        self
    }

    /// Hold every outbound packet of `kind` for `delay` inside `send_to`.
    pub fn delay(mut self, kind: PacketKind, delay: Duration) -> Self {
        self.faults.get_mut().delay.insert(kind, delay);
        self
    }

    /// Drop any outbound packet with probability `rate`, seeded by `seed`.
    pub fn loss_rate(mut self, rate: f64, seed: u64) -> Self {
        {
            let faults = self.faults.get_mut();
            faults.loss_rate = rate.clamp(0.0, 1.0);
            faults.rng = StdRng::seed_from_u64(seed);
        }
        self
    }

    /// Change the scripted drops for `kind` while running.
    pub async fn set_drop_next(&self, kind: PacketKind, count: u32) {
        self.faults.lock().await.drop_next.insert(kind, count);
    }

    /// Change the random loss rate, keeping the RNG's position.
    pub async fn set_loss_rate(&self, rate: f64) {
        self.faults.lock().await.loss_rate = rate.clamp(0.0, 1.0);
    }

    pub async fn set_drop_all(&self, kind: PacketKind, enabled: bool) {
        self.faults.lock().await.drop_all.insert(kind, enabled);
    }

    /// Change the send delay for `kind`; `Duration::ZERO` removes it.
    pub async fn set_delay(&self, kind: PacketKind, delay: Duration) {
        self.faults.lock().await.delay.insert(kind, delay);
    }

    pub async fn stats(&self, kind: PacketKind) -> KindStats {
        self.faults
            .lock()
            .await
            .stats
            .get(&kind)
            .copied()
            .unwrap_or_default()
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    type Addr = T::Addr;

    async fn send_to(&self, buf: &[u8], target: &T::Addr) -> io::Result<usize> {
        let kind = Packet::decode(Bytes::copy_from_slice(buf))
            .ok()
            .map(|packet| packet.kind());

        let (dropped, delay) = {
            let mut faults = self.faults.lock().await;
            let dropped = faults.should_drop(kind);
            if let Some(kind) = kind {
                faults.record(kind, dropped);
            }
            let delay = kind.and_then(|kind| faults.delay.get(&kind).copied());
            (dropped, delay)
        };

        if dropped {
            trace!(peer = %target, kind = ?kind, len = buf.len(), "simulated loss");
            return Ok(buf.len());
        }
        if let Some(delay) = delay.filter(|delay| !delay.is_zero()) {
            trace!(peer = %target, kind = ?kind, ?delay, "simulated latency");
            tokio::time::sleep(delay).await;
        }
        self.inner.send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, T::Addr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<T::Addr> {
        self.inner.local_addr()
    }
}
