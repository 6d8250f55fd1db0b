//! Endpoint-wide protocol counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the dispatcher, handshake, and delivery paths.
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    pub handshakes_completed: AtomicU64,
    pub handshakes_failed: AtomicU64,
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    /// Data packets sent again after an ACK timeout
    pub retransmissions: AtomicU64,
    pub deliveries_completed: AtomicU64,
    /// `send_reliable` calls that exhausted their attempts
    pub deliveries_failed: AtomicU64,
    pub malformed_dropped: AtomicU64,
    /// Data packets dropped for carrying an unexpected sequence number
    pub out_of_sequence_dropped: AtomicU64,
    pub idle_evictions: AtomicU64,
    /// SYNs dropped because the accept queue was full
    pub syns_dropped: AtomicU64,
}

impl EndpointMetrics {
    pub fn handshake_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_completed(&self) {
        self.deliveries_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_failed(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn out_of_sequence(&self) {
        self.out_of_sequence_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn idle_evicted(&self, count: usize) {
        self.idle_evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn syn_dropped(&self) {
        self.syns_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            deliveries_completed: self.deliveries_completed.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            out_of_sequence_dropped: self.out_of_sequence_dropped.load(Ordering::Relaxed),
            idle_evictions: self.idle_evictions.load(Ordering::Relaxed),
            syns_dropped: self.syns_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub handshakes_completed: u64,
    pub handshakes_failed: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub retransmissions: u64,
    pub deliveries_completed: u64,
    pub deliveries_failed: u64,
    pub malformed_dropped: u64,
    pub out_of_sequence_dropped: u64,
    pub idle_evictions: u64,
    pub syns_dropped: u64,
}

impl MetricsSnapshot {
    /// Share of sent packets that were retransmissions
    pub fn retransmission_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.packets_sent as f64
        }
    }
}
