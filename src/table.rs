//! Connection table: per-peer lifecycle state and last activity.
//!
//! All mutations go through one `RwLock`, so the accept path, the
//! per-connection serving tasks, and the idle sweep never interleave on the
//! same entry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::transport::Addr;

/// Lifecycle of one peer as seen by the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No entry for the peer
    #[default]
    Uninit,
    /// SYN seen or sent, handshake not finished
    Handshaking,
    Established,
    /// Close requested; removed once the final response is delivered
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEntry {
    pub state: ConnectionState,
    pub last_seen: Instant,
}

/// Shared `PeerAddress → PeerEntry` map. Cloning shares the same table.
pub struct ConnectionTable<A: Addr> {
    entries: Arc<RwLock<HashMap<A, PeerEntry>>>,
}

impl<A: Addr> Clone for ConnectionTable<A> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<A: Addr> Default for ConnectionTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Addr> ConnectionTable<A> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a handshake in progress, replacing any stale entry.
    ///
    /// Returns `false` if the peer already had an entry.
    pub async fn begin_handshake(&self, peer: &A) -> bool {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(
            peer.clone(),
            PeerEntry {
                state: ConnectionState::Handshaking,
                last_seen: Instant::now(),
            },
        );
        previous.is_none()
    }

    /// Mark the peer established with `last_seen = now`.
    pub async fn establish(&self, peer: &A) {
        let mut entries = self.entries.write().await;
        entries.insert(
            peer.clone(),
            PeerEntry {
                state: ConnectionState::Established,
                last_seen: Instant::now(),
            },
        );
    }

    /// Create or refresh the entry for a keep-alive request.
    pub async fn keep_alive(&self, peer: &A) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries
            .entry(peer.clone())
            .and_modify(|entry| {
                entry.state = ConnectionState::Established;
                entry.last_seen = now;
            })
            .or_insert(PeerEntry {
                state: ConnectionState::Established,
                last_seen: now,
            });
    }

    /// Refresh `last_seen` if the peer has an entry; never creates one.
    pub async fn touch(&self, peer: &A) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(peer) {
            entry.last_seen = Instant::now();
        }
    }

    pub async fn mark_closing(&self, peer: &A) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(peer) {
            entry.state = ConnectionState::Closing;
        }
    }

    pub async fn remove(&self, peer: &A) -> Option<PeerEntry> {
        self.entries.write().await.remove(peer)
    }

    /// Remove the entry unless `in_use` reports that a newer connection owns
    /// it. `in_use` runs under the write lock.
    pub async fn remove_unless(&self, peer: &A, in_use: impl FnOnce() -> bool) -> bool {
        let mut entries = self.entries.write().await;
        if in_use() {
            return false;
        }
        entries.remove(peer).is_some()
    }

    /// Remove the entry only if it is still in `state`.
    pub async fn remove_if_state(&self, peer: &A, state: ConnectionState) -> bool {
        let mut entries = self.entries.write().await;
        if entries.get(peer).is_some_and(|entry| entry.state == state) {
            entries.remove(peer);
            return true;
        }
        false
    }

    /// State of `peer`, [`ConnectionState::Uninit`] if unknown.
    pub async fn state(&self, peer: &A) -> ConnectionState {
        self.entries
            .read()
            .await
            .get(peer)
            .map_or(ConnectionState::Uninit, |entry| entry.state)
    }

    pub async fn get(&self, peer: &A) -> Option<PeerEntry> {
        self.entries.read().await.get(peer).copied()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn peers(&self) -> Vec<A> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Remove every entry idle for longer than `idle_timeout` and return the
    /// evicted peers.
    pub async fn sweep_idle(&self, idle_timeout: Duration) -> Vec<A> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let expired: Vec<A> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) > idle_timeout)
            .map(|(peer, _)| peer.clone())
            .collect();

        for peer in &expired {
            entries.remove(peer);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn unknown_peer_is_uninit() {
        let table = ConnectionTable::<SocketAddr>::new();
        assert_eq!(table.state(&peer(1)).await, ConnectionState::Uninit);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn handshake_then_establish() {
        let table = ConnectionTable::new();
        assert!(table.begin_handshake(&peer(1)).await);
        assert!(!table.begin_handshake(&peer(1)).await);
        assert_eq!(table.state(&peer(1)).await, ConnectionState::Handshaking);

        table.establish(&peer(1)).await;
        assert_eq!(table.state(&peer(1)).await, ConnectionState::Established);
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn failed_handshake_leaves_no_entry() {
        let table = ConnectionTable::new();
        table.begin_handshake(&peer(1)).await;
        assert!(table
            .remove_if_state(&peer(1), ConnectionState::Handshaking)
            .await);
        assert!(table.get(&peer(1)).await.is_none());
    }

    #[tokio::test]
    async fn remove_if_state_keeps_other_states() {
        let table = ConnectionTable::new();
        table.establish(&peer(1)).await;
        assert!(!table
            .remove_if_state(&peer(1), ConnectionState::Handshaking)
            .await);
        assert_eq!(table.state(&peer(1)).await, ConnectionState::Established);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_refreshes_last_seen() {
        let table = ConnectionTable::new();
        table.keep_alive(&peer(1)).await;
        let first = table.get(&peer(1)).await.unwrap().last_seen;

        tokio::time::advance(Duration::from_secs(5)).await;
        table.keep_alive(&peer(1)).await;
        let second = table.get(&peer(1)).await.unwrap();

        assert!(second.last_seen > first);
        assert_eq!(second.state, ConnectionState::Established);
    }

    #[tokio::test]
    async fn touch_does_not_create() {
        let table = ConnectionTable::new();
        table.touch(&peer(1)).await;
        assert!(table.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_idle_entries() {
        let table = ConnectionTable::new();
        table.establish(&peer(1)).await;

        tokio::time::advance(Duration::from_secs(20)).await;
        table.establish(&peer(2)).await;

        tokio::time::advance(Duration::from_secs(15)).await;
        let evicted = table.sweep_idle(Duration::from_secs(30)).await;

        assert_eq!(evicted, vec![peer(1)]);
        assert_eq!(table.peers().await, vec![peer(2)]);
    }

    #[tokio::test]
    async fn remove_unless_respects_owner_check() {
        let table = ConnectionTable::new();
        table.establish(&peer(1)).await;

        assert!(!table.remove_unless(&peer(1), || true).await);
        assert_eq!(table.state(&peer(1)).await, ConnectionState::Established);
        assert!(table.remove_unless(&peer(1), || false).await);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn closing_then_remove() {
        let table = ConnectionTable::new();
        table.establish(&peer(1)).await;
        table.mark_closing(&peer(1)).await;
        assert_eq!(table.state(&peer(1)).await, ConnectionState::Closing);
        assert!(table.remove(&peer(1)).await.is_some());
        assert_eq!(table.state(&peer(1)).await, ConnectionState::Uninit);
    }
}
