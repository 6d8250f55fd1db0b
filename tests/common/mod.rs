//! Shared helpers for loopback integration tests

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rudp_tokio::sim::LossyTransport;
use rudp_tokio::{Connection, Endpoint, RudpConfig, Transport, UdpTransport};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Instant};

pub type Lossy = LossyTransport<UdpTransport>;

pub fn localhost() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Sub-second timeouts and no idle eviction
pub fn config() -> RudpConfig {
    RudpConfig::testing().idle_timeout(None)
}

pub async fn endpoint(config: RudpConfig) -> Endpoint {
    Endpoint::bind(localhost(), config).await.unwrap()
}

/// An endpoint whose outbound packets pass through a [`LossyTransport`]
/// configured by `faults`.
pub async fn lossy_endpoint(
    config: RudpConfig,
    faults: impl FnOnce(Lossy) -> Lossy,
) -> (Endpoint<Lossy>, Arc<Lossy>) {
    let inner = UdpTransport::bind(localhost()).await.unwrap();
    let transport = Arc::new(faults(LossyTransport::new(inner)));
    let endpoint = Endpoint::with_transport(transport.clone(), config).unwrap();
    (endpoint, transport)
}

/// Connect `client` to `server` and accept on the server side.
pub async fn connect_pair<A, B>(
    client: &Endpoint<A>,
    server: &Endpoint<B>,
) -> (Connection<A>, Connection<B>)
where
    A: Transport<Addr = SocketAddr>,
    B: Transport<Addr = SocketAddr>,
{
    let (client_conn, server_conn) =
        tokio::join!(client.connect(server.local_addr()), server.accept());
    (client_conn.unwrap(), server_conn.unwrap())
}

/// Poll `check` until it holds or `limit` passes.
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check().await
}

/// A bare UDP socket speaking the wire format by hand.
pub struct RawPeer {
    pub socket: UdpSocket,
}

impl RawPeer {
    pub async fn bind() -> Self {
        Self {
            socket: UdpSocket::bind(localhost()).await.unwrap(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    pub async fn send(&self, text: &str, to: &SocketAddr) {
        self.socket.send_to(text.as_bytes(), to).await.unwrap();
    }

    /// Next datagram as text, or `None` after `limit`.
    pub async fn recv_within(&self, limit: Duration) -> Option<(String, SocketAddr)> {
        let mut buf = vec![0u8; 65536];
        let (n, from) = timeout(limit, self.socket.recv_from(&mut buf)).await.ok()?.unwrap();
        Some((String::from_utf8_lossy(&buf[..n]).into_owned(), from))
    }

    pub async fn recv(&self) -> (String, SocketAddr) {
        self.recv_within(Duration::from_secs(2))
            .await
            .expect("no datagram within 2s")
    }

    /// Run the initiator side of the handshake against `server` with `isn`.
    pub async fn handshake(&self, server: &SocketAddr, isn: u32) {
        self.send(&format!("SYN:{isn}"), server).await;
        let (reply, _) = self.recv().await;
        assert_eq!(reply, format!("SYN-ACK:{}", isn + 1));
        self.send(&format!("ACK:{}", isn + 1), server).await;
    }
}
