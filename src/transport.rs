//! Datagram transport abstraction.
//!
//! The [`Transport`] trait is the only thing the protocol needs from the
//! network: unordered, unreliable, addressed datagrams. [`UdpTransport`] is
//! the production implementation; [`crate::sim::LossyTransport`] wraps any
//! transport to inject faults.
//!
//! Receive timeouts are not part of the trait. The endpoint's dispatcher
//! owns `recv_from` and the protocol applies its own deadlines with
//! `tokio::time::timeout_at` on per-peer channels.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Marker trait for peer address types.
///
/// Blanket-implemented for every type with the required bounds, so address
/// types only need to be usable as map keys and printable in logs.
pub trait Addr: Clone + Eq + Hash + Send + Sync + Debug + Display + 'static {}

impl<T: Clone + Eq + Hash + Send + Sync + Debug + Display + 'static> Addr for T {}

/// Async datagram transport addressed by an associated [`Addr`] type.
///
/// Both methods take `&self`: one task receives while any number of tasks
/// send.
pub trait Transport: Send + Sync + 'static {
    /// Identifies a remote endpoint; the key for all per-peer state.
    type Addr: Addr;

    /// Send one datagram to `target`, returning the number of bytes written.
    fn send_to<'a>(
        &'a self,
        buf: &'a [u8],
        target: &'a Self::Addr,
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a;

    /// Receive one datagram into `buf`, returning `(bytes_read, source)`.
    fn recv_from<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<(usize, Self::Addr)>> + Send + 'a;

    fn local_addr(&self) -> io::Result<Self::Addr>;
}

// ---------------------------------------------------------------------------
// UdpTransport: default implementation backed by tokio::net::UdpSocket
// ---------------------------------------------------------------------------

/// [`Transport`] over a `tokio::net::UdpSocket`.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind a new UDP socket to `addr`.
    pub async fn bind(addr: impl tokio::net::ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    /// Wrap an existing `UdpSocket`.
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl Transport for UdpTransport {
    type Addr = SocketAddr;

    async fn send_to(&self, buf: &[u8], target: &SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn udp_transport_roundtrip() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send_to(b"SYN:0", &b_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"SYN:0");
        assert_eq!(from, a.local_addr().unwrap());
    }
}
