//! # rudp - Reliable Datagrams over UDP
//!
//! A stop-and-wait ARQ transport with a three-way handshake, built on Tokio,
//! plus a small HTTP-shaped request/response layer on top.
//!
//! ## Features
//!
//! - **Handshake**: `SYN` / `SYN-ACK` / `ACK` agree on a sequence baseline
//! - **Reliable delivery**: one packet in flight, bounded retransmission
//! - **Per-peer sessions**: no global counters, any number of peers per socket
//! - **Keep-alive table**: per-peer state with idle eviction
//! - **Observability**: `tracing` spans and atomic metrics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rudp_tokio::{Client, RudpConfig};
//! use std::net::SocketAddr;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server: SocketAddr = "127.0.0.1:3000".parse()?;
//!     let client = Client::bind(server, RudpConfig::lan()).await?;
//!
//!     let response = client.get("/hello", true).await?;
//!     println!("{} {}", response.status, response.body_text());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   Request Layer     │  Client, Server, Handler, http codec
//! ├─────────────────────┤
//! │   Connection Layer  │  Connection, ConnectionTable
//! ├─────────────────────┤
//! │   Endpoint          │  dispatcher, handshake drivers, idle sweep
//! ├─────────────────────┤
//! │   Protocol Core     │  rudp-core: packets, sessions, state machines
//! ├─────────────────────┤
//! │   Transport Layer   │  UdpTransport, LossyTransport
//! └─────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
mod handshake;
pub mod http;
pub mod metrics;
pub mod server;
pub mod sim;
pub mod table;
pub mod transport;

// Re-exports
pub use client::Client;
pub use config::{RehandshakePolicy, RudpConfig};
pub use connection::Connection;
pub use endpoint::Endpoint;
pub use error::{ConnectionError, HandshakeError, Result, RudpError};
pub use http::{ConnectionPreference, Method, Request, Response};
pub use metrics::{EndpointMetrics, MetricsSnapshot};
pub use server::{DefaultHandler, Handler, Server};
pub use table::{ConnectionState, ConnectionTable, PeerEntry};
pub use transport::{Transport, UdpTransport};

pub use rudp_core::{ArqConfig, Packet, PacketKind, SeqNum, Session};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
