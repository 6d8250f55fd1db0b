//! Pure synchronous state machines for a stop-and-wait reliable datagram
//! protocol.
//!
//! No tokio, no async, no I/O, no clocks of its own. Callers pass `Instant`s
//! in and put the returned packets on the wire.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  rudp-core                   │
//! │                              │
//! │  protocol  ← wire format     │
//! │  sequence  ← counters        │
//! │  handshake ← 3-way open      │
//! │  arq       ← stop-and-wait   │
//! │  config    ← retry budget    │
//! │  error     ← 3 variants      │
//! └──────────────────────────────┘
//! ```

pub mod arq;
pub mod config;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod sequence;

pub use arq::PendingSend;
pub use config::ArqConfig;
pub use error::{RudpCoreError, RudpCoreResult};
pub use handshake::{HandshakeState, Initiator, Responder, ResponderStep};
pub use protocol::{constants, Packet, PacketKind, SeqNum};
pub use sequence::{DataVerdict, SequenceCounter, Session};
