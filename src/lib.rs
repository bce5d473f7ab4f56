//! A lightweight SOCKS5 client library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT
//!     - No Authentication
//!     - Domain name, IPv4 and IPv6 destinations
//!     - Sans-IO handshake state machine
//!     - Event-driven socket over any transport, with an ordered event channel
//!     - Async stream adapter using tokio
//!     - Per-socket and shared byte counters
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use proxysocket::{Destination, ProxyEndpoint, Socks5Stream, TrafficTotals};
//! use tokio::io::AsyncWriteExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let totals = Arc::new(TrafficTotals::new());
//!     let mut stream = Socks5Stream::connect(
//!         &ProxyEndpoint::default(),
//!         &Destination::new("example.com", 80),
//!         totals,
//!     )
//!     .await?;
//!     stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod counters;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod socket;
pub mod stream;

// Re-export main types at crate root for convenience
pub use address::{BoundAddress, Destination, ProxyEndpoint};
pub use counters::{ByteCounters, TrafficTotals};
pub use error::{AddressError, AuthError, ConnectReplyError, HandshakeError, ProxyError};
pub use handshake::{Handshake, HandshakeStage};
pub use protocol::{AddressType, ReplyCode};
pub use socket::{ConnectionState, ProxySocket, SocketEvent, Transport, TransportEvent};
pub use stream::Socks5Stream;
