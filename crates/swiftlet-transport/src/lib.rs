//! # swiftlet Transport
//!
//! Datagram transport for swiftlet sessions. One UDP socket carries a
//! whole session mesh; the session layer demultiplexes by source address.
//!
//! ## Module Structure
//!
//! - [`transport`]: The `Transport` trait, errors, and statistics
//! - [`udp`]: Tokio UDP endpoint with socket2-configured buffers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod transport;
pub mod udp;

pub use transport::{Transport, TransportError, TransportResult, TransportStats};
pub use udp::UdpEndpoint;

/// Ethernet-path MTU payload (1500 minus IP/UDP headers). DATA datagrams
/// are sized to fit it; INTEGRITY batches may exceed it and rely on IP
/// fragmentation.
pub const MAX_DATAGRAM_SIZE: usize = 1472;
