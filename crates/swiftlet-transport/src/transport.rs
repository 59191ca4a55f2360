//! Transport trait and supporting types.

use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket creation or bind failure
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// Underlying socket I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation on a closed transport
    #[error("transport closed")]
    Closed,
}

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Datagram counters, mirrored on both endpoints of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Datagrams sent
    pub datagrams_sent: u64,
    /// Datagrams received
    pub datagrams_received: u64,
}

/// Async datagram transport.
///
/// The session layer holds one transport per socket and addresses peers
/// explicitly; there is no per-peer connection state at this level.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to `addr`.
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize>;

    /// Receive one datagram; returns its length and source address.
    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)>;

    /// Local bound address.
    fn local_addr(&self) -> TransportResult<SocketAddr>;

    /// Datagram counters.
    fn stats(&self) -> TransportStats;
}
