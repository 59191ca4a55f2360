//! Tokio UDP endpoint.
//!
//! Sockets are created through socket2 so receive/send buffers can be
//! sized before binding, then converted into a tokio socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::transport::{Transport, TransportError, TransportResult, TransportStats};

const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

/// UDP endpoint with datagram counters.
#[derive(Clone)]
pub struct UdpEndpoint {
    socket: Arc<UdpSocket>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    datagrams_sent: Arc<AtomicU64>,
    datagrams_received: Arc<AtomicU64>,
}

impl UdpEndpoint {
    /// Bind to `addr`. Port 0 selects an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BindFailed`] when socket creation,
    /// configuration, or binding fails.
    pub fn bind(addr: SocketAddr) -> TransportResult<Self> {
        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };

        let socket = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket
            .set_recv_buffer_size(SOCKET_BUFFER_SIZE)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket
            .set_send_buffer_size(SOCKET_BUFFER_SIZE)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket
            .bind(&addr.into())
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        tracing::debug!(%addr, "udp endpoint bound");

        Ok(Self {
            socket: Arc::new(socket),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            datagrams_sent: Arc::new(AtomicU64::new(0)),
            datagrams_received: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Bind to an ephemeral IPv4 port on all interfaces.
    ///
    /// # Errors
    ///
    /// See [`Self::bind`].
    pub fn bind_ephemeral() -> TransportResult<Self> {
        Self::bind(SocketAddr::from(([0, 0, 0, 0], 0)))
    }
}

#[async_trait]
impl Transport for UdpEndpoint {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        let sent = self.socket.send_to(buf, addr).await?;
        self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        Ok(sent)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        let (size, addr) = self.socket.recv_from(buf).await?;
        self.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        Ok((size, addr))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let endpoint = UdpEndpoint::bind_ephemeral().unwrap();
        assert_ne!(endpoint.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_send_recv_loopback() {
        let server = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let client = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let server_addr = server.local_addr().unwrap();

        client.send_to(b"ping", server_addr).await.unwrap();

        let mut buf = vec![0u8; 64];
        let (size, from) = timeout(Duration::from_secs(1), server.recv_from(&mut buf))
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(&buf[..size], b"ping");
        assert_eq!(from, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_stats_counters() {
        let server = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let client = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let server_addr = server.local_addr().unwrap();

        client.send_to(&[0u8; 100], server_addr).await.unwrap();
        client.send_to(&[0u8; 50], server_addr).await.unwrap();

        let mut buf = vec![0u8; 256];
        for _ in 0..2 {
            timeout(Duration::from_secs(1), server.recv_from(&mut buf))
                .await
                .expect("timeout")
                .unwrap();
        }

        assert_eq!(client.stats().datagrams_sent, 2);
        assert_eq!(client.stats().bytes_sent, 150);
        assert_eq!(server.stats().datagrams_received, 2);
        assert_eq!(server.stats().bytes_received, 150);
    }

    #[tokio::test]
    async fn test_near_mtu_datagram() {
        let server = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let client = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let server_addr = server.local_addr().unwrap();

        let payload = vec![0xA5; crate::MAX_DATAGRAM_SIZE];
        client.send_to(&payload, server_addr).await.unwrap();

        let mut buf = vec![0u8; 2048];
        let (size, _) = timeout(Duration::from_secs(1), server.recv_from(&mut buf))
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(&buf[..size], &payload[..]);
    }
}
