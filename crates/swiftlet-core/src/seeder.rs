//! Seeder: session dispatcher and per-leecher workers.
//!
//! One dispatcher task owns the UDP socket. Inbound datagrams are
//! demultiplexed by source address into a per-peer queue; each remote
//! leecher gets its own worker task driving the serving state machine:
//!
//! ```text
//! HANDSHAKE_INIT → SEND_HANDSHAKE_HAVE → WAIT_REQUEST
//!       ┌──────────────────────────────────┘
//!       ▼
//!   [SEND_PEX_RESP] → SEND_INTEGRITY → (SEND_DATA → WAIT_ACK)* ─┐
//!       ▲                                                       │
//!       └────────────────── next REQUEST ◄──────────────────────┘
//!                              or HANDSHAKE(finish) → done
//! ```
//!
//! A peer that goes silent past the configured timeout is dropped; so is
//! one that sends anything malformed.

use std::net::{SocketAddr, SocketAddrV4};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use swiftlet_files::{FileCatalog, SharedFile};
use swiftlet_transport::{Transport, UdpEndpoint};
use swiftlet_wire::{
    Datagram, Handshake, HandshakeClass, HandshakeOptions, Message,
};

use crate::error::{Error, SessionError};
use crate::peer::{generate_channel_id, monotonic_nanos, Liveness};
use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT};

/// Inbound datagrams buffered per peer before the dispatcher drops them.
const PEER_QUEUE_DEPTH: usize = 64;

/// Seeder configuration.
#[derive(Debug, Clone)]
pub struct SeederConfig {
    /// UDP port to serve on; 0 selects an ephemeral port
    pub port: u16,
    /// Chunk size used when hashing shared files
    pub chunk_size: u32,
    /// Per-peer inactivity timeout
    pub timeout: Duration,
}

impl Default for SeederConfig {
    fn default() -> Self {
        Self {
            port: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

struct SeederInner {
    config: SeederConfig,
    catalog: FileCatalog,
    alt_seeders: Mutex<Vec<SocketAddrV4>>,
    peers: DashMap<SocketAddr, mpsc::Sender<Vec<u8>>>,
}

/// Seeder handle: catalog management plus the serving loop.
#[derive(Clone)]
pub struct Seeder {
    inner: Arc<SeederInner>,
}

impl Seeder {
    /// Create a seeder with an empty catalog.
    #[must_use]
    pub fn new(config: SeederConfig) -> Self {
        Self {
            inner: Arc::new(SeederInner {
                config,
                catalog: FileCatalog::new(),
                alt_seeders: Mutex::new(Vec::new()),
                peers: DashMap::new(),
            }),
        }
    }

    /// Share a file, or every regular file under a directory. Returns the
    /// number of catalog entries added.
    ///
    /// # Errors
    ///
    /// Fails when a file cannot be read or hashed.
    pub fn add_file_or_directory(&self, path: &Path) -> Result<usize, Error> {
        Ok(self
            .inner
            .catalog
            .add_path(path, self.inner.config.chunk_size)?)
    }

    /// Stop sharing a file, or everything under a directory. Returns the
    /// number of entries removed.
    pub fn remove_file_or_directory(&self, path: &Path) -> usize {
        self.inner.catalog.remove_path(path)
    }

    /// Add an alternative seeder advertised through PEX responses.
    pub fn add_seeder(&self, addr: SocketAddrV4) {
        let mut list = self.inner.alt_seeders.lock().unwrap_or_else(|e| e.into_inner());
        if !list.contains(&addr) {
            list.push(addr);
        }
    }

    /// Remove an alternative seeder.
    pub fn remove_seeder(&self, addr: &SocketAddrV4) {
        let mut list = self.inner.alt_seeders.lock().unwrap_or_else(|e| e.into_inner());
        list.retain(|a| a != addr);
    }

    /// Currently advertised alternative seeders.
    #[must_use]
    pub fn alt_seeders(&self) -> Vec<SocketAddrV4> {
        self.inner
            .alt_seeders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// All shared files.
    #[must_use]
    pub fn shared_files(&self) -> Vec<Arc<SharedFile>> {
        self.inner.catalog.entries()
    }

    /// Number of live peer sessions.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.inner.peers.len()
    }

    /// Bind the configured port and serve until the socket fails.
    ///
    /// # Errors
    ///
    /// Returns the bind or receive error that ended the loop.
    pub async fn run(&self) -> Result<(), Error> {
        let endpoint = UdpEndpoint::bind(SocketAddr::from(([0, 0, 0, 0], self.inner.config.port)))?;
        self.run_on(endpoint).await
    }

    /// Serve on an already-bound endpoint. Useful when the caller needs
    /// the bound address before the loop starts.
    ///
    /// # Errors
    ///
    /// Returns the receive error that ended the loop.
    pub async fn run_on(&self, endpoint: UdpEndpoint) -> Result<(), Error> {
        let local = endpoint.local_addr()?;
        info!(%local, files = self.inner.catalog.len(), "seeder running");
        for shared in self.inner.catalog.entries() {
            info!(
                root = %hex::encode(shared.root_hash),
                path = %shared.path.display(),
                size = shared.file_size,
                "advertising"
            );
        }

        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (len, from) = endpoint.recv_from(&mut buf).await?;
            let bytes = buf[..len].to_vec();

            if let Some(tx) = self.inner.peers.get(&from).map(|e| e.value().clone()) {
                if tx.send(bytes).await.is_ok() {
                    continue;
                }
                // Worker already gone; drop the datagram. The peer's next
                // opening handshake recreates the session.
                self.inner.peers.remove(&from);
                continue;
            }

            match Datagram::parse(&bytes) {
                Ok(dgram) if Self::is_opening_handshake(&dgram) => {
                    let (tx, rx) = mpsc::channel(PEER_QUEUE_DEPTH);
                    if tx.send(bytes).await.is_err() {
                        continue;
                    }
                    self.inner.peers.insert(from, tx);
                    debug!(%from, peers = self.inner.peers.len(), "new leecher");
                    tokio::spawn(serve_leecher(
                        Arc::clone(&self.inner),
                        endpoint.clone(),
                        from,
                        rx,
                    ));
                }
                Ok(dgram) => {
                    debug!(%from, kind = ?dgram.leading_kind(), "datagram from unknown peer dropped");
                }
                Err(e) => {
                    debug!(%from, error = %e, "unparseable datagram from unknown peer dropped");
                }
            }
        }
    }

    fn is_opening_handshake(dgram: &Datagram) -> bool {
        match &dgram.messages[0] {
            Message::Handshake(hs) => {
                HandshakeClass::classify(dgram.channel, hs.src_channel) == HandshakeClass::Init
            }
            _ => false,
        }
    }
}

/// Worker entry: drive the session, then unregister the peer.
async fn serve_leecher(
    inner: Arc<SeederInner>,
    endpoint: UdpEndpoint,
    remote: SocketAddr,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    if let Err(e) = drive_session(&inner, &endpoint, remote, &mut rx).await {
        warn!(%remote, error = %e, "session aborted");
    }
    inner.peers.remove(&remote);
    debug!(%remote, "peer removed");
}

async fn recv_parsed(
    rx: &mut mpsc::Receiver<Vec<u8>>,
    liveness: &mut Liveness,
) -> Result<Datagram, Error> {
    if liveness.expired() {
        return Err(SessionError::Timeout.into());
    }
    let bytes = tokio::time::timeout(liveness.remaining(), rx.recv())
        .await
        .map_err(|_| SessionError::Timeout)?
        .ok_or(SessionError::PeerGone)?;
    liveness.touch_recv();
    Ok(Datagram::parse(&bytes)?)
}

async fn send_datagram(
    endpoint: &UdpEndpoint,
    liveness: &mut Liveness,
    remote: SocketAddr,
    dgram: &Datagram,
) -> Result<(), Error> {
    endpoint.send_to(&dgram.encode(), remote).await?;
    liveness.touch_send();
    Ok(())
}

async fn drive_session(
    inner: &SeederInner,
    endpoint: &UdpEndpoint,
    remote: SocketAddr,
    rx: &mut mpsc::Receiver<Vec<u8>>,
) -> Result<(), Error> {
    let mut liveness = Liveness::new(inner.config.timeout);

    // HANDSHAKE_INIT: the dispatcher guarantees the first datagram is an
    // opening handshake.
    let opening = recv_parsed(rx, &mut liveness).await?;
    let Message::Handshake(hs) = &opening.messages[0] else {
        return Err(SessionError::HandshakeError.into());
    };
    if HandshakeClass::classify(opening.channel, hs.src_channel) != HandshakeClass::Init {
        return Err(SessionError::HandshakeError.into());
    }
    let opts = hs.options.as_ref().ok_or(SessionError::HandshakeError)?;
    let leecher_channel = hs.src_channel;
    let our_channel = generate_channel_id();

    let demanded: Option<[u8; 20]> = opts
        .swarm_id
        .as_deref()
        .and_then(|id| id.try_into().ok());
    let shared = demanded.and_then(|root| inner.catalog.by_root(&root));

    let Some(shared) = shared else {
        // No catalog entry: reply with a zero-size, nameless handshake so
        // the leecher can surface "not found", then wait for its close.
        info!(%remote, "demanded hash not in catalog");
        let reply = Datagram::single(
            leecher_channel,
            Message::Handshake(Handshake {
                src_channel: our_channel,
                options: Some(HandshakeOptions::not_found(inner.config.chunk_size)),
            }),
        );
        send_datagram(endpoint, &mut liveness, remote, &reply).await?;
        let _ = recv_parsed(rx, &mut liveness).await;
        return Ok(());
    };

    // SEND_HANDSHAKE_HAVE: advertise the whole file.
    let reply = Datagram::handshake_have(
        leecher_channel,
        our_channel,
        HandshakeOptions::reply(shared.chunk_size, shared.file_size, shared.file_name()),
        0,
        shared.nc - 1,
    );
    send_datagram(endpoint, &mut liveness, remote, &reply).await?;
    info!(
        %remote,
        root = %hex::encode(shared.root_hash),
        nc = shared.nc,
        "session opened"
    );

    // WAIT_REQUEST cycle. `pending` carries a REQUEST that interrupted a
    // data/ack exchange back to the top of the loop.
    let mut pending: Option<Datagram> = None;
    loop {
        let dgram = match pending.take() {
            Some(d) => d,
            None => recv_parsed(rx, &mut liveness).await?,
        };
        if dgram.channel != our_channel {
            return Err(SessionError::ChannelMismatch {
                expected: our_channel,
                got: dgram.channel,
            }
            .into());
        }

        match &dgram.messages[0] {
            Message::Handshake(hs) if hs.src_channel == 0 => {
                // WAIT_FINISH: the leecher closed the session.
                debug!(%remote, "session closed by leecher");
                return Ok(());
            }
            Message::Request {
                start_chunk,
                end_chunk,
            } => {
                let (start, end) = (*start_chunk, *end_chunk);
                if start > end || end >= shared.nc {
                    return Err(SessionError::RangeOutOfBounds {
                        start,
                        end,
                        max: shared.nc - 1,
                    }
                    .into());
                }
                debug!(%remote, start, end, "request");

                // SEND_PEX_RESP when the request carried PEX_REQ and we
                // know alternatives.
                if dgram.messages.iter().any(|m| matches!(m, Message::PexReq)) {
                    let peers = inner
                        .alt_seeders
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .clone();
                    if !peers.is_empty() {
                        let pex = Datagram::single(leecher_channel, Message::PexResp { peers });
                        send_datagram(endpoint, &mut liveness, remote, &pex).await?;
                    }
                }

                // SEND_INTEGRITY: leaf hashes for the whole range.
                let integrity = Datagram::single(
                    leecher_channel,
                    Message::Integrity {
                        start_chunk: start,
                        end_chunk: end,
                        hashes: shared.tree.leaf_hashes(start, end),
                    },
                );
                send_datagram(endpoint, &mut liveness, remote, &integrity).await?;

                // SEND_DATA / WAIT_ACK per chunk, ascending.
                let mut curr = start;
                while curr <= end {
                    let payload = shared.read_chunk(curr).await?;
                    let data = Datagram::single(
                        leecher_channel,
                        Message::Data {
                            start_chunk: curr,
                            end_chunk: curr,
                            timestamp: monotonic_nanos(),
                            payload,
                        },
                    );
                    send_datagram(endpoint, &mut liveness, remote, &data).await?;

                    let reply = recv_parsed(rx, &mut liveness).await?;
                    if reply.channel != our_channel {
                        return Err(SessionError::ChannelMismatch {
                            expected: our_channel,
                            got: reply.channel,
                        }
                        .into());
                    }
                    match &reply.messages[0] {
                        Message::Ack { start_chunk, .. } if *start_chunk == curr => {
                            curr += 1;
                        }
                        Message::Request { .. } => {
                            // The leecher abandoned the batch (integrity
                            // mismatch on its side); restart from its new
                            // request.
                            debug!(%remote, chunk = curr, "batch interrupted by new request");
                            pending = Some(reply);
                            break;
                        }
                        Message::Handshake(hs) if hs.src_channel == 0 => {
                            debug!(%remote, "session closed by leecher mid-batch");
                            return Ok(());
                        }
                        other => {
                            return Err(SessionError::UnexpectedMessage {
                                expected: "ACK",
                                got: other.kind(),
                            }
                            .into());
                        }
                    }
                }
            }
            other => {
                return Err(SessionError::UnexpectedMessage {
                    expected: "REQUEST or closing HANDSHAKE",
                    got: other.kind(),
                }
                .into());
            }
        }
    }
}
