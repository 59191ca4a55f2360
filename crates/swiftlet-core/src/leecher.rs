//! Leecher: metadata handshake, schedule-driven fetch, seeder failover.
//!
//! A single task drives the whole state machine:
//!
//! ```text
//! HANDSHAKE → WAIT_HAVE → PREPARE_REQUEST ──(none left)──► SEND_HANDSHAKE_FINISH
//!                              │  ▲
//!                              ▼  │ next batch / reschedule
//!              SEND_REQUEST ‖ PEX_REQ
//!                              │
//!               [PEX_RESP] → INTEGRITY → (DATA → verify → ACK)*
//! ```
//!
//! Every received DATA payload is hashed and compared against the leaf
//! hash INTEGRITY delivered; a mismatch is discarded without an ACK and
//! the missing chunks are re-requested on the next scheduler pass. A
//! timeout switches to the next known alternative seeder, preserving all
//! verified chunk state; with no alternatives it is fatal.

use std::io::{Seek, SeekFrom, Write};
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, info, warn};

use swiftlet_files::{sha1_digest, MerkleTree, DIGEST_SIZE};
use swiftlet_transport::{Transport, UdpEndpoint};
use swiftlet_wire::{Datagram, HandshakeOptions, Message};

use crate::error::{Error, SessionError};
use crate::peer::{generate_channel_id, Liveness};
use crate::scheduler::{ChunkMap, DownloadSchedule, ScheduleEntry};
use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT, HASHES_PER_MTU};

/// Leecher configuration.
#[derive(Debug, Clone)]
pub struct LeecherConfig {
    /// Primary seeder address
    pub seeder_addr: SocketAddr,
    /// Root hash of the demanded file
    pub sha_demanded: [u8; DIGEST_SIZE],
    /// Inactivity timeout before failover (or failure)
    pub timeout: Duration,
    /// Chunk size advertised in the opening handshake; the seeder's reply
    /// is authoritative
    pub chunk_size: u32,
    /// Alternative seeders known ahead of time (PEX adds more)
    pub alt_seeders: Vec<SocketAddr>,
}

impl LeecherConfig {
    /// Config with default timeout and chunk size.
    #[must_use]
    pub fn new(seeder_addr: SocketAddr, sha_demanded: [u8; DIGEST_SIZE]) -> Self {
        Self {
            seeder_addr,
            sha_demanded,
            timeout: DEFAULT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            alt_seeders: Vec::new(),
        }
    }
}

/// File metadata learned from the seeder's handshake reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Shared file name
    pub file_name: String,
    /// File size in bytes
    pub file_size: u64,
    /// Chunk size the content was hashed with
    pub chunk_size: u32,
    /// First advertised chunk
    pub start_chunk: u32,
    /// Last advertised chunk
    pub end_chunk: u32,
}

impl Metadata {
    /// Number of advertised chunks.
    #[must_use]
    pub fn num_chunks(&self) -> u32 {
        self.end_chunk - self.start_chunk + 1
    }
}

/// Destination for fetched chunk bytes, addressed by offset within the
/// fetched range.
pub enum ChunkSink<'a> {
    /// Grow-on-demand memory buffer
    Buffer(&'a mut Vec<u8>),
    /// Seekable file
    File(&'a mut std::fs::File),
}

impl ChunkSink<'_> {
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), Error> {
        match self {
            Self::Buffer(buf) => {
                let end = offset as usize + bytes.len();
                if buf.len() < end {
                    buf.resize(end, 0);
                }
                buf[offset as usize..end].copy_from_slice(bytes);
                Ok(())
            }
            Self::File(file) => {
                file.seek(SeekFrom::Start(offset))
                    .map_err(swiftlet_files::FileError::from)?;
                file.write_all(bytes)
                    .map_err(swiftlet_files::FileError::from)?;
                Ok(())
            }
        }
    }
}

enum BatchOutcome {
    /// Every chunk of the batch verified and acknowledged
    Completed,
    /// A payload failed verification; the schedule must be rebuilt
    Reschedule,
}

/// Leecher handle: one session, driven synchronously.
pub struct Leecher {
    config: LeecherConfig,
    endpoint: UdpEndpoint,
    liveness: Liveness,
    current_seeder: SocketAddr,
    alt_seeders: Vec<SocketAddr>,
    alt_cursor: usize,
    after_seeder_switch: bool,
    our_channel: u32,
    seeder_channel: u32,
    handshaken: bool,
    metadata: Option<Metadata>,
    chunks: Option<ChunkMap>,
    tree: Option<MerkleTree>,
    schedule: Option<DownloadSchedule>,
    range: Option<(u32, u32)>,
}

impl Leecher {
    /// Create a leecher and bind its socket.
    ///
    /// # Errors
    ///
    /// Fails when no socket can be bound.
    pub fn new(config: LeecherConfig) -> Result<Self, Error> {
        let endpoint = UdpEndpoint::bind_ephemeral()?;
        let liveness = Liveness::new(config.timeout);
        let current_seeder = config.seeder_addr;
        let alt_seeders = config.alt_seeders.clone();
        Ok(Self {
            config,
            endpoint,
            liveness,
            current_seeder,
            alt_seeders,
            alt_cursor: 0,
            after_seeder_switch: false,
            our_channel: generate_channel_id(),
            seeder_channel: 0,
            handshaken: false,
            metadata: None,
            chunks: None,
            tree: None,
            schedule: None,
            range: None,
        })
    }

    /// Perform the opening handshake and return the file's metadata.
    ///
    /// # Errors
    ///
    /// [`SessionError::FileNotFound`] when the seeder has no entry for the
    /// demanded hash; [`SessionError::Timeout`] when it never answers.
    pub async fn get_metadata(&mut self) -> Result<Metadata, Error> {
        if !self.handshaken {
            self.handshake().await?;
        }
        self.metadata
            .clone()
            .ok_or_else(|| SessionError::NoMetadata.into())
    }

    /// Build the download schedule for `[start, end]` and return the
    /// buffer size a caller needs for that range.
    ///
    /// # Errors
    ///
    /// Requires metadata; fails when the range starts past the advertised
    /// file.
    pub fn prepare_range(&mut self, start: u32, end: u32) -> Result<u64, Error> {
        let meta = self
            .metadata
            .as_ref()
            .ok_or(SessionError::NoMetadata)?;
        if start > meta.end_chunk || start > end {
            return Err(SessionError::RangeOutOfBounds {
                start,
                end,
                max: meta.end_chunk,
            }
            .into());
        }
        let chunks = self.chunks.as_ref().ok_or(SessionError::NoMetadata)?;
        let schedule =
            DownloadSchedule::build(chunks, start, end, HASHES_PER_MTU, meta.chunk_size);
        debug!(
            start,
            end,
            batches = schedule.len(),
            buffer = schedule.buffer_size(),
            "prepared range"
        );
        let size = schedule.buffer_size();
        self.schedule = Some(schedule);
        self.range = Some((start, end));
        Ok(size)
    }

    /// Fetch the prepared range into a new buffer.
    ///
    /// # Errors
    ///
    /// See [`Self::fetch`].
    pub async fn fetch_to_vec(&mut self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        let written = self
            .fetch(&mut ChunkSink::Buffer(&mut buf))
            .await?;
        buf.truncate(written as usize);
        Ok(buf)
    }

    /// Fetch the prepared range into a file, chunk offsets relative to
    /// the range start. Returns bytes written.
    ///
    /// # Errors
    ///
    /// See [`Self::fetch`].
    pub async fn fetch_to_file(&mut self, file: &mut std::fs::File) -> Result<u64, Error> {
        self.fetch(&mut ChunkSink::File(file)).await
    }

    /// Drive the state machine until the prepared range is fully
    /// downloaded and verified, then close the session. Returns the byte
    /// extent written to the sink.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotPrepared`] without a prior
    /// [`Self::prepare_range`]; [`SessionError::Timeout`] when the seeder
    /// goes silent and no alternative completes the handshake; wire and
    /// transport errors are fatal.
    pub async fn fetch(&mut self, sink: &mut ChunkSink<'_>) -> Result<u64, Error> {
        let mut schedule = self.schedule.take().ok_or(SessionError::NotPrepared)?;
        let (range_start, range_end) = self.range.ok_or(SessionError::NotPrepared)?;

        if !self.handshaken && !schedule.is_empty() {
            self.handshake().await?;
        }

        let mut written = 0u64;
        loop {
            let Some(batch) = schedule.next_batch() else {
                break;
            };
            match self.run_batch(batch, range_start, sink, &mut written).await {
                Ok(BatchOutcome::Completed) => {}
                Ok(BatchOutcome::Reschedule) => {
                    schedule = self.rebuild_schedule(range_start, range_end)?;
                }
                Err(Error::Session(SessionError::Timeout)) => {
                    self.switch_seeder().await?;
                    schedule = self.rebuild_schedule(range_start, range_end)?;
                }
                Err(e) => return Err(e),
            }
        }

        // SEND_HANDSHAKE_FINISH: the range is complete.
        if self.handshaken {
            self.send_finish().await?;
        }
        Ok(written)
    }

    /// Close the session, sending the finishing handshake if one is open.
    ///
    /// # Errors
    ///
    /// Propagates the send failure, if any.
    pub async fn close(mut self) -> Result<(), Error> {
        if self.handshaken {
            self.send_finish().await?;
        }
        Ok(())
    }

    /// True once every advertised chunk has been downloaded and verified.
    #[must_use]
    pub fn all_chunks_downloaded(&self) -> bool {
        self.chunks
            .as_ref()
            .is_some_and(ChunkMap::all_downloaded)
    }

    /// Alternative seeders currently known (configured plus PEX-learned).
    #[must_use]
    pub fn known_alt_seeders(&self) -> &[SocketAddr] {
        &self.alt_seeders
    }

    async fn send_finish(&mut self) -> Result<(), Error> {
        let finish = Datagram::handshake_finish(self.seeder_channel);
        self.send_datagram(&finish).await?;
        self.handshaken = false;
        debug!(seeder = %self.current_seeder, "session closed");
        Ok(())
    }

    async fn send_datagram(&mut self, dgram: &Datagram) -> Result<(), Error> {
        self.endpoint
            .send_to(&dgram.encode(), self.current_seeder)
            .await?;
        self.liveness.touch_send();
        Ok(())
    }

    fn rebuild_schedule(&self, start: u32, end: u32) -> Result<DownloadSchedule, Error> {
        let meta = self.metadata.as_ref().ok_or(SessionError::NoMetadata)?;
        let chunks = self.chunks.as_ref().ok_or(SessionError::NoMetadata)?;
        Ok(DownloadSchedule::build(
            chunks,
            start,
            end,
            HASHES_PER_MTU,
            meta.chunk_size,
        ))
    }

    /// HANDSHAKE → WAIT_HAVE.
    async fn handshake(&mut self) -> Result<(), Error> {
        let init = Datagram::handshake_init(
            self.our_channel,
            HandshakeOptions::request(self.config.sha_demanded, self.config.chunk_size),
        );
        self.send_datagram(&init).await?;
        debug!(seeder = %self.current_seeder, "handshake sent");

        let reply = self.recv_dgram().await?;
        let Message::Handshake(hs) = &reply.messages[0] else {
            return Err(SessionError::UnexpectedMessage {
                expected: "HANDSHAKE reply",
                got: reply.leading_kind(),
            }
            .into());
        };
        let opts = hs
            .options
            .as_ref()
            .ok_or(SessionError::HandshakeError)?;

        if opts.signals_not_found() {
            // Tell the seeder we are done, then surface the miss.
            self.seeder_channel = hs.src_channel;
            self.handshaken = true;
            self.send_finish().await?;
            return Err(SessionError::FileNotFound.into());
        }

        let Some(Message::Have {
            start_chunk,
            end_chunk,
        }) = reply.messages.get(1)
        else {
            return Err(SessionError::UnexpectedMessage {
                expected: "HAVE",
                got: reply.leading_kind(),
            }
            .into());
        };

        let meta = Metadata {
            file_name: String::from_utf8_lossy(&opts.file_name).into_owned(),
            file_size: opts.file_size,
            chunk_size: opts.chunk_size,
            start_chunk: *start_chunk,
            end_chunk: *end_chunk,
        };

        match &self.metadata {
            None => {
                // First contact: allocate chunk table and tree.
                let nc = meta.num_chunks();
                let nl = nc.next_power_of_two();
                info!(
                    file = %meta.file_name,
                    size = meta.file_size,
                    nc,
                    nl,
                    "metadata received"
                );
                self.chunks = Some(ChunkMap::new(nc, nl));
                self.tree = Some(MerkleTree::build(nc));
                self.metadata = Some(meta);
            }
            Some(existing) => {
                // Rehandshake (new fetch or failover): the chunk table
                // and tree survive, so the file must not have changed.
                if *existing != meta {
                    return Err(SessionError::MetadataMismatch.into());
                }
                debug!(
                    after_switch = self.after_seeder_switch,
                    "rehandshake, chunk state preserved"
                );
            }
        }

        self.seeder_channel = hs.src_channel;
        self.handshaken = true;
        Ok(())
    }

    /// SEND_REQUEST through the batch's last ACK.
    async fn run_batch(
        &mut self,
        batch: ScheduleEntry,
        range_start: u32,
        sink: &mut ChunkSink<'_>,
        written: &mut u64,
    ) -> Result<BatchOutcome, Error> {
        let request = Datagram::request(self.seeder_channel, batch.begin, batch.end);
        self.send_datagram(&request).await?;

        // WAIT_PEX_RESP / WAIT_INTEGRITY: PEX_RESP, when it comes, comes
        // first; tolerate either order.
        let hashes = loop {
            let dgram = self.recv_dgram().await?;
            match &dgram.messages[0] {
                Message::PexResp { peers } => self.learn_alt_seeders(peers),
                Message::Integrity {
                    start_chunk,
                    end_chunk,
                    hashes,
                } if *start_chunk == batch.begin && *end_chunk == batch.end => {
                    break hashes.clone();
                }
                other => {
                    return Err(SessionError::UnexpectedMessage {
                        expected: "INTEGRITY",
                        got: other.kind(),
                    }
                    .into());
                }
            }
        };

        // INTEGRITY: record verification hashes in the chunk table and
        // the tree leaves.
        {
            let chunks = self.chunks.as_mut().ok_or(SessionError::NoMetadata)?;
            let tree = self.tree.as_mut().ok_or(SessionError::NoMetadata)?;
            for (i, hash) in hashes.iter().enumerate() {
                let chunk = batch.begin + i as u32;
                chunks.set_hash(chunk, *hash);
                tree.set_leaf(chunk, *hash);
            }
        }

        let meta = self
            .metadata
            .clone()
            .ok_or(SessionError::NoMetadata)?;

        // WAIT_DATA → verify → SEND_ACK, per chunk, ascending.
        let mut curr = batch.begin;
        while curr <= batch.end {
            let dgram = self.recv_dgram().await?;
            let Message::Data {
                start_chunk,
                timestamp,
                payload,
                ..
            } = &dgram.messages[0]
            else {
                return Err(SessionError::UnexpectedMessage {
                    expected: "DATA",
                    got: dgram.leading_kind(),
                }
                .into());
            };
            if *start_chunk != curr {
                return Err(SessionError::UnexpectedMessage {
                    expected: "DATA for the current chunk",
                    got: dgram.leading_kind(),
                }
                .into());
            }

            let expected = self
                .chunks
                .as_ref()
                .and_then(|c| c.hash(curr))
                .ok_or(SessionError::NoMetadata)?;
            if sha1_digest(payload) != expected {
                // Integrity violation: drop the payload, skip the ACK,
                // re-request on the next scheduler pass.
                warn!(chunk = curr, "data hash mismatch; discarding chunk");
                return Ok(BatchOutcome::Reschedule);
            }

            let offset = u64::from(curr - range_start) * u64::from(meta.chunk_size);
            sink.write_at(offset, payload)?;
            *written = (*written).max(offset + payload.len() as u64);
            if let Some(chunks) = self.chunks.as_mut() {
                chunks.mark_downloaded(curr);
            }

            let ack = Datagram::single(
                self.seeder_channel,
                Message::Ack {
                    start_chunk: curr,
                    end_chunk: curr,
                    delay_sample: *timestamp,
                },
            );
            self.send_datagram(&ack).await?;
            curr += 1;
        }

        Ok(BatchOutcome::Completed)
    }

    /// SWITCH_SEEDER: try each known alternative once, re-handshaking with
    /// preserved chunk state.
    async fn switch_seeder(&mut self) -> Result<(), Error> {
        if self.alt_seeders.is_empty() {
            return Err(SessionError::Timeout.into());
        }

        for _ in 0..self.alt_seeders.len() {
            let next = self.alt_seeders[self.alt_cursor % self.alt_seeders.len()];
            self.alt_cursor += 1;
            if next == self.current_seeder {
                continue;
            }

            warn!(
                from = %self.current_seeder,
                to = %next,
                "seeder timed out; switching"
            );
            self.endpoint = UdpEndpoint::bind_ephemeral()?;
            self.liveness = Liveness::new(self.config.timeout);
            self.our_channel = generate_channel_id();
            self.current_seeder = next;
            self.after_seeder_switch = true;
            self.handshaken = false;

            match self.handshake().await {
                Ok(()) => return Ok(()),
                Err(Error::Session(SessionError::Timeout)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(SessionError::Timeout.into())
    }

    fn learn_alt_seeders(&mut self, peers: &[std::net::SocketAddrV4]) {
        for peer in peers {
            let addr = SocketAddr::V4(*peer);
            if addr != self.current_seeder && !self.alt_seeders.contains(&addr) {
                info!(%addr, "learned alternative seeder");
                self.alt_seeders.push(addr);
            }
        }
    }

    /// Receive the next datagram from the current seeder, enforcing the
    /// session timeout and our channel id. Traffic from other addresses
    /// is ignored and does not keep the session alive.
    async fn recv_dgram(&mut self) -> Result<Datagram, Error> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            if self.liveness.expired() {
                return Err(SessionError::Timeout.into());
            }
            match tokio::time::timeout(self.liveness.remaining(), self.endpoint.recv_from(&mut buf))
                .await
            {
                Err(_) => return Err(SessionError::Timeout.into()),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok((len, from))) => {
                    if from != self.current_seeder {
                        debug!(%from, "datagram from unexpected address ignored");
                        continue;
                    }
                    let dgram = Datagram::parse(&buf[..len])?;
                    if dgram.channel != self.our_channel {
                        return Err(SessionError::ChannelMismatch {
                            expected: self.our_channel,
                            got: dgram.channel,
                        }
                        .into());
                    }
                    self.liveness.touch_recv();
                    return Ok(dgram);
                }
            }
        }
    }
}
