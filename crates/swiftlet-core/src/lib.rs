//! # swiftlet Core
//!
//! Session layer of the swiftlet protocol: the chunk scheduler, the
//! seeder-side per-leecher state machine, the leecher state machine with
//! single-fallback seeder failover, and the public [`Seeder`] / [`Leecher`]
//! handles.
//!
//! A session, end to end:
//!
//! ```text
//! Leecher                                Seeder
//!    |                                      |
//!    |-------- HANDSHAKE (init) ----------->|
//!    |<------- HANDSHAKE ‖ HAVE ------------|
//!    |                                      |
//!    |-------- REQUEST ‖ PEX_REQ ---------->|
//!    |<------- [PEX_RESP] \ INTEGRITY ------|
//!    |<------- DATA (one chunk) ------------|
//!    |-------- ACK ------------------------>|   (repeat per chunk,
//!    |                 ...                  |    per schedule batch)
//!    |-------- HANDSHAKE (finish) --------->|
//! ```
//!
//! ## Module Structure
//!
//! - [`scheduler`]: Chunk bookkeeping and MTU-sized request batching
//! - [`seeder`]: Seeder handle, dispatcher, per-leecher workers
//! - [`leecher`]: Leecher handle, fetch state machine, failover
//! - [`peer`]: Channel ids and per-peer liveness tracking
//! - [`error`]: Session error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod leecher;
pub mod peer;
pub mod scheduler;
pub mod seeder;

pub use error::{Error, SessionError};
pub use leecher::{ChunkSink, Leecher, LeecherConfig, Metadata};
pub use scheduler::{ChunkMap, DownloadSchedule, ScheduleEntry};
pub use seeder::{Seeder, SeederConfig};

/// Default chunk size in bytes (negotiable via the CHUNK_SIZE option).
pub const DEFAULT_CHUNK_SIZE: u32 = 1024;

/// Chunks per request batch, sized so an INTEGRITY reply's hashes fit one
/// datagram budget.
pub const HASHES_PER_MTU: u32 = 256;

/// Default per-peer inactivity timeout.
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);
