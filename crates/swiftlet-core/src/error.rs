//! Error types for the swiftlet session layer.

use swiftlet_wire::MessageKind;
use thiserror::Error;

/// Top-level session errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Wire codec error (fatal to the offending peer)
    #[error("wire error: {0}")]
    Wire(#[from] swiftlet_wire::WireError),

    /// File engine error
    #[error("file error: {0}")]
    File(#[from] swiftlet_files::FileError),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] swiftlet_transport::TransportError),

    /// Protocol state violation
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Protocol-state errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No inbound traffic within the peer's timeout, and (leecher side)
    /// no alternative seeder left to switch to
    #[error("peer timed out")]
    Timeout,

    /// Seeder had no catalog entry for the demanded hash; its reply
    /// carried a zero file size and an empty name
    #[error("no file for the demanded hash")]
    FileNotFound,

    /// A message arrived that the state machine cannot accept here
    #[error("expected {expected}, got {got:?}")]
    UnexpectedMessage {
        /// What the state machine was waiting for
        expected: &'static str,
        /// Kind actually received
        got: MessageKind,
    },

    /// Datagram addressed to a channel this peer does not own
    #[error("channel mismatch: expected {expected:#010x}, got {got:#010x}")]
    ChannelMismatch {
        /// Channel the peer listens on
        expected: u32,
        /// Channel in the datagram
        got: u32,
    },

    /// Handshake whose (dest, src) channel pair classifies as ERROR
    #[error("invalid handshake channel combination")]
    HandshakeError,

    /// Requested chunk range outside the advertised file
    #[error("range {start}..={end} outside advertised 0..={max}")]
    RangeOutOfBounds {
        /// First requested chunk
        start: u32,
        /// Last requested chunk
        end: u32,
        /// Last chunk the file has
        max: u32,
    },

    /// Fetch invoked before a range was prepared
    #[error("no chunk range prepared")]
    NotPrepared,

    /// Operation requires metadata that has not been fetched yet
    #[error("metadata not fetched")]
    NoMetadata,

    /// After failover the alternative seeder described a different file
    #[error("alternative seeder metadata disagrees with primary")]
    MetadataMismatch,

    /// The session's worker or dispatcher went away
    #[error("peer worker gone")]
    PeerGone,
}
