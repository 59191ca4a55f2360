//! Error types for the swiftlet wire codec.

use thiserror::Error;

/// Wire-level errors. Any of these is fatal to the session that produced
/// the datagram; the peer is dropped rather than resynchronized.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Datagram ended before the field being read
    #[error("truncated datagram: needed {expected} more bytes, had {actual}")]
    Truncated {
        /// Bytes the current field still required
        expected: usize,
        /// Bytes actually remaining
        actual: usize,
    },

    /// Message kind byte outside the protocol's assigned range
    #[error("unknown message kind: 0x{0:02X}")]
    UnknownKind(u8),

    /// Assigned message kind this implementation does not exchange
    #[error("unsupported message kind: {0:?}")]
    UnsupportedKind(crate::message::MessageKind),

    /// Handshake option list missing a required tag
    #[error("missing required handshake option: {0:?}")]
    MissingOption(crate::options::OptionTag),

    /// Option tag byte with no assigned meaning (body length unknowable)
    #[error("unknown handshake option tag: 0x{0:02X}")]
    UnknownOption(u8),

    /// VERSION option carried a version other than 1
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Option list structurally invalid (e.g. LIVE_DISC_WIND before
    /// CHUNK_ADDR_METHOD, or no END_OPTION terminator)
    #[error("malformed handshake options: {0}")]
    MalformedOptions(&'static str),

    /// INTEGRITY or PEX_RESP body length not a multiple of its entry size
    #[error("message body length {len} not a multiple of {entry} bytes")]
    RaggedBody {
        /// Bytes present in the body
        len: usize,
        /// Required entry granularity
        entry: usize,
    },

    /// Chunk range with end before start
    #[error("invalid chunk range: {start}..={end}")]
    InvalidRange {
        /// First chunk of the range
        start: u32,
        /// Last chunk of the range
        end: u32,
    },
}
