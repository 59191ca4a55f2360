//! Error types for the swiftlet file engine.

use std::path::PathBuf;
use thiserror::Error;

/// File engine errors.
#[derive(Debug, Error)]
pub enum FileError {
    /// Filesystem I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared files must be non-empty (a zero-chunk tree has no root)
    #[error("file is empty: {0}")]
    Empty(PathBuf),

    /// File names travel in a one-byte-length handshake option
    #[error("file name exceeds 255 bytes: {0}")]
    NameTooLong(PathBuf),

    /// Path has no final component to use as the shared name
    #[error("path has no file name: {0}")]
    NoFileName(PathBuf),

    /// Chunk index outside the file's chunk count
    #[error("chunk {index} out of range (file has {count})")]
    ChunkOutOfRange {
        /// Requested chunk index
        index: u32,
        /// Chunks in the file
        count: u32,
    },

    /// A chunk read returned fewer bytes than the chunk table records
    #[error("short read for chunk {index}: wanted {wanted}, got {got}")]
    ShortRead {
        /// Chunk index
        index: u32,
        /// Bytes the chunk table records
        wanted: usize,
        /// Bytes actually read
        got: usize,
    },
}
