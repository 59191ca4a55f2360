//! # swiftlet File Engine
//!
//! Everything the seeder needs to turn files into swarm content: chunk
//! hashing, the binary Merkle hash tree that derives a file's root hash,
//! and the catalog of shared files keyed by that root.
//!
//! The root hash is a pure function of `(content bytes, chunk size)`: the
//! file is cut into fixed-size chunks (the last may be short), each chunk
//! is SHA-1 hashed into a tree leaf, leaves are padded with zero hashes up
//! to the next power of two, and interior nodes hash the concatenation of
//! their children.
//!
//! ## Module Structure
//!
//! - [`digest`]: SHA-1 digest wrapper (20-byte output)
//! - [`tree`]: Flat-array binary Merkle tree
//! - [`catalog`]: Shared-file table keyed by root hash

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod digest;
pub mod error;
pub mod tree;

pub use catalog::{ChunkInfo, ChunkState, FileCatalog, SharedFile};
pub use digest::{DIGEST_SIZE, sha1_digest};
pub use error::FileError;
pub use tree::{MerkleTree, Node, NodeState, NO_NODE};
