//! Shared-file catalog.
//!
//! Each shared file carries its chunk table, Merkle tree, and the root
//! hash leechers use to name it. The catalog supports lookup by root hash
//! (incoming handshakes) and by path (add/remove), and directory recursion
//! over regular files.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use crate::digest::{sha1_digest, DIGEST_SIZE};
use crate::error::FileError;
use crate::tree::{leaf_count, MerkleTree};

/// Per-chunk population state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkState {
    /// Slot allocated, no hash yet (padding slots stay here)
    #[default]
    Empty,
    /// Hash assigned
    Active,
}

/// One chunk table entry.
#[derive(Debug, Clone, Default)]
pub struct ChunkInfo {
    /// Byte offset within the file
    pub offset: u64,
    /// Chunk length; the final chunk of a file may be short
    pub len: u32,
    /// SHA-1 of the chunk bytes
    pub sha: [u8; DIGEST_SIZE],
    /// Population state
    pub state: ChunkState,
}

/// A file in the seeder's catalog: path, chunk table, tree, root hash.
#[derive(Debug)]
pub struct SharedFile {
    /// Path the file is read from
    pub path: PathBuf,
    /// File size in bytes
    pub file_size: u64,
    /// Chunk size the tree was built with
    pub chunk_size: u32,
    /// Number of chunks (`nc`)
    pub nc: u32,
    /// Number of tree leaves (`nl = next_pow2(nc)`)
    pub nl: u32,
    /// Chunk table, `nl` entries; indices ≥ `nc` are padding
    pub chunks: Vec<ChunkInfo>,
    /// Merkle tree over the chunk hashes
    pub tree: MerkleTree,
    /// Root hash identifying `(content, chunk_size)`
    pub root_hash: [u8; DIGEST_SIZE],
}

impl SharedFile {
    /// Chunk the file, hash every chunk, and derive the tree.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, an empty file, or a file name that does not
    /// fit the wire's one-byte length.
    pub fn build(path: &Path, chunk_size: u32) -> Result<Self, FileError> {
        let name = path
            .file_name()
            .ok_or_else(|| FileError::NoFileName(path.to_path_buf()))?;
        if name.len() > u8::MAX as usize {
            return Err(FileError::NameTooLong(path.to_path_buf()));
        }

        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size == 0 {
            return Err(FileError::Empty(path.to_path_buf()));
        }

        let nc = file_size.div_ceil(u64::from(chunk_size)) as u32;
        let nl = leaf_count(nc);

        let mut chunks = vec![ChunkInfo::default(); nl as usize];
        let mut tree = MerkleTree::build(nc);

        let mut buf = vec![0u8; chunk_size as usize];
        let mut index = 0u32;
        let mut read_total = 0u64;
        while read_total < file_size {
            let want = ((file_size - read_total).min(u64::from(chunk_size))) as usize;
            file.read_exact(&mut buf[..want])?;

            let sha = sha1_digest(&buf[..want]);
            chunks[index as usize] = ChunkInfo {
                offset: read_total,
                len: want as u32,
                sha,
                state: ChunkState::Active,
            };
            tree.set_leaf(index, sha);

            read_total += want as u64;
            index += 1;
        }
        tree.update();

        let root_hash = tree.root_hash();
        debug!(
            path = %path.display(),
            nc,
            nl,
            root = %hex::encode(root_hash),
            "built shared file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file_size,
            chunk_size,
            nc,
            nl,
            chunks,
            tree,
            root_hash,
        })
    }

    /// The shared name sent in the FILE_NAME option (final path component).
    #[must_use]
    pub fn file_name(&self) -> Vec<u8> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned().into_bytes())
            .unwrap_or_default()
    }

    /// Read one chunk's bytes from disk.
    ///
    /// # Errors
    ///
    /// Fails when the index is out of range, the file cannot be read, or
    /// the read comes up short against the chunk table.
    pub async fn read_chunk(&self, index: u32) -> Result<Vec<u8>, FileError> {
        if index >= self.nc {
            return Err(FileError::ChunkOutOfRange {
                index,
                count: self.nc,
            });
        }
        let info = &self.chunks[index as usize];

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(info.offset)).await?;

        let mut buf = vec![0u8; info.len as usize];
        let mut got = 0;
        while got < buf.len() {
            let n = file.read(&mut buf[got..]).await?;
            if n == 0 {
                return Err(FileError::ShortRead {
                    index,
                    wanted: buf.len(),
                    got,
                });
            }
            got += n;
        }
        Ok(buf)
    }
}

/// Catalog of shared files keyed by root hash.
#[derive(Debug, Default)]
pub struct FileCatalog {
    entries: DashMap<[u8; DIGEST_SIZE], Arc<SharedFile>>,
}

impl FileCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, or every regular file under a directory (recursive).
    /// Returns the number of entries added.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors and on any file that cannot be shared; files
    /// already in the catalog (same root) are replaced, not duplicated.
    pub fn add_path(&self, path: &Path, chunk_size: u32) -> Result<usize, FileError> {
        let meta = std::fs::metadata(path)?;
        if meta.is_dir() {
            let mut added = 0;
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                let ty = entry.file_type()?;
                if ty.is_dir() || ty.is_file() {
                    added += self.add_path(&entry.path(), chunk_size)?;
                }
            }
            Ok(added)
        } else {
            let shared = Arc::new(SharedFile::build(path, chunk_size)?);
            info!(
                path = %path.display(),
                root = %hex::encode(shared.root_hash),
                size = shared.file_size,
                "sharing file"
            );
            self.entries.insert(shared.root_hash, shared);
            Ok(1)
        }
    }

    /// Remove one file by path, or every entry under a directory prefix.
    /// Returns the number of entries removed.
    pub fn remove_path(&self, path: &Path) -> usize {
        let doomed: Vec<[u8; DIGEST_SIZE]> = self
            .entries
            .iter()
            .filter(|e| e.value().path == path || e.value().path.starts_with(path))
            .map(|e| *e.key())
            .collect();
        for root in &doomed {
            if let Some((_, shared)) = self.entries.remove(root) {
                info!(path = %shared.path.display(), "unsharing file");
            }
        }
        doomed.len()
    }

    /// Look up by root hash (the leecher's demanded hash).
    #[must_use]
    pub fn by_root(&self, root: &[u8; DIGEST_SIZE]) -> Option<Arc<SharedFile>> {
        self.entries.get(root).map(|e| Arc::clone(e.value()))
    }

    /// Look up by path.
    #[must_use]
    pub fn by_path(&self, path: &Path) -> Option<Arc<SharedFile>> {
        self.entries
            .iter()
            .find(|e| e.value().path == path)
            .map(|e| Arc::clone(e.value()))
    }

    /// All catalog entries.
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<SharedFile>> {
        self.entries.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Number of shared files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is shared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn test_build_exact_chunks() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "three.bin", &[0xAA; 3072]);

        let shared = SharedFile::build(&path, 1024).unwrap();
        assert_eq!(shared.nc, 3);
        assert_eq!(shared.nl, 4);
        assert_eq!(shared.file_size, 3072);
        assert_eq!(shared.chunks[0].len, 1024);
        assert_eq!(shared.chunks[2].len, 1024);
        // Padding slot untouched.
        assert_eq!(shared.chunks[3].state, ChunkState::Empty);
        assert_eq!(shared.chunks[0].sha, sha1_digest(&[0xAA; 1024]));
    }

    #[test]
    fn test_build_short_final_chunk() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "odd.bin", &[0xBB; 2500]);

        let shared = SharedFile::build(&path, 1024).unwrap();
        assert_eq!(shared.nc, 3);
        assert_eq!(shared.chunks[2].len, 452);
        assert_eq!(shared.chunks[2].offset, 2048);
        assert_eq!(shared.chunks[2].sha, sha1_digest(&[0xBB; 452]));
    }

    #[test]
    fn test_root_matches_explicit_padding() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "pad.bin", &[0xCC; 2500]);
        let shared = SharedFile::build(&path, 1024).unwrap();

        let leaves = vec![
            sha1_digest(&[0xCC; 1024]),
            sha1_digest(&[0xCC; 1024]),
            sha1_digest(&[0xCC; 452]),
        ];
        let tree = MerkleTree::from_leaf_hashes(3, &leaves);
        assert_eq!(shared.root_hash, tree.root_hash());
    }

    #[test]
    fn test_empty_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty.bin", &[]);
        assert!(matches!(
            SharedFile::build(&path, 1024),
            Err(FileError::Empty(_))
        ));
    }

    #[tokio::test]
    async fn test_read_chunk_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut data = Vec::new();
        for i in 0..2500u32 {
            data.push((i % 251) as u8);
        }
        let path = write_file(&dir, "read.bin", &data);
        let shared = SharedFile::build(&path, 1024).unwrap();

        let chunk1 = shared.read_chunk(1).await.unwrap();
        assert_eq!(chunk1, &data[1024..2048]);
        let chunk2 = shared.read_chunk(2).await.unwrap();
        assert_eq!(chunk2, &data[2048..]);
        assert!(shared.read_chunk(3).await.is_err());
    }

    #[test]
    fn test_catalog_directory_recursion() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "a.bin", &[1; 100]);
        write_file(&dir, "b.bin", &[2; 100]);
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut f = File::create(dir.path().join("sub/c.bin")).unwrap();
        f.write_all(&[3; 100]).unwrap();

        let catalog = FileCatalog::new();
        let added = catalog.add_path(dir.path(), 1024).unwrap();
        assert_eq!(added, 3);
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_catalog_lookup_by_root_and_path() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "x.bin", &[7; 4096]);

        let catalog = FileCatalog::new();
        catalog.add_path(&path, 1024).unwrap();

        let by_path = catalog.by_path(&path).unwrap();
        let by_root = catalog.by_root(&by_path.root_hash).unwrap();
        assert_eq!(by_root.path, path);
        assert!(catalog.by_root(&[0u8; 20]).is_none());
    }

    #[test]
    fn test_catalog_remove_by_directory() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "a.bin", &[1; 100]);
        write_file(&dir, "b.bin", &[2; 100]);

        let catalog = FileCatalog::new();
        catalog.add_path(dir.path(), 1024).unwrap();
        assert_eq!(catalog.len(), 2);

        assert_eq!(catalog.remove_path(dir.path()), 2);
        assert!(catalog.is_empty());
    }
}
