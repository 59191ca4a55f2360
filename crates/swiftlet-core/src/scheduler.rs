//! Chunk bookkeeping and request batching.
//!
//! The leecher tracks every chunk's verification hash (delivered by
//! INTEGRITY) and download flag, and cuts the still-missing chunks of the
//! wanted range into ascending batches of at most `hashes_per_mtu` chunks,
//! so each INTEGRITY reply fits one datagram.

use swiftlet_files::DIGEST_SIZE;

/// Per-chunk record on the leecher side.
#[derive(Debug, Clone, Copy, Default)]
struct ChunkSlot {
    sha: [u8; DIGEST_SIZE],
    has_sha: bool,
    downloaded: bool,
}

/// Download state for every chunk of the advertised file.
#[derive(Debug)]
pub struct ChunkMap {
    slots: Vec<ChunkSlot>,
    nc: u32,
}

impl ChunkMap {
    /// Allocate for `nc` real chunks (`nl` slots, the tail being padding).
    #[must_use]
    pub fn new(nc: u32, nl: u32) -> Self {
        Self {
            slots: vec![ChunkSlot::default(); nl as usize],
            nc,
        }
    }

    /// Number of real chunks.
    #[must_use]
    pub fn nc(&self) -> u32 {
        self.nc
    }

    /// Record the verification hash INTEGRITY delivered for a chunk.
    pub fn set_hash(&mut self, chunk: u32, sha: [u8; DIGEST_SIZE]) {
        let slot = &mut self.slots[chunk as usize];
        slot.sha = sha;
        slot.has_sha = true;
    }

    /// The verification hash, if INTEGRITY has delivered one.
    #[must_use]
    pub fn hash(&self, chunk: u32) -> Option<[u8; DIGEST_SIZE]> {
        let slot = self.slots.get(chunk as usize)?;
        slot.has_sha.then_some(slot.sha)
    }

    /// Mark a chunk downloaded after its payload verified.
    pub fn mark_downloaded(&mut self, chunk: u32) {
        self.slots[chunk as usize].downloaded = true;
    }

    /// Whether a chunk has been downloaded and verified.
    #[must_use]
    pub fn is_downloaded(&self, chunk: u32) -> bool {
        self.slots
            .get(chunk as usize)
            .is_some_and(|s| s.downloaded)
    }

    /// True once every real chunk is downloaded.
    #[must_use]
    pub fn all_downloaded(&self) -> bool {
        (0..self.nc).all(|i| self.slots[i as usize].downloaded)
    }
}

/// One request batch: an inclusive chunk range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// First chunk of the batch
    pub begin: u32,
    /// Last chunk of the batch
    pub end: u32,
}

/// Ordered batches covering the missing chunks of a requested range.
#[derive(Debug)]
pub struct DownloadSchedule {
    entries: Vec<ScheduleEntry>,
    next: usize,
    buffer_size: u64,
}

impl DownloadSchedule {
    /// Cut `[start, end]` into batches.
    ///
    /// A cursor advances from `start`, skipping chunks already downloaded;
    /// from the first missing chunk it extends a run until the batch cap,
    /// a downloaded chunk, or the end of the range. The returned
    /// `buffer_size` is `(last_covered − start + 1) · chunk_size`, the
    /// allocation a caller needs to hold the fetched range.
    #[must_use]
    pub fn build(
        map: &ChunkMap,
        start: u32,
        end: u32,
        hashes_per_mtu: u32,
        chunk_size: u32,
    ) -> Self {
        let mut entries = Vec::new();
        let mut last_covered = None;

        let mut o = u64::from(start);
        let end = u64::from(end.min(map.nc().saturating_sub(1)));
        let nc = u64::from(map.nc());

        while o < nc && o <= end {
            while o < nc && map.is_downloaded(o as u32) {
                o += 1;
            }
            if o >= nc || o > end {
                break;
            }

            let begin = o;
            let mut run = 0u32;
            while run < hashes_per_mtu && o < nc && o <= end && !map.is_downloaded(o as u32) {
                o += 1;
                run += 1;
            }

            entries.push(ScheduleEntry {
                begin: begin as u32,
                end: (o - 1) as u32,
            });
            last_covered = Some((o - 1) as u32);
        }

        let buffer_size = last_covered
            .map(|last| u64::from(last - start + 1) * u64::from(chunk_size))
            .unwrap_or(0);

        Self {
            entries,
            next: 0,
            buffer_size,
        }
    }

    /// The next batch to request, advancing the iterator.
    pub fn next_batch(&mut self) -> Option<ScheduleEntry> {
        let entry = self.entries.get(self.next).copied();
        if entry.is_some() {
            self.next += 1;
        }
        entry
    }

    /// All batches.
    #[must_use]
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Number of batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is missing in the range.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Caller-side allocation estimate for the covered range.
    #[must_use]
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }
}
