//! Handshake option list codec.
//!
//! Options are a flat list of `tag:u8` + tag-specific body, terminated by
//! `END_OPTION` (0xFF). The emitter writes tags in ascending order and
//! always includes the required set; the parser accepts any order,
//! ignores tags it does not recognize, and stops at the terminator. An
//! unrecognized tag is skipped as a bare byte: its body, if it has one,
//! is indistinguishable from subsequent tags, so scanning just resumes at
//! the next byte.

use crate::cursor::Reader;
use crate::error::WireError;
use crate::{DIGEST_SIZE, PROTOCOL_VERSION};

/// List terminator tag.
pub const END_OPTION: u8 = 0xFF;

/// Handshake option tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OptionTag {
    /// Protocol version (required, must be 1)
    Version = 0,
    /// Minimum supported version (required)
    MinimumVersion = 1,
    /// Swarm identifier; carries the demanded root hash
    SwarmId = 2,
    /// Content integrity protection method (required)
    ContentProtMethod = 3,
    /// Merkle tree hash function
    MerkleHashFunc = 4,
    /// Live signature algorithm
    LiveSignatureAlg = 5,
    /// Chunk addressing method (required)
    ChunkAddrMethod = 6,
    /// Live discard window (required; width depends on addressing method)
    LiveDiscWind = 7,
    /// Supported-messages bitmap
    SupportedMsgs = 8,
    /// Chunk size in bytes (required)
    ChunkSize = 9,
    /// File size extension (required)
    FileSize = 10,
    /// File name extension (required)
    FileName = 11,
    /// Reserved
    FileHash = 12,
}

impl TryFrom<u8> for OptionTag {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Version),
            1 => Ok(Self::MinimumVersion),
            2 => Ok(Self::SwarmId),
            3 => Ok(Self::ContentProtMethod),
            4 => Ok(Self::MerkleHashFunc),
            5 => Ok(Self::LiveSignatureAlg),
            6 => Ok(Self::ChunkAddrMethod),
            7 => Ok(Self::LiveDiscWind),
            8 => Ok(Self::SupportedMsgs),
            9 => Ok(Self::ChunkSize),
            10 => Ok(Self::FileSize),
            11 => Ok(Self::FileName),
            12 => Ok(Self::FileHash),
            other => Err(WireError::UnknownOption(other)),
        }
    }
}

/// Content integrity protection method: Merkle hash tree.
pub const CONTENT_PROT_MERKLE: u8 = 1;

/// Chunk addressing method: 32-bit chunk ranges.
pub const CHUNK_ADDR_32BIT_CHUNKS: u8 = 2;

/// Merkle hash function: SHA-1.
pub const MERKLE_HASH_SHA1: u8 = 0;

/// Decoded handshake option set.
///
/// Required options are plain fields; negotiable ones are `Option`s. An
/// encoded list always carries the full required set, so decoding errors
/// with [`WireError::MissingOption`] when one is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOptions {
    /// Protocol version (always 1)
    pub version: u8,
    /// Minimum version the sender accepts
    pub minimum_version: u8,
    /// Swarm identifier; the leecher puts the demanded root hash here
    pub swarm_id: Option<Vec<u8>>,
    /// Content integrity protection method
    pub content_prot_method: u8,
    /// Merkle tree hash function
    pub merkle_hash_func: Option<u8>,
    /// Live signature algorithm
    pub live_signature_alg: Option<u8>,
    /// Chunk addressing method
    pub chunk_addr_method: u8,
    /// Live discard window (encoded as u32 for 32-bit addressing methods)
    pub live_disc_wind: u64,
    /// Supported-messages bitmap
    pub supported_msgs: Option<Vec<u8>>,
    /// Chunk size in bytes
    pub chunk_size: u32,
    /// Size of the shared file; 0 in a file-not-found reply
    pub file_size: u64,
    /// Name of the shared file; empty in a leecher request and in a
    /// file-not-found reply. At most 255 bytes.
    pub file_name: Vec<u8>,
}

impl HandshakeOptions {
    /// Options for a leecher's initial handshake: the demanded root hash
    /// travels as the swarm id; file name and size are not yet known.
    #[must_use]
    pub fn request(sha_demanded: [u8; DIGEST_SIZE], chunk_size: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            minimum_version: PROTOCOL_VERSION,
            swarm_id: Some(sha_demanded.to_vec()),
            content_prot_method: CONTENT_PROT_MERKLE,
            merkle_hash_func: Some(MERKLE_HASH_SHA1),
            live_signature_alg: None,
            chunk_addr_method: CHUNK_ADDR_32BIT_CHUNKS,
            live_disc_wind: u64::from(u32::MAX),
            supported_msgs: None,
            chunk_size,
            file_size: 0,
            file_name: Vec::new(),
        }
    }

    /// Options for a seeder's handshake reply describing the matched file.
    #[must_use]
    pub fn reply(chunk_size: u32, file_size: u64, file_name: Vec<u8>) -> Self {
        debug_assert!(file_name.len() <= u8::MAX as usize);
        Self {
            version: PROTOCOL_VERSION,
            minimum_version: PROTOCOL_VERSION,
            swarm_id: None,
            content_prot_method: CONTENT_PROT_MERKLE,
            merkle_hash_func: Some(MERKLE_HASH_SHA1),
            live_signature_alg: None,
            chunk_addr_method: CHUNK_ADDR_32BIT_CHUNKS,
            live_disc_wind: u64::from(u32::MAX),
            supported_msgs: None,
            chunk_size,
            file_size,
            file_name,
        }
    }

    /// Options for a seeder's reply when no catalog entry matches the
    /// demanded hash: zero file size, empty file name.
    #[must_use]
    pub fn not_found(chunk_size: u32) -> Self {
        Self::reply(chunk_size, 0, Vec::new())
    }

    /// True for a reply that signals "no such file" (see [`Self::not_found`]).
    #[must_use]
    pub fn signals_not_found(&self) -> bool {
        self.file_size == 0 && self.file_name.is_empty()
    }

    /// True when the live discard window is encoded as a u32 on the wire
    /// (32-bit bin / 32-bit chunk-range addressing).
    fn narrow_disc_wind(chunk_addr_method: u8) -> bool {
        matches!(chunk_addr_method, 0 | 2)
    }

    /// Serialize the option list, terminator included, in ascending tag
    /// order.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(OptionTag::Version as u8);
        buf.push(self.version);

        buf.push(OptionTag::MinimumVersion as u8);
        buf.push(self.minimum_version);

        if let Some(swarm_id) = &self.swarm_id {
            buf.push(OptionTag::SwarmId as u8);
            buf.extend_from_slice(&(swarm_id.len() as u16).to_be_bytes());
            buf.extend_from_slice(swarm_id);
        }

        buf.push(OptionTag::ContentProtMethod as u8);
        buf.push(self.content_prot_method);

        if let Some(func) = self.merkle_hash_func {
            buf.push(OptionTag::MerkleHashFunc as u8);
            buf.push(func);
        }

        if let Some(alg) = self.live_signature_alg {
            buf.push(OptionTag::LiveSignatureAlg as u8);
            buf.push(alg);
        }

        buf.push(OptionTag::ChunkAddrMethod as u8);
        buf.push(self.chunk_addr_method);

        buf.push(OptionTag::LiveDiscWind as u8);
        if Self::narrow_disc_wind(self.chunk_addr_method) {
            buf.extend_from_slice(&(self.live_disc_wind as u32).to_be_bytes());
        } else {
            buf.extend_from_slice(&self.live_disc_wind.to_be_bytes());
        }

        if let Some(msgs) = &self.supported_msgs {
            buf.push(OptionTag::SupportedMsgs as u8);
            buf.push(msgs.len() as u8);
            buf.extend_from_slice(msgs);
        }

        buf.push(OptionTag::ChunkSize as u8);
        buf.extend_from_slice(&self.chunk_size.to_be_bytes());

        buf.push(OptionTag::FileSize as u8);
        buf.extend_from_slice(&self.file_size.to_be_bytes());

        buf.push(OptionTag::FileName as u8);
        buf.push(self.file_name.len() as u8);
        buf.extend_from_slice(&self.file_name);

        buf.push(END_OPTION);
    }

    /// Parse an option list up to and including END_OPTION. Unrecognized
    /// tags (including the reserved FILE_HASH) are ignored.
    ///
    /// # Errors
    ///
    /// Fails on truncation, a missing required option, a version other
    /// than 1, or LIVE_DISC_WIND appearing before CHUNK_ADDR_METHOD (its
    /// wire width depends on the latter).
    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let mut version = None;
        let mut minimum_version = None;
        let mut swarm_id = None;
        let mut content_prot_method = None;
        let mut merkle_hash_func = None;
        let mut live_signature_alg = None;
        let mut chunk_addr_method: Option<u8> = None;
        let mut live_disc_wind = None;
        let mut supported_msgs = None;
        let mut chunk_size = None;
        let mut file_size = None;
        let mut file_name = None;

        loop {
            let tag = r.u8()?;
            if tag == END_OPTION {
                break;
            }
            let Ok(known) = OptionTag::try_from(tag) else {
                continue;
            };
            match known {
                OptionTag::Version => {
                    let v = r.u8()?;
                    if v != PROTOCOL_VERSION {
                        return Err(WireError::UnsupportedVersion(v));
                    }
                    version = Some(v);
                }
                OptionTag::MinimumVersion => minimum_version = Some(r.u8()?),
                OptionTag::SwarmId => {
                    let len = r.u16()? as usize;
                    swarm_id = Some(r.take(len)?.to_vec());
                }
                OptionTag::ContentProtMethod => content_prot_method = Some(r.u8()?),
                OptionTag::MerkleHashFunc => merkle_hash_func = Some(r.u8()?),
                OptionTag::LiveSignatureAlg => live_signature_alg = Some(r.u8()?),
                OptionTag::ChunkAddrMethod => chunk_addr_method = Some(r.u8()?),
                OptionTag::LiveDiscWind => {
                    let method = chunk_addr_method.ok_or(WireError::MalformedOptions(
                        "LIVE_DISC_WIND before CHUNK_ADDR_METHOD",
                    ))?;
                    live_disc_wind = Some(if Self::narrow_disc_wind(method) {
                        u64::from(r.u32()?)
                    } else {
                        r.u64()?
                    });
                }
                OptionTag::SupportedMsgs => {
                    let len = r.u8()? as usize;
                    supported_msgs = Some(r.take(len)?.to_vec());
                }
                OptionTag::ChunkSize => chunk_size = Some(r.u32()?),
                OptionTag::FileSize => file_size = Some(r.u64()?),
                OptionTag::FileName => {
                    let len = r.u8()? as usize;
                    file_name = Some(r.take(len)?.to_vec());
                }
                OptionTag::FileHash => {} // reserved, no body defined
            }
        }

        Ok(Self {
            version: version.ok_or(WireError::MissingOption(OptionTag::Version))?,
            minimum_version: minimum_version
                .ok_or(WireError::MissingOption(OptionTag::MinimumVersion))?,
            swarm_id,
            content_prot_method: content_prot_method
                .ok_or(WireError::MissingOption(OptionTag::ContentProtMethod))?,
            merkle_hash_func,
            live_signature_alg,
            chunk_addr_method: chunk_addr_method
                .ok_or(WireError::MissingOption(OptionTag::ChunkAddrMethod))?,
            live_disc_wind: live_disc_wind
                .ok_or(WireError::MissingOption(OptionTag::LiveDiscWind))?,
            supported_msgs,
            chunk_size: chunk_size.ok_or(WireError::MissingOption(OptionTag::ChunkSize))?,
            file_size: file_size.ok_or(WireError::MissingOption(OptionTag::FileSize))?,
            file_name: file_name.ok_or(WireError::MissingOption(OptionTag::FileName))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(opts: &HandshakeOptions) -> HandshakeOptions {
        let mut buf = Vec::new();
        opts.encode_into(&mut buf);
        let mut r = Reader::new(&buf);
        let decoded = HandshakeOptions::decode(&mut r).unwrap();
        assert!(r.is_empty());
        decoded
    }

    #[test]
    fn test_request_roundtrip() {
        let opts = HandshakeOptions::request([0xAB; 20], 1024);
        assert_eq!(roundtrip(&opts), opts);
    }

    #[test]
    fn test_reply_roundtrip() {
        let opts = HandshakeOptions::reply(1024, 3072, b"transfer.bin".to_vec());
        assert_eq!(roundtrip(&opts), opts);
    }

    #[test]
    fn test_not_found_reply() {
        let opts = HandshakeOptions::not_found(1024);
        assert!(opts.signals_not_found());
        assert!(roundtrip(&opts).signals_not_found());
    }

    #[test]
    fn test_missing_required_option() {
        // A bare terminator has none of the required options.
        let mut r = Reader::new(&[END_OPTION]);
        assert!(matches!(
            HandshakeOptions::decode(&mut r),
            Err(WireError::MissingOption(OptionTag::Version))
        ));
    }

    #[test]
    fn test_version_must_be_one() {
        let mut buf = Vec::new();
        HandshakeOptions::request([0; 20], 1024).encode_into(&mut buf);
        buf[1] = 2; // VERSION body
        let mut r = Reader::new(&buf);
        assert_eq!(
            HandshakeOptions::decode(&mut r),
            Err(WireError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_unknown_tag_skipped() {
        // An unrecognized tag in front of an otherwise valid list is
        // ignored; everything after it still parses.
        let opts = HandshakeOptions::request([0xAB; 20], 1024);
        let mut buf = vec![0x40];
        opts.encode_into(&mut buf);
        let mut r = Reader::new(&buf);
        assert_eq!(HandshakeOptions::decode(&mut r).unwrap(), opts);
        assert!(r.is_empty());
    }

    #[test]
    fn test_reserved_file_hash_tag_skipped() {
        let opts = HandshakeOptions::reply(1024, 2048, b"r.bin".to_vec());
        let mut buf = vec![OptionTag::FileHash as u8];
        opts.encode_into(&mut buf);
        let mut r = Reader::new(&buf);
        assert_eq!(HandshakeOptions::decode(&mut r).unwrap(), opts);
    }

    #[test]
    fn test_unknown_tags_alone_still_miss_required() {
        // Nothing but noise before the terminator: required options are
        // still enforced.
        let mut r = Reader::new(&[0x40, 0x41, 0x42, END_OPTION]);
        assert!(matches!(
            HandshakeOptions::decode(&mut r),
            Err(WireError::MissingOption(OptionTag::Version))
        ));
    }

    #[test]
    fn test_disc_wind_width_tracks_addr_method() {
        // 64-bit byte-range addressing widens the discard window field.
        let mut opts = HandshakeOptions::request([1; 20], 2048);
        opts.chunk_addr_method = 1;
        opts.live_disc_wind = 0x0123_4567_89AB_CDEF;
        assert_eq!(roundtrip(&opts), opts);
    }

    #[test]
    fn test_disc_wind_before_addr_method() {
        // Tag 7 with nothing establishing the field width beforehand.
        let mut r = Reader::new(&[7, 0, 0, 0, 1, END_OPTION]);
        assert!(matches!(
            HandshakeOptions::decode(&mut r),
            Err(WireError::MalformedOptions(_))
        ));
    }

    #[test]
    fn test_truncated_swarm_id() {
        // SWARM_ID declares 20 bytes but the list ends after 2.
        let mut r = Reader::new(&[2, 0, 20, 0xAA, 0xBB]);
        assert!(matches!(
            HandshakeOptions::decode(&mut r),
            Err(WireError::Truncated { .. })
        ));
    }
}
