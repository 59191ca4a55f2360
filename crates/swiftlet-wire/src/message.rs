//! Message and datagram codec.
//!
//! One UDP datagram carries a destination channel id followed by one or
//! more messages. `DATA` and `PEX_RESP` bodies extend to the end of the
//! datagram, so they are always the final message of one.

use std::net::SocketAddrV4;

use crate::cursor::Reader;
use crate::error::WireError;
use crate::options::{END_OPTION, HandshakeOptions};
use crate::DIGEST_SIZE;

/// Message kinds with their protocol-assigned values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Session open / close
    Handshake = 0,
    /// Chunk payload
    Data = 1,
    /// Per-chunk acknowledgment
    Ack = 2,
    /// Advertised chunk range
    Have = 3,
    /// Chunk hashes for a requested range
    Integrity = 4,
    /// Peer exchange response (IPv4)
    PexResv4 = 5,
    /// Peer exchange request
    PexReq = 6,
    /// Signed integrity (live streams; not exchanged)
    SignedIntegrity = 7,
    /// Chunk range request
    Request = 8,
    /// Cancel an outstanding request (not exchanged)
    Cancel = 9,
    /// Choke (not exchanged)
    Choke = 10,
    /// Unchoke (not exchanged)
    Unchoke = 11,
    /// Peer exchange response (IPv6; not exchanged)
    PexResv6 = 12,
    /// Peer exchange response (certificate; not exchanged)
    PexRescert = 13,
}

impl TryFrom<u8> for MessageKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Handshake),
            1 => Ok(Self::Data),
            2 => Ok(Self::Ack),
            3 => Ok(Self::Have),
            4 => Ok(Self::Integrity),
            5 => Ok(Self::PexResv4),
            6 => Ok(Self::PexReq),
            7 => Ok(Self::SignedIntegrity),
            8 => Ok(Self::Request),
            9 => Ok(Self::Cancel),
            10 => Ok(Self::Choke),
            11 => Ok(Self::Unchoke),
            12 => Ok(Self::PexResv6),
            13 => Ok(Self::PexRescert),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

/// HANDSHAKE body: the sender's channel id plus its option list.
///
/// A closing handshake carries `src_channel = 0` and an empty option list
/// (just the terminator), so `options` is `None` for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Channel id the sender listens on
    pub src_channel: u32,
    /// Negotiated options; `None` in a closing handshake
    pub options: Option<HandshakeOptions>,
}

/// Classification of a handshake by its `(dest, src)` channel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeClass {
    /// Opening handshake: `dest = 0`, `src != 0`
    Init,
    /// Closing handshake: `dest != 0`, `src = 0`
    Finish,
    /// Any other combination
    Error,
}

impl HandshakeClass {
    /// Classify by the datagram's destination channel and the handshake's
    /// source channel.
    #[must_use]
    pub fn classify(dest_channel: u32, src_channel: u32) -> Self {
        match (dest_channel, src_channel) {
            (0, src) if src != 0 => Self::Init,
            (dest, 0) if dest != 0 => Self::Finish,
            _ => Self::Error,
        }
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Session open / close
    Handshake(Handshake),
    /// Advertised chunk range (inclusive)
    Have {
        /// First advertised chunk
        start_chunk: u32,
        /// Last advertised chunk
        end_chunk: u32,
    },
    /// Chunk range request (inclusive)
    Request {
        /// First requested chunk
        start_chunk: u32,
        /// Last requested chunk
        end_chunk: u32,
    },
    /// Leaf hashes for a chunk range
    Integrity {
        /// First covered chunk
        start_chunk: u32,
        /// Last covered chunk
        end_chunk: u32,
        /// One digest per chunk in the range
        hashes: Vec<[u8; DIGEST_SIZE]>,
    },
    /// Chunk payload; the final chunk of a file may be short
    Data {
        /// First carried chunk
        start_chunk: u32,
        /// Last carried chunk (equal to `start_chunk` in practice)
        end_chunk: u32,
        /// Sender timestamp, not interpreted by the receiver
        timestamp: u64,
        /// Chunk bytes, extending to the end of the datagram
        payload: Vec<u8>,
    },
    /// Per-chunk acknowledgment
    Ack {
        /// First acknowledged chunk
        start_chunk: u32,
        /// Last acknowledged chunk
        end_chunk: u32,
        /// Echo of the DATA timestamp
        delay_sample: u64,
    },
    /// Peer exchange request (empty body)
    PexReq,
    /// Peer exchange response: alternative seeder endpoints
    PexResp {
        /// Advertised IPv4 endpoints
        peers: Vec<SocketAddrV4>,
    },
}

impl Message {
    /// The wire kind of this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Handshake(_) => MessageKind::Handshake,
            Self::Have { .. } => MessageKind::Have,
            Self::Request { .. } => MessageKind::Request,
            Self::Integrity { .. } => MessageKind::Integrity,
            Self::Data { .. } => MessageKind::Data,
            Self::Ack { .. } => MessageKind::Ack,
            Self::PexReq => MessageKind::PexReq,
            Self::PexResp { .. } => MessageKind::PexResv4,
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.kind() as u8);
        match self {
            Self::Handshake(hs) => {
                buf.extend_from_slice(&hs.src_channel.to_be_bytes());
                match &hs.options {
                    Some(opts) => opts.encode_into(buf),
                    None => buf.push(END_OPTION),
                }
            }
            Self::Have {
                start_chunk,
                end_chunk,
            }
            | Self::Request {
                start_chunk,
                end_chunk,
            } => {
                buf.extend_from_slice(&start_chunk.to_be_bytes());
                buf.extend_from_slice(&end_chunk.to_be_bytes());
            }
            Self::Integrity {
                start_chunk,
                end_chunk,
                hashes,
            } => {
                buf.extend_from_slice(&start_chunk.to_be_bytes());
                buf.extend_from_slice(&end_chunk.to_be_bytes());
                for hash in hashes {
                    buf.extend_from_slice(hash);
                }
            }
            Self::Data {
                start_chunk,
                end_chunk,
                timestamp,
                payload,
            } => {
                buf.extend_from_slice(&start_chunk.to_be_bytes());
                buf.extend_from_slice(&end_chunk.to_be_bytes());
                buf.extend_from_slice(&timestamp.to_be_bytes());
                buf.extend_from_slice(payload);
            }
            Self::Ack {
                start_chunk,
                end_chunk,
                delay_sample,
            } => {
                buf.extend_from_slice(&start_chunk.to_be_bytes());
                buf.extend_from_slice(&end_chunk.to_be_bytes());
                buf.extend_from_slice(&delay_sample.to_be_bytes());
            }
            Self::PexReq => {}
            Self::PexResp { peers } => {
                for peer in peers {
                    buf.extend_from_slice(&peer.ip().octets());
                    buf.extend_from_slice(&peer.port().to_be_bytes());
                }
            }
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let kind = MessageKind::try_from(r.u8()?)?;
        match kind {
            MessageKind::Handshake => {
                let src_channel = r.u32()?;
                let options = if r.peek()? == END_OPTION {
                    r.u8()?;
                    None
                } else {
                    Some(HandshakeOptions::decode(r)?)
                };
                Ok(Self::Handshake(Handshake {
                    src_channel,
                    options,
                }))
            }
            MessageKind::Have => Ok(Self::Have {
                start_chunk: r.u32()?,
                end_chunk: r.u32()?,
            }),
            MessageKind::Request => Ok(Self::Request {
                start_chunk: r.u32()?,
                end_chunk: r.u32()?,
            }),
            MessageKind::Integrity => {
                let start_chunk = r.u32()?;
                let end_chunk = r.u32()?;
                if end_chunk < start_chunk {
                    return Err(WireError::InvalidRange {
                        start: start_chunk,
                        end: end_chunk,
                    });
                }
                let count = (u64::from(end_chunk) - u64::from(start_chunk) + 1) as usize;
                let mut hashes = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    let mut hash = [0u8; DIGEST_SIZE];
                    hash.copy_from_slice(r.take(DIGEST_SIZE)?);
                    hashes.push(hash);
                }
                Ok(Self::Integrity {
                    start_chunk,
                    end_chunk,
                    hashes,
                })
            }
            MessageKind::Data => Ok(Self::Data {
                start_chunk: r.u32()?,
                end_chunk: r.u32()?,
                timestamp: r.u64()?,
                payload: r.rest().to_vec(),
            }),
            MessageKind::Ack => Ok(Self::Ack {
                start_chunk: r.u32()?,
                end_chunk: r.u32()?,
                delay_sample: r.u64()?,
            }),
            MessageKind::PexReq => Ok(Self::PexReq),
            MessageKind::PexResv4 => {
                let body = r.rest();
                if body.len() % 6 != 0 {
                    return Err(WireError::RaggedBody {
                        len: body.len(),
                        entry: 6,
                    });
                }
                let peers = body
                    .chunks_exact(6)
                    .map(|entry| {
                        let ip = std::net::Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3]);
                        let port = u16::from_be_bytes([entry[4], entry[5]]);
                        SocketAddrV4::new(ip, port)
                    })
                    .collect();
                Ok(Self::PexResp { peers })
            }
            other => Err(WireError::UnsupportedKind(other)),
        }
    }
}

/// A full datagram: destination channel plus its messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Destination channel id (0 in an opening handshake)
    pub channel: u32,
    /// Messages in wire order
    pub messages: Vec<Message>,
}

impl Datagram {
    /// A datagram with a single message.
    #[must_use]
    pub fn single(channel: u32, message: Message) -> Self {
        Self {
            channel,
            messages: vec![message],
        }
    }

    /// An opening handshake: destination channel 0, sender's channel and
    /// options in the body.
    #[must_use]
    pub fn handshake_init(src_channel: u32, options: HandshakeOptions) -> Self {
        Self::single(
            0,
            Message::Handshake(Handshake {
                src_channel,
                options: Some(options),
            }),
        )
    }

    /// The seeder's coalesced `HANDSHAKE ‖ HAVE` reply.
    #[must_use]
    pub fn handshake_have(
        dest_channel: u32,
        src_channel: u32,
        options: HandshakeOptions,
        start_chunk: u32,
        end_chunk: u32,
    ) -> Self {
        Self {
            channel: dest_channel,
            messages: vec![
                Message::Handshake(Handshake {
                    src_channel,
                    options: Some(options),
                }),
                Message::Have {
                    start_chunk,
                    end_chunk,
                },
            ],
        }
    }

    /// A closing handshake addressed to the remote's channel.
    #[must_use]
    pub fn handshake_finish(dest_channel: u32) -> Self {
        Self::single(
            dest_channel,
            Message::Handshake(Handshake {
                src_channel: 0,
                options: None,
            }),
        )
    }

    /// The leecher's coalesced `REQUEST ‖ PEX_REQ`.
    #[must_use]
    pub fn request(dest_channel: u32, start_chunk: u32, end_chunk: u32) -> Self {
        Self {
            channel: dest_channel,
            messages: vec![
                Message::Request {
                    start_chunk,
                    end_chunk,
                },
                Message::PexReq,
            ],
        }
    }

    /// Serialize to wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.channel.to_be_bytes());
        for message in &self.messages {
            message.encode_into(&mut buf);
        }
        buf
    }

    /// Parse a received datagram.
    ///
    /// # Errors
    ///
    /// Fails on truncation, unknown or unsupported message kinds, and any
    /// option-list error. All failures are fatal to the sending peer.
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let channel = r.u32()?;
        let mut messages = Vec::with_capacity(2);
        while !r.is_empty() {
            messages.push(Message::decode(&mut r)?);
        }
        if messages.is_empty() {
            return Err(WireError::Truncated {
                expected: 1,
                actual: 0,
            });
        }
        Ok(Self { channel, messages })
    }

    /// The kind of the first (or only) message.
    #[must_use]
    pub fn leading_kind(&self) -> MessageKind {
        self.messages[0].kind()
    }
}
