//! Mesh Wire Protocol
//!
//! Packed little-endian messages for a wireless mesh of modal nodes, plus
//! chunked configuration transfer with CRC32 verification.
//!
//! Every packet starts with an 8-byte header:
//!
//! ```text
//! version:u8 | type:u8 | source:u8 | dest:u8 | sequence:u16 | timestamp_ms:u16
//! ```
//!
//! Configuration blobs of up to 2048 bytes travel as `CfgBegin`, one
//! `CfgChunk` per 200-byte slice and `CfgEnd`. The receiver keeps a chunk
//! bitmap and only hands out the blob once every chunk is present and the
//! CRC32 of the reassembled bytes matches.

use crate::node::{PhaseHint, PokeEvent, MAX_MODES};
use core::fmt;

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest packet the transport carries
pub const MAX_PACKET_SIZE: usize = 250;

/// Largest configuration blob
pub const MAX_CONFIG_SIZE: usize = 2048;

/// Data bytes per configuration chunk
pub const CHUNK_SIZE: usize = 200;

/// Encoded header length
pub const HEADER_SIZE: usize = 8;

/// Destination id addressing every node
pub const BROADCAST_ID: u8 = 0xFF;

/// Chunks needed for the largest configuration blob
pub const MAX_CHUNKS: usize = (MAX_CONFIG_SIZE + CHUNK_SIZE - 1) / CHUNK_SIZE;

/// `CfgAck` status for an accepted configuration
pub const STATUS_OK: u8 = 0;

/// `CfgNack` status for a blob that verified but did not parse or validate
pub const STATUS_INVALID_CONFIG: u8 = 0x20;

/// Message type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    CfgBegin = 0x10,
    CfgChunk = 0x11,
    CfgEnd = 0x12,
    CfgAck = 0x13,
    CfgNack = 0x14,
    Start = 0x20,
    Stop = 0x21,
    Reset = 0x22,
    Poke = 0x30,
    State = 0x31,
    Heartbeat = 0x32,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x10 => MessageType::CfgBegin,
            0x11 => MessageType::CfgChunk,
            0x12 => MessageType::CfgEnd,
            0x13 => MessageType::CfgAck,
            0x14 => MessageType::CfgNack,
            0x20 => MessageType::Start,
            0x21 => MessageType::Stop,
            0x22 => MessageType::Reset,
            0x30 => MessageType::Poke,
            0x31 => MessageType::State,
            0x32 => MessageType::Heartbeat,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

/// Errors from packet decoding and configuration transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes than the message type requires
    Truncated { expected: usize, actual: usize },
    UnsupportedVersion(u8),
    UnknownMessageType(u8),
    /// Encoded packet would exceed `MAX_PACKET_SIZE`
    PacketTooLarge(usize),
    /// Zero-length or larger than `MAX_CONFIG_SIZE`
    InvalidConfigSize(usize),
    /// Chunk count disagrees with the announced size
    ChunkCountMismatch { expected: usize, actual: usize },
    ChunkIndexOutOfRange { index: usize, num_chunks: usize },
    /// Chunk length disagrees with its position in the blob
    ChunkSizeMismatch { index: usize, expected: usize, actual: usize },
    MissingChunks { received: usize, expected: usize },
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Chunk or end message without a preceding begin
    NoTransferInProgress,
}

impl ProtocolError {
    /// Non-zero status carried by a `CfgNack`
    pub fn status_code(&self) -> u8 {
        match self {
            ProtocolError::Truncated { .. } => 1,
            ProtocolError::UnsupportedVersion(_) => 2,
            ProtocolError::UnknownMessageType(_) => 3,
            ProtocolError::PacketTooLarge(_) => 4,
            ProtocolError::InvalidConfigSize(_) => 5,
            ProtocolError::ChunkCountMismatch { .. } => 6,
            ProtocolError::ChunkIndexOutOfRange { .. } => 7,
            ProtocolError::ChunkSizeMismatch { .. } => 8,
            ProtocolError::MissingChunks { .. } => 9,
            ProtocolError::ChecksumMismatch { .. } => 10,
            ProtocolError::NoTransferInProgress => 11,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Truncated { expected, actual } => {
                write!(f, "packet truncated: expected {} bytes, got {}", expected, actual)
            }
            ProtocolError::UnsupportedVersion(v) => write!(f, "unsupported protocol version {}", v),
            ProtocolError::UnknownMessageType(t) => write!(f, "unknown message type 0x{:02x}", t),
            ProtocolError::PacketTooLarge(n) => {
                write!(f, "packet of {} bytes exceeds {} byte limit", n, MAX_PACKET_SIZE)
            }
            ProtocolError::InvalidConfigSize(n) => {
                write!(f, "configuration size {} outside 1..={}", n, MAX_CONFIG_SIZE)
            }
            ProtocolError::ChunkCountMismatch { expected, actual } => {
                write!(f, "expected {} chunks, transfer announced {}", expected, actual)
            }
            ProtocolError::ChunkIndexOutOfRange { index, num_chunks } => {
                write!(f, "chunk {} out of range (transfer has {})", index, num_chunks)
            }
            ProtocolError::ChunkSizeMismatch {
                index,
                expected,
                actual,
            } => write!(f, "chunk {} has {} bytes, expected {}", index, actual, expected),
            ProtocolError::MissingChunks { received, expected } => {
                write!(f, "received {} of {} chunks", received, expected)
            }
            ProtocolError::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {:08x}, got {:08x}", expected, actual)
            }
            ProtocolError::NoTransferInProgress => write!(f, "no configuration transfer in progress"),
        }
    }
}

impl std::error::Error for ProtocolError {}

// ============================================================================
// CRC32
// ============================================================================

const CRC32_POLY: u32 = 0xEDB8_8320;

const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ CRC32_POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC32_TABLE: [u32; 256] = crc32_table();

/// CRC-32 (IEEE 802.3, reflected)
pub fn crc32(data: &[u8]) -> u32 {
    let crc = data.iter().fold(0xFFFF_FFFFu32, |crc, &byte| {
        (crc >> 8) ^ CRC32_TABLE[((crc ^ byte as u32) & 0xFF) as usize]
    });
    !crc
}

// ============================================================================
// Packets
// ============================================================================

/// Fields shared by every packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub source_id: u8,
    pub dest_id: u8,
    pub sequence: u16,
    pub timestamp_ms: u16,
}

impl Header {
    pub fn new(source_id: u8, dest_id: u8, sequence: u16, timestamp_ms: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            source_id,
            dest_id,
            sequence,
            timestamp_ms,
        }
    }

    /// Is this packet for `node_id` (directly or by broadcast)?
    pub fn is_for(&self, node_id: u8) -> bool {
        self.dest_id == node_id || self.dest_id == BROADCAST_ID
    }
}

/// Message payloads
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Excitation; a negative phase hint means random
    Poke {
        strength: f32,
        phase_hint: f32,
        mode_weights: [f32; MAX_MODES],
    },
    CfgBegin {
        total_size: u16,
        num_chunks: u8,
        checksum: u32,
    },
    CfgChunk {
        index: u8,
        data: Vec<u8>,
    },
    CfgEnd {
        checksum: u32,
    },
    CfgAck {
        status: u8,
    },
    CfgNack {
        status: u8,
    },
    Start {
        start_time_ms: u32,
    },
    Stop,
    Reset,
    /// Mode-0 telemetry
    State {
        re: f32,
        im: f32,
        amplitude: f32,
    },
    Heartbeat {
        uptime_ms: u32,
        cpu_usage: u8,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Poke { .. } => MessageType::Poke,
            Message::CfgBegin { .. } => MessageType::CfgBegin,
            Message::CfgChunk { .. } => MessageType::CfgChunk,
            Message::CfgEnd { .. } => MessageType::CfgEnd,
            Message::CfgAck { .. } => MessageType::CfgAck,
            Message::CfgNack { .. } => MessageType::CfgNack,
            Message::Start { .. } => MessageType::Start,
            Message::Stop => MessageType::Stop,
            Message::Reset => MessageType::Reset,
            Message::State { .. } => MessageType::State,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
        }
    }

    /// Wire form of a poke
    pub fn from_poke(poke: &PokeEvent) -> Self {
        Message::Poke {
            strength: poke.strength as f32,
            phase_hint: poke.phase.to_radians() as f32,
            mode_weights: poke.mode_weights.map(|w| w as f32),
        }
    }

    /// Poke event carried by this message, attributed to `source_id`
    pub fn to_poke(&self, source_id: u8) -> Option<PokeEvent> {
        match self {
            Message::Poke {
                strength,
                phase_hint,
                mode_weights,
            } => Some(
                PokeEvent::new(source_id, *strength as f64)
                    .with_phase(PhaseHint::from_radians(*phase_hint as f64))
                    .with_mode_weights(mode_weights.map(|w| w as f64)),
            ),
            _ => None,
        }
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            Message::Poke {
                strength,
                phase_hint,
                mode_weights,
            } => {
                out.extend_from_slice(&strength.to_le_bytes());
                out.extend_from_slice(&phase_hint.to_le_bytes());
                for w in mode_weights {
                    out.extend_from_slice(&w.to_le_bytes());
                }
            }
            Message::CfgBegin {
                total_size,
                num_chunks,
                checksum,
            } => {
                out.extend_from_slice(&total_size.to_le_bytes());
                out.push(*num_chunks);
                out.extend_from_slice(&checksum.to_le_bytes());
            }
            Message::CfgChunk { index, data } => {
                out.push(*index);
                out.push(data.len().min(u8::MAX as usize) as u8);
                out.extend_from_slice(data);
            }
            Message::CfgEnd { checksum } => out.extend_from_slice(&checksum.to_le_bytes()),
            Message::CfgAck { status } | Message::CfgNack { status } => out.push(*status),
            Message::Start { start_time_ms } => out.extend_from_slice(&start_time_ms.to_le_bytes()),
            Message::Stop | Message::Reset => {}
            Message::State { re, im, amplitude } => {
                out.extend_from_slice(&re.to_le_bytes());
                out.extend_from_slice(&im.to_le_bytes());
                out.extend_from_slice(&amplitude.to_le_bytes());
            }
            Message::Heartbeat { uptime_ms, cpu_usage } => {
                out.extend_from_slice(&uptime_ms.to_le_bytes());
                out.push(*cpu_usage);
            }
        }
    }

    fn decode_payload(kind: MessageType, reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(match kind {
            MessageType::Poke => {
                let strength = reader.f32()?;
                let phase_hint = reader.f32()?;
                let mut mode_weights = [0.0f32; MAX_MODES];
                for w in &mut mode_weights {
                    *w = reader.f32()?;
                }
                Message::Poke {
                    strength,
                    phase_hint,
                    mode_weights,
                }
            }
            MessageType::CfgBegin => Message::CfgBegin {
                total_size: reader.u16()?,
                num_chunks: reader.u8()?,
                checksum: reader.u32()?,
            },
            MessageType::CfgChunk => {
                let index = reader.u8()?;
                let size = reader.u8()? as usize;
                if size > CHUNK_SIZE {
                    return Err(ProtocolError::ChunkSizeMismatch {
                        index: index as usize,
                        expected: CHUNK_SIZE,
                        actual: size,
                    });
                }
                Message::CfgChunk {
                    index,
                    data: reader.bytes(size)?.to_vec(),
                }
            }
            MessageType::CfgEnd => Message::CfgEnd {
                checksum: reader.u32()?,
            },
            MessageType::CfgAck => Message::CfgAck { status: reader.u8()? },
            MessageType::CfgNack => Message::CfgNack { status: reader.u8()? },
            MessageType::Start => Message::Start {
                start_time_ms: reader.u32()?,
            },
            MessageType::Stop => Message::Stop,
            MessageType::Reset => Message::Reset,
            MessageType::State => Message::State {
                re: reader.f32()?,
                im: reader.f32()?,
                amplitude: reader.f32()?,
            },
            MessageType::Heartbeat => Message::Heartbeat {
                uptime_ms: reader.u32()?,
                cpu_usage: reader.u8()?,
            },
        })
    }
}

/// A header plus its message
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: Header,
    pub message: Message,
}

impl Packet {
    pub fn new(header: Header, message: Message) -> Self {
        Self { header, message }
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(MAX_PACKET_SIZE);
        out.push(self.header.version);
        out.push(self.message.message_type() as u8);
        out.push(self.header.source_id);
        out.push(self.header.dest_id);
        out.extend_from_slice(&self.header.sequence.to_le_bytes());
        out.extend_from_slice(&self.header.timestamp_ms.to_le_bytes());
        self.message.encode_payload(&mut out);

        if out.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge(out.len()));
        }
        Ok(out)
    }

    /// Parse wire bytes. Trailing bytes after the payload are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge(bytes.len()));
        }

        let mut reader = Reader::new(bytes);
        let version = reader.u8()?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let kind = MessageType::try_from(reader.u8()?)?;
        let header = Header {
            version,
            source_id: reader.u8()?,
            dest_id: reader.u8()?,
            sequence: reader.u16()?,
            timestamp_ms: reader.u16()?,
        };
        let message = Message::decode_payload(kind, &mut reader)?;

        Ok(Self { header, message })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos + n;
        let slice = self.bytes.get(self.pos..end).ok_or(ProtocolError::Truncated {
            expected: end,
            actual: self.bytes.len(),
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_le_bytes(self.array()?))
    }
}

// ============================================================================
// Configuration transfer
// ============================================================================

fn chunk_count(total_size: usize) -> usize {
    (total_size + CHUNK_SIZE - 1) / CHUNK_SIZE
}

/// Sender side: a configuration blob split into chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTransfer {
    data: Vec<u8>,
    checksum: u32,
}

impl ConfigTransfer {
    /// Fails for empty blobs and blobs over `MAX_CONFIG_SIZE`
    pub fn new(data: Vec<u8>) -> Result<Self, ProtocolError> {
        if data.is_empty() || data.len() > MAX_CONFIG_SIZE {
            return Err(ProtocolError::InvalidConfigSize(data.len()));
        }
        let checksum = crc32(&data);
        Ok(Self { data, checksum })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn num_chunks(&self) -> usize {
        chunk_count(self.data.len())
    }

    /// Data of chunk `index`
    pub fn chunk(&self, index: usize) -> Option<&[u8]> {
        self.data.chunks(CHUNK_SIZE).nth(index)
    }

    /// The full message sequence: begin, every chunk, end
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.num_chunks() + 2);
        messages.push(Message::CfgBegin {
            total_size: self.data.len() as u16,
            num_chunks: self.num_chunks() as u8,
            checksum: self.checksum,
        });
        for (index, chunk) in self.data.chunks(CHUNK_SIZE).enumerate() {
            messages.push(Message::CfgChunk {
                index: index as u8,
                data: chunk.to_vec(),
            });
        }
        messages.push(Message::CfgEnd {
            checksum: self.checksum,
        });
        messages
    }
}

#[derive(Debug, Clone)]
struct PendingTransfer {
    buffer: Vec<u8>,
    num_chunks: usize,
    checksum: u32,
    received: u32,
}

impl PendingTransfer {
    fn received_count(&self) -> usize {
        self.received.count_ones() as usize
    }
}

/// Receiver side: reassembles chunks and verifies the checksum
#[derive(Debug, Clone, Default)]
pub struct ConfigReceiver {
    pending: Option<PendingTransfer>,
}

impl ConfigReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Is a transfer between begin and end?
    pub fn is_active(&self) -> bool {
        self.pending.is_some()
    }

    /// Chunks received in the current transfer
    pub fn received_count(&self) -> usize {
        self.pending.as_ref().map(|p| p.received_count()).unwrap_or(0)
    }

    /// Chunk indices still outstanding
    pub fn missing_chunks(&self) -> Vec<usize> {
        match &self.pending {
            Some(p) => (0..p.num_chunks).filter(|i| p.received & (1 << i) == 0).collect(),
            None => Vec::new(),
        }
    }

    /// Start a transfer, discarding any transfer in progress
    pub fn begin(&mut self, total_size: usize, num_chunks: usize, checksum: u32) -> Result<(), ProtocolError> {
        self.pending = None;

        if total_size == 0 || total_size > MAX_CONFIG_SIZE {
            return Err(ProtocolError::InvalidConfigSize(total_size));
        }
        let expected = chunk_count(total_size);
        if num_chunks != expected {
            return Err(ProtocolError::ChunkCountMismatch {
                expected,
                actual: num_chunks,
            });
        }

        self.pending = Some(PendingTransfer {
            buffer: vec![0; total_size],
            num_chunks,
            checksum,
            received: 0,
        });
        Ok(())
    }

    /// Store one chunk. Duplicates overwrite; bad chunks leave the transfer intact.
    pub fn accept_chunk(&mut self, index: usize, data: &[u8]) -> Result<(), ProtocolError> {
        let pending = self.pending.as_mut().ok_or(ProtocolError::NoTransferInProgress)?;

        if index >= pending.num_chunks {
            return Err(ProtocolError::ChunkIndexOutOfRange {
                index,
                num_chunks: pending.num_chunks,
            });
        }

        let start = index * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(pending.buffer.len());
        if data.len() != end - start {
            return Err(ProtocolError::ChunkSizeMismatch {
                index,
                expected: end - start,
                actual: data.len(),
            });
        }

        pending.buffer[start..end].copy_from_slice(data);
        pending.received |= 1 << index;
        Ok(())
    }

    /// Close the transfer and return the verified blob.
    ///
    /// The transfer is consumed whether or not it verifies.
    pub fn finish(&mut self, checksum: u32) -> Result<Vec<u8>, ProtocolError> {
        let pending = self.pending.take().ok_or(ProtocolError::NoTransferInProgress)?;

        let received = pending.received_count();
        if received != pending.num_chunks {
            return Err(ProtocolError::MissingChunks {
                received,
                expected: pending.num_chunks,
            });
        }
        if checksum != pending.checksum {
            return Err(ProtocolError::ChecksumMismatch {
                expected: pending.checksum,
                actual: checksum,
            });
        }

        let actual = crc32(&pending.buffer);
        if actual != pending.checksum {
            return Err(ProtocolError::ChecksumMismatch {
                expected: pending.checksum,
                actual,
            });
        }

        Ok(pending.buffer)
    }

    /// Abandon any transfer in progress
    pub fn cancel(&mut self) {
        self.pending = None;
    }
}
