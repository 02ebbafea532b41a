//! Osiris chunk decoding.
//!
//! A `Deliver` frame carries one chunk: a fixed header followed by
//! `entries` entries. Each entry is either a simple record or a sub-batch
//! of records; the first byte's high bit tells them apart. Records are
//! numbered consecutively from the chunk's first offset.

use bytes::Bytes;
use tracing::warn;

use super::wire_format::WireReader;
use crate::error::{Result, StreamError};

/// Magic/version byte opening every chunk.
pub const CHUNK_MAGIC: i8 = 0x50;

const SUB_BATCH_FLAG: u8 = 0x80;
const COMPRESSION_NONE: u8 = 0;

/// Fixed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_type: i8,
    pub entries: u16,
    pub records: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub epoch: u64,
    pub first_offset: u64,
    pub crc: i32,
    pub data_length: u32,
    pub trailer_length: u32,
}

/// One record with its absolute offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub offset: u64,
    pub data: Bytes,
}

/// A decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub records: Vec<ChunkRecord>,
}

impl Chunk {
    /// Decode a chunk as carried by a `Deliver` frame.
    pub fn decode(raw: Bytes) -> Result<Self> {
        let mut r = WireReader::new(raw);

        let magic = r.read_i8()?;
        if magic != CHUNK_MAGIC {
            return Err(StreamError::MalformedFrame(format!(
                "bad chunk magic 0x{:02x}",
                magic
            )));
        }

        let header = ChunkHeader {
            chunk_type: r.read_i8()?,
            entries: r.read_u16()?,
            records: r.read_u32()?,
            timestamp: r.read_i64()?,
            epoch: r.read_u64()?,
            first_offset: r.read_u64()?,
            crc: r.read_i32()?,
            data_length: r.read_u32()?,
            trailer_length: r.read_u32()?,
        };
        r.skip(4)?; // reserved

        // Every record takes at least its 4-byte size prefix.
        let mut records = Vec::with_capacity((header.records as usize).min(r.remaining() / 4));
        let mut offset = header.first_offset;

        for _ in 0..header.entries {
            let first = r.peek_u8()?;
            if first & SUB_BATCH_FLAG == 0 {
                let size = r.read_u32()?;
                let data = r.read_bytes(size as usize)?;
                records.push(ChunkRecord { offset, data });
                offset += 1;
                continue;
            }

            let kind = r.read_u8()?;
            let compression = (kind & 0x70) >> 4;
            let count = r.read_u16()?;
            let _uncompressed = r.read_u32()?;
            let length = r.read_u32()?;
            let mut batch = WireReader::new(r.read_bytes(length as usize)?);

            if compression != COMPRESSION_NONE {
                warn!(
                    compression,
                    records = count,
                    first_offset = offset,
                    "skipping compressed sub-batch"
                );
                offset += u64::from(count);
                continue;
            }

            for _ in 0..count {
                let size = batch.read_u32()?;
                let data = batch.read_bytes(size as usize)?;
                records.push(ChunkRecord { offset, data });
                offset += 1;
            }
        }

        Ok(Self { header, records })
    }
}
