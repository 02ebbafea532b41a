//! Frame struct with typed accessors.
//!
//! A [`Frame`] is one complete, length-delimited protocol message: key,
//! version and the command body. The body is held as `bytes::Bytes` so
//! chunks can be handed to consumers without copying.
//!
//! # Example
//!
//! ```
//! use streamwire_client::protocol::{build_frame, Frame, keys, FrameBuffer};
//!
//! let bytes = build_frame(keys::HEARTBEAT, 1, b"");
//! let mut buffer = FrameBuffer::new();
//! let frames = buffer.push(&bytes).unwrap();
//!
//! assert_eq!(frames[0].key(), keys::HEARTBEAT);
//! assert!(!frames[0].is_response());
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    WireReader, WireWriter, COMMAND_HEADER_LEN, PROTOCOL_VERSION, RESPONSE_FLAG, SIZE_PREFIX_LEN,
};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw key, including the response bit.
    pub key: u16,
    /// Command version.
    pub version: u16,
    /// Body following key and version.
    pub body: Bytes,
}

impl Frame {
    pub fn new(key: u16, version: u16, body: Bytes) -> Self {
        Self { key, version, body }
    }

    /// Raw key, including the response bit.
    #[inline]
    pub fn key(&self) -> u16 {
        self.key
    }

    /// Key with the response bit cleared.
    #[inline]
    pub fn command(&self) -> u16 {
        self.key & !RESPONSE_FLAG
    }

    #[inline]
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Check if this is a response frame.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.key & RESPONSE_FLAG != 0
    }

    /// Reader positioned at the start of the body.
    #[inline]
    pub fn reader(&self) -> WireReader {
        WireReader::new(self.body.clone())
    }

    /// Size on the wire, length prefix included.
    #[inline]
    pub fn wire_len(&self) -> usize {
        SIZE_PREFIX_LEN + COMMAND_HEADER_LEN + self.body.len()
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Bytes {
        build_frame(self.key, self.version, &self.body)
    }
}

/// Build a complete frame as one contiguous buffer.
pub fn build_frame(key: u16, version: u16, body: &[u8]) -> Bytes {
    let size = COMMAND_HEADER_LEN + body.len();
    let mut buf = BytesMut::with_capacity(SIZE_PREFIX_LEN + size);
    buf.put_u32(size as u32);
    buf.put_u16(key);
    buf.put_u16(version);
    buf.extend_from_slice(body);
    buf.freeze()
}

/// Build a version-1 frame from a finished body writer.
#[inline]
pub fn build_command(key: u16, body: WireWriter) -> Bytes {
    build_frame(key, PROTOCOL_VERSION, &body.into_bytes())
}
