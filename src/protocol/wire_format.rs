//! Wire format primitives.
//!
//! Every frame on the wire is laid out as:
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────────────┐
//! │ Size     │ Key      │ Version  │ Command body        │
//! │ 4 bytes  │ 2 bytes  │ 2 bytes  │ Size - 4 bytes      │
//! │ uint32 BE│ uint16 BE│ uint16 BE│                     │
//! └──────────┴──────────┴──────────┴─────────────────────┘
//! ```
//!
//! Bodies are built from a handful of primitives: big-endian integers,
//! `int16`-length-prefixed UTF-8 strings, `int32`-counted arrays and
//! `int32`-length-prefixed byte blobs. [`WireReader`] and [`WireWriter`]
//! are symmetric; neither knows anything about command semantics.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, StreamError};

/// Size of the length prefix in bytes.
pub const SIZE_PREFIX_LEN: usize = 4;

/// Size of key + version following the length prefix.
pub const COMMAND_HEADER_LEN: usize = 4;

/// Protocol version carried by every frame this client sends.
pub const PROTOCOL_VERSION: u16 = 1;

/// Bit set on the key of every response frame.
pub const RESPONSE_FLAG: u16 = 0x8000;

/// Command keys.
pub mod keys {
    pub const DECLARE_PUBLISHER: u16 = 0x0001;
    pub const PUBLISH: u16 = 0x0002;
    pub const PUBLISH_CONFIRM: u16 = 0x0003;
    pub const PUBLISH_ERROR: u16 = 0x0004;
    pub const QUERY_PUBLISHER_SEQUENCE: u16 = 0x0005;
    pub const DELETE_PUBLISHER: u16 = 0x0006;
    pub const SUBSCRIBE: u16 = 0x0007;
    pub const DELIVER: u16 = 0x0008;
    pub const CREDIT: u16 = 0x0009;
    pub const STORE_OFFSET: u16 = 0x000a;
    pub const QUERY_OFFSET: u16 = 0x000b;
    pub const UNSUBSCRIBE: u16 = 0x000c;
    pub const CREATE_STREAM: u16 = 0x000d;
    pub const DELETE_STREAM: u16 = 0x000e;
    pub const METADATA: u16 = 0x000f;
    pub const METADATA_UPDATE: u16 = 0x0010;
    pub const PEER_PROPERTIES: u16 = 0x0011;
    pub const SASL_HANDSHAKE: u16 = 0x0012;
    pub const SASL_AUTHENTICATE: u16 = 0x0013;
    pub const TUNE: u16 = 0x0014;
    pub const OPEN: u16 = 0x0015;
    pub const CLOSE: u16 = 0x0016;
    pub const HEARTBEAT: u16 = 0x0017;

    /// Human-readable command name for logs and errors.
    pub fn name(key: u16) -> &'static str {
        match key & !super::RESPONSE_FLAG {
            DECLARE_PUBLISHER => "declare_publisher",
            PUBLISH => "publish",
            PUBLISH_CONFIRM => "publish_confirm",
            PUBLISH_ERROR => "publish_error",
            QUERY_PUBLISHER_SEQUENCE => "query_publisher_sequence",
            DELETE_PUBLISHER => "delete_publisher",
            SUBSCRIBE => "subscribe",
            DELIVER => "deliver",
            CREDIT => "credit",
            STORE_OFFSET => "store_offset",
            QUERY_OFFSET => "query_offset",
            UNSUBSCRIBE => "unsubscribe",
            CREATE_STREAM => "create_stream",
            DELETE_STREAM => "delete_stream",
            METADATA => "metadata",
            METADATA_UPDATE => "metadata_update",
            PEER_PROPERTIES => "peer_properties",
            SASL_HANDSHAKE => "sasl_handshake",
            SASL_AUTHENTICATE => "sasl_authenticate",
            TUNE => "tune",
            OPEN => "open",
            CLOSE => "close",
            HEARTBEAT => "heartbeat",
            _ => "unknown",
        }
    }
}

/// Cursor over a received frame body.
///
/// All reads consume exactly the bytes they need or fail with
/// [`StreamError::TruncatedFrame`]; nothing is ever zero-filled.
#[derive(Debug, Clone)]
pub struct WireReader {
    buf: Bytes,
}

impl WireReader {
    /// Wrap a frame body.
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    #[inline]
    fn ensure(&self, needed: usize) -> Result<()> {
        let available = self.buf.remaining();
        if available < needed {
            return Err(StreamError::TruncatedFrame { needed, available });
        }
        Ok(())
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Check whether the body is fully consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf[0])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    /// Read exactly `size` raw bytes (zero-copy).
    pub fn read_bytes(&mut self, size: usize) -> Result<Bytes> {
        self.ensure(size)?;
        Ok(self.buf.split_to(size))
    }

    /// Skip `size` bytes.
    pub fn skip(&mut self, size: usize) -> Result<()> {
        self.ensure(size)?;
        self.buf.advance(size);
        Ok(())
    }

    /// Read an `int16`-length-prefixed UTF-8 string.
    ///
    /// A length of -1 (null string) reads as empty.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_i16()?;
        match len {
            -1 | 0 => return Ok(String::new()),
            n if n < 0 => {
                return Err(StreamError::MalformedFrame(format!(
                    "negative string length {}",
                    n
                )))
            }
            _ => {}
        }
        let raw = self.read_bytes(len as usize)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| StreamError::MalformedFrame(format!("invalid UTF-8 in string: {}", e)))
    }

    /// Read an `int32`-length-prefixed byte blob. -1 (null) reads as empty.
    pub fn read_blob(&mut self) -> Result<Bytes> {
        let len = self.read_i32()?;
        match len {
            -1 | 0 => return Ok(Bytes::new()),
            n if n < 0 => {
                return Err(StreamError::MalformedFrame(format!(
                    "negative blob length {}",
                    n
                )))
            }
            _ => {}
        }
        self.read_bytes(len as usize)
    }

    /// Read an `int32` element count.
    pub fn read_array_len(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(StreamError::MalformedFrame(format!(
                "negative array length {}",
                len
            )));
        }
        Ok(len as usize)
    }

    /// Read an array of strings.
    pub fn read_string_array(&mut self) -> Result<Vec<String>> {
        let count = self.read_array_len()?;
        // Each string needs at least its 2-byte prefix.
        let mut out = Vec::with_capacity(count.min(self.remaining() / 2));
        for _ in 0..count {
            out.push(self.read_string()?);
        }
        Ok(out)
    }

    /// Read a string-to-string map.
    pub fn read_string_map(&mut self) -> Result<HashMap<String, String>> {
        let count = self.read_array_len()?;
        let mut out = HashMap::with_capacity(count.min(self.remaining() / 4));
        for _ in 0..count {
            let key = self.read_string()?;
            let value = self.read_string()?;
            out.insert(key, value);
        }
        Ok(out)
    }

    /// Consume the reader, returning the unread tail.
    pub fn into_remaining(self) -> Bytes {
        self.buf
    }
}

/// Builder for an outgoing frame body.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    /// Append raw bytes with no prefix.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Append an `int16`-length-prefixed string.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        let len = i16::try_from(s.len()).map_err(|_| {
            StreamError::MalformedFrame(format!("string of {} bytes is too long", s.len()))
        })?;
        self.buf.put_i16(len);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    /// Append an `int32`-length-prefixed blob.
    pub fn write_blob(&mut self, data: &[u8]) -> Result<()> {
        let len = i32::try_from(data.len()).map_err(|_| {
            StreamError::MalformedFrame(format!("blob of {} bytes is too long", data.len()))
        })?;
        self.buf.put_i32(len);
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Append an `int32` element count.
    pub fn write_array_len(&mut self, len: usize) -> Result<()> {
        let len = i32::try_from(len)
            .map_err(|_| StreamError::MalformedFrame(format!("array of {} items", len)))?;
        self.buf.put_i32(len);
        Ok(())
    }

    /// Append a string array.
    pub fn write_string_array<S: AsRef<str>>(&mut self, items: &[S]) -> Result<()> {
        self.write_array_len(items.len())?;
        for item in items {
            self.write_string(item.as_ref())?;
        }
        Ok(())
    }

    /// Append a string-to-string map.
    pub fn write_string_map<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
        I::IntoIter: ExactSizeIterator,
    {
        let entries = entries.into_iter();
        self.write_array_len(entries.len())?;
        for (key, value) in entries {
            self.write_string(key)?;
            self.write_string(value)?;
        }
        Ok(())
    }

    /// Finish the body.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}
