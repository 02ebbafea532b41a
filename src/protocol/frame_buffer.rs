//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForSize`: Need the 4-byte length prefix
//! - `WaitingForFrame`: Prefix parsed, need N more bytes
//!
//! Frames are only handed out once every byte has arrived, so the read
//! loop never routes a partially decoded frame.

use bytes::{Buf, BytesMut};

use super::wire_format::{COMMAND_HEADER_LEN, SIZE_PREFIX_LEN};
use super::Frame;
use crate::error::{Result, StreamError};

/// Default maximum frame size (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1_048_576;

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForSize,
    WaitingForFrame { size: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 1 MiB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom frame size limit.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForSize,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::FrameTooLarge`] if a length prefix exceeds the
    /// limit and [`StreamError::MalformedFrame`] if it is too small to carry
    /// a key and version. Both leave the stream unrecoverable.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::WaitingForSize => {
                if self.buffer.len() < SIZE_PREFIX_LEN {
                    return Ok(None);
                }

                let size = (&self.buffer[..SIZE_PREFIX_LEN]).get_u32();
                if size > self.max_frame_size {
                    return Err(StreamError::FrameTooLarge {
                        size,
                        max: self.max_frame_size,
                    });
                }
                if (size as usize) < COMMAND_HEADER_LEN {
                    return Err(StreamError::MalformedFrame(format!(
                        "frame size {} cannot hold key and version",
                        size
                    )));
                }

                self.buffer.advance(SIZE_PREFIX_LEN);
                self.state = State::WaitingForFrame {
                    size: size as usize,
                };
                self.try_extract_one()
            }

            State::WaitingForFrame { size } => {
                if self.buffer.len() < size {
                    return Ok(None);
                }

                let mut raw = self.buffer.split_to(size).freeze();
                self.state = State::WaitingForSize;

                let key = raw.get_u16();
                let version = raw.get_u16();
                Ok(Some(Frame::new(key, version, raw)))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForSize;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForSize => "WaitingForSize",
            State::WaitingForFrame { .. } => "WaitingForFrame",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
