//! Protocol module - wire format, framing, commands and chunks.
//!
//! This module implements the binary stream protocol:
//! - Big-endian primitive reader/writer
//! - Frame buffer for accumulating partial reads
//! - Typed request encoders and inbound frame decoders
//! - Osiris chunk decoding for deliveries

mod chunk;
mod commands;
mod frame;
mod frame_buffer;
mod response_code;
mod wire_format;

pub use chunk::{Chunk, ChunkHeader, ChunkRecord, CHUNK_MAGIC};
pub use commands::{
    decode_server_frame, encode_close_response, encode_credit, encode_heartbeat, encode_publish,
    encode_store_offset, encode_tune, Broker, MetadataResponse, Request, Response, ResponseBody,
    ServerFrame, StreamMetadata, PUBLISH_ENTRY_OVERHEAD, PUBLISH_FRAME_OVERHEAD,
};
pub use frame::{build_command, build_frame, Frame};
pub use frame_buffer::{FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
pub use response_code::ResponseCode;
pub use wire_format::{
    keys, WireReader, WireWriter, COMMAND_HEADER_LEN, PROTOCOL_VERSION, RESPONSE_FLAG,
    SIZE_PREFIX_LEN,
};

#[cfg(test)]
pub(crate) use chunk::test_support;
