//! Command catalogue: request encoding and inbound frame decoding.
//!
//! Requests that expect an answer are modelled by [`Request`] and take the
//! correlation id at encode time, so the connection owns id allocation.
//! One-way commands (publish, credit, store offset, tune, heartbeat) have
//! plain encoder functions. Everything the broker can send is decoded into
//! a [`ServerFrame`].

use std::collections::HashMap;

use bytes::Bytes;

use super::frame::{build_command, Frame};
use super::response_code::ResponseCode;
use super::wire_format::{keys, WireReader, WireWriter, RESPONSE_FLAG, SIZE_PREFIX_LEN};
use crate::error::{Result, StreamError};
use crate::types::{OffsetSpecification, PublishingId};

/// Bytes a publish frame spends before its first entry:
/// size(4) + key(2) + version(2) + publisher id(1) + count(4).
pub const PUBLISH_FRAME_OVERHEAD: usize = SIZE_PREFIX_LEN + 4 + 1 + 4;

/// Bytes each publish entry spends besides the message:
/// publishing id(8) + message length(4).
pub const PUBLISH_ENTRY_OVERHEAD: usize = 8 + 4;

/// A request that is answered by a correlated response.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    PeerProperties(HashMap<String, String>),
    SaslHandshake,
    SaslAuthenticate {
        mechanism: String,
        data: Bytes,
    },
    Open {
        virtual_host: String,
    },
    Close {
        code: ResponseCode,
        reason: String,
    },
    CreateStream {
        stream: String,
        arguments: HashMap<String, String>,
    },
    DeleteStream {
        stream: String,
    },
    DeclarePublisher {
        publisher_id: u8,
        reference: String,
        stream: String,
    },
    DeletePublisher {
        publisher_id: u8,
    },
    QueryPublisherSequence {
        reference: String,
        stream: String,
    },
    Subscribe {
        subscription_id: u8,
        stream: String,
        offset: OffsetSpecification,
        credit: u16,
        properties: HashMap<String, String>,
    },
    Unsubscribe {
        subscription_id: u8,
    },
    QueryOffset {
        reference: String,
        stream: String,
    },
    Metadata {
        streams: Vec<String>,
    },
}

impl Request {
    /// Command key sent on the wire.
    pub fn key(&self) -> u16 {
        match self {
            Request::PeerProperties(_) => keys::PEER_PROPERTIES,
            Request::SaslHandshake => keys::SASL_HANDSHAKE,
            Request::SaslAuthenticate { .. } => keys::SASL_AUTHENTICATE,
            Request::Open { .. } => keys::OPEN,
            Request::Close { .. } => keys::CLOSE,
            Request::CreateStream { .. } => keys::CREATE_STREAM,
            Request::DeleteStream { .. } => keys::DELETE_STREAM,
            Request::DeclarePublisher { .. } => keys::DECLARE_PUBLISHER,
            Request::DeletePublisher { .. } => keys::DELETE_PUBLISHER,
            Request::QueryPublisherSequence { .. } => keys::QUERY_PUBLISHER_SEQUENCE,
            Request::Subscribe { .. } => keys::SUBSCRIBE,
            Request::Unsubscribe { .. } => keys::UNSUBSCRIBE,
            Request::QueryOffset { .. } => keys::QUERY_OFFSET,
            Request::Metadata { .. } => keys::METADATA,
        }
    }

    /// Command name for logs and errors.
    #[inline]
    pub fn name(&self) -> &'static str {
        keys::name(self.key())
    }

    /// Encode as a complete frame.
    pub fn encode(&self, correlation_id: u32) -> Result<Bytes> {
        let mut w = WireWriter::with_capacity(64);
        w.write_u32(correlation_id);

        match self {
            Request::PeerProperties(properties) => w.write_string_map(properties)?,
            Request::SaslHandshake => {}
            Request::SaslAuthenticate { mechanism, data } => {
                w.write_string(mechanism)?;
                w.write_blob(data)?;
            }
            Request::Open { virtual_host } => w.write_string(virtual_host)?,
            Request::Close { code, reason } => {
                w.write_u16(code.code());
                w.write_string(reason)?;
            }
            Request::CreateStream { stream, arguments } => {
                w.write_string(stream)?;
                w.write_string_map(arguments)?;
            }
            Request::DeleteStream { stream } => w.write_string(stream)?,
            Request::DeclarePublisher {
                publisher_id,
                reference,
                stream,
            } => {
                w.write_u8(*publisher_id);
                w.write_string(reference)?;
                w.write_string(stream)?;
            }
            Request::DeletePublisher { publisher_id } => w.write_u8(*publisher_id),
            Request::QueryPublisherSequence { reference, stream }
            | Request::QueryOffset { reference, stream } => {
                w.write_string(reference)?;
                w.write_string(stream)?;
            }
            Request::Subscribe {
                subscription_id,
                stream,
                offset,
                credit,
                properties,
            } => {
                w.write_u8(*subscription_id);
                w.write_string(stream)?;
                w.write_u16(offset.type_code());
                match offset {
                    OffsetSpecification::Offset(o) => w.write_u64(*o),
                    OffsetSpecification::Timestamp(t) => w.write_i64(*t),
                    _ => {}
                }
                w.write_u16(*credit);
                w.write_string_map(properties)?;
            }
            Request::Unsubscribe { subscription_id } => w.write_u8(*subscription_id),
            Request::Metadata { streams } => w.write_string_array(streams)?,
        }

        Ok(build_command(self.key(), w))
    }
}

/// Encode a publish frame from already-encoded messages.
pub fn encode_publish(publisher_id: u8, entries: &[(PublishingId, Bytes)]) -> Result<Bytes> {
    let body_len: usize = entries
        .iter()
        .map(|(_, m)| PUBLISH_ENTRY_OVERHEAD + m.len())
        .sum();
    let mut w = WireWriter::with_capacity(5 + body_len);
    w.write_u8(publisher_id);
    w.write_array_len(entries.len())?;
    for (publishing_id, message) in entries {
        w.write_u64(*publishing_id);
        w.write_blob(message)?;
    }
    Ok(build_command(keys::PUBLISH, w))
}

/// Encode a credit grant.
pub fn encode_credit(subscription_id: u8, credit: u16) -> Bytes {
    let mut w = WireWriter::with_capacity(3);
    w.write_u8(subscription_id);
    w.write_u16(credit);
    build_command(keys::CREDIT, w)
}

/// Encode a store-offset command.
pub fn encode_store_offset(reference: &str, stream: &str, offset: u64) -> Result<Bytes> {
    let mut w = WireWriter::new();
    w.write_string(reference)?;
    w.write_string(stream)?;
    w.write_u64(offset);
    Ok(build_command(keys::STORE_OFFSET, w))
}

/// Encode the client's tune reply.
pub fn encode_tune(frame_max: u32, heartbeat: u32) -> Bytes {
    let mut w = WireWriter::with_capacity(8);
    w.write_u32(frame_max);
    w.write_u32(heartbeat);
    build_command(keys::TUNE, w)
}

/// Encode a heartbeat.
pub fn encode_heartbeat() -> Bytes {
    build_command(keys::HEARTBEAT, WireWriter::new())
}

/// Encode the answer to a broker-initiated close.
pub fn encode_close_response(correlation_id: u32) -> Bytes {
    let mut w = WireWriter::with_capacity(6);
    w.write_u32(correlation_id);
    w.write_u16(ResponseCode::Ok.code());
    build_command(keys::CLOSE | RESPONSE_FLAG, w)
}

/// Broker node as reported by a metadata response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub reference: u16,
    pub host: String,
    pub port: u32,
}

/// Per-stream entry of a metadata response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMetadata {
    pub stream: String,
    pub code: ResponseCode,
    pub leader: Option<Broker>,
    pub replicas: Vec<Broker>,
}

/// Decoded metadata response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataResponse {
    pub brokers: Vec<Broker>,
    pub streams: Vec<StreamMetadata>,
}

impl MetadataResponse {
    /// Look up one stream's entry.
    pub fn stream(&self, name: &str) -> Option<&StreamMetadata> {
        self.streams.iter().find(|s| s.stream == name)
    }
}

/// Command-specific part of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    PeerProperties(HashMap<String, String>),
    SaslMechanisms(Vec<String>),
    SaslChallenge(Bytes),
    Open(HashMap<String, String>),
    Sequence(u64),
    Offset(u64),
    Metadata(MetadataResponse),
}

/// A response matched to a request by correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Command key with the response bit cleared.
    pub command: u16,
    pub correlation_id: u32,
    pub code: ResponseCode,
    pub body: ResponseBody,
}

/// Any frame the broker can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Response(Response),
    PublishConfirm {
        publisher_id: u8,
        publishing_ids: Vec<PublishingId>,
    },
    PublishError {
        publisher_id: u8,
        errors: Vec<(PublishingId, ResponseCode)>,
    },
    Deliver {
        subscription_id: u8,
        chunk: Bytes,
    },
    MetadataUpdate {
        code: ResponseCode,
        stream: String,
    },
    CreditError {
        code: ResponseCode,
        subscription_id: u8,
    },
    Tune {
        frame_max: u32,
        heartbeat: u32,
    },
    Heartbeat,
    Close {
        correlation_id: u32,
        code: ResponseCode,
        reason: String,
    },
}

/// Classify and decode one inbound frame.
pub fn decode_server_frame(frame: &Frame) -> Result<ServerFrame> {
    let mut r = frame.reader();

    if frame.is_response() {
        return match frame.command() {
            keys::CREDIT => {
                let code = ResponseCode::from(r.read_u16()?);
                let subscription_id = r.read_u8()?;
                Ok(ServerFrame::CreditError {
                    code,
                    subscription_id,
                })
            }
            command => decode_response(command, &mut r).map(ServerFrame::Response),
        };
    }

    match frame.key() {
        keys::PUBLISH_CONFIRM => {
            let publisher_id = r.read_u8()?;
            let count = r.read_array_len()?;
            let mut publishing_ids = Vec::with_capacity(count.min(r.remaining() / 8));
            for _ in 0..count {
                publishing_ids.push(r.read_u64()?);
            }
            Ok(ServerFrame::PublishConfirm {
                publisher_id,
                publishing_ids,
            })
        }
        keys::PUBLISH_ERROR => {
            let publisher_id = r.read_u8()?;
            let count = r.read_array_len()?;
            let mut errors = Vec::with_capacity(count.min(r.remaining() / 10));
            for _ in 0..count {
                let id = r.read_u64()?;
                let code = ResponseCode::from(r.read_u16()?);
                errors.push((id, code));
            }
            Ok(ServerFrame::PublishError {
                publisher_id,
                errors,
            })
        }
        keys::DELIVER => {
            let subscription_id = r.read_u8()?;
            Ok(ServerFrame::Deliver {
                subscription_id,
                chunk: r.into_remaining(),
            })
        }
        keys::METADATA_UPDATE => {
            let code = ResponseCode::from(r.read_u16()?);
            let stream = r.read_string()?;
            Ok(ServerFrame::MetadataUpdate { code, stream })
        }
        keys::TUNE => Ok(ServerFrame::Tune {
            frame_max: r.read_u32()?,
            heartbeat: r.read_u32()?,
        }),
        keys::HEARTBEAT => Ok(ServerFrame::Heartbeat),
        keys::CLOSE => Ok(ServerFrame::Close {
            correlation_id: r.read_u32()?,
            code: ResponseCode::from(r.read_u16()?),
            reason: r.read_string()?,
        }),
        other => Err(StreamError::MalformedFrame(format!(
            "unexpected command key 0x{:04x} from broker",
            other
        ))),
    }
}

fn decode_response(command: u16, r: &mut WireReader) -> Result<Response> {
    let correlation_id = r.read_u32()?;

    // Metadata responses carry no top-level code.
    if command == keys::METADATA {
        let metadata = decode_metadata(r)?;
        return Ok(Response {
            command,
            correlation_id,
            code: ResponseCode::Ok,
            body: ResponseBody::Metadata(metadata),
        });
    }

    let code = ResponseCode::from(r.read_u16()?);
    let body = if r.is_empty() {
        ResponseBody::Empty
    } else {
        match command {
            keys::PEER_PROPERTIES => ResponseBody::PeerProperties(r.read_string_map()?),
            keys::SASL_HANDSHAKE => ResponseBody::SaslMechanisms(r.read_string_array()?),
            keys::SASL_AUTHENTICATE => ResponseBody::SaslChallenge(r.read_blob()?),
            keys::OPEN => ResponseBody::Open(r.read_string_map()?),
            keys::QUERY_PUBLISHER_SEQUENCE => ResponseBody::Sequence(r.read_u64()?),
            keys::QUERY_OFFSET => ResponseBody::Offset(r.read_u64()?),
            _ => ResponseBody::Empty,
        }
    };

    Ok(Response {
        command,
        correlation_id,
        code,
        body,
    })
}

fn decode_metadata(r: &mut WireReader) -> Result<MetadataResponse> {
    let broker_count = r.read_array_len()?;
    let mut brokers = Vec::with_capacity(broker_count.min(r.remaining() / 8));
    for _ in 0..broker_count {
        brokers.push(Broker {
            reference: r.read_u16()?,
            host: r.read_string()?,
            port: r.read_u32()?,
        });
    }

    let find = |reference: u16| brokers.iter().find(|b| b.reference == reference).cloned();

    let stream_count = r.read_array_len()?;
    let mut streams = Vec::with_capacity(stream_count.min(r.remaining() / 10));
    for _ in 0..stream_count {
        let stream = r.read_string()?;
        let code = ResponseCode::from(r.read_u16()?);
        let leader = find(r.read_u16()?);
        let replica_count = r.read_array_len()?;
        let mut replicas = Vec::with_capacity(replica_count.min(r.remaining() / 2));
        for _ in 0..replica_count {
            if let Some(b) = find(r.read_u16()?) {
                replicas.push(b);
            }
        }
        streams.push(StreamMetadata {
            stream,
            code,
            leader,
            replicas,
        });
    }

    Ok(MetadataResponse { brokers, streams })
}
