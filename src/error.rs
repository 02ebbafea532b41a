//! Error types for streamwire-client.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::ResponseCode;

/// Main error type for all stream client operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame ended before a field could be read.
    #[error("Truncated frame: needed {needed} bytes, {available} available")]
    TruncatedFrame { needed: usize, available: usize },

    /// A frame was complete but its content is invalid.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame length prefix exceeds the configured maximum.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: u32, max: u32 },

    /// Connection setup failed before reaching the open state.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The writer task could not flush a frame.
    #[error("Write error: {0}")]
    WriteError(String),

    /// Connection is closing or closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No response arrived within the caller's timeout.
    #[error("No response to {command} within {timeout:?}")]
    ResponseTimeout {
        command: &'static str,
        timeout: Duration,
    },

    /// The named stream does not exist on the broker.
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// A stream with this name was already declared.
    #[error("Stream already exists: {0}")]
    StreamAlreadyExists(String),

    /// The requested offset cannot be served.
    #[error("Offset not available on stream {0}")]
    OffsetNotAvailable(String),

    /// Any other non-OK broker response code.
    #[error("Broker rejected {command}: {code}")]
    Broker {
        command: &'static str,
        code: ResponseCode,
    },

    /// Producer was used after close.
    #[error("Producer closed")]
    ProducerClosed,

    /// Consumer was used after close.
    #[error("Consumer closed")]
    ConsumerClosed,

    /// Unconfirmed backlog stayed full for the whole wait.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// A single message cannot fit in one frame.
    #[error("Message of {size} bytes exceeds frame budget of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// All 256 publisher ids on the connection are taken.
    #[error("Too many publishers on one connection")]
    TooManyPublishers,

    /// All 256 subscription ids on the connection are taken.
    #[error("Too many subscriptions on one connection")]
    TooManySubscriptions,

    /// A waiter is already registered for this correlation id.
    #[error("Correlation id {0} already in flight")]
    CorrelationInUse(u32),

    /// The event stream was already handed out.
    #[error("Event stream already taken")]
    EventStreamTaken,

    /// Offset tracking needs a named consumer.
    #[error("Consumer has no name; offset tracking requires one")]
    MissingConsumerName,

    /// Configuration value out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connection URI could not be parsed.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// JSON configuration error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StreamError {
    /// Map a non-OK response code for a stream-scoped command.
    pub(crate) fn from_response(command: &'static str, code: ResponseCode, stream: &str) -> Self {
        match code {
            ResponseCode::StreamDoesNotExist => StreamError::StreamNotFound(stream.to_string()),
            ResponseCode::StreamAlreadyExists => {
                StreamError::StreamAlreadyExists(stream.to_string())
            }
            ResponseCode::NoOffset => StreamError::OffsetNotAvailable(stream.to_string()),
            code => StreamError::Broker { command, code },
        }
    }

    /// Whether this error means the connection is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            StreamError::ConnectionClosed | StreamError::WriteError(_) | StreamError::Io(_)
        )
    }
}

/// Result type alias using StreamError.
pub type Result<T> = std::result::Result<T, StreamError>;
