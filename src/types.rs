//! Shared value types: offsets, confirmation status and close reasons.

use std::fmt;

use crate::codec::Message;
use crate::protocol::ResponseCode;

/// Client-assigned message identifier, strictly increasing per producer.
pub type PublishingId = u64;

/// Where a subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetSpecification {
    /// First message still stored in the stream.
    First,
    /// Start of the last chunk written.
    Last,
    /// Only messages appended after subscribing.
    #[default]
    Next,
    /// Absolute offset.
    Offset(u64),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl OffsetSpecification {
    /// Wire type code.
    pub fn type_code(&self) -> u16 {
        match self {
            OffsetSpecification::First => 1,
            OffsetSpecification::Last => 2,
            OffsetSpecification::Next => 3,
            OffsetSpecification::Offset(_) => 4,
            OffsetSpecification::Timestamp(_) => 5,
        }
    }
}

impl fmt::Display for OffsetSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetSpecification::First => write!(f, "first"),
            OffsetSpecification::Last => write!(f, "last"),
            OffsetSpecification::Next => write!(f, "next"),
            OffsetSpecification::Offset(o) => write!(f, "offset({})", o),
            OffsetSpecification::Timestamp(t) => write!(f, "timestamp({})", t),
        }
    }
}

/// Why a publishing id ended up failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Broker reported a publish error.
    Broker(ResponseCode),
    /// Producer closed before the broker answered.
    ProducerClosed,
    /// Connection went away before the broker answered.
    ConnectionClosed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Broker(code) => write!(f, "broker: {}", code),
            FailureReason::ProducerClosed => write!(f, "producer closed"),
            FailureReason::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

/// Outcome of a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Failed(FailureReason),
}

impl ConfirmationStatus {
    #[inline]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, ConfirmationStatus::Confirmed)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConfirmationStatus::Pending)
    }
}

/// One resolved publishing id, with the message it carried.
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub publishing_id: PublishingId,
    pub status: ConfirmationStatus,
    pub message: Message,
}

/// Why a subscription or publisher ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller closed it.
    Unsubscribed,
    /// Broker reported the stream gone or moved.
    StreamUnavailable(ResponseCode),
    /// Broker closed the connection.
    BrokerClosed { code: ResponseCode, reason: String },
    /// Transport failed or the connection was closed locally.
    ConnectionClosed,
    /// Nothing received from the broker for two heartbeat intervals.
    HeartbeatTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Unsubscribed => write!(f, "unsubscribed"),
            CloseReason::StreamUnavailable(code) => write!(f, "stream unavailable: {}", code),
            CloseReason::BrokerClosed { code, reason } => {
                write!(f, "broker closed connection: {} ({})", reason, code)
            }
            CloseReason::ConnectionClosed => write!(f, "connection closed"),
            CloseReason::HeartbeatTimeout => write!(f, "heartbeat timeout"),
        }
    }
}

/// Event delivered once when a consumer stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerClosedEvent {
    /// Consumer name, empty for anonymous consumers.
    pub consumer_name: String,
    pub stream: String,
    pub reason: CloseReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_type_codes() {
        assert_eq!(OffsetSpecification::First.type_code(), 1);
        assert_eq!(OffsetSpecification::Last.type_code(), 2);
        assert_eq!(OffsetSpecification::Next.type_code(), 3);
        assert_eq!(OffsetSpecification::Offset(9).type_code(), 4);
        assert_eq!(OffsetSpecification::Timestamp(-1).type_code(), 5);
        assert_eq!(OffsetSpecification::default(), OffsetSpecification::Next);
    }

    #[test]
    fn test_status_predicates() {
        assert!(!ConfirmationStatus::Pending.is_terminal());
        assert!(ConfirmationStatus::Confirmed.is_terminal());
        assert!(ConfirmationStatus::Confirmed.is_confirmed());
        let failed = ConfirmationStatus::Failed(FailureReason::Broker(ResponseCode::AccessRefused));
        assert!(failed.is_terminal());
        assert!(!failed.is_confirmed());
    }

    #[test]
    fn test_close_reason_display() {
        let reason = CloseReason::StreamUnavailable(ResponseCode::StreamNotAvailable);
        assert!(reason.to_string().contains("stream not available"));
        assert_eq!(CloseReason::Unsubscribed.to_string(), "unsubscribed");
    }
}
