//! Broker response codes.

use std::fmt;

/// Response code carried by response frames and publish errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ok,
    StreamDoesNotExist,
    SubscriptionIdAlreadyExists,
    SubscriptionIdDoesNotExist,
    StreamAlreadyExists,
    StreamNotAvailable,
    SaslMechanismNotSupported,
    AuthenticationFailure,
    SaslError,
    SaslChallenge,
    SaslAuthenticationFailureLoopback,
    VirtualHostAccessFailure,
    UnknownFrame,
    FrameTooLarge,
    InternalError,
    AccessRefused,
    PreconditionFailed,
    PublisherDoesNotExist,
    NoOffset,
    /// A code this client does not know.
    Unknown(u16),
}

impl ResponseCode {
    #[inline]
    pub fn is_ok(&self) -> bool {
        *self == ResponseCode::Ok
    }

    /// Numeric wire value.
    pub fn code(&self) -> u16 {
        match self {
            ResponseCode::Ok => 0x01,
            ResponseCode::StreamDoesNotExist => 0x02,
            ResponseCode::SubscriptionIdAlreadyExists => 0x03,
            ResponseCode::SubscriptionIdDoesNotExist => 0x04,
            ResponseCode::StreamAlreadyExists => 0x05,
            ResponseCode::StreamNotAvailable => 0x06,
            ResponseCode::SaslMechanismNotSupported => 0x07,
            ResponseCode::AuthenticationFailure => 0x08,
            ResponseCode::SaslError => 0x09,
            ResponseCode::SaslChallenge => 0x0a,
            ResponseCode::SaslAuthenticationFailureLoopback => 0x0b,
            ResponseCode::VirtualHostAccessFailure => 0x0c,
            ResponseCode::UnknownFrame => 0x0d,
            ResponseCode::FrameTooLarge => 0x0e,
            ResponseCode::InternalError => 0x0f,
            ResponseCode::AccessRefused => 0x10,
            ResponseCode::PreconditionFailed => 0x11,
            ResponseCode::PublisherDoesNotExist => 0x12,
            ResponseCode::NoOffset => 0x13,
            ResponseCode::Unknown(code) => *code,
        }
    }
}

impl From<u16> for ResponseCode {
    fn from(code: u16) -> Self {
        match code {
            0x01 => ResponseCode::Ok,
            0x02 => ResponseCode::StreamDoesNotExist,
            0x03 => ResponseCode::SubscriptionIdAlreadyExists,
            0x04 => ResponseCode::SubscriptionIdDoesNotExist,
            0x05 => ResponseCode::StreamAlreadyExists,
            0x06 => ResponseCode::StreamNotAvailable,
            0x07 => ResponseCode::SaslMechanismNotSupported,
            0x08 => ResponseCode::AuthenticationFailure,
            0x09 => ResponseCode::SaslError,
            0x0a => ResponseCode::SaslChallenge,
            0x0b => ResponseCode::SaslAuthenticationFailureLoopback,
            0x0c => ResponseCode::VirtualHostAccessFailure,
            0x0d => ResponseCode::UnknownFrame,
            0x0e => ResponseCode::FrameTooLarge,
            0x0f => ResponseCode::InternalError,
            0x10 => ResponseCode::AccessRefused,
            0x11 => ResponseCode::PreconditionFailed,
            0x12 => ResponseCode::PublisherDoesNotExist,
            0x13 => ResponseCode::NoOffset,
            other => ResponseCode::Unknown(other),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResponseCode::Ok => "ok",
            ResponseCode::StreamDoesNotExist => "stream does not exist",
            ResponseCode::SubscriptionIdAlreadyExists => "subscription id already exists",
            ResponseCode::SubscriptionIdDoesNotExist => "subscription id does not exist",
            ResponseCode::StreamAlreadyExists => "stream already exists",
            ResponseCode::StreamNotAvailable => "stream not available",
            ResponseCode::SaslMechanismNotSupported => "SASL mechanism not supported",
            ResponseCode::AuthenticationFailure => "authentication failure",
            ResponseCode::SaslError => "SASL error",
            ResponseCode::SaslChallenge => "SASL challenge",
            ResponseCode::SaslAuthenticationFailureLoopback => {
                "SASL authentication failure (loopback)"
            }
            ResponseCode::VirtualHostAccessFailure => "virtual host access failure",
            ResponseCode::UnknownFrame => "unknown frame",
            ResponseCode::FrameTooLarge => "frame too large",
            ResponseCode::InternalError => "internal error",
            ResponseCode::AccessRefused => "access refused",
            ResponseCode::PreconditionFailed => "precondition failed",
            ResponseCode::PublisherDoesNotExist => "publisher does not exist",
            ResponseCode::NoOffset => "no offset",
            ResponseCode::Unknown(code) => return write!(f, "unknown code 0x{:04x}", code),
        };
        write!(f, "{} (0x{:02x})", text, self.code())
    }
}
