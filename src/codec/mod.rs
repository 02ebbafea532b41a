//! Codec module - message body encoding.
//!
//! Messages travel as an AMQP 1.0 subset: an optional
//! application-properties section followed by a single data section.
//!
//! - [`Message`] - opaque body plus string properties
//! - [`AmqpCodec`] - encodes messages and decodes delivered records
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects.
//! Decoding never fails: a record that is not in the expected layout is
//! handed out whole as the message body.
//!
//! # Example
//!
//! ```
//! use streamwire_client::codec::{AmqpCodec, Message};
//!
//! let message = Message::new("hello").with_property("k", "v");
//! let encoded = AmqpCodec::encode(&message).unwrap();
//! let decoded = AmqpCodec::decode(encoded);
//! assert_eq!(decoded, message);
//! ```

mod amqp;
mod message;

pub use amqp::AmqpCodec;
pub use message::Message;
