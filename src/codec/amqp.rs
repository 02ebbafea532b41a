//! AMQP 1.0 message subset.
//!
//! Layout written by [`AmqpCodec::encode`]:
//!
//! ```text
//! [0x00 0x53 0x74 map32{ str32 => str32 }]   application properties, optional
//!  0x00 0x53 0x75 vbin32                      data
//! ```
//!
//! The decoder also accepts the 8-bit width variants (map8, str8, sym8,
//! vbin8) and symbol keys, which other clients emit for small values.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::Message;
use crate::error::{Result, StreamError};

const DESCRIBED: u8 = 0x00;
const SMALL_ULONG: u8 = 0x53;
const APPLICATION_PROPERTIES: u8 = 0x74;
const DATA: u8 = 0x75;

const VBIN8: u8 = 0xa0;
const STR8: u8 = 0xa1;
const SYM8: u8 = 0xa3;
const VBIN32: u8 = 0xb0;
const STR32: u8 = 0xb1;
const SYM32: u8 = 0xb3;
const MAP8: u8 = 0xc1;
const MAP32: u8 = 0xd1;

/// Marker codec for the message layout above.
pub struct AmqpCodec;

impl AmqpCodec {
    /// Encode a message.
    ///
    /// Fails only when a value does not fit a 32-bit length.
    pub fn encode(message: &Message) -> Result<Bytes> {
        let body = message.body();
        let props = message.application_properties();

        let props_len: usize = props
            .iter()
            .map(|(k, v)| 10 + k.len() + v.len())
            .sum::<usize>();
        let mut buf = BytesMut::with_capacity(3 + 9 + props_len + 3 + 5 + body.len());

        if !props.is_empty() {
            buf.put_slice(&[DESCRIBED, SMALL_ULONG, APPLICATION_PROPERTIES]);
            // map32 size counts the count field and the items.
            let size = u32_len(4 + props_len)?;
            let count = u32_len(props.len() * 2)?;
            buf.put_u8(MAP32);
            buf.put_u32(size);
            buf.put_u32(count);
            for (key, value) in props {
                put_str32(&mut buf, key)?;
                put_str32(&mut buf, value)?;
            }
        }

        buf.put_slice(&[DESCRIBED, SMALL_ULONG, DATA]);
        buf.put_u8(VBIN32);
        buf.put_u32(u32_len(body.len())?);
        buf.put_slice(body);

        Ok(buf.freeze())
    }

    /// Decode a delivered record.
    ///
    /// Records that do not follow the layout are returned whole as the body.
    pub fn decode(record: Bytes) -> Message {
        match Self::try_decode(record.clone()) {
            Some(message) => message,
            None => Message::new(record),
        }
    }

    fn try_decode(mut buf: Bytes) -> Option<Message> {
        let mut properties = HashMap::new();

        if section_is(&buf, APPLICATION_PROPERTIES) {
            buf.advance(3);
            properties = read_string_map(&mut buf)?;
        }

        if !section_is(&buf, DATA) {
            return None;
        }
        buf.advance(3);
        let body = match take_u8(&mut buf)? {
            VBIN8 => {
                let len = take_u8(&mut buf)? as usize;
                take_bytes(&mut buf, len)?
            }
            VBIN32 => {
                let len = take_u32(&mut buf)? as usize;
                take_bytes(&mut buf, len)?
            }
            _ => return None,
        };

        if !buf.is_empty() {
            return None;
        }
        Some(Message::new(body).with_properties(properties))
    }
}

fn u32_len(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| StreamError::MessageTooLarge {
            size: len,
            max: u32::MAX as usize,
        })
}

fn put_str32(buf: &mut BytesMut, s: &str) -> Result<()> {
    buf.put_u8(STR32);
    buf.put_u32(u32_len(s.len())?);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn section_is(buf: &Bytes, descriptor: u8) -> bool {
    buf.len() >= 3 && buf[0] == DESCRIBED && buf[1] == SMALL_ULONG && buf[2] == descriptor
}

fn take_u8(buf: &mut Bytes) -> Option<u8> {
    if buf.is_empty() {
        return None;
    }
    Some(buf.get_u8())
}

fn take_u32(buf: &mut Bytes) -> Option<u32> {
    if buf.len() < 4 {
        return None;
    }
    Some(buf.get_u32())
}

fn take_bytes(buf: &mut Bytes, len: usize) -> Option<Bytes> {
    if buf.len() < len {
        return None;
    }
    Some(buf.split_to(len))
}

fn read_string_map(buf: &mut Bytes) -> Option<HashMap<String, String>> {
    let count = match take_u8(buf)? {
        MAP8 => {
            take_u8(buf)?;
            take_u8(buf)? as usize
        }
        MAP32 => {
            take_u32(buf)?;
            take_u32(buf)? as usize
        }
        _ => return None,
    };
    if count % 2 != 0 {
        return None;
    }

    let mut map = HashMap::with_capacity((count / 2).min(buf.len() / 4));
    for _ in 0..count / 2 {
        let key = read_string(buf)?;
        let value = read_string(buf)?;
        map.insert(key, value);
    }
    Some(map)
}

fn read_string(buf: &mut Bytes) -> Option<String> {
    let len = match take_u8(buf)? {
        STR8 | SYM8 => take_u8(buf)? as usize,
        STR32 | SYM32 => take_u32(buf)? as usize,
        _ => return None,
    };
    let raw = take_bytes(buf, len)?;
    String::from_utf8(raw.to_vec()).ok()
}
