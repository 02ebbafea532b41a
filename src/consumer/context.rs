//! Per-message context handed to consumer handlers.

use std::sync::Arc;

use crate::connection::Connection;
use crate::error::{Result, StreamError};
use crate::protocol::encode_store_offset;

/// Subscription facts shared by every context of one consumer.
#[derive(Debug)]
pub(crate) struct SubscriptionInfo {
    pub(crate) connection: Connection,
    pub(crate) name: Option<String>,
    pub(crate) stream: String,
    pub(crate) subscription_id: u8,
}

/// Where a message came from.
///
/// Cheap to clone. Handlers that track their position call
/// [`store_offset`](Self::store_offset) on the messages they have processed.
#[derive(Debug, Clone)]
pub struct MessageContext {
    info: Arc<SubscriptionInfo>,
    offset: u64,
    chunk_timestamp: i64,
}

impl MessageContext {
    pub(crate) fn new(info: Arc<SubscriptionInfo>, offset: u64, chunk_timestamp: i64) -> Self {
        Self {
            info,
            offset,
            chunk_timestamp,
        }
    }

    /// Consumer name, if the consumer has one.
    pub fn consumer_name(&self) -> Option<&str> {
        self.info.name.as_deref()
    }

    pub fn stream(&self) -> &str {
        &self.info.stream
    }

    #[inline]
    pub fn subscription_id(&self) -> u8 {
        self.info.subscription_id
    }

    /// Absolute offset of this message in the stream.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Timestamp of the enclosing chunk, milliseconds since the Unix epoch.
    #[inline]
    pub fn chunk_timestamp(&self) -> i64 {
        self.chunk_timestamp
    }

    /// Store this message's offset under the consumer name.
    pub async fn store_offset(&self) -> Result<()> {
        store_offset(&self.info, self.offset).await
    }
}

pub(crate) async fn store_offset(info: &SubscriptionInfo, offset: u64) -> Result<()> {
    let name = info.name.as_deref().ok_or(StreamError::MissingConsumerName)?;
    let frame = encode_store_offset(name, &info.stream, offset)?;
    info.connection.send_frame(frame).await
}
