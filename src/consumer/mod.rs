//! Consumer - one subscription delivering messages to an async handler.
//!
//! Each consumer owns a delivery task. The task decodes every chunk the
//! broker pushes, calls the handler once per message in stream order, and
//! grants one credit after each chunk so the broker keeps sending.
//!
//! # Example
//!
//! ```ignore
//! use streamwire_client::{ConsumerOptions, FnHandler, OffsetSpecification};
//!
//! let consumer = environment
//!     .subscribe(
//!         "orders",
//!         OffsetSpecification::First,
//!         ConsumerOptions::new().name("billing"),
//!         FnHandler::new(|ctx, message| async move {
//!             println!("{}: {:?}", ctx.offset(), message.body());
//!             ctx.store_offset().await
//!         }),
//!     )
//!     .await?;
//!
//! let mut closed = consumer.notify_close()?;
//! if let Some(event) = closed.recv().await {
//!     println!("consumer stopped: {}", event.reason);
//! }
//! ```

mod context;
mod handler;

pub use context::MessageContext;
pub use handler::{BoxFuture, FnHandler, HandlerResult, MessageHandler};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use self::context::SubscriptionInfo;
use crate::codec::AmqpCodec;
use crate::config::ConsumerOptions;
use crate::connection::router::SubscriptionEvent;
use crate::connection::Connection;
use crate::error::Result;
use crate::events::{close_channel, CloseNotifier, CloseStream, EventSlot};
use crate::protocol::{encode_credit, Chunk, Request};
use crate::types::{CloseReason, ConsumerClosedEvent, OffsetSpecification};

struct ConsumerInner {
    info: Arc<SubscriptionInfo>,
    offset: OffsetSpecification,
    closed: AtomicBool,
    notifier: CloseNotifier,
    close_slot: EventSlot<CloseStream>,
}

/// Handle to a running subscription.
///
/// Cheap to clone; clones share the subscription.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("subscription_id", &self.inner.info.subscription_id)
            .field("stream", &self.inner.info.stream)
            .field("name", &self.inner.info.name)
            .field("offset", &self.inner.offset)
            .finish()
    }
}

impl Consumer {
    /// Subscribe to `stream` from `offset` and start delivering to `handler`.
    ///
    /// On failure the subscription id is released before returning.
    pub async fn subscribe<H: MessageHandler>(
        connection: &Connection,
        stream: &str,
        offset: OffsetSpecification,
        options: ConsumerOptions,
        handler: H,
    ) -> Result<Self> {
        options.validate()?;
        connection.ensure_open()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription_id = connection.router().register_subscription(stream, tx)?;

        let mut properties = HashMap::new();
        if let Some(name) = &options.name {
            properties.insert("name".to_string(), name.clone());
        }
        let request = Request::Subscribe {
            subscription_id,
            stream: stream.to_string(),
            offset,
            credit: options.initial_credit,
            properties,
        };
        if let Err(e) = connection.call(request, stream).await {
            connection
                .router()
                .close_subscription(subscription_id, CloseReason::Unsubscribed);
            debug!(subscription_id, stream, error = %e, "subscribe refused");
            return Err(e);
        }

        let (notifier, close_slot) = close_channel();
        let inner = Arc::new(ConsumerInner {
            info: Arc::new(SubscriptionInfo {
                connection: connection.clone(),
                name: options.name,
                stream: stream.to_string(),
                subscription_id,
            }),
            offset,
            closed: AtomicBool::new(false),
            notifier,
            close_slot,
        });

        tokio::spawn(delivery_loop(inner.clone(), rx, Arc::new(handler)));

        info!(
            connection = connection.id(),
            subscription_id,
            stream,
            offset = %offset,
            "consumer subscribed"
        );
        Ok(Self { inner })
    }

    #[inline]
    pub fn subscription_id(&self) -> u8 {
        self.inner.info.subscription_id
    }

    pub fn stream(&self) -> &str {
        &self.inner.info.stream
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.info.name.as_deref()
    }

    pub fn offset_specification(&self) -> OffsetSpecification {
        self.inner.offset
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Take the close stream. Only the first call succeeds.
    ///
    /// The close event is buffered, so taking the stream after the consumer
    /// stopped still yields it.
    pub fn notify_close(&self) -> Result<CloseStream> {
        self.inner.close_slot.take()
    }

    /// Store `offset` under the consumer name.
    pub async fn store_offset(&self, offset: u64) -> Result<()> {
        context::store_offset(&self.inner.info, offset).await
    }

    /// Unsubscribe.
    ///
    /// Idempotent. Sends at most one `Unsubscribe`, bounded by the close
    /// grace period, and emits [`CloseReason::Unsubscribed`] on the close
    /// stream. Does not wait for a handler that is still running, but no
    /// further message is handed to the handler once this is called.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let info = &inner.info;
        let connection = &info.connection;
        if connection.is_open() && connection.router().has_subscription(info.subscription_id) {
            let request = Request::Unsubscribe {
                subscription_id: info.subscription_id,
            };
            match connection
                .round_trip(request, connection.config().close_grace)
                .await
            {
                Ok(resp) if !resp.code.is_ok() => {
                    debug!(subscription_id = info.subscription_id, code = %resp.code, "unsubscribe refused");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(subscription_id = info.subscription_id, error = %e, "unsubscribe not acknowledged");
                }
            }
        }

        connection
            .router()
            .close_subscription(info.subscription_id, CloseReason::Unsubscribed);
        info!(subscription_id = info.subscription_id, stream = %info.stream, "consumer closed");
        Ok(())
    }
}

impl ConsumerInner {
    fn notify(&self, reason: CloseReason) {
        self.closed.store(true, Ordering::Release);
        self.notifier.notify(ConsumerClosedEvent {
            consumer_name: self.info.name.clone().unwrap_or_default(),
            stream: self.info.stream.clone(),
            reason,
        });
    }

    /// Lowest offset the caller asked for; earlier records are skipped.
    fn start_offset(&self) -> Option<u64> {
        match self.offset {
            OffsetSpecification::Offset(n) => Some(n),
            _ => None,
        }
    }
}

async fn delivery_loop(
    inner: Arc<ConsumerInner>,
    mut rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
    handler: Arc<dyn MessageHandler>,
) {
    let subscription_id = inner.info.subscription_id;
    while let Some(event) = rx.recv().await {
        match event {
            SubscriptionEvent::Chunk(raw) => {
                if inner.closed.load(Ordering::Acquire) {
                    trace!(subscription_id, "discarding chunk queued before close");
                    continue;
                }
                deliver_chunk(&inner, handler.as_ref(), raw).await;
                if inner.closed.load(Ordering::Acquire) {
                    continue;
                }
                let credit = encode_credit(subscription_id, 1);
                if let Err(e) = inner.info.connection.send_frame(credit).await {
                    debug!(subscription_id, error = %e, "credit not sent");
                }
            }
            SubscriptionEvent::Closed(reason) => {
                if !matches!(reason, CloseReason::Unsubscribed) {
                    warn!(subscription_id, stream = %inner.info.stream, reason = %reason, "consumer closed by connection");
                }
                inner.notify(reason);
                break;
            }
        }
    }
}

async fn deliver_chunk(inner: &Arc<ConsumerInner>, handler: &dyn MessageHandler, raw: Bytes) {
    let subscription_id = inner.info.subscription_id;
    let chunk = match Chunk::decode(raw) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(subscription_id, error = %e, "dropping undecodable chunk");
            return;
        }
    };
    trace!(
        subscription_id,
        first_offset = chunk.header.first_offset,
        records = chunk.records.len(),
        "chunk"
    );

    let start = inner.start_offset();
    let timestamp = chunk.header.timestamp;
    for record in chunk.records {
        if inner.closed.load(Ordering::Acquire) {
            return;
        }
        if start.is_some_and(|start| record.offset < start) {
            continue;
        }
        let ctx = MessageContext::new(inner.info.clone(), record.offset, timestamp);
        let message = AmqpCodec::decode(record.data);
        if let Err(e) = handler.handle(ctx, message).await {
            warn!(subscription_id, offset = record.offset, error = %e, "handler failed");
        }
    }
}
