//! Producer - batched publishing with confirmation tracking.
//!
//! A producer is bound to one stream through a publisher id on one
//! connection. Publishing assigns consecutive publishing ids, packs
//! messages into publish frames and returns without waiting for the
//! broker. A confirmation task reconciles confirm and error frames against
//! the pending ids and reports groups on the [`ConfirmationStream`].
//!
//! # Example
//!
//! ```ignore
//! use streamwire_client::{Message, ProducerOptions};
//!
//! let producer = environment.create_producer("orders", ProducerOptions::default()).await?;
//! let mut confirmations = producer.confirmations()?;
//!
//! producer.batch_publish(vec![Message::new("a"), Message::new("b")]).await?;
//! while let Some(group) = confirmations.recv().await {
//!     for c in group {
//!         println!("{} -> {:?}", c.publishing_id, c.status);
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backpressure::BackpressureController;
use crate::codec::{AmqpCodec, Message};
use crate::config::ProducerOptions;
use crate::connection::router::PublisherEvent;
use crate::connection::Connection;
use crate::error::{Result, StreamError};
use crate::events::{confirmation_channel, ConfirmationSink, ConfirmationSlot, ConfirmationStream};
use crate::protocol::{
    encode_publish, Request, ResponseBody, PUBLISH_ENTRY_OVERHEAD, PUBLISH_FRAME_OVERHEAD,
};
use crate::types::{
    CloseReason, Confirmation, ConfirmationStatus, FailureReason, PublishingId,
};

struct ProducerInner {
    connection: Connection,
    publisher_id: u8,
    stream: String,
    name: Option<String>,
    options: ProducerOptions,
    /// Next publishing id; held while ids are assigned and frames sent.
    next_id: tokio::sync::Mutex<PublishingId>,
    pending: Mutex<HashMap<PublishingId, Message>>,
    backlog: BackpressureController,
    closed: AtomicBool,
    sink: ConfirmationSink,
    slot: ConfirmationSlot,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Publishing handle bound to one stream.
///
/// Cheap to clone; clones share the publisher.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("publisher_id", &self.inner.publisher_id)
            .field("stream", &self.inner.stream)
            .field("name", &self.inner.name)
            .field("unconfirmed", &self.inner.backlog.pending_count())
            .finish()
    }
}

impl Producer {
    /// Declare a publisher on `stream` and start its confirmation task.
    pub async fn create(
        connection: &Connection,
        stream: &str,
        options: ProducerOptions,
    ) -> Result<Self> {
        options.validate()?;
        connection.ensure_open()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let publisher_id = connection.router().register_publisher(stream, tx)?;

        let declared = Self::declare(connection, publisher_id, stream, &options).await;
        let last_sequence = match declared {
            Ok(seq) => seq,
            Err(e) => {
                connection
                    .router()
                    .close_publisher(publisher_id, CloseReason::Unsubscribed);
                return Err(e);
            }
        };

        let (sink, slot) = confirmation_channel();
        let inner = Arc::new(ProducerInner {
            connection: connection.clone(),
            publisher_id,
            stream: stream.to_string(),
            name: options.name.clone(),
            next_id: tokio::sync::Mutex::new(last_sequence + 1),
            pending: Mutex::new(HashMap::new()),
            backlog: BackpressureController::with_timeout(
                options.max_unconfirmed,
                options.backlog_timeout,
            ),
            options,
            closed: AtomicBool::new(false),
            sink,
            slot,
            task: Mutex::new(None),
        });

        let task = tokio::spawn(confirmation_loop(inner.clone(), rx));
        *inner.task.lock() = Some(task);

        info!(
            connection = connection.id(),
            publisher_id,
            stream,
            next_publishing_id = last_sequence + 1,
            "producer created"
        );
        Ok(Self { inner })
    }

    async fn declare(
        connection: &Connection,
        publisher_id: u8,
        stream: &str,
        options: &ProducerOptions,
    ) -> Result<PublishingId> {
        connection
            .call(
                Request::DeclarePublisher {
                    publisher_id,
                    reference: options.name.clone().unwrap_or_default(),
                    stream: stream.to_string(),
                },
                stream,
            )
            .await?;

        let name = match &options.name {
            Some(name) => name,
            None => return Ok(0),
        };
        let queried = connection
            .call(
                Request::QueryPublisherSequence {
                    reference: name.clone(),
                    stream: stream.to_string(),
                },
                stream,
            )
            .await
            .and_then(|body| match body {
                ResponseBody::Sequence(seq) => Ok(seq),
                other => Err(StreamError::MalformedFrame(format!(
                    "unexpected sequence body: {:?}",
                    other
                ))),
            });

        if let Err(e) = &queried {
            debug!(publisher_id, stream, error = %e, "sequence query failed, deleting publisher");
            let request = Request::DeletePublisher { publisher_id };
            if let Err(e) = connection
                .round_trip(request, connection.config().close_grace)
                .await
            {
                debug!(publisher_id, error = %e, "delete publisher not acknowledged");
            }
        }
        queried
    }

    #[inline]
    pub fn publisher_id(&self) -> u8 {
        self.inner.publisher_id
    }

    pub fn stream(&self) -> &str {
        &self.inner.stream
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Messages published but not yet confirmed or failed.
    pub fn unconfirmed(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Take the confirmation stream. Only the first call succeeds.
    pub fn confirmations(&self) -> Result<ConfirmationStream> {
        self.inner.slot.take()
    }

    /// Drive the confirmation stream with a callback on a spawned task.
    pub fn on_confirmation<F>(&self, mut handler: F) -> Result<JoinHandle<()>>
    where
        F: FnMut(Vec<Confirmation>) + Send + 'static,
    {
        let mut stream = self.confirmations()?;
        Ok(tokio::spawn(async move {
            while let Some(group) = stream.recv().await {
                handler(group);
            }
        }))
    }

    /// Publish one message.
    pub async fn send(&self, message: Message) -> Result<PublishingId> {
        let mut seq = self.inner.next_id.lock().await;
        let first = *seq;
        self.publish_locked(&mut seq, vec![message]).await?;
        Ok(first)
    }

    /// Publish a batch of messages and return how many were accepted.
    ///
    /// Publishing ids are assigned in order. The batch is split into as
    /// many frames as the negotiated frame size and `batch_size` require;
    /// this does not wait for confirmation. If the backlog stays full past
    /// `backlog_timeout`, the frames already sent stay published and the
    /// call fails with [`StreamError::BackpressureTimeout`].
    pub async fn batch_publish(&self, messages: Vec<Message>) -> Result<usize> {
        let mut seq = self.inner.next_id.lock().await;
        self.publish_locked(&mut seq, messages).await
    }

    async fn publish_locked(
        &self,
        seq: &mut PublishingId,
        messages: Vec<Message>,
    ) -> Result<usize> {
        let inner = &self.inner;
        if self.is_closed() {
            return Err(StreamError::ProducerClosed);
        }
        inner.connection.ensure_open()?;
        if messages.is_empty() {
            return Ok(0);
        }

        // Zero means the broker set no limit.
        let frame_max = match inner.connection.frame_max() {
            0 => usize::MAX,
            n => n as usize,
        };
        let budget = frame_max.saturating_sub(PUBLISH_FRAME_OVERHEAD + PUBLISH_ENTRY_OVERHEAD);

        let mut encoded = Vec::with_capacity(messages.len());
        for message in messages {
            let bytes = AmqpCodec::encode(&message)?;
            if bytes.len() > budget {
                return Err(StreamError::MessageTooLarge {
                    size: bytes.len(),
                    max: budget,
                });
            }
            encoded.push((message, bytes));
        }

        let mut accepted = 0;
        let mut queue = encoded.into_iter().peekable();
        while queue.peek().is_some() {
            let mut batch: Vec<(Message, Bytes)> = Vec::new();
            let mut size = PUBLISH_FRAME_OVERHEAD;
            while let Some((_, bytes)) = queue.peek() {
                let entry = PUBLISH_ENTRY_OVERHEAD + bytes.len();
                if batch.len() == inner.options.batch_size || size.saturating_add(entry) > frame_max {
                    break;
                }
                size += entry;
                if let Some(item) = queue.next() {
                    batch.push(item);
                }
            }

            let count = batch.len();
            inner.backlog.reserve(count).await?;

            let mut entries = Vec::with_capacity(count);
            let mut ids = Vec::with_capacity(count);
            {
                let mut pending = inner.pending.lock();
                for (message, bytes) in batch {
                    let id = *seq;
                    *seq += 1;
                    pending.insert(id, message);
                    entries.push((id, bytes));
                    ids.push(id);
                }
            }

            let sent = match encode_publish(inner.publisher_id, &entries) {
                Ok(frame) => inner.connection.send_frame(frame).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                warn!(
                    publisher_id = inner.publisher_id,
                    count,
                    error = %e,
                    "publish frame not sent"
                );
                let reason = if self.is_closed() {
                    FailureReason::ProducerClosed
                } else {
                    FailureReason::ConnectionClosed
                };
                inner.resolve(&ids, |_| ConfirmationStatus::Failed(reason));
                return Err(e);
            }
            accepted += count;
        }

        Ok(accepted)
    }

    /// Close the producer.
    ///
    /// Idempotent. Deletes the publisher on the broker within the close
    /// grace period; ids still pending resolve as failed.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        inner.backlog.close();

        let connection = &inner.connection;
        if connection.is_open() && connection.router().has_publisher(inner.publisher_id) {
            let request = Request::DeletePublisher {
                publisher_id: inner.publisher_id,
            };
            match connection
                .round_trip(request, connection.config().close_grace)
                .await
            {
                Ok(resp) if !resp.code.is_ok() => {
                    debug!(publisher_id = inner.publisher_id, code = %resp.code, "delete publisher refused");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(publisher_id = inner.publisher_id, error = %e, "delete publisher not acknowledged");
                }
            }
        }

        connection
            .router()
            .close_publisher(inner.publisher_id, CloseReason::Unsubscribed);
        // Pending ids are resolved by the time the confirmation task ends.
        let task = inner.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!(publisher_id = inner.publisher_id, stream = %inner.stream, "producer closed");
        Ok(())
    }
}

impl ProducerInner {
    /// Remove `ids` from the pending map and emit one group for those found.
    fn resolve(
        &self,
        ids: &[PublishingId],
        status: impl Fn(PublishingId) -> ConfirmationStatus,
    ) -> usize {
        let group: Vec<Confirmation> = {
            let mut pending = self.pending.lock();
            ids.iter()
                .filter_map(|id| {
                    pending.remove(id).map(|message| Confirmation {
                        publishing_id: *id,
                        status: status(*id),
                        message,
                    })
                })
                .collect()
        };
        let resolved = group.len();
        self.backlog.release(resolved);
        self.sink.emit(group);
        resolved
    }

    fn fail_all(&self, reason: FailureReason) {
        let mut ids: Vec<PublishingId> = self.pending.lock().keys().copied().collect();
        ids.sort_unstable();
        let failed = self.resolve(&ids, |_| ConfirmationStatus::Failed(reason));
        if failed > 0 {
            debug!(publisher_id = self.publisher_id, failed, reason = %reason, "pending ids failed");
        }
    }
}

async fn confirmation_loop(inner: Arc<ProducerInner>, mut rx: mpsc::UnboundedReceiver<PublisherEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PublisherEvent::Confirmed(ids) => {
                inner.resolve(&ids, |_| ConfirmationStatus::Confirmed);
            }
            PublisherEvent::Failed(errors) => {
                let codes: HashMap<PublishingId, _> = errors.iter().copied().collect();
                let ids: Vec<PublishingId> = errors.iter().map(|(id, _)| *id).collect();
                inner.resolve(&ids, |id| match codes.get(&id) {
                    Some(code) => ConfirmationStatus::Failed(FailureReason::Broker(*code)),
                    None => ConfirmationStatus::Failed(FailureReason::ConnectionClosed),
                });
            }
            PublisherEvent::Closed(reason) => {
                inner.closed.store(true, Ordering::Release);
                inner.backlog.close();
                let failure = match &reason {
                    CloseReason::Unsubscribed => FailureReason::ProducerClosed,
                    CloseReason::StreamUnavailable(code) => FailureReason::Broker(*code),
                    CloseReason::BrokerClosed { .. }
                    | CloseReason::ConnectionClosed
                    | CloseReason::HeartbeatTimeout => FailureReason::ConnectionClosed,
                };
                if !matches!(reason, CloseReason::Unsubscribed) {
                    warn!(publisher_id = inner.publisher_id, stream = %inner.stream, reason = %reason, "producer closed by connection");
                }
                inner.fail_all(failure);
                break;
            }
        }
    }
    inner.sink.close();
}
