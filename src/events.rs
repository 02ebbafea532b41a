//! Single-consumer event streams.
//!
//! Producers publish confirmation groups and consumers publish their close
//! event through these streams. Each stream can be taken exactly once; a
//! second take fails with [`StreamError::EventStreamTaken`].
//!
//! - [`ConfirmationStream`] - groups of confirmations in broker order.
//!   Groups produced before the stream is taken are discarded.
//! - [`CloseStream`] - at most one close event, buffered until taken.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Result, StreamError};
use crate::types::{Confirmation, ConsumerClosedEvent};

/// Holder for a receiver that may be taken once.
pub(crate) struct EventSlot<S> {
    stream: Mutex<Option<S>>,
}

impl<S> EventSlot<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
        }
    }

    pub(crate) fn take(&self) -> Result<S> {
        self.stream.lock().take().ok_or(StreamError::EventStreamTaken)
    }
}

/// Stream of confirmation groups for one producer.
///
/// Ends once the producer is closed and every group has been read.
#[derive(Debug)]
pub struct ConfirmationStream {
    rx: mpsc::UnboundedReceiver<Vec<Confirmation>>,
}

impl ConfirmationStream {
    /// Wait for the next group.
    pub async fn recv(&mut self) -> Option<Vec<Confirmation>> {
        self.rx.recv().await
    }
}

impl Stream for ConfirmationStream {
    type Item = Vec<Confirmation>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Sending side of a producer's confirmation stream.
pub(crate) struct ConfirmationSink {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<Confirmation>>>>,
    taken: Arc<AtomicBool>,
}

impl ConfirmationSink {
    /// Emit a group. Dropped if nobody has taken the stream yet.
    pub(crate) fn emit(&self, group: Vec<Confirmation>) {
        if group.is_empty() || !self.taken.load(Ordering::Acquire) {
            return;
        }
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(group);
        }
    }

    /// End the stream once buffered groups are read.
    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }
}

/// Take-once slot for a confirmation stream.
pub(crate) struct ConfirmationSlot {
    slot: EventSlot<ConfirmationStream>,
    taken: Arc<AtomicBool>,
}

impl ConfirmationSlot {
    pub(crate) fn take(&self) -> Result<ConfirmationStream> {
        let stream = self.slot.take()?;
        self.taken.store(true, Ordering::Release);
        Ok(stream)
    }
}

pub(crate) fn confirmation_channel() -> (ConfirmationSink, ConfirmationSlot) {
    let (tx, rx) = mpsc::unbounded_channel();
    let taken = Arc::new(AtomicBool::new(false));
    (
        ConfirmationSink {
            tx: Mutex::new(Some(tx)),
            taken: taken.clone(),
        },
        ConfirmationSlot {
            slot: EventSlot::new(ConfirmationStream { rx }),
            taken,
        },
    )
}

/// Stream yielding at most one consumer close event.
#[derive(Debug)]
pub struct CloseStream {
    rx: mpsc::Receiver<ConsumerClosedEvent>,
}

impl CloseStream {
    /// Wait for the close event. `None` if the consumer went away without one.
    pub async fn recv(&mut self) -> Option<ConsumerClosedEvent> {
        self.rx.recv().await
    }
}

impl Stream for CloseStream {
    type Item = ConsumerClosedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Sending side of a consumer's close stream; fires once.
pub(crate) struct CloseNotifier {
    tx: Mutex<Option<mpsc::Sender<ConsumerClosedEvent>>>,
}

impl CloseNotifier {
    /// Deliver the event. Returns `false` if one was already delivered.
    pub(crate) fn notify(&self, event: ConsumerClosedEvent) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                let _ = tx.try_send(event);
                true
            }
            None => false,
        }
    }
}

pub(crate) fn close_channel() -> (CloseNotifier, EventSlot<CloseStream>) {
    let (tx, rx) = mpsc::channel(1);
    (
        CloseNotifier {
            tx: Mutex::new(Some(tx)),
        },
        EventSlot::new(CloseStream { rx }),
    )
}
