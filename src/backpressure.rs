//! Unconfirmed-message backlog control for producers.
//!
//! Every published message holds one slot from the moment its publishing
//! id is assigned until the broker confirms or rejects it (or the producer
//! closes). When all slots are taken, publishing waits for confirmations
//! to free some, up to a timeout.
//!
//! # Configuration
//!
//! - `max_pending`: Maximum unconfirmed messages (default: 10 000)
//! - Timeout: How long to wait for free slots (default: 5s)

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Result, StreamError};

/// Default maximum unconfirmed messages per producer.
pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// Default backlog timeout (how long to wait for free slots).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Shared {
    pending: AtomicUsize,
    closed: AtomicBool,
    released: Notify,
}

/// Backlog controller shared between a producer and its confirmation task.
///
/// Cloning shares the counter.
#[derive(Debug, Clone)]
pub struct BackpressureController {
    shared: Arc<Shared>,
    max_pending: usize,
    timeout: Duration,
}

impl BackpressureController {
    pub fn with_timeout(max_pending: usize, timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                released: Notify::new(),
            }),
            max_pending,
            timeout,
        }
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Try to reserve `count` slots without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` if they are not all free.
    pub fn try_reserve(&self, count: usize) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(StreamError::ProducerClosed);
        }
        self.shared
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.checked_add(count)?;
                (next <= self.max_pending).then_some(next)
            })
            .map(|_| ())
            .map_err(|_| StreamError::BackpressureTimeout)
    }

    /// Reserve `count` slots, waiting for confirmations if necessary.
    ///
    /// Returns `Err(BackpressureTimeout)` once the timeout elapses and
    /// `Err(ProducerClosed)` if the controller is closed while waiting.
    pub async fn reserve(&self, count: usize) -> Result<()> {
        if count > self.max_pending {
            return Err(StreamError::BackpressureTimeout);
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            // Register before checking so a release in between is not missed.
            let released = self.shared.released.notified();

            match self.try_reserve(count) {
                Ok(()) => return Ok(()),
                Err(StreamError::BackpressureTimeout) => {}
                Err(e) => return Err(e),
            }

            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return Err(StreamError::BackpressureTimeout);
            }
        }
    }

    /// Release `count` slots after confirmation.
    pub fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let _ = self
            .shared
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(count))
            });
        self.shared.released.notify_waiters();
    }

    /// Reject further reservations and wake every waiter.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.released.notify_waiters();
    }
}
