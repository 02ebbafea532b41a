//! Routing tables for inbound frames.
//!
//! The router maps:
//! - correlation ids to the oneshot waiting for that response
//! - publisher ids to the producer's event channel
//! - subscription ids to the consumer's event channel
//!
//! Publisher and subscription ids are `u8`s allocated lowest-free-first.
//! The tables only hold channel senders; producers and consumers own
//! their own lifecycle.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, StreamError};
use crate::protocol::{Response, ResponseCode};
use crate::types::{CloseReason, PublishingId};

/// Event routed to a producer's confirmation task.
#[derive(Debug)]
pub(crate) enum PublisherEvent {
    Confirmed(Vec<PublishingId>),
    Failed(Vec<(PublishingId, ResponseCode)>),
    Closed(CloseReason),
}

/// Event routed to a consumer's delivery task.
#[derive(Debug)]
pub(crate) enum SubscriptionEvent {
    Chunk(Bytes),
    Closed(CloseReason),
}

type Waiter = oneshot::Sender<Result<Response>>;

struct Route<T> {
    stream: String,
    tx: mpsc::UnboundedSender<T>,
}

struct RouteTable<T> {
    routes: HashMap<u8, Route<T>>,
}

impl<T> RouteTable<T> {
    fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    fn allocate(&mut self, stream: &str, tx: mpsc::UnboundedSender<T>) -> Option<u8> {
        let id = (0..=u8::MAX).find(|id| !self.routes.contains_key(id))?;
        self.routes.insert(
            id,
            Route {
                stream: stream.to_string(),
                tx,
            },
        );
        Some(id)
    }

    /// Deliver to a route; a closed receiver counts as delivered.
    fn send(&self, id: u8, event: T) -> bool {
        match self.routes.get(&id) {
            Some(route) => {
                let _ = route.tx.send(event);
                true
            }
            None => false,
        }
    }

    fn close(&mut self, id: u8, event: T) -> bool {
        match self.routes.remove(&id) {
            Some(route) => {
                let _ = route.tx.send(event);
                true
            }
            None => false,
        }
    }

    fn close_stream(&mut self, stream: &str, make: impl Fn() -> T) -> Vec<u8> {
        let ids: Vec<u8> = self
            .routes
            .iter()
            .filter(|(_, r)| r.stream == stream)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(route) = self.routes.remove(id) {
                let _ = route.tx.send(make());
            }
        }
        ids
    }

    fn close_all(&mut self, make: impl Fn() -> T) {
        for (_, route) in self.routes.drain() {
            let _ = route.tx.send(make());
        }
    }
}

/// Routing state shared by the read loop and the callers.
pub(crate) struct Router {
    pending: Mutex<HashMap<u32, Waiter>>,
    publishers: Mutex<RouteTable<PublisherEvent>>,
    subscriptions: Mutex<RouteTable<SubscriptionEvent>>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            publishers: Mutex::new(RouteTable::new()),
            subscriptions: Mutex::new(RouteTable::new()),
        }
    }

    /// Register a waiter for `correlation_id`.
    pub(crate) fn register_pending(
        &self,
        correlation_id: u32,
    ) -> Result<oneshot::Receiver<Result<Response>>> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&correlation_id) {
            return Err(StreamError::CorrelationInUse(correlation_id));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(correlation_id, tx);
        Ok(rx)
    }

    /// Drop the waiter for `correlation_id`, if still registered.
    pub(crate) fn cancel_pending(&self, correlation_id: u32) {
        self.pending.lock().remove(&correlation_id);
    }

    /// Hand a response to its waiter. Returns `false` if nobody waits.
    pub(crate) fn complete(&self, response: Response) -> bool {
        let waiter = self.pending.lock().remove(&response.correlation_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Fail the waiter for `correlation_id` with `error`. Returns `false`
    /// if nobody waits.
    pub(crate) fn fail(&self, correlation_id: u32, error: StreamError) -> bool {
        match self.pending.lock().remove(&correlation_id) {
            Some(tx) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn register_publisher(
        &self,
        stream: &str,
        tx: mpsc::UnboundedSender<PublisherEvent>,
    ) -> Result<u8> {
        self.publishers
            .lock()
            .allocate(stream, tx)
            .ok_or(StreamError::TooManyPublishers)
    }

    pub(crate) fn has_publisher(&self, publisher_id: u8) -> bool {
        self.publishers.lock().routes.contains_key(&publisher_id)
    }

    pub(crate) fn route_publisher(&self, publisher_id: u8, event: PublisherEvent) -> bool {
        self.publishers.lock().send(publisher_id, event)
    }

    /// Remove a publisher route, handing it a final close event.
    pub(crate) fn close_publisher(&self, publisher_id: u8, reason: CloseReason) -> bool {
        self.publishers
            .lock()
            .close(publisher_id, PublisherEvent::Closed(reason))
    }

    pub(crate) fn register_subscription(
        &self,
        stream: &str,
        tx: mpsc::UnboundedSender<SubscriptionEvent>,
    ) -> Result<u8> {
        self.subscriptions
            .lock()
            .allocate(stream, tx)
            .ok_or(StreamError::TooManySubscriptions)
    }

    pub(crate) fn has_subscription(&self, subscription_id: u8) -> bool {
        self.subscriptions
            .lock()
            .routes
            .contains_key(&subscription_id)
    }

    pub(crate) fn route_subscription(&self, subscription_id: u8, event: SubscriptionEvent) -> bool {
        self.subscriptions.lock().send(subscription_id, event)
    }

    /// Remove a subscription route, handing it a final close event.
    pub(crate) fn close_subscription(&self, subscription_id: u8, reason: CloseReason) -> bool {
        self.subscriptions
            .lock()
            .close(subscription_id, SubscriptionEvent::Closed(reason))
    }

    /// Close every route bound to `stream`. Returns how many were closed.
    pub(crate) fn close_stream(&self, stream: &str, code: ResponseCode) -> usize {
        let reason = CloseReason::StreamUnavailable(code);
        let publishers = self
            .publishers
            .lock()
            .close_stream(stream, || PublisherEvent::Closed(reason.clone()));
        let subscriptions = self
            .subscriptions
            .lock()
            .close_stream(stream, || SubscriptionEvent::Closed(reason.clone()));
        publishers.len() + subscriptions.len()
    }

    /// Fail every waiter and close every route.
    pub(crate) fn teardown(&self, reason: &CloseReason) {
        let waiters: Vec<Waiter> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        for tx in waiters {
            let _ = tx.send(Err(StreamError::ConnectionClosed));
        }
        self.publishers
            .lock()
            .close_all(|| PublisherEvent::Closed(reason.clone()));
        self.subscriptions
            .lock()
            .close_all(|| SubscriptionEvent::Closed(reason.clone()));
    }
}
