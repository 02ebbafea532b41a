//! Connection - one transport multiplexed between requests, producers and
//! consumers.
//!
//! A connection owns:
//! 1. A writer task fed by an mpsc channel (every outbound frame)
//! 2. A read loop decoding inbound frames and routing them
//! 3. An optional heartbeat task
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──► Open ──► Closing ──► Closed
//!      │                                 ▲
//!      └──────── handshake failure ──────┘
//! ```
//!
//! `Closed` is terminal. Teardown fails every pending request with
//! [`StreamError::ConnectionClosed`] and hands a close event to every
//! producer and consumer.
//!
//! # Example
//!
//! ```ignore
//! use streamwire_client::{ClientConfig, Connection};
//!
//! let connection = Connection::connect(ClientConfig::default()).await?;
//! assert!(connection.is_open());
//! connection.close().await?;
//! ```

mod handshake;
mod reader;
pub(crate) mod router;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{Result, StreamError};
use crate::protocol::{encode_heartbeat, keys, Request, Response, ResponseBody, ResponseCode};
use crate::transport::{connect_tcp, Transport};
use crate::types::CloseReason;
use crate::writer::{spawn_writer_task, WriterHandle};

use self::router::Router;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Values agreed with the broker during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub frame_max: u32,
    /// Heartbeat interval in seconds; zero disables heartbeats.
    pub heartbeat: u32,
}

pub(crate) struct Inner {
    id: u64,
    config: ClientConfig,
    writer: WriterHandle,
    state: watch::Sender<ConnectionState>,
    router: Router,
    next_correlation: AtomicU32,
    frame_max: AtomicU32,
    heartbeat: AtomicU32,
    last_received: Mutex<Instant>,
    server_properties: Mutex<HashMap<String, String>>,
    /// Taken by the read loop when the broker's tune arrives.
    tune_tx: Mutex<Option<oneshot::Sender<Tuning>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<Result<()>>>>,
}

/// Handle to a broker connection.
///
/// Cheap to clone; every clone drives the same transport.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Open a TCP connection to `config.address()` and run the handshake.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let stream = connect_tcp(&config.address(), config.connect_timeout).await?;
        Self::with_transport(stream, config).await
    }

    /// Run the handshake over an already-established transport.
    ///
    /// Use this for TLS: wrap the socket first, then hand it over.
    pub async fn with_transport<T: Transport>(transport: T, config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let (read_half, write_half) = tokio::io::split(transport);
        let (writer, writer_task) = spawn_writer_task(write_half, config.writer.clone());
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (tune_tx, tune_rx) = oneshot::channel();

        let inner = Arc::new(Inner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            frame_max: AtomicU32::new(config.max_frame_size),
            heartbeat: AtomicU32::new(0),
            config,
            writer,
            state,
            router: Router::new(),
            next_correlation: AtomicU32::new(1),
            last_received: Mutex::new(Instant::now()),
            server_properties: Mutex::new(HashMap::new()),
            tune_tx: Mutex::new(Some(tune_tx)),
            tasks: Mutex::new(Vec::new()),
            writer_task: Mutex::new(Some(writer_task)),
        });

        let read_task = tokio::spawn(reader::read_loop(read_half, inner.clone()));
        inner.tasks.lock().push(read_task);

        let connection = Self { inner };
        let connect_timeout = connection.inner.config.connect_timeout;

        let outcome =
            tokio::time::timeout(connect_timeout, handshake::run(&connection, tune_rx)).await;
        let tuning = match outcome {
            Ok(Ok(tuning)) => tuning,
            Ok(Err(e)) => {
                connection.inner.shutdown(CloseReason::ConnectionClosed);
                return Err(match e {
                    StreamError::HandshakeFailed(_) => e,
                    other => StreamError::HandshakeFailed(other.to_string()),
                });
            }
            Err(_) => {
                connection.inner.shutdown(CloseReason::ConnectionClosed);
                return Err(StreamError::HandshakeFailed(format!(
                    "handshake did not complete within {:?}",
                    connect_timeout
                )));
            }
        };

        if !connection
            .inner
            .transition(ConnectionState::Connecting, ConnectionState::Open)
        {
            return Err(StreamError::HandshakeFailed(
                "connection closed during handshake".into(),
            ));
        }
        connection.start_heartbeat(tuning.heartbeat);

        info!(
            connection = connection.inner.id,
            frame_max = tuning.frame_max,
            heartbeat = tuning.heartbeat,
            "connection open"
        );
        Ok(connection)
    }

    /// Connection id used in log fields.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Negotiated maximum frame size.
    pub fn frame_max(&self) -> u32 {
        self.inner.frame_max.load(Ordering::Acquire)
    }

    /// Negotiated heartbeat interval in seconds.
    pub fn heartbeat(&self) -> u32 {
        self.inner.heartbeat.load(Ordering::Acquire)
    }

    /// Properties the broker reported during the handshake.
    pub fn server_properties(&self) -> HashMap<String, String> {
        self.inner.server_properties.lock().clone()
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.router.pending_count()
    }

    /// Wait until the connection reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Send one complete frame and wait for it to be flushed.
    ///
    /// Fails with `ConnectionClosed` unless the connection is open.
    pub async fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.inner.write(frame).await
    }

    /// Send a request and wait for its response.
    ///
    /// The waiter is registered before the frame is written. Broker error
    /// codes are returned in the response, not as errors.
    pub async fn send_and_await(&self, request: Request, timeout: Duration) -> Result<Response> {
        self.ensure_open()?;
        self.round_trip(request, timeout).await
    }

    /// [`send_and_await`](Self::send_and_await) bounded by the configured request timeout.
    pub async fn request(&self, request: Request) -> Result<Response> {
        self.send_and_await(request, self.inner.config.request_timeout)
            .await
    }

    /// Send a request and turn a non-ok code into an error.
    pub(crate) async fn call(&self, request: Request, stream: &str) -> Result<ResponseBody> {
        let command = request.name();
        let response = self.request(request).await?;
        if !response.code.is_ok() {
            return Err(StreamError::from_response(command, response.code, stream));
        }
        Ok(response.body)
    }

    /// Close the connection.
    ///
    /// Idempotent. Asks the broker to close within the close grace period,
    /// then tears down locally whatever the answer.
    pub async fn close(&self) -> Result<()> {
        if !self
            .inner
            .transition(ConnectionState::Open, ConnectionState::Closing)
        {
            debug!(connection = self.inner.id, state = ?self.state(), "close on non-open connection");
            return Ok(());
        }

        let grace = self.inner.config.close_grace;
        let request = Request::Close {
            code: ResponseCode::Ok,
            reason: "OK".into(),
        };
        match self.round_trip(request, grace).await {
            Ok(resp) if !resp.code.is_ok() => {
                debug!(connection = self.inner.id, code = %resp.code, "broker close answered with error");
            }
            Ok(_) => {}
            Err(e) => debug!(connection = self.inner.id, error = %e, "close request not acknowledged"),
        }

        self.inner.shutdown(CloseReason::ConnectionClosed);
        Ok(())
    }

    pub(crate) fn router(&self) -> &Router {
        &self.inner.router
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StreamError::ConnectionClosed)
        }
    }

    /// Round trip without the open-state check, for handshake and close.
    pub(crate) async fn round_trip(&self, request: Request, timeout: Duration) -> Result<Response> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(StreamError::ConnectionClosed);
        }

        let correlation_id = inner.next_correlation_id();
        let rx = inner.router.register_pending(correlation_id)?;
        let frame = match request.encode(correlation_id) {
            Ok(frame) => frame,
            Err(e) => {
                inner.router.cancel_pending(correlation_id);
                return Err(e);
            }
        };

        if let Err(e) = inner.write(frame).await {
            inner.router.cancel_pending(correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Waiter dropped without an answer: the router is gone.
            Ok(Err(_)) => Err(StreamError::ConnectionClosed),
            Err(_) => {
                inner.router.cancel_pending(correlation_id);
                warn!(
                    connection = inner.id,
                    correlation_id,
                    command = request.name(),
                    "response timeout"
                );
                Err(StreamError::ResponseTimeout {
                    command: request.name(),
                    timeout,
                })
            }
        }
    }

    pub(crate) fn set_tuning(&self, tuning: Tuning) {
        self.inner
            .frame_max
            .store(tuning.frame_max, Ordering::Release);
        self.inner
            .heartbeat
            .store(tuning.heartbeat, Ordering::Release);
    }

    pub(crate) fn set_server_properties(&self, properties: HashMap<String, String>) {
        *self.inner.server_properties.lock() = properties;
    }

    fn start_heartbeat(&self, heartbeat: u32) {
        if heartbeat == 0 {
            return;
        }
        let interval = Duration::from_secs(u64::from(heartbeat));
        let inner = self.inner.clone();
        let task = tokio::spawn(heartbeat_loop(inner, interval));
        self.inner.tasks.lock().push(task);
    }
}

impl Inner {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn router(&self) -> &Router {
        &self.router
    }

    fn is_closed(&self) -> bool {
        *self.state.borrow() == ConnectionState::Closed
    }

    fn next_correlation_id(&self) -> u32 {
        // Zero is never used.
        loop {
            let id = self.next_correlation.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn record_received(&self) {
        *self.last_received.lock() = Instant::now();
    }

    pub(crate) fn take_tune_waiter(&self) -> Option<oneshot::Sender<Tuning>> {
        self.tune_tx.lock().take()
    }

    /// Write a frame and wait for the flush; a write failure tears down.
    pub(crate) async fn write(&self, frame: Bytes) -> Result<()> {
        if self.config.frame_tracing {
            trace_frame(self.id, "sent", &frame);
        }
        match self.writer.send(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.is_connection_error() {
                    warn!(connection = self.id, error = %e, "write failed, closing connection");
                    self.shutdown(CloseReason::ConnectionClosed);
                }
                Err(e)
            }
        }
    }

    /// Tear down unconditionally. Idempotent.
    pub(crate) fn shutdown(&self, reason: CloseReason) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        });
        if !changed {
            return;
        }

        info!(connection = self.id, reason = %reason, "connection closed");
        self.tune_tx.lock().take();
        self.router.teardown(&reason);

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(task) = self.writer_task.lock().take() {
            task.abort();
        }
    }
}

pub(crate) fn trace_frame(connection: u64, direction: &'static str, frame: &[u8]) {
    if frame.len() >= 6 {
        let key = u16::from_be_bytes([frame[4], frame[5]]);
        trace!(
            connection,
            direction,
            command = keys::name(key),
            key = format_args!("0x{:04x}", key),
            len = frame.len(),
            "frame"
        );
    }
}

async fn heartbeat_loop(inner: Arc<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        ticker.tick().await;

        let silent_for = inner.last_received.lock().elapsed();
        if silent_for > interval * 2 {
            warn!(
                connection = inner.id,
                silent_ms = silent_for.as_millis() as u64,
                "heartbeat timeout"
            );
            inner.shutdown(CloseReason::HeartbeatTimeout);
            return;
        }

        if inner.config.frame_tracing {
            trace_frame(inner.id, "sent", &encode_heartbeat());
        }
        if inner.writer.enqueue(encode_heartbeat()).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::router::SubscriptionEvent;
    use super::*;
    use crate::protocol::{build_command, encode_close_response, FrameBuffer, WireWriter, RESPONSE_FLAG};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Answer the handshake on the broker side of a duplex pipe.
    async fn accept_handshake(server: &mut DuplexStream, heartbeat: u32) {
        let mut buffer = FrameBuffer::new();
        let mut buf = vec![0u8; 4096];
        let mut answered = 0;

        while answered < 4 {
            let n = server.read(&mut buf).await.unwrap();
            for frame in buffer.push(&buf[..n]).unwrap() {
                let mut r = frame.reader();
                if frame.key() == keys::TUNE {
                    continue;
                }
                let correlation_id = r.read_u32().unwrap();
                let mut w = WireWriter::new();
                w.write_u32(correlation_id);
                w.write_u16(1);
                match frame.key() {
                    keys::PEER_PROPERTIES => {
                        let mut props = HashMap::new();
                        props.insert("product".to_string(), "test-broker".to_string());
                        w.write_string_map(&props).unwrap();
                    }
                    keys::SASL_HANDSHAKE => w.write_string_array(&["PLAIN"]).unwrap(),
                    keys::OPEN => w.write_i32(0),
                    _ => {}
                }
                server
                    .write_all(&build_command(frame.key() | RESPONSE_FLAG, w))
                    .await
                    .unwrap();
                if frame.key() == keys::SASL_AUTHENTICATE {
                    let mut tune = WireWriter::new();
                    tune.write_u32(131_072);
                    tune.write_u32(heartbeat);
                    server
                        .write_all(&build_command(keys::TUNE, tune))
                        .await
                        .unwrap();
                }
                answered += 1;
            }
        }
    }

    async fn open_pair(heartbeat: u32) -> (Connection, DuplexStream) {
        let (client, mut server) = duplex(64 * 1024);
        let broker = tokio::spawn(async move {
            accept_handshake(&mut server, heartbeat).await;
            server
        });
        let connection = Connection::with_transport(client, ClientConfig::default())
            .await
            .unwrap();
        (connection, broker.await.unwrap())
    }

    #[tokio::test]
    async fn test_handshake_negotiates_tuning() {
        let (connection, _server) = open_pair(30).await;

        assert_eq!(connection.state(), ConnectionState::Open);
        assert_eq!(connection.frame_max(), 131_072);
        assert_eq!(connection.heartbeat(), 30);
        assert_eq!(
            connection.server_properties().get("product").map(String::as_str),
            Some("test-broker")
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (connection, mut server) = open_pair(0).await;

        let broker = tokio::spawn(async move {
            let mut buffer = FrameBuffer::new();
            let mut buf = vec![0u8; 1024];
            let mut closes = 0;
            loop {
                let n = server.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    return closes;
                }
                for frame in buffer.push(&buf[..n]).unwrap() {
                    if frame.key() == keys::CLOSE {
                        closes += 1;
                        let id = frame.reader().read_u32().unwrap();
                        let _ = server.write_all(&encode_close_response(id)).await;
                    }
                }
            }
        });

        connection.close().await.unwrap();
        connection.close().await.unwrap();

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(broker.await.unwrap(), 1);
        assert!(matches!(
            connection.send_frame(encode_heartbeat()).await,
            Err(StreamError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_pending_request_fails_on_transport_loss() {
        let (connection, server) = open_pair(0).await;

        let waiting = {
            let connection = connection.clone();
            tokio::spawn(async move {
                connection
                    .send_and_await(
                        Request::DeleteStream {
                            stream: "s".into(),
                        },
                        Duration::from_secs(30),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(server);

        let result = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(StreamError::ConnectionClosed)));
        connection.closed().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_request_timeout_removes_waiter() {
        let (connection, _server) = open_pair(0).await;

        let result = connection
            .send_and_await(
                Request::DeleteStream {
                    stream: "s".into(),
                },
                Duration::from_millis(20),
            )
            .await;

        assert!(matches!(
            result,
            Err(StreamError::ResponseTimeout {
                command: "delete_stream",
                ..
            })
        ));
        assert_eq!(connection.pending_requests(), 0);
        assert!(connection.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_tears_down() {
        let (connection, _server) = open_pair(1).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        connection.router().register_subscription("orders", tx).unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(matches!(
            rx.recv().await,
            Some(SubscriptionEvent::Closed(CloseReason::HeartbeatTimeout))
        ));
    }
}
