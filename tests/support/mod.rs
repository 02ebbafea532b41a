//! In-memory broker used by the session tests.
//!
//! The broker answers the handshake and the request/response commands over
//! a `tokio::io::duplex` pipe, records every frame the client sends and
//! lets a test push arbitrary frames or drop the transport.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use streamwire_client::protocol::{build_command, keys, Frame, FrameBuffer, WireWriter, RESPONSE_FLAG};
use streamwire_client::{AmqpCodec, ClientConfig, Connection, Environment, Message};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const OK: u16 = 0x01;

/// How the broker answers.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub mechanisms: Vec<String>,
    pub auth_code: u16,
    pub frame_max: u32,
    pub heartbeat: u32,
    /// Confirm every publishing id as soon as its frame arrives.
    pub auto_confirm: bool,
    pub publisher_sequence: u64,
    pub stored_offset: Option<u64>,
    /// Chunks delivered to every new subscription, in order.
    pub deliveries: Vec<Bytes>,
    /// Keys the broker never answers.
    pub silent: Vec<u16>,
    /// Response code overrides per command key.
    pub codes: HashMap<u16, u16>,
    /// Streams reported by metadata queries.
    pub streams: Vec<String>,
    /// Raw response bodies per command key, written after the code.
    pub bodies: HashMap<u16, Bytes>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            mechanisms: vec!["PLAIN".to_string()],
            auth_code: OK,
            frame_max: 1_048_576,
            heartbeat: 0,
            auto_confirm: true,
            publisher_sequence: 0,
            stored_offset: None,
            deliveries: Vec::new(),
            silent: Vec::new(),
            codes: HashMap::new(),
            streams: Vec::new(),
            bodies: HashMap::new(),
        }
    }
}

/// Test-side handle to a running broker.
pub struct Broker {
    outbound: mpsc::UnboundedSender<Bytes>,
    received: mpsc::UnboundedReceiver<Frame>,
    task: JoinHandle<()>,
}

impl Broker {
    /// Push a frame to the client.
    pub fn push(&self, frame: Bytes) {
        let _ = self.outbound.send(frame);
    }

    /// Drop the transport without a close handshake.
    pub fn kill(&self) {
        self.task.abort();
    }

    /// Next frame the client sent with `key`, skipping others.
    pub async fn expect(&mut self, key: u16) -> Frame {
        let wait = async {
            loop {
                match self.received.recv().await {
                    Some(frame) if frame.key() == key => return frame,
                    Some(_) => continue,
                    None => panic!("broker stopped before {}", keys::name(key)),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("no {} frame received", keys::name(key)))
    }

    /// Every frame received so far with `key`.
    pub fn drain(&mut self, key: u16) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.received.try_recv() {
            if frame.key() == key {
                frames.push(frame);
            }
        }
        frames
    }
}

pub fn config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.request_timeout = Duration::from_secs(2);
    config.close_grace = Duration::from_millis(200);
    config
}

pub async fn start(behavior: Behavior) -> (Connection, Broker) {
    start_with(behavior, config()).await
}

pub async fn start_with(behavior: Behavior, config: ClientConfig) -> (Connection, Broker) {
    let (broker, client) = spawn(behavior);
    let connection = Connection::with_transport(client, config)
        .await
        .expect("handshake");
    (connection, broker)
}

pub async fn environment(behavior: Behavior) -> (Environment, Broker) {
    let (broker, client) = spawn(behavior);
    let environment = Environment::with_transport(client, config())
        .await
        .expect("handshake");
    (environment, broker)
}

/// Start a broker and return the client end of its pipe.
pub fn spawn(behavior: Behavior) -> (Broker, DuplexStream) {
    let (client, server) = duplex(1024 * 1024);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (received_tx, received_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(server, behavior, outbound_rx, received_tx));
    (
        Broker {
            outbound: outbound_tx,
            received: received_rx,
            task,
        },
        client,
    )
}

enum Event {
    Read(std::io::Result<usize>),
    Push(Option<Bytes>),
}

async fn run(
    server: DuplexStream,
    behavior: Behavior,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    received: mpsc::UnboundedSender<Frame>,
) {
    let (mut rd, mut wr) = tokio::io::split(server);
    let mut buffer = FrameBuffer::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut pushing = true;
    loop {
        let event = tokio::select! {
            read = rd.read(&mut buf) => Event::Read(read),
            frame = outbound.recv(), if pushing => Event::Push(frame),
        };
        match event {
            Event::Read(Ok(0)) | Event::Read(Err(_)) => return,
            Event::Read(Ok(n)) => {
                let frames = match buffer.push(&buf[..n]) {
                    Ok(frames) => frames,
                    Err(_) => return,
                };
                for frame in frames {
                    let replies = answer(&behavior, &frame);
                    let _ = received.send(frame);
                    for reply in replies {
                        if wr.write_all(&reply).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Event::Push(Some(frame)) => {
                if wr.write_all(&frame).await.is_err() {
                    return;
                }
            }
            Event::Push(None) => pushing = false,
        }
    }
}

fn response(key: u16, correlation_id: u32, code: u16, body: impl FnOnce(&mut WireWriter)) -> Bytes {
    let mut w = WireWriter::new();
    w.write_u32(correlation_id);
    w.write_u16(code);
    body(&mut w);
    build_command(key | RESPONSE_FLAG, w)
}

fn answer(behavior: &Behavior, frame: &Frame) -> Vec<Bytes> {
    let key = frame.key();
    if frame.is_response() || behavior.silent.contains(&key) {
        return Vec::new();
    }
    let code = behavior.codes.get(&key).copied().unwrap_or(OK);
    let mut r = frame.reader();

    if let Some(body) = behavior.bodies.get(&key) {
        let id = r.read_u32().unwrap();
        return vec![response(key, id, code, |w| w.write_bytes(body))];
    }

    match key {
        keys::PUBLISH => {
            if !behavior.auto_confirm {
                return Vec::new();
            }
            let publisher_id = r.read_u8().unwrap();
            let count = r.read_array_len().unwrap();
            let mut ids = Vec::with_capacity(count);
            for _ in 0..count {
                ids.push(r.read_u64().unwrap());
                r.read_blob().unwrap();
            }
            vec![publish_confirm(publisher_id, &ids)]
        }
        keys::CREDIT | keys::STORE_OFFSET | keys::HEARTBEAT | keys::TUNE => Vec::new(),
        keys::PEER_PROPERTIES => {
            let id = r.read_u32().unwrap();
            let mut props = HashMap::new();
            props.insert("product".to_string(), "mock-broker".to_string());
            vec![response(key, id, code, |w| w.write_string_map(&props).unwrap())]
        }
        keys::SASL_HANDSHAKE => {
            let id = r.read_u32().unwrap();
            vec![response(key, id, code, |w| {
                w.write_string_array(&behavior.mechanisms).unwrap()
            })]
        }
        keys::SASL_AUTHENTICATE => {
            let id = r.read_u32().unwrap();
            let mut replies = vec![response(key, id, behavior.auth_code, |_| {})];
            if behavior.auth_code == OK {
                let mut tune = WireWriter::new();
                tune.write_u32(behavior.frame_max);
                tune.write_u32(behavior.heartbeat);
                replies.push(build_command(keys::TUNE, tune));
            }
            replies
        }
        keys::OPEN => {
            let id = r.read_u32().unwrap();
            vec![response(key, id, code, |w| w.write_i32(0))]
        }
        keys::QUERY_PUBLISHER_SEQUENCE => {
            let id = r.read_u32().unwrap();
            vec![response(key, id, code, |w| w.write_u64(behavior.publisher_sequence))]
        }
        keys::QUERY_OFFSET => {
            let id = r.read_u32().unwrap();
            match behavior.stored_offset {
                Some(offset) => vec![response(key, id, code, |w| w.write_u64(offset))],
                None => vec![response(key, id, 0x13, |_| {})],
            }
        }
        keys::SUBSCRIBE => {
            let id = r.read_u32().unwrap();
            let subscription_id = r.read_u8().unwrap();
            let mut replies = vec![response(key, id, code, |_| {})];
            if code == OK {
                replies.extend(
                    behavior
                        .deliveries
                        .iter()
                        .map(|chunk| deliver(subscription_id, chunk)),
                );
            }
            replies
        }
        keys::METADATA => {
            let id = r.read_u32().unwrap();
            let requested = r.read_string_array().unwrap();
            let mut w = WireWriter::new();
            w.write_u32(id);
            w.write_array_len(1).unwrap();
            w.write_u16(0);
            w.write_string("localhost").unwrap();
            w.write_u32(5552);
            w.write_array_len(requested.len()).unwrap();
            for stream in &requested {
                w.write_string(stream).unwrap();
                if behavior.streams.contains(stream) {
                    w.write_u16(OK);
                    w.write_u16(0);
                } else {
                    w.write_u16(0x02);
                    w.write_u16(0xffff);
                }
                w.write_array_len(0).unwrap();
            }
            vec![build_command(key | RESPONSE_FLAG, w)]
        }
        _ => {
            // Every remaining client command starts with a correlation id.
            let id = r.read_u32().unwrap();
            vec![response(key, id, code, |_| {})]
        }
    }
}

pub fn publish_confirm(publisher_id: u8, ids: &[u64]) -> Bytes {
    let mut w = WireWriter::new();
    w.write_u8(publisher_id);
    w.write_array_len(ids.len()).unwrap();
    for id in ids {
        w.write_u64(*id);
    }
    build_command(keys::PUBLISH_CONFIRM, w)
}

pub fn publish_error(publisher_id: u8, errors: &[(u64, u16)]) -> Bytes {
    let mut w = WireWriter::new();
    w.write_u8(publisher_id);
    w.write_array_len(errors.len()).unwrap();
    for (id, code) in errors {
        w.write_u64(*id);
        w.write_u16(*code);
    }
    build_command(keys::PUBLISH_ERROR, w)
}

pub fn metadata_update(code: u16, stream: &str) -> Bytes {
    let mut w = WireWriter::new();
    w.write_u16(code);
    w.write_string(stream).unwrap();
    build_command(keys::METADATA_UPDATE, w)
}

pub fn deliver(subscription_id: u8, chunk: &Bytes) -> Bytes {
    let mut w = WireWriter::new();
    w.write_u8(subscription_id);
    w.write_bytes(chunk);
    build_command(keys::DELIVER, w)
}

/// Build a chunk of simple entries, one per message, numbered from `first_offset`.
pub fn chunk(first_offset: u64, messages: &[Message]) -> Bytes {
    let mut data = BytesMut::new();
    for message in messages {
        let record = AmqpCodec::encode(message).unwrap();
        data.put_u32(record.len() as u32);
        data.put_slice(&record);
    }

    let mut buf = BytesMut::new();
    buf.put_i8(0x50);
    buf.put_i8(0);
    buf.put_u16(messages.len() as u16);
    buf.put_u32(messages.len() as u32);
    buf.put_i64(1_700_000_000_000);
    buf.put_u64(0);
    buf.put_u64(first_offset);
    buf.put_i32(0);
    buf.put_u32(data.len() as u32);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_slice(&data);
    buf.freeze()
}

/// Publishing ids carried by a publish frame, in wire order.
pub fn published_ids(frame: &Frame) -> Vec<u64> {
    let mut r = frame.reader();
    r.read_u8().unwrap();
    let count = r.read_array_len().unwrap();
    (0..count)
        .map(|_| {
            let id = r.read_u64().unwrap();
            r.read_blob().unwrap();
            id
        })
        .collect()
}
