//! Dedicated writer task for outbound frames.
//!
//! Every frame a connection sends goes through one mpsc channel to one
//! writer task, so frames are never interleaved on the socket and no lock
//! is held across a write.
//!
//! # Architecture
//!
//! ```text
//! Producer ──┐
//! Consumer ──┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Transport
//! Heartbeat ─┘
//! ```
//!
//! Ready frames are batched into one vectored write and one flush. Callers
//! that need to know the frame reached the transport wait on a flush
//! acknowledgement; a failed write acknowledges every frame of the batch,
//! and everything still queued, with [`StreamError::WriteError`].

use std::io::IoSlice;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, StreamError};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default maximum frames written per vectored write.
pub const DEFAULT_MAX_BATCH_FRAMES: usize = 64;

type FlushAck = oneshot::Sender<Result<()>>;

/// A complete frame ready to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Encoded frame, length prefix included.
    pub bytes: Bytes,
    ack: Option<FlushAck>,
}

impl OutboundFrame {
    /// Frame whose sender does not wait for the flush.
    #[inline]
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes, ack: None }
    }

    fn with_ack(bytes: Bytes, ack: FlushAck) -> Self {
        Self {
            bytes,
            ack: Some(ack),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn complete(self, result: Result<()>) {
        if let Some(ack) = self.ack {
            let _ = ack.send(result);
        }
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// Maximum frames gathered into one write.
    pub max_batch_frames: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_batch_frames: DEFAULT_MAX_BATCH_FRAMES,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Send a frame and wait until it has been written and flushed.
    pub async fn send(&self, bytes: Bytes) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(OutboundFrame::with_ack(bytes, ack_tx))
            .await
            .map_err(|_| StreamError::ConnectionClosed)?;

        // A dropped ack means the writer task is gone.
        ack_rx.await.map_err(|_| StreamError::ConnectionClosed)?
    }

    /// Queue a frame without waiting for the flush.
    pub async fn enqueue(&self, bytes: Bytes) -> Result<()> {
        self.tx
            .send(OutboundFrame::new(bytes))
            .await
            .map_err(|_| StreamError::ConnectionClosed)
    }

}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends cleanly when every handle is dropped, or with the first
/// write error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer, config.max_batch_frames.max(1)));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    max_batch: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(max_batch);

    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => {
                debug!("writer channel closed, shutting down");
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };

        batch.push(first);
        while batch.len() < max_batch {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        match write_batch(&mut writer, &batch).await {
            Ok(()) => {
                for frame in batch.drain(..) {
                    frame.complete(Ok(()));
                }
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(error = %reason, frames = batch.len(), "frame write failed");
                for frame in batch.drain(..) {
                    frame.complete(Err(StreamError::WriteError(reason.clone())));
                }
                rx.close();
                while let Some(frame) = rx.recv().await {
                    frame.complete(Err(StreamError::WriteError(reason.clone())));
                }
                return Err(StreamError::WriteError(reason));
            }
        }
    }
}

/// Write a batch of frames with vectored I/O, then flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    if total_size == 0 {
        return Ok(());
    }

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after the first `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut start = 0;

    for frame in batch {
        let end = start + frame.bytes.len();
        if skip_bytes < end && !frame.bytes.is_empty() {
            let from = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&frame.bytes[from..]));
        }
        start = end;
    }

    slices
}
