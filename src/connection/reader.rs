//! Inbound read loop.
//!
//! One task per connection reads from the transport, splits the bytes into
//! frames, decodes each frame and routes it. Routing never waits on a
//! producer or consumer: their channels are unbounded, so a slow handler
//! cannot stall responses for other callers.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, trace, warn};

use super::router::{PublisherEvent, SubscriptionEvent};
use super::{trace_frame, Inner, Tuning};
use crate::protocol::{decode_server_frame, encode_close_response, Frame, FrameBuffer, ServerFrame};
use crate::types::CloseReason;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Whether the loop keeps reading after a frame.
enum Flow {
    Continue,
    Stop(CloseReason),
}

pub(crate) async fn read_loop<R>(mut reader: R, inner: Arc<Inner>)
where
    R: AsyncRead + Unpin,
{
    let id = inner.id();
    let mut frame_buffer = FrameBuffer::with_max_frame_size(inner.config().max_frame_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let reason = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(connection = id, "transport closed by peer");
                break CloseReason::ConnectionClosed;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(connection = id, error = %e, "transport read failed");
                break CloseReason::ConnectionClosed;
            }
        };

        let frames = match frame_buffer.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                error!(connection = id, error = %e, "unrecoverable framing error");
                break CloseReason::ConnectionClosed;
            }
        };

        let mut stop = None;
        for frame in frames {
            inner.record_received();
            if let Flow::Stop(reason) = dispatch_frame(&inner, &frame).await {
                stop = Some(reason);
                break;
            }
        }
        if let Some(reason) = stop {
            break reason;
        }
    };

    inner.shutdown(reason);
}

async fn dispatch_frame(inner: &Arc<Inner>, frame: &Frame) -> Flow {
    let id = inner.id();
    if inner.config().frame_tracing {
        trace_frame(id, "received", &frame.encode());
    }

    let decoded = match decode_server_frame(frame) {
        Ok(decoded) => decoded,
        Err(e) => {
            // The length prefix keeps the stream aligned; skip this frame.
            warn!(connection = id, key = frame.key(), error = %e, "dropping undecodable frame");
            if frame.is_response() {
                if let Ok(correlation_id) = frame.reader().read_u32() {
                    inner.router().fail(correlation_id, e);
                }
            }
            return Flow::Continue;
        }
    };

    let router = inner.router();
    match decoded {
        ServerFrame::Response(response) => {
            let correlation_id = response.correlation_id;
            if !router.complete(response) {
                warn!(connection = id, correlation_id, "response without waiter");
            }
        }
        ServerFrame::PublishConfirm {
            publisher_id,
            publishing_ids,
        } => {
            trace!(connection = id, publisher_id, count = publishing_ids.len(), "confirm");
            if !router.route_publisher(publisher_id, PublisherEvent::Confirmed(publishing_ids)) {
                warn!(connection = id, publisher_id, "confirm for unknown publisher");
            }
        }
        ServerFrame::PublishError {
            publisher_id,
            errors,
        } => {
            debug!(connection = id, publisher_id, count = errors.len(), "publish error");
            if !router.route_publisher(publisher_id, PublisherEvent::Failed(errors)) {
                warn!(connection = id, publisher_id, "publish error for unknown publisher");
            }
        }
        ServerFrame::Deliver {
            subscription_id,
            chunk,
        } => {
            if !router.route_subscription(subscription_id, SubscriptionEvent::Chunk(chunk)) {
                warn!(connection = id, subscription_id, "delivery for unknown subscription");
            }
        }
        ServerFrame::MetadataUpdate { code, stream } => {
            let closed = router.close_stream(&stream, code);
            debug!(connection = id, stream = %stream, code = %code, closed, "metadata update");
        }
        ServerFrame::CreditError {
            code,
            subscription_id,
        } => {
            warn!(connection = id, subscription_id, code = %code, "credit rejected");
        }
        ServerFrame::Tune {
            frame_max,
            heartbeat,
        } => match inner.take_tune_waiter() {
            Some(tx) => {
                let _ = tx.send(Tuning {
                    frame_max,
                    heartbeat,
                });
            }
            None => debug!(connection = id, "ignoring tune outside handshake"),
        },
        ServerFrame::Heartbeat => {
            trace!(connection = id, "heartbeat");
        }
        ServerFrame::Close {
            correlation_id,
            code,
            reason,
        } => {
            warn!(connection = id, code = %code, reason = %reason, "broker closed connection");
            let reply = encode_close_response(correlation_id);
            let grace = inner.config().close_grace;
            let _ = tokio::time::timeout(grace, inner.write(reply)).await;
            return Flow::Stop(CloseReason::BrokerClosed { code, reason });
        }
    }
    Flow::Continue
}
