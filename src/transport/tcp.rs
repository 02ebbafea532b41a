//! TCP connect with a deadline.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, StreamError};

/// Connect to `address`, failing with `HandshakeFailed` after `timeout`.
///
/// Nagle is disabled; the writer task already batches frames.
pub async fn connect_tcp(address: &str, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| {
            StreamError::HandshakeFailed(format!("connect to {} timed out after {:?}", address, timeout))
        })??;

    stream.set_nodelay(true)?;
    debug!(address, "tcp connected");
    Ok(stream)
}
