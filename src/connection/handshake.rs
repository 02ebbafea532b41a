//! Connection handshake.
//!
//! Sequence, all within the connect timeout:
//! 1. Exchange peer properties
//! 2. SASL handshake (the broker must offer PLAIN)
//! 3. SASL authenticate with `\0user\0password`
//! 4. Wait for the broker's tune, answer with the negotiated values
//! 5. Open the virtual host

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use tokio::sync::oneshot;
use tracing::debug;

use super::{Connection, Tuning};
use crate::error::{Result, StreamError};
use crate::protocol::{encode_tune, Request, Response, ResponseBody};

pub const PLAIN_MECHANISM: &str = "PLAIN";

/// Client properties sent in the peer-properties exchange.
pub(crate) fn client_properties(connection_name: Option<&str>) -> HashMap<String, String> {
    let mut props = HashMap::new();
    props.insert("product".to_string(), env!("CARGO_PKG_NAME").to_string());
    props.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
    props.insert("platform".to_string(), "Rust".to_string());
    if let Some(name) = connection_name {
        props.insert("connection_name".to_string(), name.to_string());
    }
    props
}

/// Pick the smaller of two proposals, where zero means "no limit".
pub(crate) fn negotiate(client: u32, server: u32) -> u32 {
    match (client, server) {
        (0, s) => s,
        (c, 0) => c,
        (c, s) => c.min(s),
    }
}

fn plain_credentials(username: &str, password: &str) -> bytes::Bytes {
    let mut buf = BytesMut::with_capacity(2 + username.len() + password.len());
    buf.put_u8(0);
    buf.put_slice(username.as_bytes());
    buf.put_u8(0);
    buf.put_slice(password.as_bytes());
    buf.freeze()
}

fn expect_ok(step: &str, response: &Response) -> Result<()> {
    if response.code.is_ok() {
        Ok(())
    } else {
        Err(StreamError::HandshakeFailed(format!(
            "{} refused: {}",
            step, response.code
        )))
    }
}

pub(crate) async fn run(
    connection: &Connection,
    tune_rx: oneshot::Receiver<Tuning>,
) -> Result<Tuning> {
    let config = connection.config().clone();
    let timeout = config.connect_timeout;
    let id = connection.id();

    let response = connection
        .round_trip(
            Request::PeerProperties(client_properties(config.connection_name.as_deref())),
            timeout,
        )
        .await?;
    expect_ok("peer properties", &response)?;
    if let ResponseBody::PeerProperties(props) = response.body {
        connection.set_server_properties(props);
    }

    let response = connection
        .round_trip(Request::SaslHandshake, timeout)
        .await?;
    expect_ok("sasl handshake", &response)?;
    let mechanisms = match response.body {
        ResponseBody::SaslMechanisms(m) => m,
        _ => Vec::new(),
    };
    if !mechanisms.iter().any(|m| m == PLAIN_MECHANISM) {
        return Err(StreamError::HandshakeFailed(format!(
            "broker does not offer PLAIN (offered: {:?})",
            mechanisms
        )));
    }

    let response = connection
        .round_trip(
            Request::SaslAuthenticate {
                mechanism: PLAIN_MECHANISM.to_string(),
                data: plain_credentials(&config.username, &config.password),
            },
            timeout,
        )
        .await?;
    expect_ok("authentication", &response)?;
    debug!(connection = id, user = %config.username, "authenticated");

    let server = tune_rx
        .await
        .map_err(|_| StreamError::HandshakeFailed("connection closed before tune".into()))?;
    let tuning = Tuning {
        frame_max: negotiate(config.max_frame_size, server.frame_max),
        heartbeat: negotiate(
            u32::try_from(config.heartbeat.as_secs()).unwrap_or(u32::MAX),
            server.heartbeat,
        ),
    };
    connection.set_tuning(tuning);
    connection
        .inner
        .write(encode_tune(tuning.frame_max, tuning.heartbeat))
        .await?;
    debug!(
        connection = id,
        server_frame_max = server.frame_max,
        server_heartbeat = server.heartbeat,
        frame_max = tuning.frame_max,
        heartbeat = tuning.heartbeat,
        "tuned"
    );

    let response = connection
        .round_trip(
            Request::Open {
                virtual_host: config.virtual_host.clone(),
            },
            timeout,
        )
        .await?;
    expect_ok("open", &response)?;

    Ok(tuning)
}
