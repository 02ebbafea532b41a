//! Transport module - byte streams a connection can run over.
//!
//! The connection accepts any [`Transport`]: a plain TCP stream from
//! [`connect_tcp`], a TLS stream the application set up, or an in-memory
//! duplex in tests.

mod tcp;

use tokio::io::{AsyncRead, AsyncWrite};

pub use tcp::connect_tcp;

/// A bidirectional byte stream usable as a connection transport.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
