//! Transport layer (spec §4.2): Unix domain socket or TCP loopback, carrying
//! newline-delimited JSON envelopes. Mirrors the teacher's pattern of a
//! `ServerConfig` plus a `start_*` entry point that returns a running handle,
//! generalized from a single HTTP/websocket listener to a pair of socket
//! kinds chosen at startup.

mod tcp;
mod unix;

pub use tcp::{TcpHandshakeError, accept_tcp, bind_tcp, generate_handshake_token};
pub use unix::bind_unix;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[from] TcpHandshakeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    Unix,
    Tcp,
}

/// A bound listener plus the address clients should connect to. `port` is
/// `Some` only for the TCP transport.
pub struct TransportHandle {
    pub transport_type: TransportType,
    pub address: String,
    pub port: Option<u16>,
}

/// Either half of a connected stream, used so `server.rs` can drive a single
/// read/write loop regardless of which transport accepted the connection.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}
