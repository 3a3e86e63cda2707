//! Intercom2: point-to-point request/reply messaging for the wallet broker.
//!
//! An Intercom2 endpoint is identified by a numeric id and reachable at
//! host:port. Each process maintains one listener plus outbound connections
//! to its configured remote endpoints, and exchanges length-framed messages
//! (see [`broker_proto::frame`]) over plaintext TCP or mutual TLS.
//!
//! Layering, bottom up:
//!
//! - [`connection`] — a single framed byte stream with send/recv
//! - [`tls`] — certificate material and rustls client/server configs
//! - [`session`] — endpoint lifecycle, correlation of requests to replies,
//!   request timeouts, reconnect backoff
//! - [`dispatcher`] — message-id to handler routing with one-shot replies

pub mod connection;
pub mod dispatcher;
pub mod session;
pub mod tls;

pub use connection::{Connection, Listener};
pub use dispatcher::{Dispatcher, Reply};
pub use session::{Session, SessionConfig};
pub use tls::TlsContext;

use std::sync::Arc;
use thiserror::Error;

/// Numeric id of an Intercom2 endpoint.
pub type EndpointId = u32;

/// Errors raised by the messaging substrate.
#[derive(Debug, Error)]
pub enum IntercomError {
    /// Socket could not be established or died mid-stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// TLS material could not be loaded or the handshake rejected the peer.
    #[error("tls error: {0}")]
    Tls(String),

    /// A frame failed to decode.
    #[error("frame decode error: {0}")]
    FrameDecode(#[from] broker_proto::ProtoError),

    /// No reply arrived within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The endpoint was closed while the request was pending.
    #[error("request cancelled")]
    Cancelled,

    /// A handler invoked its reply more than once.
    #[error("reply already sent")]
    DoubleReply,

    /// The target endpoint is not registered with the session.
    #[error("unknown endpoint {0}")]
    UnknownEndpoint(EndpointId),

    /// The endpoint is registered but currently disconnected.
    #[error("endpoint {0} not connected")]
    NotConnected(EndpointId),

    /// I/O failure on the underlying socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for intercom operations.
pub type Result<T> = std::result::Result<T, IntercomError>;

/// Transport security for a session's connections.
#[derive(Clone)]
pub enum SecurityMode {
    /// Mode 1: plaintext TCP.
    Plaintext,
    /// Mode 2: mutual TLS against a shared CA.
    MutualTls(Arc<TlsContext>),
}

impl std::fmt::Debug for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityMode::Plaintext => write!(f, "Plaintext"),
            SecurityMode::MutualTls(_) => write!(f, "MutualTls"),
        }
    }
}

/// Address of a remote Intercom2 endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddress {
    pub remote_id: EndpointId,
    pub host: String,
    pub port: u16,
}

impl EndpointAddress {
    pub fn new(remote_id: EndpointId, host: impl Into<String>, port: u16) -> Self {
        Self {
            remote_id,
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} @ {}:{}", self.remote_id, self.host, self.port)
    }
}
