//! Transport abstraction.
//!
//! The IPC core moves opaque request and reply buffers; it knows nothing
//! about framing or sockets. A [`Transport`] sends one request to one
//! target and awaits the matching reply. Transports are created by a
//! [`TransportFactory`] from a [`ConnectionConfig`], which is also the key
//! the connection pool shares clients under.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strand_core::{CallerIdentity, PeerAddress};
use thiserror::Error;

/// Default connection timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 20_000;

/// Default maximum in-flight requests per connection.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 100;

/// Errors that occur at the network/transport layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Nothing is listening at the target (server not up yet).
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The connection or the call did not complete in time.
    #[error("timed out: {0}")]
    TimedOut(String),

    /// The peer went away mid-call.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// The reply could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Whether the target refused the connection.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, TransportError::ConnectionRefused(_))
    }

    /// Whether the failure is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::TimedOut(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(e.to_string()),
            std::io::ErrorKind::TimedOut => TransportError::TimedOut(e.to_string()),
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransportError::ConnectionLost(e.to_string()),
            _ => TransportError::Io(e.to_string()),
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Sent with every request so the server can pick the binding and
/// authorize the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHeader {
    /// Name of the protocol the call belongs to.
    pub protocol: String,
    /// Identity of the caller.
    pub caller: CallerIdentity,
}

impl ConnectionHeader {
    /// Header for calls on `protocol` made by `caller`.
    pub fn new(protocol: impl Into<String>, caller: CallerIdentity) -> Self {
        Self {
            protocol: protocol.into(),
            caller,
        }
    }
}

/// Name of the pool's fallback transport factory.
pub const DEFAULT_FACTORY: &str = "default";

/// Connection settings; also the key under which pooled clients are shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionConfig {
    /// Name of the connection factory this configuration selects.
    pub factory: String,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// Maximum in-flight requests per connection.
    pub max_pending_requests: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            factory: DEFAULT_FACTORY.to_string(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
        }
    }
}

impl ConnectionConfig {
    /// Default settings under a named factory.
    pub fn with_factory(factory: impl Into<String>) -> Self {
        Self {
            factory: factory.into(),
            ..Self::default()
        }
    }
}

/// A mechanism to send a request to a peer and receive its reply.
///
/// Object-safe so it can be shared as `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send `payload` to `target` and wait for the reply bytes.
    ///
    /// Must not interpret the payload.
    async fn call(
        &self,
        target: &PeerAddress,
        header: &ConnectionHeader,
        payload: Vec<u8>,
    ) -> TransportResult<Vec<u8>>;

    /// Tear down every connection held by this transport.
    fn shutdown(&self);
}

/// Creates transports for the connection pool.
pub trait TransportFactory: Send + Sync + 'static {
    fn create(&self, config: &ConnectionConfig) -> Arc<dyn Transport>;
}
