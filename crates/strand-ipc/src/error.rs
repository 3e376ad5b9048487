//! Error taxonomy for IPC calls.
//!
//! Every failure a caller can observe is one of the variants below. Codec
//! and tarpc error types are normalized before they reach the caller.

use crate::transport::TransportError;
use thiserror::Error;

/// Errors surfaced by proxies, parallel calls and proxy construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IpcError {
    /// The invocation payload could not be built or decoded.
    #[error("malformed invocation: {0}")]
    MalformedInvocation(String),

    /// The bound protocol has no method with this name and signature.
    #[error("no such method: {0}")]
    NoSuchMethod(String),

    /// The caller was rejected by the service's access policy.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// The invoked method itself failed on the remote side.
    #[error("{class}: {message}")]
    RemoteExecution {
        class: String,
        message: String,
        trace: Vec<String>,
    },

    /// The underlying connection failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Client and server disagree on the protocol version.
    #[error("Protocol {protocol} version mismatch. (client = {client_version}, server = {server_version})")]
    VersionMismatch {
        protocol: String,
        client_version: u64,
        server_version: u64,
    },

    /// The peer did not answer in time while a proxy was being built.
    #[error("failed to connect to remote peer: {peer}")]
    PeerUnreachable {
        peer: String,
        #[source]
        source: TransportError,
    },

    /// The proxy was used after `close()`.
    #[error("proxy for {0} has been closed")]
    ProxyClosed(String),
}

/// Result type for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;

impl IpcError {
    /// A failure raised by a service implementation.
    ///
    /// Service methods return this to report a domain failure; the caller
    /// receives it as `RemoteExecution` with the same message.
    pub fn service(message: impl Into<String>) -> Self {
        IpcError::RemoteExecution {
            class: "ServiceError".to_string(),
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Short class name used in remote-error envelopes.
    pub fn class_name(&self) -> &str {
        match self {
            IpcError::MalformedInvocation(_) => "MalformedInvocation",
            IpcError::NoSuchMethod(_) => "NoSuchMethod",
            IpcError::Authorization(_) => "AuthorizationError",
            IpcError::RemoteExecution { class, .. } => class,
            IpcError::Transport(_) => "TransportError",
            IpcError::VersionMismatch { .. } => "VersionMismatch",
            IpcError::PeerUnreachable { .. } => "PeerUnreachable",
            IpcError::ProxyClosed(_) => "ProxyClosed",
        }
    }

    /// Whether this is a transport-level connection refusal.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, IpcError::Transport(e) if e.is_connection_refused())
    }

    /// Whether this is a transport-level timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, IpcError::Transport(e) if e.is_timeout())
    }
}
