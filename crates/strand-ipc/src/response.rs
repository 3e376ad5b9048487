//! Reply envelopes.
//!
//! A reply is either the declared return type with its value, or a
//! remote-error envelope. Failures travel as tagged values rather than as
//! transport errors so the connection stays usable after a failed call.

use crate::error::{IpcError, IpcResult};
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use strand_core::codec::{read_field, read_object, write_field, write_object};
use strand_core::{CodecError, TypeDescriptor, Value};

const TAG_SUCCESS: u8 = 0;
const TAG_FAILURE: u8 = 1;

/// Which stage of the server-side dispatch rejected the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    MalformedInvocation,
    NoSuchMethod,
    Authorization,
    RemoteExecution,
}

/// Remote-error envelope.
///
/// Carries a descriptive message and the textual cause chain; never any
/// server memory addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    pub kind: FailureKind,
    /// Class of the failure (e.g. `ServiceError`).
    pub class: String,
    pub message: String,
    /// Cause chain, outermost first.
    pub trace: Vec<String>,
}

impl RemoteFailure {
    /// Wrap a server-side error for the wire.
    pub fn from_error(err: &IpcError) -> Self {
        let kind = match err {
            IpcError::MalformedInvocation(_) => FailureKind::MalformedInvocation,
            IpcError::NoSuchMethod(_) => FailureKind::NoSuchMethod,
            IpcError::Authorization(_) => FailureKind::Authorization,
            _ => FailureKind::RemoteExecution,
        };
        let (message, trace) = match err {
            IpcError::MalformedInvocation(msg)
            | IpcError::NoSuchMethod(msg)
            | IpcError::Authorization(msg) => (msg.clone(), Vec::new()),
            IpcError::RemoteExecution { message, trace, .. } => (message.clone(), trace.clone()),
            other => (other.to_string(), cause_chain(other)),
        };
        Self {
            kind,
            class: err.class_name().to_string(),
            message,
            trace,
        }
    }

    /// Wrap an error a handler returned.
    ///
    /// Always tagged [`FailureKind::RemoteExecution`]; the class and
    /// message of the original error are kept.
    pub fn from_handler_error(err: &IpcError) -> Self {
        Self {
            kind: FailureKind::RemoteExecution,
            ..Self::from_error(err)
        }
    }

    /// A failure raised by a panicking handler.
    pub fn panicked(method: &str, detail: &str) -> Self {
        Self {
            kind: FailureKind::RemoteExecution,
            class: "Panic".to_string(),
            message: format!("{} panicked: {}", method, detail),
            trace: Vec::new(),
        }
    }

    /// Convert into the caller-facing error.
    pub fn into_error(self) -> IpcError {
        match self.kind {
            FailureKind::MalformedInvocation => IpcError::MalformedInvocation(self.message),
            FailureKind::NoSuchMethod => IpcError::NoSuchMethod(self.message),
            FailureKind::Authorization => IpcError::Authorization(self.message),
            FailureKind::RemoteExecution => IpcError::RemoteExecution {
                class: self.class,
                message: self.message,
                trace: self.trace,
            },
        }
    }
}

fn cause_chain(err: &dyn StdError) -> Vec<String> {
    let mut trace = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        trace.push(cause.to_string());
        source = cause.source();
    }
    trace
}

/// The reply to one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Success {
        declared: TypeDescriptor,
        value: Value,
    },
    Failure(RemoteFailure),
}

impl RpcResponse {
    /// Encode: tag byte, then the codec object or the failure envelope.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        match self {
            RpcResponse::Success { declared, value } => {
                buf.push(TAG_SUCCESS);
                write_object(&mut buf, value, declared)?;
            }
            RpcResponse::Failure(failure) => {
                buf.push(TAG_FAILURE);
                write_field(&mut buf, failure)?;
            }
        }
        Ok(buf)
    }

    /// Decode a reply; an undecodable reply is a transport protocol error.
    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        let protocol = |e: CodecError| TransportError::Protocol(e.to_string());

        let (tag, mut input) = bytes
            .split_first()
            .ok_or_else(|| TransportError::Protocol("empty reply".to_string()))?;
        match *tag {
            TAG_SUCCESS => {
                let (value, declared) = read_object(&mut input).map_err(protocol)?;
                Ok(RpcResponse::Success { declared, value })
            }
            TAG_FAILURE => Ok(RpcResponse::Failure(
                read_field(&mut input).map_err(protocol)?,
            )),
            other => Err(TransportError::Protocol(format!(
                "unknown reply tag {}",
                other
            ))),
        }
    }

    /// Unwrap the value or convert the failure into an error.
    pub fn into_result(self) -> IpcResult<Value> {
        match self {
            RpcResponse::Success { value, .. } => Ok(value),
            RpcResponse::Failure(failure) => Err(failure.into_error()),
        }
    }
}
