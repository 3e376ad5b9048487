//! Client-side call path.
//!
//! An [`Invoker`] is the engine behind every typed proxy: it turns a method
//! signature plus arguments into an [`Invocation`], sends it through the
//! leased pooled client and converts the reply back into a value or an
//! [`IpcError`].

use crate::error::{IpcError, IpcResult};
use crate::invocation::{Invocation, MethodSignature};
use crate::pool::{Lease, PooledClient};
use crate::response::RpcResponse;
use crate::transport::{ConnectionHeader, TransportError};
use strand_core::{CallerIdentity, PeerAddress, RpcType, Value};
use tokio::time::Instant;
use tracing::debug;

/// Convert a typed argument into a wire value.
pub fn arg<T: RpcType>(value: T) -> IpcResult<Value> {
    value
        .into_value()
        .map_err(|e| IpcError::MalformedInvocation(e.to_string()))
}

/// Convert a reply value into the declared Rust return type.
pub fn reply<R: RpcType>(value: Value) -> IpcResult<R> {
    R::from_value(value).map_err(|e| TransportError::Protocol(e.to_string()).into())
}

/// Send one encoded invocation and decode the reply.
pub(crate) async fn send(
    client: &PooledClient,
    target: &PeerAddress,
    header: &ConnectionHeader,
    invocation: &Invocation,
) -> IpcResult<Value> {
    let payload = invocation.encode()?;
    let start = Instant::now();
    let result = client.call(target, header, payload).await;
    debug!(
        method = invocation.method_name(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        peer = %target.short_id(),
        "call"
    );
    RpcResponse::decode(&result?)?.into_result()
}

/// Call engine bound to one protocol, target and caller.
pub struct Invoker {
    protocol: String,
    target: PeerAddress,
    caller: CallerIdentity,
    lease: Lease,
}

impl Invoker {
    /// Bind a call engine to one pooled client.
    ///
    /// # Arguments
    ///
    /// * `protocol` - Protocol name sent in every connection header
    /// * `target` - Address of the serving peer
    /// * `caller` - Identity the server authorizes against
    /// * `lease` - Reference to the pooled client; released by [`Invoker::close`]
    pub fn new(
        protocol: impl Into<String>,
        target: PeerAddress,
        caller: CallerIdentity,
        lease: Lease,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            target,
            caller,
            lease,
        }
    }

    /// Name of the protocol this invoker speaks.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The peer every call goes to.
    pub fn target(&self) -> &PeerAddress {
        &self.target
    }

    /// Identity presented to the server.
    pub fn caller(&self) -> &CallerIdentity {
        &self.caller
    }

    /// Whether [`Invoker::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.lease.is_released()
    }

    /// Invoke `signature` with `args` and wait for the reply value.
    pub async fn call(&self, signature: &MethodSignature, args: Vec<Value>) -> IpcResult<Value> {
        if self.is_closed() {
            return Err(IpcError::ProxyClosed(self.protocol.clone()));
        }

        let invocation = Invocation::for_method(signature, args)?;
        let header = ConnectionHeader::new(self.protocol.as_str(), self.caller.clone());
        send(self.lease.client(), &self.target, &header, &invocation).await
    }

    /// Like [`Invoker::call`], converting the reply into `R`.
    ///
    /// A reply that does not convert is a transport protocol error.
    pub async fn call_typed<R: RpcType>(
        &self,
        signature: &MethodSignature,
        args: Vec<Value>,
    ) -> IpcResult<R> {
        reply(self.call(signature, args).await?)
    }

    /// Release the pooled client. Later calls return `false`.
    pub fn close(&self) -> bool {
        let released = self.lease.release();
        if released {
            debug!(protocol = %self.protocol, peer = %self.target.short_id(), "proxy closed");
        }
        released
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("protocol", &self.protocol)
            .field("target", &self.target)
            .field("caller", &self.caller)
            .field("closed", &self.is_closed())
            .finish()
    }
}
