//! Server-side dispatch.
//!
//! A [`Dispatcher`] owns the service bindings of one server. Each request
//! goes through the same stages:
//!
//! 1. **Received**: the payload is decoded into an [`Invocation`]
//! 2. **Resolved**: the binding is picked by the header's protocol, the
//!    handler by method name and parameter types
//! 3. **Authorized**: when the binding asks for it, the caller is checked
//!    against the access policy
//! 4. **Invoked**: the handler runs; queue and processing time are recorded
//! 5. **Responded**: the value, or a remote-error envelope
//!
//! Failures at any stage become a reply; nothing escapes to the transport.

pub mod authorize;
pub mod table;

pub use authorize::{AccessControlList, AccessPolicy, AllowAll, ProtocolAclPolicy};
pub use table::{param, params, DispatchTable, Handler, MethodEntry};

use crate::error::{IpcError, IpcResult};
use crate::invocation::Invocation;
use crate::metrics::RpcMetrics;
use crate::response::{RemoteFailure, RpcResponse};
use crate::transport::ConnectionHeader;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// A protocol's dispatch table plus its authorization switch.
#[derive(Debug, Clone)]
pub struct ServiceBinding {
    table: DispatchTable,
    authorization: bool,
}

impl ServiceBinding {
    /// Bind `table` with authorization off.
    pub fn new(table: DispatchTable) -> Self {
        Self {
            table,
            authorization: false,
        }
    }

    /// Check callers against the dispatcher's access policy before invoking.
    pub fn with_authorization(mut self, enabled: bool) -> Self {
        self.authorization = enabled;
        self
    }

    /// Protocol the bound table serves.
    pub fn protocol(&self) -> &str {
        self.table.protocol()
    }

    /// Whether callers are checked before invoking.
    pub fn authorization_enabled(&self) -> bool {
        self.authorization
    }

    /// The bound dispatch table.
    pub fn table(&self) -> &DispatchTable {
        &self.table
    }
}

/// Routes decoded invocations to bound handlers.
pub struct Dispatcher {
    bindings: HashMap<String, ServiceBinding>,
    policy: Arc<dyn AccessPolicy>,
    metrics: Arc<RpcMetrics>,
    verbose: bool,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// An empty dispatcher admitting every caller.
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
            policy: Arc::new(AllowAll),
            metrics: Arc::new(RpcMetrics::new()),
            verbose: false,
        }
    }

    /// Policy consulted for bindings with authorization on.
    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Log every call and return value at debug level.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Bind a service, replacing any binding for the same protocol.
    pub fn bind(&mut self, binding: ServiceBinding) -> &mut Self {
        let protocol = binding.protocol().to_string();
        info!(
            protocol = %protocol,
            version = binding.table.version(),
            authorization = binding.authorization,
            "binding service"
        );
        if self.bindings.insert(protocol.clone(), binding).is_some() {
            warn!(protocol = %protocol, "replaced existing service binding");
        }
        self
    }

    /// The binding serving `protocol`, if any.
    pub fn binding(&self, protocol: &str) -> Option<&ServiceBinding> {
        self.bindings.get(protocol)
    }

    /// Counters shared by every binding.
    pub fn metrics(&self) -> &Arc<RpcMetrics> {
        &self.metrics
    }

    /// Handle one request and encode the reply.
    pub async fn handle(
        &self,
        header: &ConnectionHeader,
        payload: &[u8],
        received_at: Instant,
    ) -> Vec<u8> {
        let response = self.dispatch(header, payload, received_at).await;
        match response.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(protocol = %header.protocol, error = %e, "reply could not be encoded");
                let failure = IpcError::RemoteExecution {
                    class: "EncodeError".to_string(),
                    message: e.to_string(),
                    trace: Vec::new(),
                };
                RpcResponse::Failure(RemoteFailure::from_error(&failure))
                    .encode()
                    .unwrap_or_else(|e| {
                        error!(error = %e, "failure envelope could not be encoded");
                        Vec::new()
                    })
            }
        }
    }

    /// Run a request through every stage and return the reply.
    #[instrument(skip_all, fields(protocol = %header.protocol, caller = %header.caller))]
    pub async fn dispatch(
        &self,
        header: &ConnectionHeader,
        payload: &[u8],
        received_at: Instant,
    ) -> RpcResponse {
        let invocation = match Invocation::decode(payload) {
            Ok(invocation) => invocation,
            Err(e) => {
                warn!(error = %e, "dropping malformed invocation");
                return failure(&e);
            }
        };

        let entry = match self.resolve(header, &invocation) {
            Ok(entry) => entry.clone(),
            Err(e) => {
                info!(error = %e, "unresolved call");
                return failure(&e);
            }
        };

        if let Err(e) = self.authorize(header) {
            warn!(error = %e, "call rejected");
            return failure(&e);
        }

        if self.verbose {
            debug!("call: {}", invocation);
        }

        let method = entry.signature.name.clone();
        let started = Instant::now();
        let queued = started.saturating_duration_since(received_at);
        let outcome = AssertUnwindSafe(async { (entry.handler)(invocation.into_parameters()).await })
            .catch_unwind()
            .await;
        self.metrics
            .record_call(&method, queued, started.elapsed())
            .await;

        let response = match outcome {
            Ok(Ok(value)) if entry.signature.return_type.accepts(&value) => RpcResponse::Success {
                declared: entry.signature.return_type,
                value,
            },
            Ok(Ok(value)) => {
                let e = IpcError::service(format!(
                    "{} returned {} but declares {}",
                    method,
                    value.kind(),
                    entry.signature.return_type
                ));
                error!(error = %e, "handler broke its signature");
                failure(&e)
            }
            Ok(Err(e)) => {
                info!(method = %method, error = %e, "call failed");
                RpcResponse::Failure(RemoteFailure::from_handler_error(&e))
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(method = %method, panic = %detail, "handler panicked");
                RpcResponse::Failure(RemoteFailure::panicked(&method, &detail))
            }
        };

        if self.verbose {
            match &response {
                RpcResponse::Success { value, .. } => debug!("return: {}", value),
                RpcResponse::Failure(f) => debug!("return: {}: {}", f.class, f.message),
            }
        }
        response
    }

    fn resolve(
        &self,
        header: &ConnectionHeader,
        invocation: &Invocation,
    ) -> IpcResult<&MethodEntry> {
        let binding = self.bindings.get(&header.protocol).ok_or_else(|| {
            IpcError::NoSuchMethod(format!("unknown protocol {}", header.protocol))
        })?;
        let key = invocation.key();
        binding
            .table
            .resolve(&key)
            .ok_or_else(|| IpcError::NoSuchMethod(format!("{}.{}", header.protocol, key)))
    }

    fn authorize(&self, header: &ConnectionHeader) -> IpcResult<()> {
        let Some(binding) = self.bindings.get(&header.protocol) else {
            return Ok(());
        };
        if !binding.authorization {
            return Ok(());
        }
        let result = self.policy.authorize(&header.caller, &header.protocol);
        self.metrics.record_authorization(result.is_ok());
        result
    }
}

fn failure(err: &IpcError) -> RpcResponse {
    RpcResponse::Failure(RemoteFailure::from_error(err))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
