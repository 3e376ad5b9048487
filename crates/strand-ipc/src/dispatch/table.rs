//! Per-protocol method tables.

use crate::error::{IpcError, IpcResult};
use crate::invocation::{MethodKey, MethodSignature};
use crate::invoker::arg;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use strand_core::{RpcType, Value};

/// A bound method implementation.
pub type Handler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, IpcResult<Value>> + Send + Sync>;

/// Split handler arguments into exactly `N` values.
pub fn params<const N: usize>(args: Vec<Value>) -> IpcResult<[Value; N]> {
    <[Value; N]>::try_from(args).map_err(|args| {
        IpcError::MalformedInvocation(format!("expected {} parameters, got {}", N, args.len()))
    })
}

/// Convert one handler argument into its Rust type.
pub fn param<T: RpcType>(value: Value) -> IpcResult<T> {
    T::from_value(value).map_err(|e| IpcError::MalformedInvocation(e.to_string()))
}

/// A method signature with its handler.
#[derive(Clone)]
pub struct MethodEntry {
    pub signature: MethodSignature,
    pub handler: Handler,
}

/// Maps `(method name, parameter types)` to handlers for one protocol.
///
/// Every table answers `get_protocol_version` with its own version.
#[derive(Clone)]
pub struct DispatchTable {
    protocol: String,
    version: u64,
    methods: HashMap<MethodKey, MethodEntry>,
}

impl DispatchTable {
    /// A table for `protocol` at `version`.
    ///
    /// The protocol version query is registered up front and answers only
    /// for `protocol`.
    pub fn new(protocol: impl Into<String>, version: u64) -> Self {
        let protocol = protocol.into();
        let table = Self {
            protocol: protocol.clone(),
            version,
            methods: HashMap::new(),
        };
        table.method(MethodSignature::protocol_version(), move |args| {
            let answer = match args.as_slice() {
                [Value::String(requested), _] if *requested == protocol => arg(version),
                [Value::String(requested), _] => Err(IpcError::service(format!(
                    "unknown protocol {} (serving {})",
                    requested, protocol
                ))),
                _ => Err(IpcError::MalformedInvocation(
                    "get_protocol_version expects (protocol, version)".to_string(),
                )),
            };
            futures::future::ready(answer)
        })
    }

    /// Register `handler` for `signature`, replacing any previous entry.
    pub fn method<F, Fut>(mut self, signature: MethodSignature, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = IpcResult<Value>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| handler(args).boxed());
        self.methods
            .insert(signature.key(), MethodEntry { signature, handler });
        self
    }

    /// Protocol name served.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Version answered to the version query.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Handler for an exact name and parameter type match.
    pub fn resolve(&self, key: &MethodKey) -> Option<&MethodEntry> {
        self.methods.get(key)
    }

    /// All registered signatures, sorted by name.
    pub fn signatures(&self) -> Vec<&MethodSignature> {
        let mut signatures: Vec<_> = self.methods.values().map(|e| &e.signature).collect();
        signatures.sort_by(|a, b| a.name.cmp(&b.name));
        signatures
    }

    /// Number of registered methods, the version query included.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("protocol", &self.protocol)
            .field("version", &self.version)
            .field("methods", &self.signatures())
            .finish()
    }
}
