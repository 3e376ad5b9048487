//! One method, many targets.

use crate::error::IpcResult;
use crate::invocation::{Invocation, MethodSignature};
use crate::invoker::send;
use crate::pool::{ConnectionPool, PooledClient};
use crate::transport::{ConnectionConfig, ConnectionHeader};
use futures::future::join_all;
use std::sync::Arc;
use strand_core::{CallerIdentity, PeerAddress, Value};
use tracing::{debug, warn};

async fn call_one(
    client: &PooledClient,
    header: &ConnectionHeader,
    method: &MethodSignature,
    target: PeerAddress,
    args: Vec<Value>,
) -> IpcResult<Value> {
    let invocation = Invocation::for_method(method, args)?;
    let result = send(client, &target, header, &invocation).await;
    if let Err(e) = &result {
        warn!(peer = %target, method = %method.name, error = %e, "parallel call failed");
    }
    result
}

/// Invoke `method` on every target concurrently over one pooled client.
///
/// `calls` pairs each target with its own arguments. Results come back in
/// the same order; a failing target only fails its own slot. Returns
/// `None` when the method returns nothing.
pub async fn call_all(
    pool: &Arc<ConnectionPool>,
    protocol: &str,
    method: &MethodSignature,
    calls: Vec<(PeerAddress, Vec<Value>)>,
    caller: &CallerIdentity,
    config: &ConnectionConfig,
) -> Option<Vec<IpcResult<Value>>> {
    let lease = pool.acquire(config);
    let header = ConnectionHeader::new(protocol, caller.clone());
    let targets = calls.len();

    let results = join_all(
        calls
            .into_iter()
            .map(|(target, args)| call_one(lease.client(), &header, method, target, args)),
    )
    .await;
    lease.release();

    debug!(
        method = %method.name,
        targets,
        failed = results.iter().filter(|r| r.is_err()).count(),
        "parallel call complete"
    );

    if method.return_type.is_void() {
        None
    } else {
        Some(results)
    }
}
