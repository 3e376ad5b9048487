//! Typed proxy construction and protocol version negotiation.
//!
//! A contract is named and versioned through [`VersionedProtocol`]; its
//! client stub implements [`ProtocolProxy`] by wrapping an [`Invoker`].
//! Before a stub is handed out, [`get_proxy`] asks the server for its
//! version of the protocol and refuses to proceed on any disagreement.

use crate::error::{IpcError, IpcResult};
use crate::invocation::MethodSignature;
use crate::invoker::{arg, Invoker};
use crate::pool::ConnectionPool;
use crate::transport::ConnectionConfig;
use std::sync::Arc;
use std::time::Duration;
use strand_core::{CallerIdentity, PeerAddress};
use tokio::time::Instant;
use tracing::{debug, info};

/// Delay between connection attempts in [`wait_for_proxy`].
pub const RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// A remotely callable contract with a name and a version.
pub trait VersionedProtocol {
    /// Protocol name sent in every connection header.
    const NAME: &'static str;
    /// The version this build of the contract speaks.
    const VERSION: u64;
}

/// A client stub for a [`VersionedProtocol`].
pub trait ProtocolProxy: VersionedProtocol + Sized {
    /// Wrap an invoker already bound to this protocol.
    fn from_invoker(invoker: Invoker) -> Self;

    /// The invoker the stub delegates to.
    fn invoker(&self) -> &Invoker;

    /// Release the stub's pooled client. Idempotent.
    fn close(&self) -> bool {
        self.invoker().close()
    }
}

/// Build a proxy for `P` at `target` after checking protocol versions.
///
/// Issues `get_protocol_version(P::NAME, client_version)`. If the server
/// answers a different version the pooled client is released and
/// `VersionMismatch` is returned. Any failure releases the client.
pub async fn get_proxy<P: ProtocolProxy>(
    pool: &Arc<ConnectionPool>,
    client_version: u64,
    target: &PeerAddress,
    caller: &CallerIdentity,
    config: &ConnectionConfig,
) -> IpcResult<P> {
    let invoker = Invoker::new(P::NAME, target.clone(), caller.clone(), pool.acquire(config));

    let server_version: u64 = invoker
        .call_typed(
            &MethodSignature::protocol_version(),
            vec![arg(P::NAME.to_string())?, arg(client_version)?],
        )
        .await?;

    if server_version != client_version {
        invoker.close();
        return Err(IpcError::VersionMismatch {
            protocol: P::NAME.to_string(),
            client_version,
            server_version,
        });
    }

    debug!(protocol = P::NAME, version = client_version, peer = %target, "proxy ready");
    Ok(P::from_invoker(invoker))
}

/// Like [`get_proxy`], retrying while the server is not up yet.
///
/// A refused connection is retried every [`RETRY_INTERVAL`] until
/// `timeout` has elapsed, after which the last refusal is returned. A
/// connection timeout fails at once with `PeerUnreachable`; a version
/// mismatch and any other error are never retried. `Duration::MAX` waits
/// indefinitely.
pub async fn wait_for_proxy<P: ProtocolProxy>(
    pool: &Arc<ConnectionPool>,
    client_version: u64,
    target: &PeerAddress,
    caller: &CallerIdentity,
    config: &ConnectionConfig,
    timeout: Duration,
) -> IpcResult<P> {
    let start = Instant::now();
    loop {
        match get_proxy::<P>(pool, client_version, target, caller, config).await {
            Ok(proxy) => return Ok(proxy),
            Err(err) if err.is_connection_refused() => {
                info!(peer = %target, "server not available yet, retrying");
                if start.elapsed() >= timeout {
                    return Err(err);
                }
            }
            Err(IpcError::Transport(source)) if source.is_timeout() => {
                info!(peer = %target, "problem connecting to server");
                return Err(IpcError::PeerUnreachable {
                    peer: target.short_id(),
                    source,
                });
            }
            Err(err) => return Err(err),
        }
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

/// Release a proxy's pooled client.
pub fn stop_proxy<P: ProtocolProxy>(proxy: &P) {
    proxy.close();
}
