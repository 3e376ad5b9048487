//! TCP client transport.
//!
//! One tarpc connection per target address, opened on first use and kept
//! until the transport is shut down or the connection fails.

use crate::tcp::protocol::IpcServiceClient;
use crate::transport::{
    ConnectionConfig, ConnectionHeader, Transport, TransportError, TransportFactory,
    TransportResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use strand_core::PeerAddress;
use tarpc::client::{Config, RpcError};
use tarpc::context::{self, Context};
use tokio_serde::formats::Bincode;
use tracing::{debug, info, warn};

/// Transport speaking the [`IpcService`](crate::tcp::protocol::IpcService)
/// protocol over TCP.
pub struct TcpTransport {
    config: ConnectionConfig,
    connections: Mutex<HashMap<PeerAddress, IpcServiceClient>>,
    closed: AtomicBool,
}

impl TcpTransport {
    /// A transport with no open connections; they open on first call.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<PeerAddress, IpcServiceClient>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections().len()
    }

    async fn connection(&self, target: &PeerAddress) -> TransportResult<IpcServiceClient> {
        if let Some(client) = self.connections().get(target) {
            return Ok(client.clone());
        }

        let addr = tokio::net::lookup_host(target.as_str())
            .await?
            .next()
            .ok_or_else(|| TransportError::Io(format!("{} did not resolve", target)))?;

        debug!("Connecting to {}", addr);
        let transport = tokio::time::timeout(
            self.config.connect_timeout,
            tarpc::serde_transport::tcp::connect(addr, Bincode::default),
        )
        .await
        .map_err(|_| TransportError::TimedOut(format!("connect to {}", target)))??;

        let mut tarpc_config = Config::default();
        tarpc_config.max_in_flight_requests = self.config.max_pending_requests;
        let client = IpcServiceClient::new(tarpc_config, transport).spawn();
        info!("Connected to {}", addr);

        Ok(self
            .connections()
            .entry(target.clone())
            .or_insert(client)
            .clone())
    }
}

/// How long a call may run before tarpc gives up on it.
///
/// Calls are not cancelled mid-flight, so this only has to outlast any real
/// handler. tarpc tracks deadlines in a timer wheel that rejects anything
/// past roughly two years, which rules out `Duration::MAX`.
pub const CALL_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Request context for one call, with [`CALL_DEADLINE`] in place of
/// tarpc's ten second default.
fn call_context() -> Context {
    let mut ctx = context::current();
    ctx.deadline = SystemTime::now() + CALL_DEADLINE;
    ctx
}

fn classify(target: &PeerAddress, error: RpcError) -> TransportError {
    match error {
        RpcError::DeadlineExceeded => TransportError::TimedOut(format!("call to {}", target)),
        other => TransportError::ConnectionLost(format!("{}: {}", target, other)),
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn call(
        &self,
        target: &PeerAddress,
        header: &ConnectionHeader,
        payload: Vec<u8>,
    ) -> TransportResult<Vec<u8>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let client = self.connection(target).await?;
        match client
            .invoke(call_context(), header.clone(), payload)
            .await
        {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!("Call to {} failed: {}", target, e);
                self.connections().remove(target);
                Err(classify(target, e))
            }
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let dropped = self.connections().drain().count();
        debug!(connections = dropped, "tcp transport shut down");
    }
}

/// Creates a [`TcpTransport`] per pooled client.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransportFactory;

impl TransportFactory for TcpTransportFactory {
    fn create(&self, config: &ConnectionConfig) -> Arc<dyn Transport> {
        Arc::new(TcpTransport::new(config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::CallerIdentity;

    #[tokio::test]
    async fn test_nothing_listening_is_refused() {
        // Grab a free port, then release it.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = TcpTransport::new(ConnectionConfig::default());
        let target = PeerAddress::new(format!("127.0.0.1:{}", port));
        let header = ConnectionHeader::new("P", CallerIdentity::user("u"));

        let err = transport.call(&target, &header, Vec::new()).await.unwrap_err();
        assert!(err.is_connection_refused());
        assert_eq!(transport.connection_count(), 0);
    }

    #[test]
    fn test_call_context_outlasts_default_deadline() {
        let ctx = call_context();
        let remaining = ctx.deadline.duration_since(SystemTime::now()).unwrap();
        assert!(remaining > Duration::from_secs(300 * 24 * 60 * 60));
        assert!(remaining <= CALL_DEADLINE);
    }

    #[tokio::test]
    async fn test_shutdown_closes_transport() {
        let transport = TcpTransport::new(ConnectionConfig::default());
        transport.shutdown();

        let header = ConnectionHeader::new("P", CallerIdentity::user("u"));
        let err = transport
            .call(&PeerAddress::new("127.0.0.1:1"), &header, Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }
}
