//! In-process transport.
//!
//! A [`LocalNetwork`] maps peer addresses to dispatchers living in the same
//! process. Calls skip serialization of the envelope but still go through
//! the invocation codec and the full dispatch pipeline, so a cluster wired
//! over a `LocalNetwork` behaves like one wired over TCP. Unknown peers
//! refuse connections, and a peer can be made to fail with any transport
//! error.

use crate::dispatch::Dispatcher;
use crate::transport::{
    ConnectionConfig, ConnectionHeader, Transport, TransportError, TransportFactory,
    TransportResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strand_core::PeerAddress;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone)]
enum Endpoint {
    Serving(Arc<Dispatcher>),
    Failing(TransportError),
}

/// Registry of in-process peers. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    peers: Arc<Mutex<HashMap<PeerAddress, Endpoint>>>,
}

impl LocalNetwork {
    /// An empty network.
    pub fn new() -> Self {
        Self::default()
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<PeerAddress, Endpoint>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start serving `dispatcher` at `peer`.
    pub fn register(&self, peer: PeerAddress, dispatcher: Arc<Dispatcher>) {
        debug!(peer = %peer, "local peer up");
        self.peers().insert(peer, Endpoint::Serving(dispatcher));
    }

    /// Make every call to `peer` fail with `error`.
    pub fn fail_with(&self, peer: PeerAddress, error: TransportError) {
        self.peers().insert(peer, Endpoint::Failing(error));
    }

    /// Take `peer` off the network; later calls are refused.
    pub fn unregister(&self, peer: &PeerAddress) -> bool {
        self.peers().remove(peer).is_some()
    }

    /// Whether `peer` is serving or failing.
    pub fn is_registered(&self, peer: &PeerAddress) -> bool {
        self.peers().contains_key(peer)
    }

    fn endpoint(&self, peer: &PeerAddress) -> Option<Endpoint> {
        self.peers().get(peer).cloned()
    }
}

/// A client's view of a [`LocalNetwork`].
pub struct LocalTransport {
    network: LocalNetwork,
    closed: AtomicBool,
}

impl LocalTransport {
    /// A transport on `network`.
    pub fn new(network: LocalNetwork) -> Self {
        Self {
            network,
            closed: AtomicBool::new(false),
        }
    }

    /// Whether [`Transport::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn call(
        &self,
        target: &PeerAddress,
        header: &ConnectionHeader,
        payload: Vec<u8>,
    ) -> TransportResult<Vec<u8>> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        match self.network.endpoint(target) {
            Some(Endpoint::Serving(dispatcher)) => {
                Ok(dispatcher.handle(header, &payload, Instant::now()).await)
            }
            Some(Endpoint::Failing(error)) => Err(error),
            None => Err(TransportError::ConnectionRefused(format!(
                "no local peer at {}",
                target
            ))),
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Creates [`LocalTransport`]s on one network, counting them.
pub struct LocalTransportFactory {
    network: LocalNetwork,
    created: AtomicUsize,
}

impl LocalTransportFactory {
    /// A factory with no transports created yet.
    pub fn new(network: LocalNetwork) -> Self {
        Self {
            network,
            created: AtomicUsize::new(0),
        }
    }

    /// Number of transports created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl TransportFactory for LocalTransportFactory {
    fn create(&self, _config: &ConnectionConfig) -> Arc<dyn Transport> {
        self.created.fetch_add(1, Ordering::Relaxed);
        Arc::new(LocalTransport::new(self.network.clone()))
    }
}
