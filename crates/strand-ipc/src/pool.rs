//! Reference-counted connection pool.
//!
//! The pool keeps at most one live [`PooledClient`] per distinct
//! [`ConnectionConfig`]. Every proxy or parallel call holds a [`Lease`] on
//! a pooled client; the client's transport is torn down when the last
//! lease is released.
//!
//! Transports are built by named [`TransportFactory`]s. The `factory` field
//! of a [`ConnectionConfig`] selects one; a name the pool does not know
//! falls back to the pool's default factory.
//!
//! # Thread Safety
//!
//! All bookkeeping (lookup, insert, decrement, removal) happens under one
//! mutex. Transport teardown happens after the lock is dropped, so a slow
//! shutdown never blocks other acquisitions. A client is removed from the
//! map before its teardown starts, so no later `acquire` can observe it.

use crate::error::IpcResult;
use crate::tcp::TcpTransportFactory;
use crate::transport::{
    ConnectionConfig, ConnectionHeader, Transport, TransportFactory, DEFAULT_FACTORY,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strand_core::PeerAddress;
use tracing::{debug, warn};

/// A transport-bound client shared by every lease with the same config.
pub struct PooledClient {
    id: u64,
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
}

impl PooledClient {
    /// Pool-unique identifier, for diagnostics.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The configuration this client is keyed under.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Send one request through the underlying transport.
    pub async fn call(
        &self,
        target: &PeerAddress,
        header: &ConnectionHeader,
        payload: Vec<u8>,
    ) -> IpcResult<Vec<u8>> {
        Ok(self.transport.call(target, header, payload).await?)
    }

    fn stop(&self) {
        debug!(client = self.id, factory = %self.config.factory, "stopping pooled client");
        self.transport.shutdown();
    }
}

impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}

struct PoolEntry {
    client: Arc<PooledClient>,
    ref_count: usize,
}

/// Registry of shared, reference-counted clients.
///
/// Created once per process and passed by reference (usually as
/// `Arc<ConnectionPool>`) to everything that makes calls.
pub struct ConnectionPool {
    default_factory: Arc<dyn TransportFactory>,
    factories: HashMap<String, Arc<dyn TransportFactory>>,
    clients: Mutex<HashMap<ConnectionConfig, PoolEntry>>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    /// Create an empty pool.
    ///
    /// `default_factory` builds clients for configs naming
    /// [`DEFAULT_FACTORY`] or any factory not registered with
    /// [`ConnectionPool::with_factory`].
    pub fn new(default_factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            default_factory,
            factories: HashMap::new(),
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// A pool speaking TCP by default, with TCP also registered as `"tcp"`.
    pub fn tcp() -> Self {
        Self::new(Arc::new(TcpTransportFactory))
            .with_factory("tcp", Arc::new(TcpTransportFactory))
    }

    /// Register `factory` under `name`, replacing any previous one.
    pub fn with_factory(
        mut self,
        name: impl Into<String>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Whether a factory is registered under `name`.
    pub fn has_factory(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    fn factory(&self, name: &str) -> &Arc<dyn TransportFactory> {
        match self.factories.get(name) {
            Some(factory) => factory,
            None => {
                if name != DEFAULT_FACTORY {
                    warn!(factory = name, "unknown transport factory, using the default");
                }
                &self.default_factory
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionConfig, PoolEntry>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a reference on the client for `config`, creating it if needed.
    pub fn acquire(self: &Arc<Self>, config: &ConnectionConfig) -> Lease {
        let client = {
            let mut clients = self.lock();
            match clients.get_mut(config) {
                Some(entry) => {
                    entry.ref_count += 1;
                    debug!(client = entry.client.id, refs = entry.ref_count, "reusing pooled client");
                    entry.client.clone()
                }
                None => {
                    let client = Arc::new(PooledClient {
                        id: self.next_id.fetch_add(1, Ordering::Relaxed),
                        config: config.clone(),
                        transport: self.factory(&config.factory).create(config),
                    });
                    debug!(client = client.id, factory = %config.factory, "created pooled client");
                    clients.insert(
                        config.clone(),
                        PoolEntry {
                            client: client.clone(),
                            ref_count: 1,
                        },
                    );
                    client
                }
            }
        };

        Lease {
            pool: Arc::clone(self),
            client,
            released: AtomicBool::new(false),
        }
    }

    /// Drop one reference on `client`.
    ///
    /// Returns `false` without touching any count when the client is no
    /// longer registered (already released to zero, or replaced).
    pub fn release(&self, client: &Arc<PooledClient>) -> bool {
        let teardown = {
            let mut clients = self.lock();
            let Some(entry) = clients.get_mut(&client.config) else {
                warn!(client = client.id, "release of a client that is not pooled");
                return false;
            };
            if !Arc::ptr_eq(&entry.client, client) {
                warn!(client = client.id, "release of a stale pooled client");
                return false;
            }

            entry.ref_count -= 1;
            if entry.ref_count == 0 {
                clients.remove(&client.config).map(|entry| entry.client)
            } else {
                None
            }
        };

        if let Some(client) = teardown {
            client.stop();
        }
        true
    }

    /// Current reference count of the client for `config` (0 if absent).
    pub fn ref_count(&self, config: &ConnectionConfig) -> usize {
        self.lock().get(config).map_or(0, |entry| entry.ref_count)
    }

    /// Number of live pooled clients.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no clients are pooled.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Tear down every pooled client, regardless of outstanding leases.
    ///
    /// Leases released afterwards are no-ops.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.lock().drain().map(|(_, entry)| entry.client).collect();
        for client in drained {
            client.stop();
        }
    }
}

/// One reference on a pooled client.
///
/// Released at most once, explicitly or on drop.
pub struct Lease {
    pool: Arc<ConnectionPool>,
    client: Arc<PooledClient>,
    released: AtomicBool,
}

impl Lease {
    /// The leased client.
    pub fn client(&self) -> &Arc<PooledClient> {
        &self.client
    }

    /// Release the reference; later calls return `false`.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.pool.release(&self.client)
    }

    /// Whether this lease has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResult;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        stopped: Arc<AtomicUsize>,
    }

    struct CountingTransport {
        stopped: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn call(
            &self,
            _target: &PeerAddress,
            _header: &ConnectionHeader,
            payload: Vec<u8>,
        ) -> TransportResult<Vec<u8>> {
            Ok(payload)
        }

        fn shutdown(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl TransportFactory for CountingFactory {
        fn create(&self, _config: &ConnectionConfig) -> Arc<dyn Transport> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Arc::new(CountingTransport {
                stopped: self.stopped.clone(),
            })
        }
    }

    fn pool() -> (Arc<ConnectionPool>, Arc<CountingFactory>) {
        let factory = Arc::new(CountingFactory::default());
        (Arc::new(ConnectionPool::new(factory.clone())), factory)
    }

    #[test]
    fn test_same_key_shares_one_client() {
        let (pool, factory) = pool();
        let config = ConnectionConfig::default();

        let a = pool.acquire(&config);
        let b = pool.acquire(&config);

        assert!(Arc::ptr_eq(a.client(), b.client()));
        assert_eq!(pool.ref_count(&config), 2);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_to_zero_removes_and_stops() {
        let (pool, factory) = pool();
        let config = ConnectionConfig::default();

        let a = pool.acquire(&config);
        let b = pool.acquire(&config);
        let client = a.client().clone();

        assert!(a.release());
        assert_eq!(pool.ref_count(&config), 1);
        assert_eq!(factory.stopped.load(Ordering::SeqCst), 0);

        assert!(b.release());
        assert_eq!(pool.ref_count(&config), 0);
        assert!(pool.is_empty());
        assert_eq!(factory.stopped.load(Ordering::SeqCst), 1);

        // A third release on the zero entry is a no-op.
        assert!(!pool.release(&client));
        assert_eq!(pool.ref_count(&config), 0);
        assert_eq!(factory.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lease_release_is_idempotent() {
        let (pool, _) = pool();
        let config = ConnectionConfig::default();

        let keep = pool.acquire(&config);
        let lease = pool.acquire(&config);
        assert!(lease.release());
        assert!(!lease.release());
        drop(lease);

        assert_eq!(pool.ref_count(&config), 1);
        drop(keep);
        assert_eq!(pool.ref_count(&config), 0);
    }

    #[test]
    fn test_distinct_keys_get_distinct_clients() {
        let (pool, factory) = pool();
        let a = pool.acquire(&ConnectionConfig::default());
        let b = pool.acquire(&ConnectionConfig::with_factory("other"));

        assert!(!Arc::ptr_eq(a.client(), b.client()));
        assert_eq!(pool.len(), 2);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reacquire_after_teardown_builds_new_client() {
        let (pool, factory) = pool();
        let config = ConnectionConfig::default();

        let first = pool.acquire(&config);
        let old = first.client().clone();
        drop(first);

        let second = pool.acquire(&config);
        assert!(!Arc::ptr_eq(&old, second.client()));
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);

        // The stale client cannot decrement the new entry.
        assert!(!pool.release(&old));
        assert_eq!(pool.ref_count(&config), 1);
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let (pool, factory) = pool();
        let a = pool.acquire(&ConnectionConfig::default());
        let _b = pool.acquire(&ConnectionConfig::with_factory("other"));

        pool.shutdown();
        assert!(pool.is_empty());
        assert_eq!(factory.stopped.load(Ordering::SeqCst), 2);
        assert!(!a.release());
    }

    #[test]
    fn test_concurrent_acquire_release_keeps_counts() {
        let (pool, factory) = pool();
        let config = ConnectionConfig::default();
        let anchor = pool.acquire(&config);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let config = config.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let lease = pool.acquire(&config);
                        lease.release();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.ref_count(&config), 1);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        drop(anchor);
        assert_eq!(factory.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_name_selects_factory() {
        let fallback = Arc::new(CountingFactory::default());
        let named = Arc::new(CountingFactory::default());
        let pool = Arc::new(
            ConnectionPool::new(fallback.clone()).with_factory("local", named.clone()),
        );
        assert!(pool.has_factory("local"));
        assert!(!pool.has_factory("tcp"));

        // Identical apart from the factory name.
        let _default = pool.acquire(&ConnectionConfig::default());
        let _local = pool.acquire(&ConnectionConfig::with_factory("local"));
        assert_eq!(fallback.created.load(Ordering::SeqCst), 1);
        assert_eq!(named.created.load(Ordering::SeqCst), 1);

        // Unknown names use the default factory.
        let _unknown = pool.acquire(&ConnectionConfig::with_factory("carrier-pigeon"));
        assert_eq!(fallback.created.load(Ordering::SeqCst), 2);
        assert_eq!(named.created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_tcp_pool_registers_tcp() {
        let pool = ConnectionPool::tcp();
        assert!(pool.has_factory("tcp"));
        assert!(pool.is_empty());
    }
}
