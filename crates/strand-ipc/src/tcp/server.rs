//! TCP server.
//!
//! Accepts tarpc connections and feeds every request to a shared
//! [`Dispatcher`]. At most `handler_count` handlers run at once; time spent
//! waiting for a handler slot counts as queue time.

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::IpcError;
use crate::response::{RemoteFailure, RpcResponse};
use crate::tcp::protocol::IpcService;
use crate::transport::ConnectionHeader;
use futures::{Future, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tarpc::context::Context;
use tarpc::server::{self, Channel};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_serde::formats::Bincode;
use tracing::{debug, info, instrument, warn};

/// Connections served concurrently.
const MAX_CONNECTIONS: usize = 256;

/// Serves a [`Dispatcher`] over TCP.
///
/// # Example
///
/// ```rust,ignore
/// let server = RpcServer::new(Arc::new(dispatcher), 10);
/// let handle = server.start("127.0.0.1:50020".parse().unwrap()).await?;
/// // ...
/// handle.stop();
/// ```
#[derive(Clone)]
pub struct RpcServer {
    dispatcher: Arc<Dispatcher>,
    handlers: Arc<Semaphore>,
}

impl RpcServer {
    /// Serve `dispatcher` with at most `handler_count` concurrent handlers.
    ///
    /// A count of zero is treated as one.
    pub fn new(dispatcher: Arc<Dispatcher>, handler_count: usize) -> Self {
        Self {
            dispatcher,
            handlers: Arc::new(Semaphore::new(handler_count.max(1))),
        }
    }

    /// Like [`RpcServer::new`], taking the handler count from `config`.
    pub fn from_config(dispatcher: Arc<Dispatcher>, config: &ServerConfig) -> Self {
        Self::new(dispatcher, config.handler_count)
    }

    /// The dispatcher requests are routed to.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Bind `addr` and serve in a background task.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the address.
    pub async fn start(self, addr: SocketAddr) -> Result<ServerHandle, std::io::Error> {
        let listener = tarpc::serde_transport::tcp::listen(&addr, Bincode::default).await?;
        let local_addr = listener.local_addr();
        info!("IPC server listening on {}", local_addr);

        let handlers = self.handlers.clone();
        let task = tokio::spawn(async move {
            listener
                .filter_map(|r| futures::future::ready(r.ok()))
                .map(server::BaseChannel::with_defaults)
                .for_each_concurrent(MAX_CONNECTIONS, |channel| {
                    let server = self.clone();
                    async move { channel.execute(server.serve()).for_each(spawn).await }
                })
                .await;
        });

        Ok(ServerHandle {
            local_addr,
            handlers,
            task,
        })
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

impl IpcService for RpcServer {
    #[instrument(skip(self, _ctx, payload), fields(protocol = %header.protocol, bytes = payload.len()))]
    async fn invoke(self, _ctx: Context, header: ConnectionHeader, payload: Vec<u8>) -> Vec<u8> {
        let received_at = Instant::now();
        let _permit = match self.handlers.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Rejecting call, server is stopping");
                let stopping = IpcError::service("server is stopping");
                return RpcResponse::Failure(RemoteFailure::from_error(&stopping))
                    .encode()
                    .unwrap_or_default();
            }
        };
        self.dispatcher.handle(&header, &payload, received_at).await
    }
}

/// A running [`RpcServer`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    handlers: Arc<Semaphore>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address; useful after binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and reject queued calls.
    pub fn stop(&self) {
        info!("Stopping IPC server on {}", self.local_addr);
        self.handlers.close();
        self.task.abort();
    }

    /// Whether [`ServerHandle::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.handlers.is_closed()
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if !self.is_stopped() {
            warn!("IPC server on {} dropped while running", self.local_addr);
        }
        self.handlers.close();
        self.task.abort();
    }
}
