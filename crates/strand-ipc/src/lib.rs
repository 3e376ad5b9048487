//! # Strand IPC
//!
//! Versioned remote procedure calls between storage cluster nodes.
//!
//! A caller builds a typed proxy for a protocol with [`get_proxy`] or
//! [`wait_for_proxy`]; the proxy's calls travel as [`Invocation`]s over a
//! reference-counted [`ConnectionPool`] client and are executed by the
//! remote [`Dispatcher`]. [`call_all`] fans one method out to many nodes.
//!
//! Transports are pluggable: [`tcp`] speaks tarpc over TCP, [`local`]
//! connects dispatchers living in the same process.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod invocation;
pub mod invoker;
pub mod local;
pub mod metrics;
pub mod parallel;
pub mod pool;
pub mod proxy;
pub mod response;
pub mod tcp;
pub mod transport;

pub use config::{ClientConfig, ConfigError, IpcConfig, ServerConfig};
pub use dispatch::{
    param, params, AccessControlList, AccessPolicy, AllowAll, DispatchTable, Dispatcher,
    ProtocolAclPolicy, ServiceBinding,
};
pub use error::{IpcError, IpcResult};
pub use invocation::{Invocation, MethodKey, MethodSignature, GET_PROTOCOL_VERSION};
pub use invoker::{arg, reply, Invoker};
pub use local::{LocalNetwork, LocalTransportFactory};
pub use metrics::{MetricsSnapshot, RateSnapshot, RpcMetrics};
pub use parallel::call_all;
pub use pool::{ConnectionPool, Lease, PooledClient};
pub use proxy::{get_proxy, stop_proxy, wait_for_proxy, ProtocolProxy, VersionedProtocol};
pub use response::{FailureKind, RemoteFailure, RpcResponse};
pub use tcp::{RpcServer, ServerHandle, TcpTransportFactory};
pub use transport::{
    ConnectionConfig, ConnectionHeader, Transport, TransportError, TransportFactory,
    TransportResult, DEFAULT_FACTORY,
};
