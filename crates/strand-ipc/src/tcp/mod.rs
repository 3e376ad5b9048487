//! TCP transport built on tarpc.
//!
//! - **Protocol**: the `IpcService` tarpc service carrying opaque envelopes
//! - **Client**: [`TcpTransport`], one connection per target, used through
//!   the connection pool via [`TcpTransportFactory`]
//! - **Server**: [`RpcServer`], serving a dispatcher with a bounded number
//!   of concurrent handlers
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_ipc::tcp::{RpcServer, TcpTransportFactory};
//!
//! let handle = RpcServer::new(Arc::new(dispatcher), 10)
//!     .start("127.0.0.1:50020".parse().unwrap())
//!     .await?;
//!
//! let pool = Arc::new(ConnectionPool::new(Arc::new(TcpTransportFactory)));
//! ```

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{TcpTransport, TcpTransportFactory, CALL_DEADLINE};
pub use protocol::{IpcService, IpcServiceClient};
pub use server::{RpcServer, ServerHandle};
