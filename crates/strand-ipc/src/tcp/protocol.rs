//! tarpc service definition for the TCP transport.

use crate::transport::ConnectionHeader;

/// The single RPC the TCP transport carries.
///
/// The payload is an encoded invocation and the reply an encoded
/// response; tarpc only moves the bytes and the header.
#[tarpc::service]
pub trait IpcService {
    /// Deliver one invocation to the server's dispatcher.
    async fn invoke(header: ConnectionHeader, payload: Vec<u8>) -> Vec<u8>;
}
