//! Data node to coordinator protocol.

use crate::types::DatanodeRegistration;
use async_trait::async_trait;
use std::sync::Arc;
use strand_core::RpcType;
use strand_ipc::{
    arg, param, params, DispatchTable, Invoker, IpcResult, ProtocolProxy, VersionedProtocol,
};
use tracing::{info, warn};

/// Error codes for [`DatanodeProtocol::error_report`].
pub const NOTIFY: i32 = 0;
pub const DISK_ERROR: i32 = 1;
pub const INVALID_BLOCK: i32 = 2;

/// Operations the coordinator exposes to data nodes.
#[async_trait]
pub trait DatanodeProtocol: Send + Sync + 'static {
    /// Register a node; the reply carries the assigned storage id.
    async fn register(&self, registration: DatanodeRegistration)
        -> IpcResult<DatanodeRegistration>;

    /// Report a problem seen on a node.
    async fn error_report(
        &self,
        registration: DatanodeRegistration,
        code: i32,
        message: String,
    ) -> IpcResult<()>;
}

pub mod signatures {
    use super::*;
    use strand_ipc::MethodSignature;

    /// `register(DatanodeRegistration) -> DatanodeRegistration`
    pub fn register() -> MethodSignature {
        MethodSignature::new(
            "register",
            vec![DatanodeRegistration::descriptor()],
            DatanodeRegistration::descriptor(),
        )
    }

    /// `error_report(DatanodeRegistration, int, String)`
    pub fn error_report() -> MethodSignature {
        MethodSignature::new(
            "error_report",
            vec![
                DatanodeRegistration::descriptor(),
                i32::descriptor(),
                String::descriptor(),
            ],
            <()>::descriptor(),
        )
    }
}

/// Client stub for [`DatanodeProtocol`].
#[derive(Debug)]
pub struct DatanodeProxy {
    invoker: Invoker,
}

impl VersionedProtocol for DatanodeProxy {
    const NAME: &'static str = "DatanodeProtocol";
    const VERSION: u64 = 19;
}

impl ProtocolProxy for DatanodeProxy {
    fn from_invoker(invoker: Invoker) -> Self {
        Self { invoker }
    }

    fn invoker(&self) -> &Invoker {
        &self.invoker
    }
}

#[async_trait]
impl DatanodeProtocol for DatanodeProxy {
    async fn register(
        &self,
        registration: DatanodeRegistration,
    ) -> IpcResult<DatanodeRegistration> {
        self.invoker
            .call_typed(&signatures::register(), vec![arg(registration)?])
            .await
    }

    async fn error_report(
        &self,
        registration: DatanodeRegistration,
        code: i32,
        message: String,
    ) -> IpcResult<()> {
        self.invoker
            .call_typed(
                &signatures::error_report(),
                vec![arg(registration)?, arg(code)?, arg(message)?],
            )
            .await
    }
}

/// Dispatch table serving `service` under [`DatanodeProxy::NAME`].
pub fn datanode_table(service: Arc<dyn DatanodeProtocol>) -> DispatchTable {
    let registrar = service.clone();
    DispatchTable::new(DatanodeProxy::NAME, DatanodeProxy::VERSION)
        .method(signatures::register(), move |args| {
            let service = registrar.clone();
            async move {
                let [registration] = params::<1>(args)?;
                let registration: DatanodeRegistration = param(registration)?;
                info!(node = %registration, "registering data node");
                arg(service.register(registration).await?)
            }
        })
        .method(signatures::error_report(), move |args| {
            let service = service.clone();
            async move {
                let [registration, code, message] = params::<3>(args)?;
                let registration: DatanodeRegistration = param(registration)?;
                let (code, message): (i32, String) = (param(code)?, param(message)?);
                if code != NOTIFY {
                    warn!(node = %registration.id, code, "{}", message);
                }
                service.error_report(registration, code, message).await?;
                arg(())
            }
        })
}
