//! Data node to data node protocol, used during block recovery.

use crate::types::{Block, BlockMetaDataInfo};
use async_trait::async_trait;
use std::sync::Arc;
use strand_core::RpcType;
use strand_ipc::{
    arg, param, params, DispatchTable, Invoker, IpcResult, ProtocolProxy, VersionedProtocol,
};
use tracing::debug;

/// Operations one data node exposes to its peers.
#[async_trait]
pub trait InterDatanodeProtocol: Send + Sync + 'static {
    /// Metadata of the local replica of `block`, or `None` if this node
    /// does not hold it.
    async fn get_block_meta_data_info(&self, block: Block)
        -> IpcResult<Option<BlockMetaDataInfo>>;

    /// Replace `old` with `new`, optionally finalizing the replica.
    async fn update_block(&self, old: Block, new: Block, finalize: bool) -> IpcResult<()>;
}

pub mod signatures {
    use super::*;
    use strand_ipc::MethodSignature;

    /// `get_block_meta_data_info(Block) -> BlockMetaDataInfo`
    pub fn get_block_meta_data_info() -> MethodSignature {
        MethodSignature::new(
            "get_block_meta_data_info",
            vec![Block::descriptor()],
            BlockMetaDataInfo::descriptor(),
        )
    }

    /// `update_block(Block, Block, boolean)`
    pub fn update_block() -> MethodSignature {
        MethodSignature::new(
            "update_block",
            vec![Block::descriptor(), Block::descriptor(), bool::descriptor()],
            <()>::descriptor(),
        )
    }
}

/// Client stub for [`InterDatanodeProtocol`].
#[derive(Debug)]
pub struct InterDatanodeProxy {
    invoker: Invoker,
}

impl VersionedProtocol for InterDatanodeProxy {
    const NAME: &'static str = "InterDatanodeProtocol";
    const VERSION: u64 = 3;
}

impl ProtocolProxy for InterDatanodeProxy {
    fn from_invoker(invoker: Invoker) -> Self {
        Self { invoker }
    }

    fn invoker(&self) -> &Invoker {
        &self.invoker
    }
}

#[async_trait]
impl InterDatanodeProtocol for InterDatanodeProxy {
    async fn get_block_meta_data_info(
        &self,
        block: Block,
    ) -> IpcResult<Option<BlockMetaDataInfo>> {
        self.invoker
            .call_typed(&signatures::get_block_meta_data_info(), vec![arg(block)?])
            .await
    }

    async fn update_block(&self, old: Block, new: Block, finalize: bool) -> IpcResult<()> {
        self.invoker
            .call_typed(
                &signatures::update_block(),
                vec![arg(old)?, arg(new)?, arg(finalize)?],
            )
            .await
    }
}

/// Dispatch table serving `service` under [`InterDatanodeProxy::NAME`].
pub fn inter_datanode_table(service: Arc<dyn InterDatanodeProtocol>) -> DispatchTable {
    let lookup = service.clone();
    DispatchTable::new(InterDatanodeProxy::NAME, InterDatanodeProxy::VERSION)
        .method(signatures::get_block_meta_data_info(), move |args| {
            let service = lookup.clone();
            async move {
                let [block] = params::<1>(args)?;
                let block: Block = param(block)?;
                debug!(%block, "block metadata requested");
                arg(service.get_block_meta_data_info(block).await?)
            }
        })
        .method(signatures::update_block(), move |args| {
            let service = service.clone();
            async move {
                let [old, new, finalize] = params::<3>(args)?;
                let (old, new): (Block, Block) = (param(old)?, param(new)?);
                service.update_block(old, new, param(finalize)?).await?;
                arg(())
            }
        })
}
