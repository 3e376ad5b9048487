//! Records exchanged between cluster nodes.

use serde::{Deserialize, Serialize};
use std::fmt;
use strand_core::rpc_record;

/// A replica-independent block identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Block {
    pub block_id: i64,
    pub num_bytes: i64,
    pub generation_stamp: i64,
}

impl Block {
    /// A block of `num_bytes` at `generation_stamp`.
    pub fn new(block_id: i64, num_bytes: i64, generation_stamp: i64) -> Self {
        Self {
            block_id,
            num_bytes,
            generation_stamp,
        }
    }

    /// File name of the block's data, `blk_<id>`.
    pub fn block_name(&self) -> String {
        format!("blk_{}", self.block_id)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blk_{}_{}", self.block_id, self.generation_stamp)
    }
}

rpc_record!(Block, "Block");

/// A block as seen by one data node, with its last verification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockMetaDataInfo {
    pub block: Block,
    /// Milliseconds since the epoch; 0 if never scanned.
    pub last_scan_time: i64,
}

impl BlockMetaDataInfo {
    /// Metadata for `block`, scanned at `last_scan_time`.
    pub fn new(block: Block, last_scan_time: i64) -> Self {
        Self {
            block,
            last_scan_time,
        }
    }
}

rpc_record!(BlockMetaDataInfo, "BlockMetaDataInfo");

/// Storage layout of a node's data directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageInfo {
    pub layout_version: i32,
    pub namespace_id: i32,
    pub c_time: i64,
}

impl StorageInfo {
    /// Storage info for a formatted namespace.
    pub fn new(layout_version: i32, namespace_id: i32, c_time: i64) -> Self {
        Self {
            layout_version,
            namespace_id,
            c_time,
        }
    }

    /// Identifies the namespace and layout a node was formatted with.
    pub fn registration_id(&self) -> String {
        format!(
            "NS-{}-{}-{}",
            self.namespace_id, self.layout_version, self.c_time
        )
    }
}

rpc_record!(StorageInfo, "StorageInfo");

/// What a data node sends when it registers with the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatanodeRegistration {
    /// Peer id of the node.
    pub id: String,
    pub storage_id: String,
    pub info_port: String,
    pub ipc_port: String,
    pub storage_info: StorageInfo,
}

impl DatanodeRegistration {
    /// An unregistered node; storage id and ports are empty.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Attach the storage id the coordinator assigned and the node's layout.
    pub fn with_storage(mut self, storage_id: impl Into<String>, info: StorageInfo) -> Self {
        self.storage_id = storage_id.into();
        self.storage_info = info;
        self
    }

    /// Ports the node serves its status page and IPC on.
    pub fn with_ports(mut self, info_port: impl Into<String>, ipc_port: impl Into<String>) -> Self {
        self.info_port = info_port.into();
        self.ipc_port = ipc_port.into();
        self
    }

    /// Layout version the node's storage uses.
    pub fn version(&self) -> i32 {
        self.storage_info.layout_version
    }

    /// See [`StorageInfo::registration_id`].
    pub fn registration_id(&self) -> String {
        self.storage_info.registration_id()
    }
}

impl fmt::Display for DatanodeRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DatanodeRegistration({}, storageID={}, infoPort={}, ipcPort={})",
            self.id, self.storage_id, self.info_port, self.ipc_port
        )
    }
}

rpc_record!(DatanodeRegistration, "DatanodeRegistration");

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::{RpcType, TypeDescriptor};

    #[test]
    fn test_block_display() {
        let block = Block::new(42, 1024, 7);
        assert_eq!(block.to_string(), "blk_42_7");
        assert_eq!(block.block_name(), "blk_42");
    }

    #[test]
    fn test_registration_display_and_id() {
        let reg = DatanodeRegistration::new("urn:peer:abc")
            .with_storage("DS-1", StorageInfo::new(-18, 463031076, 0))
            .with_ports("info-pipe", "ipc-pipe");

        assert_eq!(
            reg.to_string(),
            "DatanodeRegistration(urn:peer:abc, storageID=DS-1, infoPort=info-pipe, ipcPort=ipc-pipe)"
        );
        assert_eq!(reg.registration_id(), "NS-463031076--18-0");
        assert_eq!(reg.version(), -18);
    }

    #[test]
    fn test_records_have_wire_types() {
        assert_eq!(Block::descriptor(), TypeDescriptor::record("Block"));
        assert_eq!(
            Option::<BlockMetaDataInfo>::descriptor(),
            TypeDescriptor::record("BlockMetaDataInfo")
        );

        let info = BlockMetaDataInfo::new(Block::new(1, 2, 3), 99);
        let value = info.into_value().unwrap();
        assert_eq!(BlockMetaDataInfo::from_value(value).unwrap(), info);
    }
}
