//! # Strand Protocol
//!
//! The contracts storage cluster nodes speak over Strand IPC.
//!
//! Each contract comes as a trait, a client proxy implementing it and a
//! function building the server side [`DispatchTable`](strand_ipc::DispatchTable):
//!
//! - **InterDatanodeProtocol**: block recovery between data nodes
//! - **DatanodeProtocol**: registration and error reports to the coordinator

pub mod datanode;
pub mod inter_datanode;
pub mod types;

pub use datanode::{datanode_table, DatanodeProtocol, DatanodeProxy};
pub use inter_datanode::{inter_datanode_table, InterDatanodeProtocol, InterDatanodeProxy};
pub use types::{Block, BlockMetaDataInfo, DatanodeRegistration, StorageInfo};
