//! # Strand Core
//!
//! Shared value model for the Strand IPC layer.
//!
//! Every remotely callable contract is expressed in terms of a small set of
//! wire types:
//!
//! - **TypeDescriptor**: the declared type of a parameter or return value
//! - **Value**: a dynamically typed value conforming to a descriptor
//! - **RpcType**: conversion between Rust types and `(TypeDescriptor, Value)`
//! - **codec**: the object codec that writes `(declared type, value)` pairs
//!
//! ## Quick Start
//!
//! ```rust
//! use strand_core::{RpcType, TypeDescriptor, Value};
//!
//! let value = 42i64.into_value().unwrap();
//! assert_eq!(value, Value::Long(42));
//! assert_eq!(i64::descriptor(), TypeDescriptor::Long);
//! ```

pub mod codec;
pub mod rpc_type;
pub mod types;
pub mod wire;

pub use codec::{read_object, write_object, CodecError, CodecResult};
pub use rpc_type::RpcType;
pub use types::{CallerIdentity, PeerAddress, TypeDescriptor, Value};
pub use wire::MAX_NESTING_DEPTH;
