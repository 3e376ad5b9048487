//! Conversions between Rust types and wire values.

use crate::codec::{CodecError, CodecResult};
use crate::types::{TypeDescriptor, Value};

/// A Rust type that can travel as an RPC parameter or result.
pub trait RpcType: Sized {
    /// The declared wire type.
    fn descriptor() -> TypeDescriptor;

    /// Convert into a wire value.
    fn into_value(self) -> CodecResult<Value>;

    /// Convert back from a wire value.
    fn from_value(value: Value) -> CodecResult<Self>;
}

fn mismatch<T>(expected: TypeDescriptor, found: &Value) -> CodecResult<T> {
    Err(CodecError::TypeMismatch {
        expected: expected.to_string(),
        found: found.kind().to_string(),
    })
}

macro_rules! primitive_rpc_type {
    ($ty:ty, $desc:ident) => {
        impl RpcType for $ty {
            fn descriptor() -> TypeDescriptor {
                TypeDescriptor::$desc
            }

            fn into_value(self) -> CodecResult<Value> {
                Ok(Value::$desc(self))
            }

            fn from_value(value: Value) -> CodecResult<Self> {
                match value {
                    Value::$desc(v) => Ok(v),
                    other => mismatch(TypeDescriptor::$desc, &other),
                }
            }
        }
    };
}

primitive_rpc_type!(bool, Bool);
primitive_rpc_type!(u8, Byte);
primitive_rpc_type!(i32, Int);
primitive_rpc_type!(i64, Long);
primitive_rpc_type!(f32, Float);
primitive_rpc_type!(f64, Double);
primitive_rpc_type!(String, String);

impl RpcType for () {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Void
    }

    fn into_value(self) -> CodecResult<Value> {
        Ok(Value::Null)
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::Null => Ok(()),
            other => mismatch(TypeDescriptor::Void, &other),
        }
    }
}

/// Unsigned longs (protocol versions, counters) travel as `Long`.
impl RpcType for u64 {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Long
    }

    fn into_value(self) -> CodecResult<Value> {
        i64::try_from(self)
            .map(Value::Long)
            .map_err(|_| CodecError::Invalid(format!("{} does not fit in a long", self)))
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::Long(v) => u64::try_from(v)
                .map_err(|_| CodecError::Invalid(format!("negative long {} for unsigned", v))),
            other => mismatch(TypeDescriptor::Long, &other),
        }
    }
}

impl<T: RpcType> RpcType for Vec<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::array_of(T::descriptor())
    }

    fn into_value(self) -> CodecResult<Value> {
        self.into_iter()
            .map(T::into_value)
            .collect::<CodecResult<Vec<_>>>()
            .map(Value::Array)
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::Array(items) => items.into_iter().map(T::from_value).collect(),
            other => mismatch(Self::descriptor(), &other),
        }
    }
}

/// `None` travels as `Null`; only meaningful for nullable descriptors.
impl<T: RpcType> RpcType for Option<T> {
    fn descriptor() -> TypeDescriptor {
        T::descriptor()
    }

    fn into_value(self) -> CodecResult<Value> {
        match self {
            Some(v) => v.into_value(),
            None => Ok(Value::Null),
        }
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Implement [`RpcType`] for a serde record under a fixed wire type name.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use strand_core::{rpc_record, RpcType, TypeDescriptor};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Block {
///     id: i64,
/// }
/// rpc_record!(Block, "Block");
///
/// assert_eq!(Block::descriptor(), TypeDescriptor::record("Block"));
/// let value = Block { id: 1 }.into_value().unwrap();
/// assert_eq!(Block::from_value(value).unwrap(), Block { id: 1 });
/// ```
#[macro_export]
macro_rules! rpc_record {
    ($ty:ty, $name:expr) => {
        impl $crate::RpcType for $ty {
            fn descriptor() -> $crate::TypeDescriptor {
                $crate::TypeDescriptor::Record($name.to_string())
            }

            fn into_value(self) -> $crate::CodecResult<$crate::Value> {
                $crate::codec::record_to_value($name, &self)
            }

            fn from_value(value: $crate::Value) -> $crate::CodecResult<Self> {
                $crate::codec::record_from_value($name, value)
            }
        }
    };
}
