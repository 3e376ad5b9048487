//! Object codec.
//!
//! Writes a value together with its declared type so that the reading side
//! recovers both. All framing uses bincode's varint encoding with a size
//! limit, so a corrupt length prefix cannot trigger an unbounded
//! allocation.

use crate::types::{TypeDescriptor, Value};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use thiserror::Error;

/// Largest single object accepted by the codec.
pub const MAX_OBJECT_BYTES: u64 = 64 * 1024 * 1024;

/// Errors raised while encoding or decoding values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("type mismatch: declared {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("invalid value: {0}")]
    Invalid(String),
}

impl From<bincode::Error> for CodecError {
    fn from(e: bincode::Error) -> Self {
        CodecError::Serialization(e.to_string())
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

fn options() -> impl Options {
    bincode::options().with_limit(MAX_OBJECT_BYTES)
}

/// Write a single serde field (strings, counts, envelopes).
pub fn write_field<W: Write, T: Serialize + ?Sized>(out: &mut W, field: &T) -> CodecResult<()> {
    options().serialize_into(&mut *out, field)?;
    Ok(())
}

/// Read a single serde field written by [`write_field`].
pub fn read_field<R: Read, T: DeserializeOwned>(input: &mut R) -> CodecResult<T> {
    Ok(options().deserialize_from(&mut *input)?)
}

/// Write `value` tagged with its declared type.
///
/// Fails with `TypeMismatch` if the value does not conform to `declared`.
pub fn write_object<W: Write>(
    out: &mut W,
    value: &Value,
    declared: &TypeDescriptor,
) -> CodecResult<()> {
    if !declared.accepts(value) {
        return Err(CodecError::TypeMismatch {
            expected: declared.to_string(),
            found: value.kind().to_string(),
        });
    }
    write_field(out, &(declared, value))
}

/// Read a value and the type it was declared with.
pub fn read_object<R: Read>(input: &mut R) -> CodecResult<(Value, TypeDescriptor)> {
    let (declared, value): (TypeDescriptor, Value) = read_field(input)?;
    if !declared.accepts(&value) {
        return Err(CodecError::TypeMismatch {
            expected: declared.to_string(),
            found: value.kind().to_string(),
        });
    }
    Ok((value, declared))
}

/// Serialize a structured record into a `Value::Record`.
pub fn record_to_value<T: Serialize>(type_name: &str, record: &T) -> CodecResult<Value> {
    let data = options().serialize(record)?;
    Ok(Value::Record {
        type_name: type_name.to_string(),
        data,
    })
}

/// Deserialize a structured record from a `Value::Record` of the given name.
pub fn record_from_value<T: DeserializeOwned>(type_name: &str, value: Value) -> CodecResult<T> {
    match value {
        Value::Record { type_name: found, data } if found == type_name => {
            Ok(options().deserialize(&data)?)
        }
        Value::Record { type_name: found, .. } => Err(CodecError::TypeMismatch {
            expected: type_name.to_string(),
            found,
        }),
        other => Err(CodecError::TypeMismatch {
            expected: type_name.to_string(),
            found: other.kind().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: i64,
        name: String,
    }

    #[test]
    fn test_object_keeps_declared_type() {
        let mut buf = Vec::new();
        let declared = TypeDescriptor::array_of(TypeDescriptor::String);
        let value = Value::Array(vec![Value::String("a".into()), Value::Null]);
        write_object(&mut buf, &value, &declared).unwrap();

        let mut input = buf.as_slice();
        let (read, ty) = read_object(&mut input).unwrap();
        assert_eq!(read, value);
        assert_eq!(ty, declared);
        assert!(input.is_empty());
    }

    #[test]
    fn test_write_rejects_nonconforming_value() {
        let mut buf = Vec::new();
        let err = write_object(&mut buf, &Value::String("x".into()), &TypeDescriptor::Int)
            .unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_truncated_input_fails() {
        let mut buf = Vec::new();
        write_object(&mut buf, &Value::Long(1 << 40), &TypeDescriptor::Long).unwrap();
        let mut input = &buf[..buf.len() - 1];
        assert!(read_object(&mut input).is_err());
    }

    #[test]
    fn test_record_helpers() {
        let sample = Sample {
            id: 9,
            name: "blk".into(),
        };
        let value = record_to_value("Sample", &sample).unwrap();
        assert!(TypeDescriptor::record("Sample").accepts(&value));

        let back: Sample = record_from_value("Sample", value.clone()).unwrap();
        assert_eq!(back, sample);

        let wrong = record_from_value::<Sample>("Other", value);
        assert!(matches!(wrong, Err(CodecError::TypeMismatch { .. })));
    }
}
