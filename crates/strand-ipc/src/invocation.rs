//! Wire representation of one method call.
//!
//! An [`Invocation`] carries the method name, the declared parameter types
//! and the parameter values. It encodes itself with the object codec so
//! the server recovers both the values and the signature it resolves
//! against.

use crate::error::{IpcError, IpcResult};
use std::fmt;
use strand_core::codec::{read_field, read_object, write_field, write_object};
use strand_core::{TypeDescriptor, Value};

/// Name of the version query every protocol answers.
pub const GET_PROTOCOL_VERSION: &str = "get_protocol_version";

/// Lookup key of a method: name plus parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub name: String,
    pub parameter_types: Vec<TypeDescriptor>,
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, ty) in self.parameter_types.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ty)?;
        }
        write!(f, ")")
    }
}

/// Full signature of a contract method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub name: String,
    pub parameter_types: Vec<TypeDescriptor>,
    pub return_type: TypeDescriptor,
}

impl MethodSignature {
    /// A signature from its name, parameter types and return type.
    pub fn new(
        name: impl Into<String>,
        parameter_types: Vec<TypeDescriptor>,
        return_type: TypeDescriptor,
    ) -> Self {
        Self {
            name: name.into(),
            parameter_types,
            return_type,
        }
    }

    /// Signature of the reserved version query:
    /// `get_protocol_version(string protocol, long client_version) -> long`.
    pub fn protocol_version() -> Self {
        Self::new(
            GET_PROTOCOL_VERSION,
            vec![TypeDescriptor::String, TypeDescriptor::Long],
            TypeDescriptor::Long,
        )
    }

    /// The dispatch key of this signature.
    pub fn key(&self) -> MethodKey {
        MethodKey {
            name: self.name.clone(),
            parameter_types: self.parameter_types.clone(),
        }
    }
}

/// A method invocation: name, declared parameter types and values.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    method_name: String,
    parameter_types: Vec<TypeDescriptor>,
    parameters: Vec<Value>,
}

impl Invocation {
    /// Build an invocation.
    ///
    /// Fails if the number of types and values differ or a value does not
    /// conform to its declared type.
    pub fn new(
        method_name: impl Into<String>,
        parameter_types: Vec<TypeDescriptor>,
        parameters: Vec<Value>,
    ) -> IpcResult<Self> {
        let method_name = method_name.into();
        if parameter_types.len() != parameters.len() {
            return Err(IpcError::MalformedInvocation(format!(
                "{} declares {} parameters but {} were given",
                method_name,
                parameter_types.len(),
                parameters.len()
            )));
        }
        for (i, (ty, value)) in parameter_types.iter().zip(&parameters).enumerate() {
            if !ty.accepts(value) {
                return Err(IpcError::MalformedInvocation(format!(
                    "{} parameter {} declared {} but got {}",
                    method_name,
                    i,
                    ty,
                    value.kind()
                )));
            }
        }
        Ok(Self {
            method_name,
            parameter_types,
            parameters,
        })
    }

    /// Build an invocation of `signature` with the given values.
    pub fn for_method(signature: &MethodSignature, parameters: Vec<Value>) -> IpcResult<Self> {
        Self::new(
            signature.name.clone(),
            signature.parameter_types.clone(),
            parameters,
        )
    }

    /// The name of the method invoked.
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// The declared parameter types.
    pub fn parameter_types(&self) -> &[TypeDescriptor] {
        &self.parameter_types
    }

    /// The parameter values.
    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }

    /// Consume the invocation, keeping only the parameter values.
    pub fn into_parameters(self) -> Vec<Value> {
        self.parameters
    }

    /// The key the server resolves this call by.
    pub fn key(&self) -> MethodKey {
        MethodKey {
            name: self.method_name.clone(),
            parameter_types: self.parameter_types.clone(),
        }
    }

    /// Encode as: method name, parameter count, then each
    /// `(declared type, value)` pair.
    pub fn encode(&self) -> IpcResult<Vec<u8>> {
        let malformed = |e: strand_core::CodecError| IpcError::MalformedInvocation(e.to_string());

        let mut buf = Vec::new();
        write_field(&mut buf, self.method_name.as_str()).map_err(malformed)?;
        write_field(&mut buf, &(self.parameters.len() as u32)).map_err(malformed)?;
        for (value, ty) in self.parameters.iter().zip(&self.parameter_types) {
            write_object(&mut buf, value, ty).map_err(malformed)?;
        }
        Ok(buf)
    }

    /// Decode an invocation written by [`Invocation::encode`].
    ///
    /// Any codec error or trailing data yields `MalformedInvocation`.
    pub fn decode(bytes: &[u8]) -> IpcResult<Self> {
        let malformed = |e: strand_core::CodecError| IpcError::MalformedInvocation(e.to_string());

        let mut input = bytes;
        let method_name: String = read_field(&mut input).map_err(malformed)?;
        let count: u32 = read_field(&mut input).map_err(malformed)?;

        let mut parameter_types = Vec::new();
        let mut parameters = Vec::new();
        for _ in 0..count {
            let (value, ty) = read_object(&mut input).map_err(malformed)?;
            parameters.push(value);
            parameter_types.push(ty);
        }
        if !input.is_empty() {
            return Err(IpcError::MalformedInvocation(format!(
                "{} trailing bytes after {} parameters",
                input.len(),
                count
            )));
        }

        Ok(Self {
            method_name,
            parameter_types,
            parameters,
        })
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.method_name)?;
        for (i, value) in self.parameters.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Invocation {
        Invocation::new(
            "update_block",
            vec![
                TypeDescriptor::record("Block"),
                TypeDescriptor::array_of(TypeDescriptor::Long),
                TypeDescriptor::Bool,
                TypeDescriptor::String,
            ],
            vec![
                Value::Record {
                    type_name: "Block".into(),
                    data: vec![0, 1, 2, 3],
                },
                Value::Array(vec![Value::Long(-1), Value::Long(i64::MAX)]),
                Value::Bool(true),
                Value::Null,
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let invocation = sample();
        let decoded = Invocation::decode(&invocation.encode().unwrap()).unwrap();
        assert_eq!(decoded, invocation);
        assert_eq!(decoded.key(), invocation.key());
    }

    #[test]
    fn test_round_trip_without_parameters() {
        let invocation = Invocation::new("ping", vec![], vec![]).unwrap();
        let decoded = Invocation::decode(&invocation.encode().unwrap()).unwrap();
        assert_eq!(decoded.method_name(), "ping");
        assert!(decoded.parameters().is_empty());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = Invocation::new("f", vec![TypeDescriptor::Int], vec![]).unwrap_err();
        assert!(matches!(err, IpcError::MalformedInvocation(_)));
    }

    #[test]
    fn test_value_must_match_declared_type() {
        let err =
            Invocation::new("f", vec![TypeDescriptor::Int], vec![Value::Bool(false)]).unwrap_err();
        assert!(matches!(err, IpcError::MalformedInvocation(_)));
    }

    #[test]
    fn test_decode_truncated_is_malformed() {
        let bytes = sample().encode().unwrap();
        let err = Invocation::decode(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, IpcError::MalformedInvocation(_)));
    }

    #[test]
    fn test_decode_trailing_bytes_is_malformed() {
        let mut bytes = sample().encode().unwrap();
        bytes.push(0);
        let err = Invocation::decode(&bytes).unwrap_err();
        assert!(matches!(err, IpcError::MalformedInvocation(_)));
    }

    fn payload_with_parameter<T: serde::Serialize>(parameter: &T) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_field(&mut bytes, "update_block").unwrap();
        write_field(&mut bytes, &1u32).unwrap();
        write_field(&mut bytes, parameter).unwrap();
        bytes
    }

    #[test]
    fn test_decode_deeply_nested_type_is_malformed() {
        // 200k array dimensions around a long, carrying one long.
        let bytes = payload_with_parameter(&((200_000u32, 4u32), vec![(4u32, 1i64)]));
        let err = Invocation::decode(&bytes).unwrap_err();
        assert!(matches!(err, IpcError::MalformedInvocation(_)));
    }

    #[test]
    fn test_decode_deeply_nested_value_is_malformed() {
        // Declared long, then 200k arrays each opening the next.
        let mut nested: Vec<(u32, u64)> = vec![(8, 1); 200_000];
        nested.push((8, 0));
        let bytes = payload_with_parameter(&((0u32, 4u32), nested));
        match Invocation::decode(&bytes).unwrap_err() {
            IpcError::MalformedInvocation(message) => assert!(message.contains("deeper than")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_display() {
        let invocation = Invocation::new(
            "get_protocol_version",
            vec![TypeDescriptor::String, TypeDescriptor::Long],
            vec![Value::String("Proto".into()), Value::Long(3)],
        )
        .unwrap();
        assert_eq!(invocation.to_string(), "get_protocol_version(Proto, 3)");
        assert_eq!(
            MethodSignature::protocol_version().key().to_string(),
            "get_protocol_version(string, long)"
        );
    }
}
