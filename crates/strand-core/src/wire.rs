//! Serde forms of [`TypeDescriptor`] and [`Value`].
//!
//! Both types nest, but neither is written as a nested structure. A
//! descriptor travels as `(array dimensions, element type)` and a value as
//! a pre-order token list, so decoding never recurses and nesting deeper
//! than [`MAX_NESTING_DEPTH`] is rejected as data, not as a stack overflow.

use crate::types::{TypeDescriptor, Value};
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;

/// Deepest array nesting accepted in a type or a value.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Non-array part of a type descriptor.
#[derive(Serialize, Deserialize)]
enum ElementType<'a> {
    Void,
    Bool,
    Byte,
    Int,
    Long,
    Float,
    Double,
    String,
    Record(Cow<'a, str>),
}

impl Serialize for TypeDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut dimensions: u32 = 0;
        let mut ty = self;
        let element = loop {
            ty = match ty {
                TypeDescriptor::Array(inner) => {
                    dimensions += 1;
                    &**inner
                }
                TypeDescriptor::Void => break ElementType::Void,
                TypeDescriptor::Bool => break ElementType::Bool,
                TypeDescriptor::Byte => break ElementType::Byte,
                TypeDescriptor::Int => break ElementType::Int,
                TypeDescriptor::Long => break ElementType::Long,
                TypeDescriptor::Float => break ElementType::Float,
                TypeDescriptor::Double => break ElementType::Double,
                TypeDescriptor::String => break ElementType::String,
                TypeDescriptor::Record(name) => break ElementType::Record(Cow::Borrowed(name)),
            };
        };
        if dimensions as usize > MAX_NESTING_DEPTH {
            return Err(S::Error::custom(format!(
                "type nests {} arrays, limit is {}",
                dimensions, MAX_NESTING_DEPTH
            )));
        }
        (dimensions, element).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TypeDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (dimensions, element): (u32, ElementType<'static>) =
            Deserialize::deserialize(deserializer)?;
        if dimensions as usize > MAX_NESTING_DEPTH {
            return Err(D::Error::custom(format!(
                "type nests {} arrays, limit is {}",
                dimensions, MAX_NESTING_DEPTH
            )));
        }
        let mut ty = match element {
            ElementType::Void => TypeDescriptor::Void,
            ElementType::Bool => TypeDescriptor::Bool,
            ElementType::Byte => TypeDescriptor::Byte,
            ElementType::Int => TypeDescriptor::Int,
            ElementType::Long => TypeDescriptor::Long,
            ElementType::Float => TypeDescriptor::Float,
            ElementType::Double => TypeDescriptor::Double,
            ElementType::String => TypeDescriptor::String,
            ElementType::Record(name) => TypeDescriptor::Record(name.into_owned()),
        };
        for _ in 0..dimensions {
            ty = TypeDescriptor::array_of(ty);
        }
        Ok(ty)
    }
}

/// One step of a value in pre-order. `Array(n)` is followed by its `n`
/// elements.
#[derive(Serialize, Deserialize)]
enum Token<'a> {
    Null,
    Bool(bool),
    Byte(u8),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(Cow<'a, str>),
    Array(u64),
    Record {
        type_name: Cow<'a, str>,
        data: Cow<'a, [u8]>,
    },
}

fn too_deep() -> String {
    format!("value nests arrays deeper than {}", MAX_NESTING_DEPTH)
}

fn tokens(value: &Value) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let mut pending = vec![(value, 0usize)];
    while let Some((value, depth)) = pending.pop() {
        let token = match value {
            Value::Array(items) => {
                if depth >= MAX_NESTING_DEPTH {
                    return Err(too_deep());
                }
                pending.extend(items.iter().rev().map(|item| (item, depth + 1)));
                Token::Array(items.len() as u64)
            }
            Value::Null => Token::Null,
            Value::Bool(v) => Token::Bool(*v),
            Value::Byte(v) => Token::Byte(*v),
            Value::Int(v) => Token::Int(*v),
            Value::Long(v) => Token::Long(*v),
            Value::Float(v) => Token::Float(*v),
            Value::Double(v) => Token::Double(*v),
            Value::String(v) => Token::String(Cow::Borrowed(v)),
            Value::Record { type_name, data } => Token::Record {
                type_name: Cow::Borrowed(type_name),
                data: Cow::Borrowed(data),
            },
        };
        tokens.push(token);
    }
    Ok(tokens)
}

fn assemble(tokens: Vec<Token<'_>>) -> Result<Value, String> {
    // Open arrays: declared length and the elements read so far.
    let mut open: Vec<(usize, Vec<Value>)> = Vec::new();
    let mut tokens = tokens.into_iter();

    'tokens: while let Some(token) = tokens.next() {
        let mut value = match token {
            Token::Array(len) => {
                let len = usize::try_from(len).map_err(|_| format!("array length {}", len))?;
                if open.len() >= MAX_NESTING_DEPTH {
                    return Err(too_deep());
                }
                if len > 0 {
                    open.push((len, Vec::with_capacity(len.min(1024))));
                    continue;
                }
                Value::Array(Vec::new())
            }
            Token::Null => Value::Null,
            Token::Bool(v) => Value::Bool(v),
            Token::Byte(v) => Value::Byte(v),
            Token::Int(v) => Value::Int(v),
            Token::Long(v) => Value::Long(v),
            Token::Float(v) => Value::Float(v),
            Token::Double(v) => Value::Double(v),
            Token::String(v) => Value::String(v.into_owned()),
            Token::Record { type_name, data } => Value::Record {
                type_name: type_name.into_owned(),
                data: data.into_owned(),
            },
        };

        // Close every array this value completes.
        loop {
            let Some((len, mut items)) = open.pop() else {
                return match tokens.next() {
                    None => Ok(value),
                    Some(_) => Err("tokens after a complete value".to_string()),
                };
            };
            items.push(value);
            if items.len() < len {
                open.push((len, items));
                continue 'tokens;
            }
            value = Value::Array(items);
        }
    }
    Err("value ended before it was complete".to_string())
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        tokens(self).map_err(S::Error::custom)?.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tokens: Vec<Token<'static>> = Deserialize::deserialize(deserializer)?;
        assemble(tokens).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_field, write_field, CodecError};

    fn nested_value(depth: usize) -> Value {
        let mut value = Value::Long(1);
        for _ in 0..depth {
            value = Value::Array(vec![value]);
        }
        value
    }

    fn nested_type(depth: usize) -> TypeDescriptor {
        let mut ty = TypeDescriptor::Long;
        for _ in 0..depth {
            ty = TypeDescriptor::array_of(ty);
        }
        ty
    }

    #[test]
    fn test_nested_values_survive_the_wire() {
        let value = Value::Array(vec![
            Value::Array(vec![]),
            Value::Array(vec![Value::String("a".into()), Value::Null]),
            Value::Record {
                type_name: "Block".into(),
                data: vec![1, 2],
            },
            nested_value(MAX_NESTING_DEPTH - 1),
        ]);
        let mut buf = Vec::new();
        write_field(&mut buf, &value).unwrap();
        let back: Value = read_field(&mut buf.as_slice()).unwrap();
        assert_eq!(back, value);

        let ty = nested_type(MAX_NESTING_DEPTH);
        let mut buf = Vec::new();
        write_field(&mut buf, &ty).unwrap();
        let back: TypeDescriptor = read_field(&mut buf.as_slice()).unwrap();
        assert_eq!(back, ty);
    }

    #[test]
    fn test_too_deep_is_not_written() {
        let mut buf = Vec::new();
        assert!(write_field(&mut buf, &nested_value(MAX_NESTING_DEPTH + 1)).is_err());
        assert!(write_field(&mut buf, &nested_type(MAX_NESTING_DEPTH + 1)).is_err());
    }

    #[test]
    fn test_hostile_type_nesting_is_rejected() {
        // Four billion array dimensions costs five bytes.
        let mut buf = Vec::new();
        write_field(&mut buf, &(u32::MAX, 4u32)).unwrap();
        let err = read_field::<_, TypeDescriptor>(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, CodecError::Serialization(_)));
    }

    #[test]
    fn test_hostile_value_nesting_is_rejected() {
        // 200k single-element arrays, each opening the next.
        let mut hostile: Vec<(u32, u64)> = vec![(8, 1); 200_000];
        hostile.push((8, 0));
        let mut buf = Vec::new();
        write_field(&mut buf, &hostile).unwrap();

        let err = read_field::<_, Value>(&mut buf.as_slice()).unwrap_err();
        assert!(err.to_string().contains("deeper than 32"));
    }

    #[test]
    fn test_truncated_and_overlong_token_lists() {
        // An array of two with one element.
        let mut buf = Vec::new();
        write_field(&mut buf, &vec![(8u32, 2u64), (4, 7)]).unwrap();
        assert!(read_field::<_, Value>(&mut buf.as_slice()).is_err());

        // A complete value followed by another token.
        let mut buf = Vec::new();
        write_field(&mut buf, &vec![(4u32, 1i64), (4, 2)]).unwrap();
        assert!(read_field::<_, Value>(&mut buf.as_slice()).is_err());
    }
}
