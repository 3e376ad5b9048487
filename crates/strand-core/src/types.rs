//! Core wire types.
//!
//! Type descriptors, dynamically typed values, peer addresses and caller
//! identities shared by clients and servers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a parameter or return value.
///
/// Arrays nest at most [`MAX_NESTING_DEPTH`](crate::wire::MAX_NESTING_DEPTH)
/// deep on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// No value (method returns nothing).
    Void,
    Bool,
    Byte,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    Float,
    Double,
    /// UTF-8 string.
    String,
    /// Homogeneous array of the element type.
    Array(Box<TypeDescriptor>),
    /// Structured record identified by its type name.
    Record(String),
}

impl TypeDescriptor {
    /// Array of the given element type.
    pub fn array_of(element: TypeDescriptor) -> Self {
        TypeDescriptor::Array(Box::new(element))
    }

    /// Record with the given type name.
    pub fn record(name: impl Into<String>) -> Self {
        TypeDescriptor::Record(name.into())
    }

    /// Whether this is the `Void` descriptor.
    pub fn is_void(&self) -> bool {
        matches!(self, TypeDescriptor::Void)
    }

    /// Whether `Null` is a legal value of this type.
    pub fn is_nullable(&self) -> bool {
        matches!(
            self,
            TypeDescriptor::Void
                | TypeDescriptor::String
                | TypeDescriptor::Array(_)
                | TypeDescriptor::Record(_)
        )
    }

    /// Check that `value` conforms to this descriptor.
    ///
    /// Arrays are checked element by element; records must carry the
    /// same type name.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ty, Value::Null) => ty.is_nullable(),
            (TypeDescriptor::Bool, Value::Bool(_))
            | (TypeDescriptor::Byte, Value::Byte(_))
            | (TypeDescriptor::Int, Value::Int(_))
            | (TypeDescriptor::Long, Value::Long(_))
            | (TypeDescriptor::Float, Value::Float(_))
            | (TypeDescriptor::Double, Value::Double(_))
            | (TypeDescriptor::String, Value::String(_)) => true,
            (TypeDescriptor::Array(element), Value::Array(items)) => {
                items.iter().all(|item| element.accepts(item))
            }
            (TypeDescriptor::Record(expected), Value::Record { type_name, .. }) => {
                expected == type_name
            }
            _ => false,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Void => write!(f, "void"),
            TypeDescriptor::Bool => write!(f, "bool"),
            TypeDescriptor::Byte => write!(f, "byte"),
            TypeDescriptor::Int => write!(f, "int"),
            TypeDescriptor::Long => write!(f, "long"),
            TypeDescriptor::Float => write!(f, "float"),
            TypeDescriptor::Double => write!(f, "double"),
            TypeDescriptor::String => write!(f, "string"),
            TypeDescriptor::Array(element) => write!(f, "{}[]", element),
            TypeDescriptor::Record(name) => write!(f, "{}", name),
        }
    }
}

/// A dynamically typed wire value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Array(Vec<Value>),
    /// A structured record; `data` is the record's own serialized body.
    Record { type_name: String, data: Vec<u8> },
}

impl Value {
    /// Whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the value's variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Byte(_) => "byte",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Record { .. } => "record",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Record { type_name, data } => {
                write!(f, "{}({} bytes)", type_name, data.len())
            }
        }
    }
}

/// Number of trailing characters of a peer id shown in diagnostics.
const SHORT_ID_LEN: usize = 8;

/// Address of a remote peer.
///
/// Opaque to the IPC core; the TCP transport interprets it as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Create a peer address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The full address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last eight characters of the address, for log lines.
    pub fn short_id(&self) -> String {
        let len = self.0.chars().count();
        self.0.chars().skip(len.saturating_sub(SHORT_ID_LEN)).collect()
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<std::net::SocketAddr> for PeerAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for PeerAddress {
    fn from(addr: &str) -> Self {
        Self(addr.to_string())
    }
}

/// Identity of the caller, attached to every request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// User name.
    pub user: String,
    /// Groups the user belongs to.
    pub groups: Vec<String>,
}

impl CallerIdentity {
    /// Create an identity with a user and its groups.
    pub fn new(user: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            user: user.into(),
            groups,
        }
    }

    /// Identity of a user with no groups.
    pub fn user(user: impl Into<String>) -> Self {
        Self::new(user, Vec::new())
    }

    /// Identity of the current OS user, `anonymous` when unknown.
    pub fn from_env() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "anonymous".to_string());
        Self::user(user)
    }

    /// Whether the caller is a member of `group`.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.groups.is_empty() {
            write!(f, "{}", self.user)
        } else {
            write!(f, "{} ({})", self.user, self.groups.join(","))
        }
    }
}
