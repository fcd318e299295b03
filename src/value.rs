//! Argument and return value payloads.
//!
//! A `Value` is a tagged union over the wire protocol's variable types. The
//! codec always picks the *smallest* integer tag that losslessly represents
//! the runtime value: a return value of 0 goes out as a UInt16, not an
//! Int64. Strings are transported in UTF-16LE; anything that would push the
//! whole frame over the hard ceiling is substituted with a trimmed
//! largestring placeholder by the encoder.

use crate::protocol::ValueType;

/// A typed argument or return value payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    /// UTF-16LE transported string.
    Str(String),
    /// Interned identifier; transported identically to `Str`.
    Symbol(String),
    /// A runtime value outside the protocol's domain. Transported as the
    /// string name of its type so the agent can still render something.
    Unrepresentable(String),
}

impl Value {
    /// Smallest-fit coercion for signed runtime integers.
    pub fn from_i64(v: i64) -> Self {
        if v >= 0 {
            Self::from_u64(v as u64)
        } else if v >= i64::from(i16::MIN) {
            Value::I16(v as i16)
        } else if v >= i64::from(i32::MIN) {
            Value::I32(v as i32)
        } else {
            Value::I64(v)
        }
    }

    /// Smallest-fit coercion for unsigned runtime integers.
    pub fn from_u64(v: u64) -> Self {
        if v <= u64::from(u16::MAX) {
            Value::U16(v as u16)
        } else if v <= u64::from(u32::MAX) {
            Value::U32(v as u32)
        } else {
            Value::U64(v)
        }
    }

    /// The wire tag this value encodes under, before any largestring
    /// substitution by the encoder.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Boolean,
            Value::I16(_) => ValueType::Int16,
            Value::U16(_) => ValueType::UInt16,
            Value::I32(_) => ValueType::Int32,
            Value::U32(_) => ValueType::UInt32,
            Value::I64(_) => ValueType::Int64,
            Value::U64(_) => ValueType::UInt64,
            Value::Str(_) | Value::Symbol(_) | Value::Unrepresentable(_) => ValueType::String,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::from_i64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::from_u64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// A named value as it travels in Begin argument blocks and End return
/// value blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub name: String,
    pub value: Value,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The conventional name carried by return value blocks.
    pub fn return_value(value: impl Into<Value>) -> Self {
        Self::new("returnValue", value)
    }
}

/// Encode a string to the UTF-16LE byte representation used for value
/// payloads.
pub(crate) fn to_utf16le(s: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(s.len() * 2);
    for unit in s.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

/// Decode a UTF-16LE byte payload, replacing unpaired surrogates.
pub(crate) fn from_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
