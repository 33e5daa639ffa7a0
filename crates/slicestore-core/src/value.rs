//! Typed values exchanged with the path engine.
//!
//! Documents are plain JSON. Typed values map onto it as follows:
//!
//! | kind      | JSON form                                                    |
//! |-----------|--------------------------------------------------------------|
//! | `uint256` | number when it fits in u64, otherwise a decimal string       |
//! | `string`  | string                                                       |
//! | `bytes32` | `0x` + 64 hex chars                                          |
//! | `address` | `0x` + 40 hex chars                                          |
//! | `bytes`   | `0x` + even number of hex chars                              |
//! | arrays    | JSON array whose every element has the scalar form above     |
//!
//! Reading a `uint256` accepts a JSON number of any width or a string of
//! decimal digits. Numbers are kept as their source text, so integers wider
//! than 64 bits are never rounded through a float.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{hex, Address, Bytes, B256, U256};
use serde_json::Value as Json;

use crate::error::{SliceError, SliceResult};

/// Scalar shapes a path can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Uint256,
    String,
    Bytes32,
    Address,
    Bytes,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 5] = [
        ScalarKind::Uint256,
        ScalarKind::String,
        ScalarKind::Bytes32,
        ScalarKind::Address,
        ScalarKind::Bytes,
    ];

    /// Interface suffix, as in `parseLatestSliceUint256`.
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarKind::Uint256 => "Uint256",
            ScalarKind::String => "String",
            ScalarKind::Bytes32 => "Bytes32",
            ScalarKind::Address => "Address",
            ScalarKind::Bytes => "Bytes",
        }
    }
}

/// A scalar kind, optionally as a homogeneous list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueKind {
    pub scalar: ScalarKind,
    pub array: bool,
}

impl ValueKind {
    pub const fn scalar(scalar: ScalarKind) -> Self {
        Self { scalar, array: false }
    }

    pub const fn array(scalar: ScalarKind) -> Self {
        Self { scalar, array: true }
    }

    /// Every kind the interface exposes, scalars first.
    pub fn all() -> impl Iterator<Item = ValueKind> {
        ScalarKind::ALL
            .into_iter()
            .map(ValueKind::scalar)
            .chain(ScalarKind::ALL.into_iter().map(ValueKind::array))
    }

    /// Interface suffix, as in `writeSubSliceAddressArray`.
    pub fn type_name(&self) -> String {
        if self.array {
            format!("{}Array", self.scalar.type_name())
        } else {
            self.scalar.type_name().to_string()
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.scalar {
            ScalarKind::Uint256 => "uint256",
            ScalarKind::String => "string",
            ScalarKind::Bytes32 => "bytes32",
            ScalarKind::Address => "address",
            ScalarKind::Bytes => "bytes",
        };
        if self.array {
            write!(f, "{}[]", name)
        } else {
            f.write_str(name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Uint256(U256),
    String(String),
    Bytes32(B256),
    Address(Address),
    Bytes(Bytes),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Uint256(_) => ScalarKind::Uint256,
            Scalar::String(_) => ScalarKind::String,
            Scalar::Bytes32(_) => ScalarKind::Bytes32,
            Scalar::Address(_) => ScalarKind::Address,
            Scalar::Bytes(_) => ScalarKind::Bytes,
        }
    }

    fn to_json(&self) -> Json {
        match self {
            Scalar::Uint256(n) if n.bit_len() <= 64 => Json::from(n.as_limbs()[0]),
            Scalar::Uint256(n) => Json::String(n.to_string()),
            Scalar::String(s) => Json::String(s.clone()),
            Scalar::Bytes32(b) => Json::String(hex::encode_prefixed(b.as_slice())),
            Scalar::Address(a) => Json::String(hex::encode_prefixed(a.as_slice())),
            Scalar::Bytes(b) => Json::String(hex::encode_prefixed(b)),
        }
    }

    /// Interpret `json` as `kind`; `None` when the shape does not fit.
    fn from_json(json: &Json, kind: ScalarKind) -> Option<Scalar> {
        match kind {
            ScalarKind::Uint256 => match json {
                Json::Number(n) => decimal_uint(&n.to_string()).map(Scalar::Uint256),
                Json::String(s) => decimal_uint(s).map(Scalar::Uint256),
                _ => None,
            },
            ScalarKind::String => json.as_str().map(|s| Scalar::String(s.to_string())),
            ScalarKind::Bytes32 => {
                let s = hex_str(json)?;
                B256::from_str(s).ok().map(Scalar::Bytes32)
            }
            ScalarKind::Address => {
                let s = hex_str(json)?;
                Address::from_str(s).ok().map(Scalar::Address)
            }
            ScalarKind::Bytes => {
                let s = hex_str(json)?;
                hex::decode(s).ok().map(|v| Scalar::Bytes(Bytes::from(v)))
            }
        }
    }
}

/// Plain decimal digits only: no sign, fraction, exponent or `0x` prefix.
fn decimal_uint(text: &str) -> Option<U256> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    U256::from_str_radix(text, 10).ok()
}

/// Byte kinds are always written `0x`-prefixed; require the prefix on read so
/// ordinary strings that happen to be hex do not type-check as bytes.
fn hex_str(json: &Json) -> Option<&str> {
    json.as_str().filter(|s| s.starts_with("0x"))
}

/// A typed value read from or written into a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(Scalar),
    Array(ScalarKind, Vec<Scalar>),
}

impl Value {
    pub fn uint(n: U256) -> Self {
        Value::Scalar(Scalar::Uint256(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::Scalar(Scalar::String(s.into()))
    }

    pub fn bytes32(b: B256) -> Self {
        Value::Scalar(Scalar::Bytes32(b))
    }

    pub fn address(a: Address) -> Self {
        Value::Scalar(Scalar::Address(a))
    }

    pub fn bytes(b: impl Into<Bytes>) -> Self {
        Value::Scalar(Scalar::Bytes(b.into()))
    }

    /// Build a homogeneous array, rejecting elements of another kind.
    pub fn array(kind: ScalarKind, items: Vec<Scalar>) -> SliceResult<Self> {
        if let Some(bad) = items.iter().find(|item| item.kind() != kind) {
            return Err(SliceError::TypeMismatch {
                path: String::new(),
                expected: ValueKind::scalar(kind).to_string(),
                found: ValueKind::scalar(bad.kind()).to_string(),
            });
        }
        Ok(Value::Array(kind, items))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Scalar(s) => ValueKind::scalar(s.kind()),
            Value::Array(kind, _) => ValueKind::array(*kind),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Scalar(s) => s.to_json(),
            Value::Array(_, items) => Json::Array(items.iter().map(Scalar::to_json).collect()),
        }
    }

    /// Interpret `json` as `kind`. `path` is only used for error context.
    pub fn from_json(json: &Json, kind: ValueKind, path: &str) -> SliceResult<Self> {
        let mismatch = || SliceError::TypeMismatch {
            path: path.to_string(),
            expected: kind.to_string(),
            found: json_shape(json).to_string(),
        };

        if !kind.array {
            return Scalar::from_json(json, kind.scalar)
                .map(Value::Scalar)
                .ok_or_else(mismatch);
        }

        let elements = json.as_array().ok_or_else(mismatch)?;
        let items = elements
            .iter()
            .map(|element| Scalar::from_json(element, kind.scalar))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(mismatch)?;
        Ok(Value::Array(kind.scalar, items))
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            Value::Scalar(Scalar::Uint256(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }
}

/// Short description of a JSON node's shape for error messages.
pub(crate) fn json_shape(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "list",
        Json::Object(_) => "map",
    }
}
