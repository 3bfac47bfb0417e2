//! Strongly typed values flowing through deployment futures.
//!
//! Parameters, literal arguments and future results all share the [`Value`]
//! representation so they can be fingerprinted and journaled uniformly.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Stable identifier of a future within one deployment.
///
/// Deployments, calls and parameters use `"<Module>#<local>"`; module
/// references use the bare module name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FutureId(String);

impl FutureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of a future declared inside `module` under `local`.
    pub fn scoped(module: &str, local: &str) -> Self {
        Self(format!("{module}#{local}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Owning module name.
    pub fn module(&self) -> &str {
        self.0.split('#').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FutureId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// 20-byte account or contract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Take the first 20 bytes of a digest.
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[..20]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix("0x")
            .ok_or_else(|| format!("address must start with 0x: {s}"))?;
        let decoded = hex::decode(raw).map_err(|e| format!("invalid address {s}: {e}"))?;
        let bytes: [u8; 20] = decoded
            .try_into()
            .map_err(|_| format!("address must be 20 bytes: {s}"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A concrete, resolved value.
///
/// Serialized externally tagged (`{"address": "0x.."}`) with numbers as
/// decimal strings, which keeps the encoding canonical for fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    String(String),
    Number(#[serde(with = "decimal")] u128),
    Bool(bool),
    Address(Address),
    Bytes(#[serde(with = "hex_bytes")] Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Value::Address(address) => Some(*address),
            _ => None,
        }
    }

    /// Short human-readable rendering used in reports.
    pub fn display(&self) -> String {
        match self {
            Value::String(s) => format!("{s:?}"),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Address(a) => a.to_string(),
            Value::Bytes(b) => format!("0x{}", hex::encode(b)),
            Value::Array(items) => {
                let inner: Vec<String> = items.iter().map(Value::display).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Map(entries) => {
                let inner: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.display()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<u128> for Value {
    fn from(value: u128) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Address> for Value {
    fn from(value: Address) -> Self {
        Value::Address(value)
    }
}

/// Declared kind of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Bool,
    Address,
    Bytes,
}

impl ParamKind {
    /// Parse a raw string, as delivered by environment or secret sources.
    pub fn parse_str(self, raw: &str) -> Result<Value, String> {
        match self {
            ParamKind::String => Ok(Value::String(raw.to_string())),
            ParamKind::Number => raw
                .trim()
                .parse::<u128>()
                .map(Value::Number)
                .map_err(|e| format!("expected number, got {raw:?}: {e}")),
            ParamKind::Bool => match raw.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => Err(format!("expected bool, got {other:?}")),
            },
            ParamKind::Address => raw.trim().parse::<Address>().map(Value::Address),
            ParamKind::Bytes => {
                let trimmed = raw.trim();
                let hex_part = trimmed
                    .strip_prefix("0x")
                    .ok_or_else(|| format!("bytes must start with 0x: {trimmed}"))?;
                hex::decode(hex_part)
                    .map(Value::Bytes)
                    .map_err(|e| format!("invalid bytes {trimmed}: {e}"))
            }
        }
    }

    /// Check a typed value against this kind; strings are parsed for the
    /// non-string kinds.
    pub fn coerce(self, value: Value) -> Result<Value, String> {
        match (self, value) {
            (ParamKind::String, v @ Value::String(_))
            | (ParamKind::Number, v @ Value::Number(_))
            | (ParamKind::Bool, v @ Value::Bool(_))
            | (ParamKind::Address, v @ Value::Address(_))
            | (ParamKind::Bytes, v @ Value::Bytes(_)) => Ok(v),
            (kind, Value::String(raw)) if kind != ParamKind::String => kind.parse_str(&raw),
            (kind, other) => Err(format!("expected {kind}, got {}", other.display())),
        }
    }

    /// Convert an untyped JSON value (parameters file) into this kind.
    pub fn from_json(self, json: &serde_json::Value) -> Result<Value, String> {
        match json {
            serde_json::Value::String(s) => self.parse_str(s),
            serde_json::Value::Bool(b) if self == ParamKind::Bool => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) if self == ParamKind::Number => {
                n.as_u64().map(|n| Value::Number(u128::from(n))).ok_or_else(|| {
                    format!(
                        "expected unsigned integer up to {}, got {n}; pass larger amounts as a decimal string",
                        u64::MAX
                    )
                })
            }
            other => Err(format!("expected {self}, got {other}")),
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Bool => "bool",
            ParamKind::Address => "address",
            ParamKind::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

pub(crate) mod decimal {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}
