//! Decoded message values and type selectors.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::hash::TypeHash;

/// A decoded message: its declared type hash plus a JSON object of fields.
///
/// The hash travels with the value as the `__hash` attribute, which is how a
/// publisher declares the type of what it sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "__hash")]
    pub type_hash: TypeHash,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Message {
    pub const fn new(type_hash: TypeHash, fields: Map<String, Value>) -> Self {
        Self { type_hash, fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// How a caller names a type: by full or short name, or by its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSelector {
    Hash(TypeHash),
    Name(String),
}

impl From<TypeHash> for TypeSelector {
    fn from(hash: TypeHash) -> Self {
        Self::Hash(hash)
    }
}

impl From<&str> for TypeSelector {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl fmt::Display for TypeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash(hash) => hash.fmt(f),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for TypeSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TypeSelectorVisitor)
    }
}

struct TypeSelectorVisitor;

impl Visitor<'_> for TypeSelectorVisitor {
    type Value = TypeSelector;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a type name or a 64-bit type hash")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<TypeSelector, E> {
        Ok(TypeSelector::Hash(TypeHash(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<TypeSelector, E> {
        Ok(TypeSelector::Hash(TypeHash::from_unsigned(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<TypeSelector, E> {
        // Type names never start with a digit or sign, so anything that
        // parses as an integer is a hash.
        Ok(TypeHash::parse(v).map_or_else(|| TypeSelector::Name(v.to_string()), TypeSelector::Hash))
    }
}
