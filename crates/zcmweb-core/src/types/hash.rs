//! 64-bit content hashes.
//!
//! Hashes span the full signed 64-bit range, which JSON consumers in the
//! browser cannot represent exactly as numbers. On the wire a hash is a plain
//! number when it fits in the safe-integer range and a decimal string
//! otherwise; both forms (and `0x` hex strings) are accepted on input.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Largest integer a JSON number survives a round trip through an IEEE double.
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// Content hash of a schema type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHash(pub i64);

impl TypeHash {
    /// Width of the hash prefix at the start of every encoded message.
    pub const ENCODED_LEN: usize = 8;

    /// Read the big-endian hash prefix of an encoded payload.
    pub fn from_prefix(bytes: &[u8]) -> Option<Self> {
        let prefix: [u8; Self::ENCODED_LEN] = bytes.get(..Self::ENCODED_LEN)?.try_into().ok()?;
        Some(Self(i64::from_be_bytes(prefix)))
    }

    pub const fn to_be_bytes(self) -> [u8; Self::ENCODED_LEN] {
        self.0.to_be_bytes()
    }

    /// Parse a decimal (optionally negative) or `0x`-prefixed hex string.
    ///
    /// Unsigned decimals above `i64::MAX` and hex values wrap into the signed
    /// range, so `"18446744073709551615"`, `"0xffffffffffffffff"` and `"-1"`
    /// name the same hash.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u64::from_str_radix(hex, 16).ok().map(Self::from_unsigned);
        }
        if let Ok(v) = s.parse::<i64>() {
            return Some(Self(v));
        }
        s.parse::<u64>().ok().map(Self::from_unsigned)
    }

    #[allow(clippy::cast_possible_wrap)]
    pub const fn from_unsigned(v: u64) -> Self {
        Self(v as i64)
    }

    #[allow(clippy::cast_sign_loss)]
    pub const fn as_unsigned(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.as_unsigned())
    }
}

impl From<i64> for TypeHash {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl Serialize for TypeHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&self.0) {
            serializer.serialize_i64(self.0)
        } else {
            serializer.collect_str(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for TypeHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TypeHashVisitor)
    }
}

struct TypeHashVisitor;

impl Visitor<'_> for TypeHashVisitor {
    type Value = TypeHash;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 64-bit hash as an integer or an integer string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<TypeHash, E> {
        Ok(TypeHash(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<TypeHash, E> {
        Ok(TypeHash::from_unsigned(v))
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::float_cmp
    )]
    fn visit_f64<E: de::Error>(self, v: f64) -> Result<TypeHash, E> {
        // Browsers send whole numbers as doubles; anything fractional or
        // outside the exact range cannot be a hash.
        let exact = v.fract() == 0.0 && v.abs() <= MAX_SAFE_INTEGER as f64;
        if exact {
            Ok(TypeHash(v as i64))
        } else {
            Err(E::invalid_value(de::Unexpected::Float(v), &self))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<TypeHash, E> {
        TypeHash::parse(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}
