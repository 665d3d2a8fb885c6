//! Codec capability and the schema-driven codec.
//!
//! Encoded messages start with the type's 8-byte big-endian fingerprint,
//! followed by members in declaration order: big-endian integers and IEEE
//! floats, booleans as a single byte, strings as an `int32` length that
//! counts a trailing NUL, then the bytes and the NUL.

use serde::Serialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use super::hash::{MAX_SAFE_INTEGER, TypeHash};
use super::message::Message;
use super::schema::{Dimension, FieldDef, FieldKind, TypeDef};

/// Encode failures. Decode failures are not errors: they yield `None`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("{type_name}: missing member '{field}'")]
    MissingField { type_name: String, field: String },

    #[error("{type_name}.{field}: expected {expected}")]
    WrongType {
        type_name: String,
        field: String,
        expected: &'static str,
    },

    #[error("{type_name}.{field}: expected {expected} elements, got {actual}")]
    LengthMismatch {
        type_name: String,
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("message hash {actual} does not match {type_name} ({expected})")]
    HashMismatch {
        type_name: String,
        expected: TypeHash,
        actual: TypeHash,
    },
}

/// Descriptor of one registered type, as sent to remote clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub hash: TypeHash,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDef>,
}

/// Per-type encode/decode capability.
pub trait Codec: Send + Sync {
    /// Fully qualified type name.
    fn name(&self) -> &str;

    fn hash(&self) -> TypeHash;

    fn encode(&self, msg: &Message) -> Result<Vec<u8>, CodecError>;

    /// Decode a payload, including its hash prefix. `None` when the payload
    /// is malformed for this type.
    fn decode(&self, bytes: &[u8]) -> Option<Message>;

    fn describe(&self) -> TypeDescriptor {
        TypeDescriptor {
            name: self.name().to_string(),
            hash: self.hash(),
            fields: Vec::new(),
        }
    }
}

/// Codec driven by a [`TypeDef`] from a schema descriptor set.
#[derive(Debug, Clone)]
pub struct SchemaCodec {
    name: String,
    hash: TypeHash,
    def: TypeDef,
}

impl SchemaCodec {
    /// The definition must already have passed [`TypeDef::validate`].
    pub fn new(name: impl Into<String>, def: TypeDef) -> Self {
        let hash = def.fingerprint();
        Self {
            name: name.into(),
            hash,
            def,
        }
    }

    fn wrong_type(&self, field: &FieldDef, expected: &'static str) -> CodecError {
        CodecError::WrongType {
            type_name: self.name.clone(),
            field: field.name.clone(),
            expected,
        }
    }

    fn encode_value(
        &self,
        buf: &mut Vec<u8>,
        field: &FieldDef,
        dims: &[usize],
        value: &Value,
    ) -> Result<(), CodecError> {
        let Some((&len, rest)) = dims.split_first() else {
            return self.encode_scalar(buf, field, value);
        };
        let items = value
            .as_array()
            .ok_or_else(|| self.wrong_type(field, "array"))?;
        if items.len() != len {
            return Err(CodecError::LengthMismatch {
                type_name: self.name.clone(),
                field: field.name.clone(),
                expected: len,
                actual: items.len(),
            });
        }
        for item in items {
            self.encode_value(buf, field, rest, item)?;
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_scalar(
        &self,
        buf: &mut Vec<u8>,
        field: &FieldDef,
        value: &Value,
    ) -> Result<(), CodecError> {
        match field.kind {
            FieldKind::Int8 => {
                let v = int_in(value, i64::from(i8::MIN), i64::from(i8::MAX))
                    .ok_or_else(|| self.wrong_type(field, "int8"))?;
                buf.push(v as i8 as u8);
            }
            FieldKind::Byte => {
                let v = int_in(value, 0, i64::from(u8::MAX))
                    .ok_or_else(|| self.wrong_type(field, "byte"))?;
                buf.push(v as u8);
            }
            FieldKind::Int16 => {
                let v = int_in(value, i64::from(i16::MIN), i64::from(i16::MAX))
                    .ok_or_else(|| self.wrong_type(field, "int16"))?;
                buf.extend_from_slice(&(v as i16).to_be_bytes());
            }
            FieldKind::Int32 => {
                let v = int_in(value, i64::from(i32::MIN), i64::from(i32::MAX))
                    .ok_or_else(|| self.wrong_type(field, "int32"))?;
                buf.extend_from_slice(&(v as i32).to_be_bytes());
            }
            FieldKind::Int64 => {
                let v = int64(value).ok_or_else(|| self.wrong_type(field, "int64"))?;
                buf.extend_from_slice(&v.to_be_bytes());
            }
            FieldKind::Float => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| self.wrong_type(field, "float"))?;
                buf.extend_from_slice(&(v as f32).to_be_bytes());
            }
            FieldKind::Double => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| self.wrong_type(field, "double"))?;
                buf.extend_from_slice(&v.to_be_bytes());
            }
            FieldKind::Boolean => {
                let v = value
                    .as_bool()
                    .ok_or_else(|| self.wrong_type(field, "boolean"))?;
                buf.push(u8::from(v));
            }
            FieldKind::String => {
                let s = value
                    .as_str()
                    .ok_or_else(|| self.wrong_type(field, "string"))?;
                let len = i32::try_from(s.len() + 1)
                    .map_err(|_| self.wrong_type(field, "string shorter than 2 GiB"))?;
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(s.as_bytes());
                buf.push(0);
            }
        }
        Ok(())
    }

    /// Resolve the element counts of a member's dimensions against the
    /// length members already seen.
    fn dim_lengths(field: &FieldDef, lengths: &Map<String, Value>) -> Option<Vec<usize>> {
        field
            .dims
            .iter()
            .map(|dim| match dim {
                Dimension::Fixed(n) => Some(*n),
                Dimension::Variable(member) => lengths
                    .get(member)
                    .and_then(Value::as_i64)
                    .and_then(|n| usize::try_from(n).ok()),
            })
            .collect()
    }
}

impl Codec for SchemaCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn hash(&self) -> TypeHash {
        self.hash
    }

    fn encode(&self, msg: &Message) -> Result<Vec<u8>, CodecError> {
        if msg.type_hash != self.hash {
            return Err(CodecError::HashMismatch {
                type_name: self.name.clone(),
                expected: self.hash,
                actual: msg.type_hash,
            });
        }
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.hash.to_be_bytes());
        for field in &self.def.fields {
            let value = msg.get(&field.name).ok_or_else(|| CodecError::MissingField {
                type_name: self.name.clone(),
                field: field.name.clone(),
            })?;
            let dims = Self::dim_lengths(field, &msg.fields).ok_or_else(|| {
                self.wrong_type(field, "array sized by a non-negative length member")
            })?;
            self.encode_value(&mut buf, field, &dims, value)?;
        }
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Option<Message> {
        if TypeHash::from_prefix(bytes)? != self.hash {
            return None;
        }
        let mut reader = Reader {
            buf: &bytes[TypeHash::ENCODED_LEN..],
        };
        let mut fields = Map::new();
        for field in &self.def.fields {
            let dims = Self::dim_lengths(field, &fields)?;
            let value = reader.read_value(field.kind, &dims)?;
            fields.insert(field.name.clone(), value);
        }
        Some(Message::new(self.hash, fields))
    }

    fn describe(&self) -> TypeDescriptor {
        TypeDescriptor {
            name: self.name.clone(),
            hash: self.hash,
            fields: self.def.fields.clone(),
        }
    }
}

/// Integer from a JSON number (or a whole-number float) within `[lo, hi]`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]
fn int_in(value: &Value, lo: i64, hi: i64) -> Option<i64> {
    let v = value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER as f64)
            .map(|f| f as i64)
    })?;
    (lo..=hi).contains(&v).then_some(v)
}

/// 64-bit integers may also arrive as decimal strings.
fn int64(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        other => int_in(other, i64::MIN, i64::MAX),
    }
}

/// JSON rendering of a decoded `int64_t`: a number when exact, else a string.
fn int64_value(v: i64) -> Value {
    if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&v) {
        Value::from(v)
    } else {
        Value::String(v.to_string())
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let (head, rest) = self.buf.split_first_chunk::<N>()?;
        self.buf = rest;
        Some(*head)
    }

    fn read_value(&mut self, kind: FieldKind, dims: &[usize]) -> Option<Value> {
        let Some((&len, rest)) = dims.split_first() else {
            return self.read_scalar(kind);
        };
        // Each element takes at least one byte, which bounds allocation on
        // hostile length members.
        if len > self.buf.len() {
            return None;
        }
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_value(kind, rest)?);
        }
        Some(Value::Array(items))
    }

    fn read_scalar(&mut self, kind: FieldKind) -> Option<Value> {
        let value = match kind {
            FieldKind::Int8 => Value::from(i8::from_be_bytes(self.take()?)),
            FieldKind::Byte => Value::from(u8::from_be_bytes(self.take()?)),
            FieldKind::Int16 => Value::from(i16::from_be_bytes(self.take()?)),
            FieldKind::Int32 => Value::from(i32::from_be_bytes(self.take()?)),
            FieldKind::Int64 => int64_value(i64::from_be_bytes(self.take()?)),
            FieldKind::Float => {
                let f = f32::from_be_bytes(self.take()?);
                Number::from_f64(f64::from(f)).map_or(Value::Null, Value::Number)
            }
            FieldKind::Double => {
                let f = f64::from_be_bytes(self.take()?);
                Number::from_f64(f).map_or(Value::Null, Value::Number)
            }
            FieldKind::Boolean => Value::Bool(u8::from_be_bytes(self.take()?) != 0),
            FieldKind::String => {
                let len = usize::try_from(i32::from_be_bytes(self.take()?)).ok()?;
                if len == 0 || len > self.buf.len() {
                    return None;
                }
                let (raw, rest) = self.buf.split_at(len);
                self.buf = rest;
                let (text, nul) = raw.split_at(len - 1);
                if nul != [0] {
                    return None;
                }
                Value::String(std::str::from_utf8(text).ok()?.to_string())
            }
        };
        Some(value)
    }
}
