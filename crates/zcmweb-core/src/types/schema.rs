//! Schema descriptor sets.
//!
//! A descriptor set is a namespace tree: each namespace holds types and
//! nested packages. Type full names are the dot-joined package path plus the
//! type name (`nav.sensors.imu_t`).
//!
//! ```json
//! {
//!   "types":    { "heartbeat_t": { "fields": [ { "name": "utime", "type": "int64_t" } ] } },
//!   "packages": { "nav": { "types": { ... }, "packages": { ... } } }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::hash::TypeHash;
use crate::error::{Error, Result};

/// Root of a descriptor tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSet {
    #[serde(flatten)]
    pub root: Namespace,
}

/// One level of the namespace tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, TypeDef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<String, Namespace>,
}

/// A message type: an ordered list of members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub fields: Vec<FieldDef>,
}

/// One member of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dims: Vec<Dimension>,
}

/// Primitive member kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    #[serde(rename = "int8_t")]
    Int8,
    #[serde(rename = "int16_t")]
    Int16,
    #[serde(rename = "int32_t")]
    Int32,
    #[serde(rename = "int64_t")]
    Int64,
    #[serde(rename = "byte")]
    Byte,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "double")]
    Double,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "boolean")]
    Boolean,
}

impl FieldKind {
    /// The schema-language spelling, which also feeds the content hash.
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Int8 => "int8_t",
            Self::Int16 => "int16_t",
            Self::Int32 => "int32_t",
            Self::Int64 => "int64_t",
            Self::Byte => "byte",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Boolean => "boolean",
        }
    }

    /// Kinds that may size a variable-length dimension.
    pub const fn is_length(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::Byte)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Array dimension: a fixed length or the name of an earlier length member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dimension {
    Fixed(usize),
    Variable(String),
}

impl Dimension {
    const fn mode(&self) -> u8 {
        match self {
            Self::Fixed(_) => 0,
            Self::Variable(_) => 1,
        }
    }

    fn size_text(&self) -> String {
        match self {
            Self::Fixed(n) => n.to_string(),
            Self::Variable(member) => member.clone(),
        }
    }
}

/// A type found while walking the tree.
#[derive(Debug, Clone)]
pub struct NamedType {
    pub full_name: String,
    pub def: TypeDef,
}

impl SchemaSet {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Schema(format!("Failed to read schema {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Every type in the tree with its dot-joined full name, depth first.
    pub fn walk(&self) -> Vec<NamedType> {
        let mut out = Vec::new();
        walk_namespace(&self.root, "", &mut out);
        out
    }
}

fn walk_namespace(ns: &Namespace, prefix: &str, out: &mut Vec<NamedType>) {
    for (name, def) in &ns.types {
        out.push(NamedType {
            full_name: qualify(prefix, name),
            def: def.clone(),
        });
    }
    for (name, child) in &ns.packages {
        walk_namespace(child, &qualify(prefix, name), out);
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

impl TypeDef {
    /// Check that every variable dimension names an earlier integer member.
    pub fn validate(&self, full_name: &str) -> Result<()> {
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::Schema(format!(
                    "{full_name}: duplicate member '{}'",
                    field.name
                )));
            }
            for dim in &field.dims {
                let Dimension::Variable(len_name) = dim else {
                    continue;
                };
                let ok = self.fields[..i]
                    .iter()
                    .any(|f| &f.name == len_name && f.dims.is_empty() && f.kind.is_length());
                if !ok {
                    return Err(Error::Schema(format!(
                        "{full_name}.{}: dimension '{len_name}' must name an earlier scalar integer member",
                        field.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Structural hash of the member layout.
    ///
    /// Names of the type and its members do not participate, so two types
    /// with identical layouts share a hash.
    pub fn base_hash(&self) -> u64 {
        let mut v: u64 = 0x1234_5678;
        for field in &self.fields {
            v = hash_str(v, field.kind.type_name());
            v = hash_byte(v, len_byte(field.dims.len()));
            for dim in &field.dims {
                v = hash_byte(v, dim.mode());
                v = hash_str(v, &dim.size_text());
            }
        }
        v
    }

    /// The hash written at the front of every encoded message of this type.
    pub fn fingerprint(&self) -> TypeHash {
        TypeHash::from_unsigned(self.base_hash().rotate_left(1))
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn len_byte(n: usize) -> u8 {
    n as u8
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
const fn hash_byte(v: u64, c: u8) -> u64 {
    // Characters are folded in as signed bytes, and the right shift sign
    // extends.
    let shifted = ((v as i64) >> 55) as u64;
    ((v << 8) ^ shifted).wrapping_add(c as i8 as i64 as u64)
}

fn hash_str(v: u64, s: &str) -> u64 {
    let v = hash_byte(v, len_byte(s.len()));
    s.bytes().fold(v, hash_byte)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn field(name: &str, kind: FieldKind, dims: Vec<Dimension>) -> FieldDef {
        FieldDef {
            name: name.into(),
            kind,
            dims,
        }
    }

    #[test]
    fn empty_type_fingerprint_is_rotated_seed() {
        let def = TypeDef::default();
        assert_eq!(def.base_hash(), 0x1234_5678);
        assert_eq!(def.fingerprint(), TypeHash(0x2468_ACF0));
    }

    #[test]
    fn layout_changes_change_the_hash() {
        let a = TypeDef {
            fields: vec![field("x", FieldKind::Int32, vec![])],
        };
        let b = TypeDef {
            fields: vec![field("x", FieldKind::Int64, vec![])],
        };
        let c = TypeDef {
            fields: vec![field("x", FieldKind::Int32, vec![Dimension::Fixed(3)])],
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn member_names_do_not_affect_the_hash() {
        let a = TypeDef {
            fields: vec![field("x", FieldKind::Double, vec![])],
        };
        let b = TypeDef {
            fields: vec![field("renamed", FieldKind::Double, vec![])],
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn walk_qualifies_nested_packages() {
        let schema = SchemaSet::from_json(
            r#"{
                "types": { "root_t": { "fields": [] } },
                "packages": {
                    "nav": {
                        "types": { "pose_t": { "fields": [] } },
                        "packages": { "imu": { "types": { "raw_t": { "fields": [] } } } }
                    }
                }
            }"#,
        )
        .unwrap();
        let names: Vec<_> = schema.walk().into_iter().map(|t| t.full_name).collect();
        assert_eq!(names, vec!["root_t", "nav.pose_t", "nav.imu.raw_t"]);
    }

    #[test]
    fn variable_dimension_must_reference_earlier_integer() {
        let good = TypeDef {
            fields: vec![
                field("n", FieldKind::Int32, vec![]),
                field("v", FieldKind::Float, vec![Dimension::Variable("n".into())]),
            ],
        };
        assert!(good.validate("good_t").is_ok());

        let forward = TypeDef {
            fields: vec![
                field("v", FieldKind::Float, vec![Dimension::Variable("n".into())]),
                field("n", FieldKind::Int32, vec![]),
            ],
        };
        assert!(matches!(forward.validate("fwd_t"), Err(Error::Schema(_))));

        let non_integer = TypeDef {
            fields: vec![
                field("n", FieldKind::Double, vec![]),
                field("v", FieldKind::Float, vec![Dimension::Variable("n".into())]),
            ],
        };
        assert!(non_integer.validate("dbl_t").is_err());
    }

    #[test]
    fn dimensions_parse_from_numbers_and_names() {
        let f: FieldDef =
            serde_json::from_str(r#"{"name":"m","type":"double","dims":[4,"rows"]}"#).unwrap();
        assert_eq!(
            f.dims,
            vec![Dimension::Fixed(4), Dimension::Variable("rows".into())]
        );
    }
}
