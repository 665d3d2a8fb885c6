//! Type registry: content hash to codec.
//!
//! Built once at startup and shared read-only afterwards. Construction fails
//! on any hash collision, since an ambiguous hash would make wildcard
//! dispatch pick an arbitrary codec.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tracing::debug;

use super::codec::{Codec, SchemaCodec, TypeDescriptor};
use super::hash::TypeHash;
use super::message::TypeSelector;
use super::schema::SchemaSet;
use crate::error::{Error, Result};

/// Immutable mapping from content hash to codec.
#[derive(Default)]
pub struct TypeRegistry {
    by_hash: HashMap<TypeHash, Arc<dyn Codec>>,
    by_name: HashMap<String, TypeHash>,
    /// Short names claimed by more than one package.
    ambiguous: Vec<String>,
}

impl TypeRegistry {
    /// Registry with no types; every wildcard message is dropped.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register the given codecs, rejecting hash or name collisions.
    pub fn from_codecs(codecs: impl IntoIterator<Item = Arc<dyn Codec>>) -> Result<Self> {
        let mut registry = Self::default();
        for codec in codecs {
            registry.insert(codec)?;
        }
        registry.index_short_names();
        Ok(registry)
    }

    /// Walk a descriptor set and register a [`SchemaCodec`] per type.
    pub fn from_schema(schema: &SchemaSet) -> Result<Self> {
        let codecs = schema
            .walk()
            .into_iter()
            .map(|t| {
                t.def.validate(&t.full_name)?;
                Ok(Arc::new(SchemaCodec::new(t.full_name, t.def)) as Arc<dyn Codec>)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_codecs(codecs)
    }

    fn insert(&mut self, codec: Arc<dyn Codec>) -> Result<()> {
        let hash = codec.hash();
        let name = codec.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateType(name));
        }
        match self.by_hash.entry(hash) {
            Entry::Occupied(existing) => Err(Error::HashCollision {
                hash,
                first: existing.get().name().to_string(),
                second: name,
            }),
            Entry::Vacant(slot) => {
                debug!(type_name = %name, %hash, "Registered type");
                slot.insert(codec);
                self.by_name.insert(name, hash);
                Ok(())
            }
        }
    }

    /// Make `pose_t` resolve to `nav.pose_t` when no other package defines a
    /// `pose_t`.
    fn index_short_names(&mut self) {
        let mut short: HashMap<String, Option<TypeHash>> = HashMap::new();
        for (name, hash) in &self.by_name {
            if let Some((_, tail)) = name.rsplit_once('.') {
                short
                    .entry(tail.to_string())
                    .and_modify(|h| *h = None)
                    .or_insert(Some(*hash));
            }
        }
        for (name, hash) in short {
            match hash {
                Some(hash) if !self.by_name.contains_key(&name) => {
                    self.by_name.insert(name, hash);
                }
                _ => self.ambiguous.push(name),
            }
        }
    }

    pub fn get(&self, hash: TypeHash) -> Option<&Arc<dyn Codec>> {
        self.by_hash.get(&hash)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Arc<dyn Codec>> {
        self.by_name.get(name).and_then(|h| self.by_hash.get(h))
    }

    /// Resolve a selector by hash or by full or unambiguous short name.
    pub fn resolve(&self, selector: &TypeSelector) -> Option<&Arc<dyn Codec>> {
        match selector {
            TypeSelector::Hash(hash) => self.get(*hash),
            TypeSelector::Name(name) => self.get_by_name(name),
        }
    }

    /// Codec for a raw payload, found via its leading big-endian hash.
    pub fn for_payload(&self, payload: &[u8]) -> Option<&Arc<dyn Codec>> {
        TypeHash::from_prefix(payload).and_then(|h| self.get(h))
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Descriptors of every registered type, sorted by name.
    pub fn descriptors(&self) -> Vec<TypeDescriptor> {
        let mut out: Vec<_> = self.by_hash.values().map(|c| c.describe()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.by_hash.len())
            .field("ambiguous_short_names", &self.ambiguous)
            .finish()
    }
}
