//! Type registry and the schema layer it is built from.

pub mod codec;
pub mod hash;
pub mod message;
pub mod registry;
pub mod schema;

pub use codec::{Codec, CodecError, SchemaCodec, TypeDescriptor};
pub use hash::TypeHash;
pub use message::{Message, TypeSelector};
pub use registry::TypeRegistry;
pub use schema::SchemaSet;
