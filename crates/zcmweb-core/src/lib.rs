//! ZCM Web Core Library
//!
//! Shared functionality for the ZCM web relay:
//! - Content-hash type and big-integer-safe hash handling
//! - Schema descriptor sets and the schema-driven message codec
//! - Type registry mapping content hashes to codecs
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod tracing_init;
pub mod types;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use types::{Codec, CodecError, Message, TypeHash, TypeRegistry, TypeSelector};
