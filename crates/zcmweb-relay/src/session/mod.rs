//! Remote Session Manager: attributes relay subscriptions to connections
//! and releases them when a connection ends.

mod connection;
mod error;
mod registry;

pub use connection::{RemoteSession, Tag};
pub use error::{AckError, SessionError};
pub use registry::SessionRegistry;
