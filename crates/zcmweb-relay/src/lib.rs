//! ZCM Web relay.
//!
//! Bridges a single pub/sub transport to many WebSocket clients. The
//! [`bridge`] owns the transport, the [`relay`] core owns the subscription
//! table and typed dispatch, and [`session`] ties subscriptions to client
//! connections.

pub mod bridge;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;
