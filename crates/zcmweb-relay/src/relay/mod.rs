//! Relay Core: typed publish/subscribe over the Native Bridge.
//!
//! All table mutation and every native call happen on one task, the relay
//! actor. [`RelayHandle`] is the cheap, cloneable front end: it resolves
//! types and encodes on the caller's side, then hands the rest to the actor
//! and awaits its acknowledgment.

mod actor;
mod table;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use zcmweb_core::{Codec, CodecError, Message, TypeHash, TypeRegistry, TypeSelector};

use crate::bridge::{NativeError, SubscriptionHandle, Transport};
use actor::{Command, Event, RelayActor};

/// Callback for decoded inbound messages. Runs on the relay actor, so it
/// must not block.
pub type MessageHandler = Arc<dyn Fn(&str, Message) + Send + Sync>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no codec registered for type hash {0}")]
    UnknownType(TypeHash),

    #[error("no codec registered for type '{0}'")]
    UnknownTypeName(String),

    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error("transport error: {0}")]
    Native(#[from] NativeError),

    #[error("relay core is not running")]
    Closed,
}

impl From<oneshot::error::RecvError> for RelayError {
    fn from(_: oneshot::error::RecvError) -> Self {
        Self::Closed
    }
}

/// Point-in-time counters from the relay actor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub subscriptions: usize,
    pub pending_operations: usize,
}

/// Start the relay actor over `transport`.
///
/// Must be called inside a tokio runtime.
pub fn spawn(transport: Arc<dyn Transport>, registry: Arc<TypeRegistry>) -> RelayHandle {
    let (events, rx) = mpsc::unbounded_channel();
    let actor = RelayActor::new(transport, Arc::clone(&registry), events.downgrade());
    tokio::spawn(actor.run(rx));
    RelayHandle { events, registry }
}

#[derive(Clone)]
pub struct RelayHandle {
    events: mpsc::UnboundedSender<Event>,
    registry: Arc<TypeRegistry>,
}

impl RelayHandle {
    pub const fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Codec for a type named by hash or name.
    pub fn resolve(&self, selector: &TypeSelector) -> Result<Arc<dyn Codec>, RelayError> {
        self.registry
            .resolve(selector)
            .map(Arc::clone)
            .ok_or_else(|| match selector {
                TypeSelector::Hash(hash) => RelayError::UnknownType(*hash),
                TypeSelector::Name(name) => RelayError::UnknownTypeName(name.clone()),
            })
    }

    fn send(&self, command: Command) -> Result<(), RelayError> {
        self.events
            .send(Event::Command(command))
            .map_err(|_| RelayError::Closed)
    }

    /// Encode `msg` with the codec named by its embedded hash and publish it
    /// once. Transport failures are reported, never retried.
    pub async fn publish(&self, channel: &str, msg: &Message) -> Result<(), RelayError> {
        let codec = self.resolve(&TypeSelector::Hash(msg.type_hash))?;
        let payload = codec.encode(msg)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Publish {
            channel: channel.to_string(),
            payload,
            reply,
        })?;
        Ok(rx.await??)
    }

    /// Subscribe to `channel` (a transport pattern).
    ///
    /// With a type, payloads are decoded with exactly that codec. Without
    /// one, each payload's leading hash picks the codec. Resolves once the
    /// transport has accepted the subscription and the table holds it.
    pub async fn subscribe(
        &self,
        channel: &str,
        ty: Option<&TypeSelector>,
        owner: Option<&str>,
        on_message: MessageHandler,
    ) -> Result<SubscriptionHandle, RelayError> {
        let codec = ty.map(|t| self.resolve(t)).transpose()?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            channel: channel.to_string(),
            codec,
            owner: owner.map(str::to_string),
            on_message,
            reply,
        })?;
        Ok(rx.await??)
    }

    /// Remove a subscription. Unknown or already removed handles succeed
    /// immediately.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unsubscribe {
            handle,
            reply: Some(reply),
        })?;
        Ok(rx.await??)
    }

    /// Queue an unsubscribe without waiting for it. Usable from synchronous
    /// teardown paths.
    pub fn unsubscribe_detached(&self, handle: SubscriptionHandle) -> Result<(), RelayError> {
        self.send(Command::Unsubscribe {
            handle,
            reply: None,
        })
    }

    pub async fn flush(&self) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Flush { reply })?;
        Ok(rx.await??)
    }

    pub async fn set_queue_size(&self, size: u32) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetQueueSize { size, reply })?;
        Ok(rx.await??)
    }

    pub fn pause(&self) -> Result<(), RelayError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), RelayError> {
        self.send(Command::Resume)
    }

    /// Stop the transport. The actor exits once the transport acknowledges.
    pub async fn stop(&self) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply })?;
        Ok(rx.await??)
    }

    pub async fn stats(&self) -> Result<RelayStats, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        Ok(rx.await?)
    }
}
