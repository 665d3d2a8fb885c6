//! Per-connection session state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zcmweb_core::{Message, TypeSelector};

use super::error::SessionError;
use crate::bridge::SubscriptionHandle;
use crate::protocol::ServerFrame;
use crate::relay::{MessageHandler, RelayHandle};

/// Per-connection subscription identifier handed to the remote client.
pub type Tag = u64;

#[derive(Default)]
struct Subscriptions {
    next_tag: Tag,
    by_tag: HashMap<Tag, SubscriptionHandle>,
}

struct Shared {
    subscriptions: Mutex<Subscriptions>,
    closed: AtomicBool,
}

/// One remote client's view of the relay.
///
/// Tags are scoped to the session: two sessions may both hold tag 1.
/// Native subscription handles stay inside; clients only ever see tags.
pub struct RemoteSession {
    id: String,
    relay: RelayHandle,
    outbound: mpsc::Sender<ServerFrame>,
    shared: Arc<Shared>,
}

impl RemoteSession {
    pub fn new(relay: RelayHandle, outbound: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            relay,
            outbound,
            shared: Arc::new(Shared {
                subscriptions: Mutex::new(Subscriptions::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn subscriptions(&self) -> MutexGuard<'_, Subscriptions> {
        self.shared
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions().by_tag.len()
    }

    /// Queue a frame for the client.
    pub async fn send(&self, frame: ServerFrame) -> Result<(), SessionError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Forwards decoded messages for `tag` to the client without blocking
    /// the relay. A full outbound buffer drops the message.
    fn forwarder(&self, tag: Tag) -> MessageHandler {
        let outbound = self.outbound.clone();
        let shared = Arc::clone(&self.shared);
        let session = self.id.clone();
        Arc::new(move |channel: &str, msg: Message| {
            if shared.closed.load(Ordering::Acquire) {
                return;
            }
            let frame = ServerFrame::Message {
                channel: channel.to_string(),
                msg,
                sub_id: tag,
            };
            match outbound.try_send(frame) {
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        session = %session,
                        channel,
                        tag,
                        "Outbound buffer full, dropping message"
                    );
                }
            }
        })
    }

    /// Subscribe on behalf of the client and return the new tag.
    pub async fn subscribe(
        &self,
        channel: &str,
        ty: Option<&TypeSelector>,
    ) -> Result<Tag, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let tag = {
            let mut subs = self.subscriptions();
            subs.next_tag += 1;
            subs.next_tag
        };
        let handle = self
            .relay
            .subscribe(channel, ty, Some(&self.id), self.forwarder(tag))
            .await?;

        let mut subs = self.subscriptions();
        if self.is_closed() {
            drop(subs);
            debug!(session = %self.id, tag, "Connection closed during subscribe");
            self.release(handle);
            return Err(SessionError::Closed);
        }
        subs.by_tag.insert(tag, handle);
        Ok(tag)
    }

    /// Wildcard subscription across every channel.
    pub async fn subscribe_all(&self) -> Result<Tag, SessionError> {
        self.subscribe(".*", None).await
    }

    /// Remove the subscription behind `tag`. Always acknowledged: the tag is
    /// gone afterwards even if the transport refused, and the relay gets one
    /// more detached attempt at the native unsubscribe.
    pub async fn unsubscribe(&self, tag: Tag) {
        let Some(handle) = self.subscriptions().by_tag.remove(&tag) else {
            return;
        };
        if let Err(e) = self.relay.unsubscribe(handle).await {
            warn!(
                session = %self.id,
                tag,
                %handle,
                error = %e,
                "Unsubscribe failed, releasing in background"
            );
            self.release(handle);
        }
    }

    /// Publish a client message. An explicit type overrides any embedded
    /// `__hash`.
    pub async fn publish(
        &self,
        channel: &str,
        mut fields: Map<String, Value>,
        ty: Option<&TypeSelector>,
    ) -> Result<(), SessionError> {
        let msg = match ty {
            Some(ty) => {
                let codec = self.relay.resolve(ty)?;
                fields.remove("__hash");
                Message::new(codec.hash(), fields)
            }
            None => serde_json::from_value(Value::Object(fields))
                .map_err(|e| SessionError::InvalidRequest(format!("msg: {e}")))?,
        };
        self.relay.publish(channel, &msg).await?;
        Ok(())
    }

    pub async fn flush(&self) -> Result<(), SessionError> {
        Ok(self.relay.flush().await?)
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        Ok(self.relay.pause()?)
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        Ok(self.relay.resume()?)
    }

    pub async fn set_queue_size(&self, size: u32) -> Result<(), SessionError> {
        Ok(self.relay.set_queue_size(size).await?)
    }

    fn release(&self, handle: SubscriptionHandle) {
        if let Err(e) = self.relay.unsubscribe_detached(handle) {
            warn!(session = %self.id, %handle, error = %e, "Could not release subscription");
        }
    }

    /// Tear down every subscription of this session. Returns how many were
    /// released. Does not wait for the relay; safe to call once the client
    /// is gone.
    pub fn disconnect(&self) -> usize {
        self.shared.closed.store(true, Ordering::Release);
        let released = std::mem::take(&mut self.subscriptions().by_tag);
        for handle in released.values() {
            self.release(*handle);
        }
        info!(session = %self.id, released = released.len(), "Session closed");
        released.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::bridge::Status;
    use crate::test_helpers::{Op, example_message, fake_relay};

    fn session(relay: &RelayHandle) -> (RemoteSession, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(64);
        (RemoteSession::new(relay.clone(), tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }

    #[tokio::test]
    async fn tags_are_scoped_to_the_session() {
        let (relay, _fake) = fake_relay();
        let (a, _rx_a) = session(&relay);
        let (b, _rx_b) = session(&relay);

        let ty = TypeSelector::from("example_t");
        assert_eq!(a.subscribe("POSE", Some(&ty)).await.unwrap(), 1);
        assert_eq!(a.subscribe("POSE", Some(&ty)).await.unwrap(), 2);
        assert_eq!(b.subscribe("POSE", Some(&ty)).await.unwrap(), 1);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn delivered_frames_carry_the_tag() {
        let (relay, _fake) = fake_relay();
        let (s, mut rx) = session(&relay);
        let tag = s.subscribe_all().await.unwrap();

        let msg = example_message(relay.registry(), 11);
        relay.publish("POSE", &msg).await.unwrap();
        relay.stats().await.unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        let ServerFrame::Message { channel, msg: got, sub_id } = &frames[0] else {
            panic!("unexpected frame {:?}", frames[0]);
        };
        assert_eq!(channel, "POSE");
        assert_eq!(got, &msg);
        assert_eq!(*sub_id, tag);
    }

    #[tokio::test]
    async fn disconnect_releases_every_subscription() {
        let (relay, fake) = fake_relay();
        let (s, mut rx) = session(&relay);
        let ty = TypeSelector::from("example_t");
        for _ in 0..3 {
            s.subscribe("POSE", Some(&ty)).await.unwrap();
        }
        assert_eq!(relay.stats().await.unwrap().subscriptions, 3);

        assert_eq!(s.disconnect(), 3);
        assert_eq!(s.subscription_count(), 0);

        relay
            .publish("POSE", &example_message(relay.registry(), 1))
            .await
            .unwrap();
        let stats = relay.stats().await.unwrap();
        assert_eq!(fake.calls(Op::Unsubscribe), 3);
        assert_eq!(stats.subscriptions, 0);
        assert_eq!(fake.handler_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_unknown_tag_is_a_no_op() {
        let (relay, fake) = fake_relay();
        let (s, _rx) = session(&relay);
        let tag = s.subscribe("A", None).await.unwrap();

        s.unsubscribe(tag).await;
        s.unsubscribe(tag).await;
        s.unsubscribe(99).await;
        assert_eq!(fake.calls(Op::Unsubscribe), 1);
        assert_eq!(s.subscription_count(), 0);
    }

    #[tokio::test]
    async fn refused_unsubscribe_still_releases_the_tag() {
        let (relay, fake) = fake_relay();
        fake.script(Op::Unsubscribe, [Status::Connect]);
        let (s, _rx) = session(&relay);
        let tag = s.subscribe("POSE", None).await.unwrap();

        s.unsubscribe(tag).await;
        assert_eq!(s.subscription_count(), 0);

        relay.stats().await.unwrap();
        assert_eq!(fake.calls(Op::Unsubscribe), 2);
        assert_eq!(relay.stats().await.unwrap().subscriptions, 0);
    }

    #[tokio::test]
    async fn subscribe_completing_after_disconnect_is_released() {
        let (relay, fake) = fake_relay();
        fake.script(Op::Subscribe, [Status::Again; 20]);
        let (s, _rx) = session(&relay);

        let pending = s.subscribe("A", None);
        tokio::pin!(pending);
        assert!(futures::poll!(&mut pending).is_pending());
        assert_eq!(s.disconnect(), 0);

        assert!(matches!(pending.await, Err(SessionError::Closed)));
        let stats = relay.stats().await.unwrap();
        assert_eq!(stats.subscriptions, 0);
        assert_eq!(fake.calls(Op::Unsubscribe), 1);
    }

    #[tokio::test]
    async fn publish_with_type_name_sets_the_hash() {
        let (relay, fake) = fake_relay();
        let (s, mut rx) = session(&relay);
        s.subscribe("POSE", Some(&"example_t".into())).await.unwrap();

        let fields = json!({"utime": 5, "position": [0.0, 0.0, 1.0], "name": "n"});
        s.publish(
            "POSE",
            fields.as_object().unwrap().clone(),
            Some(&"example_t".into()),
        )
        .await
        .unwrap();
        relay.stats().await.unwrap();

        assert_eq!(fake.calls(Op::Publish), 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn publish_without_hash_or_type_is_invalid() {
        let (relay, fake) = fake_relay();
        let (s, _rx) = session(&relay);

        let err = s
            .publish("POSE", json!({"utime": 1}).as_object().unwrap().clone(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidRequest(_)));
        assert_eq!(fake.calls(Op::Publish), 0);
    }

    #[tokio::test]
    async fn closed_session_refuses_new_subscriptions() {
        let (relay, fake) = fake_relay();
        let (s, _rx) = session(&relay);
        s.disconnect();

        assert!(matches!(s.subscribe("A", None).await, Err(SessionError::Closed)));
        assert_eq!(fake.calls(Op::Subscribe), 0);
    }
}
