//! The relay actor: one task owning the subscription table, the pending
//! operation queue and the Native Bridge.
//!
//! Control calls are attempted as soon as their command arrives. A call
//! answered with AGAIN joins the pending queue and is re-issued once per
//! loop turn, after the events that arrived in between and a cooperative
//! yield, until the transport gives a final answer.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use zcmweb_core::{Codec, TypeHash, TypeRegistry};

#[cfg(feature = "metrics")]
use zcmweb_core::metrics::RelayMetrics;

use super::table::{Subscription, SubscriptionState, SubscriptionTable};
use super::{MessageHandler, RelayStats};
use crate::bridge::{
    NativeBridge, PendingOperation, RawHandler, SubscriptionHandle, Transport, Waiter,
};

/// Upper bound on events handled between two retry rounds.
const EVENT_BATCH: usize = 64;

pub enum Event {
    Command(Command),
    Inbound {
        handle: SubscriptionHandle,
        channel: String,
        payload: Vec<u8>,
    },
}

pub enum Command {
    Publish {
        channel: String,
        payload: Vec<u8>,
        reply: Waiter<()>,
    },
    Subscribe {
        channel: String,
        codec: Option<Arc<dyn Codec>>,
        owner: Option<String>,
        on_message: MessageHandler,
        reply: Waiter<SubscriptionHandle>,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
        reply: Option<Waiter<()>>,
    },
    Flush {
        reply: Waiter<()>,
    },
    SetQueueSize {
        size: u32,
        reply: Waiter<()>,
    },
    Stop {
        reply: Waiter<()>,
    },
    Pause,
    Resume,
    Stats {
        reply: oneshot::Sender<RelayStats>,
    },
}

/// Everything needed to re-issue a subscribe and record it on success.
pub struct SubscribeCall {
    handle: SubscriptionHandle,
    pattern: String,
    raw: RawHandler,
    entry: Option<Subscription>,
}

#[derive(Debug, Clone, Copy)]
pub enum ControlCall {
    Flush,
    SetQueueSize(u32),
    Stop,
}

impl ControlCall {
    const fn name(self) -> &'static str {
        match self {
            Self::Flush => "flush",
            Self::SetQueueSize(_) => "set_queue_size",
            Self::Stop => "stop",
        }
    }
}

enum Pending {
    Subscribe(PendingOperation<SubscribeCall, SubscriptionHandle>),
    Unsubscribe(PendingOperation<SubscriptionHandle, ()>),
    Control(PendingOperation<ControlCall, ()>),
}

impl Pending {
    const fn op_name(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Control(op) => op.kind.name(),
        }
    }
}

pub struct RelayActor {
    bridge: NativeBridge,
    registry: Arc<TypeRegistry>,
    table: SubscriptionTable,
    pending: VecDeque<Pending>,
    events: mpsc::WeakUnboundedSender<Event>,
    stopped: bool,
    #[cfg(feature = "metrics")]
    metrics: RelayMetrics,
}

impl RelayActor {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<TypeRegistry>,
        events: mpsc::WeakUnboundedSender<Event>,
    ) -> Self {
        Self {
            bridge: NativeBridge::new(transport),
            registry,
            table: SubscriptionTable::default(),
            pending: VecDeque::new(),
            events,
            stopped: false,
            #[cfg(feature = "metrics")]
            metrics: RelayMetrics::new(),
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Event>) {
        self.bridge.start();
        info!(types = self.registry.len(), "Relay core started");
        while !self.stopped {
            if self.pending.is_empty() {
                let Some(event) = rx.recv().await else {
                    break;
                };
                self.handle_event(event);
                continue;
            }

            for _ in 0..EVENT_BATCH {
                match rx.try_recv() {
                    Ok(event) => self.handle_event(event),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
            }
            self.retry_pending();
            if !self.pending.is_empty() {
                tokio::task::yield_now().await;
            }
        }
        info!(
            subscriptions = self.table.len(),
            abandoned = self.pending.len(),
            "Relay core stopped"
        );
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.handle_command(command),
            Event::Inbound {
                handle,
                channel,
                payload,
            } => self.dispatch(handle, &channel, &payload),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Publish {
                channel,
                payload,
                reply,
            } => {
                let result = self.bridge.publish(&channel, &payload);
                if let Err(e) = &result {
                    debug!(channel, error = %e, "Publish refused by transport");
                }
                let _ = reply.send(result);
            }
            Command::Subscribe {
                channel,
                codec,
                owner,
                on_message,
                reply,
            } => self.start_subscribe(channel, codec, owner, on_message, reply),
            Command::Unsubscribe { handle, reply } => self.start_unsubscribe(handle, reply),
            Command::Flush { reply } => self.start_control(ControlCall::Flush, reply),
            Command::SetQueueSize { size, reply } => {
                self.start_control(ControlCall::SetQueueSize(size), reply);
            }
            Command::Stop { reply } => self.start_control(ControlCall::Stop, reply),
            Command::Pause => self.bridge.pause(),
            Command::Resume => self.bridge.resume(),
            Command::Stats { reply } => {
                let _ = reply.send(RelayStats {
                    subscriptions: self.table.len(),
                    pending_operations: self.pending.len(),
                });
            }
        }
    }

    /// Raw handler for one subscription: copies the transient payload and
    /// queues it for dispatch on this task.
    fn raw_handler(&self, handle: SubscriptionHandle) -> RawHandler {
        let events = self.events.clone();
        Arc::new(move |channel: &str, payload: &[u8]| {
            if let Some(events) = events.upgrade() {
                let _ = events.send(Event::Inbound {
                    handle,
                    channel: channel.to_string(),
                    payload: payload.to_vec(),
                });
            }
        })
    }

    fn start_subscribe(
        &mut self,
        channel: String,
        codec: Option<Arc<dyn Codec>>,
        owner: Option<String>,
        on_message: MessageHandler,
        reply: Waiter<SubscriptionHandle>,
    ) {
        let handle = self.bridge.allocate_handle();
        let call = SubscribeCall {
            handle,
            pattern: channel.clone(),
            raw: self.raw_handler(handle),
            entry: Some(Subscription {
                channel,
                codec,
                owner,
                on_message,
                state: SubscriptionState::Active,
            }),
        };
        self.drive(Pending::Subscribe(
            PendingOperation::new(call).with_waiter(Some(reply)),
        ));
    }

    fn start_unsubscribe(&mut self, handle: SubscriptionHandle, reply: Option<Waiter<()>>) {
        let Some(entry) = self.table.get_mut(handle) else {
            trace!(%handle, "Unsubscribe of absent handle");
            if let Some(reply) = reply {
                let _ = reply.send(Ok(()));
            }
            return;
        };
        if entry.state == SubscriptionState::Unsubscribing {
            let in_flight = self.pending.iter_mut().find_map(|p| match p {
                Pending::Unsubscribe(op) if op.kind == handle => Some(op),
                _ => None,
            });
            if let Some(op) = in_flight {
                debug!(%handle, "Joining in-flight unsubscribe");
                op.join(reply);
                return;
            }
        }
        entry.state = SubscriptionState::Unsubscribing;
        self.drive(Pending::Unsubscribe(
            PendingOperation::new(handle).with_waiter(reply),
        ));
    }

    fn start_control(&mut self, call: ControlCall, reply: Waiter<()>) {
        self.drive(Pending::Control(
            PendingOperation::new(call).with_waiter(Some(reply)),
        ));
    }

    /// Make one attempt; keep the operation queued if it must be retried.
    fn drive(&mut self, mut op: Pending) {
        if self.attempt(&mut op) {
            return;
        }
        trace!(op = op.op_name(), "Transport busy, will retry");
        #[cfg(feature = "metrics")]
        self.metrics.record_retry(op.op_name());
        self.pending.push_back(op);
    }

    fn retry_pending(&mut self) {
        for _ in 0..self.pending.len() {
            let Some(op) = self.pending.pop_front() else {
                break;
            };
            self.drive(op);
            if self.stopped {
                break;
            }
        }
    }

    /// Returns `true` once the operation has completed.
    fn attempt(&mut self, op: &mut Pending) -> bool {
        match op {
            Pending::Subscribe(op) => {
                let attempt = self
                    .bridge
                    .try_subscribe(op.kind.handle, &op.kind.pattern, &op.kind.raw);
                let Some(result) = op.record(attempt) else {
                    return false;
                };
                match &result {
                    Ok(handle) => {
                        if let Some(entry) = op.kind.entry.take() {
                            info!(
                                %handle,
                                channel = %entry.channel,
                                type_name = entry.codec.as_ref().map_or("*", |c| c.name()),
                                owner = entry.owner.as_deref().unwrap_or("-"),
                                "Subscribed"
                            );
                            self.table.insert(*handle, entry);
                        }
                    }
                    Err(e) => warn!(handle = %op.kind.handle, error = %e, "Subscribe failed"),
                }
                op.complete(&result);
                true
            }
            Pending::Unsubscribe(op) => {
                let handle = op.kind;
                let attempt = self.bridge.try_unsubscribe(handle);
                let Some(result) = op.record(attempt) else {
                    return false;
                };
                match &result {
                    Ok(()) => {
                        if let Some(entry) = self.table.remove(handle) {
                            info!(%handle, channel = %entry.channel, "Unsubscribed");
                        }
                    }
                    Err(e) => {
                        warn!(%handle, error = %e, "Unsubscribe failed");
                        if let Some(entry) = self.table.get_mut(handle) {
                            entry.state = SubscriptionState::Active;
                        }
                    }
                }
                op.complete(&result);
                true
            }
            Pending::Control(op) => {
                let call = op.kind;
                let attempt = match call {
                    ControlCall::Flush => self.bridge.try_flush(),
                    ControlCall::SetQueueSize(size) => self.bridge.try_set_queue_size(size),
                    ControlCall::Stop => self.bridge.try_stop(),
                };
                let Some(result) = op.record(attempt) else {
                    return false;
                };
                match (&result, call) {
                    (Ok(()), ControlCall::Stop) => {
                        info!(live = self.bridge.live_subscriptions(), "Transport stopped");
                        self.stopped = true;
                    }
                    (Ok(()), _) => debug!(op = call.name(), "Control call acknowledged"),
                    (Err(e), _) => warn!(op = call.name(), error = %e, "Control call failed"),
                }
                op.complete(&result);
                true
            }
        }
    }

    fn dispatch(&self, handle: SubscriptionHandle, channel: &str, payload: &[u8]) {
        let Some(sub) = self.table.get(handle) else {
            trace!(%handle, channel, "Message for removed subscription");
            return;
        };
        match &sub.codec {
            Some(codec) => match codec.decode(payload) {
                Some(msg) => (sub.on_message)(channel, msg),
                None => {
                    let type_name = codec.name();
                    trace!(%handle, channel, type_name, "Dropping undecodable message");
                }
            },
            None => self.dispatch_any(sub, channel, payload),
        }
    }

    fn dispatch_any(&self, sub: &Subscription, channel: &str, payload: &[u8]) {
        let Some(codec) = self.registry.for_payload(payload) else {
            let hash = TypeHash::from_prefix(payload);
            warn!(channel, hash = ?hash, "Dropping message of unknown type");
            #[cfg(feature = "metrics")]
            self.metrics.record_drop("unknown_type");
            return;
        };
        if let Some(msg) = codec.decode(payload) {
            (sub.on_message)(channel, msg);
        } else {
            warn!(channel, type_name = codec.name(), "Dropping malformed message");
            #[cfg(feature = "metrics")]
            self.metrics.record_drop("malformed");
        }
    }
}

