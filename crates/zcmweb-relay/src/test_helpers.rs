//! Shared test fixtures: a scripted transport and a sample schema.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use regex::Regex;
use serde_json::json;
use zcmweb_core::types::SchemaSet;
use zcmweb_core::{Message, TypeRegistry};

use crate::bridge::{NativeSubId, RawHandler, Status, Transport};
use crate::relay::{self, RelayHandle};

pub const SAMPLE_SCHEMA: &str = r#"{
    "types": {
        "example_t": { "fields": [
            { "name": "utime", "type": "int64_t" },
            { "name": "position", "type": "double", "dims": [3] },
            { "name": "name", "type": "string" }
        ] }
    },
    "packages": {
        "nav": { "types": {
            "heading_t": { "fields": [
                { "name": "degrees", "type": "float" },
                { "name": "valid", "type": "boolean" }
            ] }
        } }
    }
}"#;

#[allow(clippy::unwrap_used)]
pub fn sample_registry() -> Arc<TypeRegistry> {
    let schema = SchemaSet::from_json(SAMPLE_SCHEMA).unwrap();
    Arc::new(TypeRegistry::from_schema(&schema).unwrap())
}

#[allow(clippy::unwrap_used)]
pub fn example_message(registry: &TypeRegistry, utime: i64) -> Message {
    let hash = registry.get_by_name("example_t").unwrap().hash();
    let fields = json!({
        "utime": utime,
        "position": [1.0, 2.5, -3.0],
        "name": "probe"
    });
    Message::new(hash, fields.as_object().unwrap().clone())
}

/// Relay over a fresh [`FakeTransport`] with the sample schema.
pub fn fake_relay() -> (RelayHandle, Arc<FakeTransport>) {
    let fake = Arc::new(FakeTransport::new());
    let relay = relay::spawn(fake.clone(), sample_registry());
    (relay, fake)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Publish,
    Subscribe,
    Unsubscribe,
    Flush,
    SetQueueSize,
    Start,
    Stop,
    Pause,
    Resume,
}

#[derive(Default)]
struct FakeInner {
    scripts: HashMap<Op, VecDeque<Status>>,
    calls: HashMap<Op, usize>,
    handlers: HashMap<NativeSubId, (Regex, RawHandler)>,
    next_id: NativeSubId,
}

/// Transport whose answers are scripted per operation. Unscripted calls
/// succeed. Successful publishes loop back to matching handlers.
#[derive(Default)]
pub struct FakeTransport {
    inner: Mutex<FakeInner>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue answers for the next calls of `op`.
    pub fn script(&self, op: Op, statuses: impl IntoIterator<Item = Status>) {
        self.lock()
            .scripts
            .entry(op)
            .or_default()
            .extend(statuses);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn handler_count(&self) -> usize {
        self.lock().handlers.len()
    }

    fn answer(&self, op: Op) -> Status {
        let mut inner = self.lock();
        *inner.calls.entry(op).or_default() += 1;
        inner
            .scripts
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Status::Ok)
    }

    /// Invoke every handler whose pattern matches `channel`, as the native
    /// side would for an inbound message.
    pub fn deliver(&self, channel: &str, payload: &[u8]) {
        let handlers: Vec<RawHandler> = self
            .lock()
            .handlers
            .values()
            .filter(|(pattern, _)| pattern.is_match(channel))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(channel, payload);
        }
    }
}

impl Transport for FakeTransport {
    fn publish(&self, channel: &str, payload: &[u8]) -> Status {
        let status = self.answer(Op::Publish);
        if status == Status::Ok {
            self.deliver(channel, payload);
        }
        status
    }

    fn subscribe(&self, pattern: &str, handler: RawHandler) -> Result<NativeSubId, Status> {
        match self.answer(Op::Subscribe) {
            Status::Ok => {
                let pattern =
                    Regex::new(&format!("^(?:{pattern})$")).map_err(|_| Status::Invalid)?;
                let mut inner = self.lock();
                inner.next_id += 1;
                let id = inner.next_id;
                inner.handlers.insert(id, (pattern, handler));
                Ok(id)
            }
            other => Err(other),
        }
    }

    fn unsubscribe(&self, id: NativeSubId) -> Status {
        let status = self.answer(Op::Unsubscribe);
        if status == Status::Ok && self.lock().handlers.remove(&id).is_none() {
            return Status::Invalid;
        }
        status
    }

    fn flush(&self) -> Status {
        self.answer(Op::Flush)
    }

    fn pause(&self) {
        self.answer(Op::Pause);
    }

    fn resume(&self) {
        self.answer(Op::Resume);
    }

    fn set_queue_size(&self, _size: u32) -> Status {
        self.answer(Op::SetQueueSize)
    }

    fn start(&self) {
        self.answer(Op::Start);
    }

    fn stop(&self) -> Status {
        self.answer(Op::Stop)
    }
}
