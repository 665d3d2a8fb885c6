//! In-process transport.
//!
//! Publishes loop straight back to local subscribers. Used for single-host
//! setups (`inproc` URL) and by the integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use regex::Regex;
use tracing::{debug, trace};

use super::status::Status;
use super::transport::{NativeSubId, RawHandler, Transport};

const DEFAULT_QUEUE_SIZE: usize = 1024;

struct Subscription {
    pattern: Regex,
    handler: RawHandler,
}

struct Inner {
    subs: HashMap<NativeSubId, Subscription>,
    next_id: NativeSubId,
    running: bool,
    paused: bool,
    queue: VecDeque<(String, Vec<u8>)>,
    queue_size: usize,
}

pub struct InprocTransport {
    inner: Mutex<Inner>,
}

impl InprocTransport {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                subs: HashMap::new(),
                next_id: 1,
                running: true,
                paused: false,
                queue: VecDeque::new(),
                queue_size: DEFAULT_QUEUE_SIZE,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand one message to every matching handler, outside the lock so
    /// handlers may call back into the transport.
    fn deliver(&self, channel: &str, payload: &[u8]) {
        let handlers: Vec<RawHandler> = self
            .lock()
            .subs
            .values()
            .filter(|s| s.pattern.is_match(channel))
            .map(|s| RawHandler::clone(&s.handler))
            .collect();
        trace!(channel, matched = handlers.len(), "Delivering");
        for handler in handlers {
            handler(channel, payload);
        }
    }

    fn drain_queue(&self) {
        loop {
            let next = {
                let mut inner = self.lock();
                if inner.paused {
                    return;
                }
                inner.queue.pop_front()
            };
            match next {
                Some((channel, payload)) => self.deliver(&channel, &payload),
                None => return,
            }
        }
    }
}

impl Default for InprocTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InprocTransport {
    fn publish(&self, channel: &str, payload: &[u8]) -> Status {
        {
            let mut inner = self.lock();
            if !inner.running {
                return Status::Connect;
            }
            if inner.paused {
                if inner.queue.len() >= inner.queue_size {
                    inner.queue.pop_front();
                }
                inner.queue.push_back((channel.to_string(), payload.to_vec()));
                return Status::Ok;
            }
        }
        self.deliver(channel, payload);
        Status::Ok
    }

    fn subscribe(&self, pattern: &str, handler: RawHandler) -> Result<NativeSubId, Status> {
        let pattern = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            debug!(pattern, error = %e, "Rejected channel pattern");
            Status::Invalid
        })?;
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subs.insert(id, Subscription { pattern, handler });
        Ok(id)
    }

    fn unsubscribe(&self, id: NativeSubId) -> Status {
        if self.lock().subs.remove(&id).is_some() {
            Status::Ok
        } else {
            Status::Invalid
        }
    }

    fn flush(&self) -> Status {
        self.drain_queue();
        Status::Ok
    }

    fn pause(&self) {
        self.lock().paused = true;
    }

    fn resume(&self) {
        self.lock().paused = false;
        self.drain_queue();
    }

    fn set_queue_size(&self, size: u32) -> Status {
        let Ok(size) = usize::try_from(size) else {
            return Status::Invalid;
        };
        if size == 0 {
            return Status::Invalid;
        }
        let mut inner = self.lock();
        inner.queue_size = size;
        while inner.queue.len() > size {
            inner.queue.pop_front();
        }
        Status::Ok
    }

    fn start(&self) {
        self.lock().running = true;
    }

    fn stop(&self) -> Status {
        self.lock().running = false;
        Status::Ok
    }
}
