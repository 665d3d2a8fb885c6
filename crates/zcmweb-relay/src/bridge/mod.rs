//! Native Bridge: sole owner of the transport connection.
//!
//! Each `try_*` method makes exactly one attempt against the transport and
//! reports [`Attempt::Again`] when the transport asks to be called again.
//! Scheduling the retry is the caller's job; see [`crate::relay`].

pub mod inproc;
pub mod pending;
pub mod status;
pub mod transport;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

pub use inproc::InprocTransport;
pub use pending::{Attempt, PendingOperation, PendingState, Waiter};
pub use status::{NativeError, Status};
pub use transport::{NativeSubId, RawHandler, Transport};

/// Create a transport for `url`, or `None` if the URL is not supported.
pub fn connect(url: &str) -> Option<Arc<dyn Transport>> {
    let scheme = url.split_once("://").map_or(url, |(scheme, _)| scheme);
    match scheme {
        "inproc" => {
            info!(url, "Using in-process transport");
            Some(Arc::new(InprocTransport::new()))
        }
        _ => {
            warn!(url, "Unsupported transport URL");
            None
        }
    }
}

/// Opaque handle for a live subscription, unique for the bridge's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionHandle(pub u64);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of a subscribe the transport turned down with `status`. A refusal
/// carrying `Ok` is not an answer the transport may give.
fn refused<T>(status: Status) -> Attempt<T> {
    match status.into_result() {
        Ok(()) => Attempt::Done(Err(NativeError::Unknown)),
        Err(e) => Err(e).into(),
    }
}

pub struct NativeBridge {
    transport: Arc<dyn Transport>,
    next_handle: u64,
    subs: HashMap<SubscriptionHandle, NativeSubId>,
}

impl NativeBridge {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            next_handle: 1,
            subs: HashMap::new(),
        }
    }

    /// Reserve the handle a subscribe will be known by once it succeeds.
    pub const fn allocate_handle(&mut self) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Not retried: a second attempt could deliver the message twice.
    pub fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), NativeError> {
        self.transport.publish(channel, payload).into_result()
    }

    pub fn try_subscribe(
        &mut self,
        handle: SubscriptionHandle,
        pattern: &str,
        handler: &RawHandler,
    ) -> Attempt<SubscriptionHandle> {
        match self.transport.subscribe(pattern, RawHandler::clone(handler)) {
            Ok(native) => {
                debug!(%handle, native, pattern, "Native subscribe accepted");
                self.subs.insert(handle, native);
                Attempt::Done(Ok(handle))
            }
            Err(status) => refused(status),
        }
    }

    pub fn try_unsubscribe(&mut self, handle: SubscriptionHandle) -> Attempt<()> {
        let Some(&native) = self.subs.get(&handle) else {
            return Attempt::Done(Err(NativeError::Invalid));
        };
        let attempt: Attempt<()> = self.transport.unsubscribe(native).into_result().into();
        if matches!(attempt, Attempt::Done(Ok(()))) {
            self.subs.remove(&handle);
        }
        attempt
    }

    pub fn try_flush(&self) -> Attempt<()> {
        self.transport.flush().into_result().into()
    }

    pub fn try_set_queue_size(&self, size: u32) -> Attempt<()> {
        self.transport.set_queue_size(size).into_result().into()
    }

    pub fn try_stop(&self) -> Attempt<()> {
        self.transport.stop().into_result().into()
    }

    pub fn pause(&self) {
        self.transport.pause();
    }

    pub fn resume(&self) {
        self.transport.resume();
    }

    pub fn start(&self) {
        self.transport.start();
    }

    pub fn live_subscriptions(&self) -> usize {
        self.subs.len()
    }
}
