//! The native transport seam.

use std::sync::Arc;

use super::status::Status;

/// Identifier the transport assigns to one of its subscriptions.
pub type NativeSubId = u64;

/// Raw delivery callback. The payload slice is only valid for the duration
/// of the call; handlers copy what they keep.
pub type RawHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// A pub/sub transport with non-blocking, status-returning calls.
///
/// Every control call may answer [`Status::Again`] while the transport is
/// between states; callers retry the identical call later. Implementations
/// must be callable from any thread and may invoke handlers on their own
/// threads.
pub trait Transport: Send + Sync {
    fn publish(&self, channel: &str, payload: &[u8]) -> Status;

    /// Register `handler` for channels fully matching the regex `pattern`.
    fn subscribe(&self, pattern: &str, handler: RawHandler) -> Result<NativeSubId, Status>;

    fn unsubscribe(&self, id: NativeSubId) -> Status;

    /// Deliver everything queued so far.
    fn flush(&self) -> Status;

    /// Stop delivering to handlers; incoming messages queue up.
    fn pause(&self);

    fn resume(&self);

    fn set_queue_size(&self, size: u32) -> Status;

    /// Begin delivering inbound messages.
    fn start(&self);

    fn stop(&self) -> Status;
}
