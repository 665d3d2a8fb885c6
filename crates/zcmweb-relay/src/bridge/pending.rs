//! Retry bookkeeping for native control calls.
//!
//! A pending operation starts `Issued`, moves to `Retrying` each time the
//! transport answers AGAIN, and becomes `Completed` exactly once, on the
//! first answer that is not AGAIN. Waiters are drained on that transition,
//! so none of them hears back twice.

use tokio::sync::oneshot;

use super::status::NativeError;

/// Lifecycle of one native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Issued,
    Retrying,
    Completed,
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(Result<T, NativeError>),
    Again,
}

impl<T> From<Result<T, NativeError>> for Attempt<T> {
    fn from(result: Result<T, NativeError>) -> Self {
        match result {
            Err(NativeError::Again) => Self::Again,
            other => Self::Done(other),
        }
    }
}

pub type Waiter<T> = oneshot::Sender<Result<T, NativeError>>;

/// A native call that may need to be re-attempted.
///
/// `K` carries what is needed to re-issue the identical call; `T` is the
/// success value handed to waiters.
pub struct PendingOperation<K, T> {
    pub kind: K,
    state: PendingState,
    attempts: u32,
    waiters: Vec<Waiter<T>>,
}

impl<K, T: Clone> PendingOperation<K, T> {
    pub const fn new(kind: K) -> Self {
        Self {
            kind,
            state: PendingState::Issued,
            attempts: 0,
            waiters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_waiter(mut self, waiter: Option<Waiter<T>>) -> Self {
        self.join(waiter);
        self
    }

    /// Attach another caller to an in-flight call instead of issuing a
    /// second one.
    pub fn join(&mut self, waiter: Option<Waiter<T>>) {
        if let Some(waiter) = waiter {
            self.waiters.push(waiter);
        }
    }

    pub const fn state(&self) -> PendingState {
        self.state
    }

    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record an attempt. Returns the final result, or `None` if the call
    /// must be retried.
    pub fn record(&mut self, attempt: Attempt<T>) -> Option<Result<T, NativeError>> {
        self.attempts += 1;
        match attempt {
            Attempt::Again => {
                self.state = PendingState::Retrying;
                None
            }
            Attempt::Done(result) => Some(result),
        }
    }

    /// Deliver the final result to every waiter. Later calls are no-ops.
    pub fn complete(&mut self, result: &Result<T, NativeError>) {
        self.state = PendingState::Completed;
        for waiter in self.waiters.drain(..) {
            // The caller may have stopped waiting.
            let _ = waiter.send(result.clone());
        }
    }
}
