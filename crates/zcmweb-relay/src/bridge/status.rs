//! Native status codes.

use thiserror::Error;

/// Result of one call into the native transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Invalid,
    /// The native side is mid-transition; the identical call must be retried.
    Again,
    Connect,
    Intr,
    Unknown,
    Memory,
    Unimpl,
}

impl Status {
    /// `Ok(())`, or the error carried by a failing status.
    pub const fn into_result(self) -> Result<(), NativeError> {
        match self {
            Self::Ok => Ok(()),
            Self::Invalid => Err(NativeError::Invalid),
            Self::Again => Err(NativeError::Again),
            Self::Connect => Err(NativeError::Connect),
            Self::Intr => Err(NativeError::Intr),
            Self::Unknown => Err(NativeError::Unknown),
            Self::Memory => Err(NativeError::Memory),
            Self::Unimpl => Err(NativeError::Unimpl),
        }
    }
}

/// Failure reported by the native transport.
///
/// `Again` only ever reaches callers from `publish`, which is never retried;
/// control operations retry it away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NativeError {
    #[error("invalid argument")]
    Invalid,
    #[error("transport busy")]
    Again,
    #[error("transport connection failed")]
    Connect,
    #[error("interrupted")]
    Intr,
    #[error("unknown transport error")]
    Unknown,
    #[error("out of memory")]
    Memory,
    #[error("operation not implemented by transport")]
    Unimpl,
}
