use serde::Serialize;
use thiserror::Error;

use crate::bridge::NativeError;
use crate::relay::RelayError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection is closed")]
    Closed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Failure as reported to a remote client.
///
/// Codes belong to this protocol, not to the transport: native status codes
/// never cross the connection boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AckError {
    pub code: &'static str,
    pub message: String,
}

impl From<&SessionError> for AckError {
    fn from(err: &SessionError) -> Self {
        let (code, message) = match err {
            SessionError::InvalidRequest(reason) => ("invalid_request", reason.clone()),
            SessionError::Closed | SessionError::Relay(RelayError::Closed) => {
                ("relay_closed", "relay is not accepting requests".to_string())
            }
            SessionError::Relay(RelayError::UnknownType(_) | RelayError::UnknownTypeName(_)) => {
                ("unknown_type", err.to_string())
            }
            SessionError::Relay(RelayError::Encode(e)) => ("invalid_request", e.to_string()),
            SessionError::Relay(RelayError::Native(NativeError::Connect)) => (
                "transport_unavailable",
                "transport is not connected".to_string(),
            ),
            SessionError::Relay(RelayError::Native(_)) => (
                "transport_error",
                "transport rejected the operation".to_string(),
            ),
        };
        Self { code, message }
    }
}
