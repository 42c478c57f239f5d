//! # Update Stream Errors
//!
//! Precondition failures are returned from `stream_start`. Failures that
//! happen while a session is streaming are delivered in-band as a terminal
//! ERR event instead; see `StreamSession::next_event`.

use thiserror::Error;

use crate::binlog::BinlogError;

/// Result type for update stream operations
pub type UpdateStreamResult<T> = Result<T, UpdateStreamError>;

/// Message carried by the ERR event sent when the service is disabled
/// under an active session.
pub const DISABLED_WHILE_STREAMING: &str =
    "Fatal Service Error: Disconnecting because the Update Stream service has been disabled";

/// Update stream errors
#[derive(Debug, Error)]
pub enum UpdateStreamError {
    /// `stream_start` while the service is disabled
    #[error("update stream service is not enabled")]
    ServiceDisabled,

    /// Requested position cannot be resolved
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    /// Call on a session that already delivered its terminal event
    #[error("stream session is closed")]
    SessionClosed,

    /// Log failure outside a session
    #[error(transparent)]
    Binlog(BinlogError),
}

impl UpdateStreamError {
    /// Stable code used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            UpdateStreamError::ServiceDisabled => "SERVICE_DISABLED",
            UpdateStreamError::InvalidPosition(_) => "INVALID_POSITION",
            UpdateStreamError::SessionClosed => "SESSION_CLOSED",
            UpdateStreamError::Binlog(_) => "BINLOG_FAILURE",
        }
    }

    /// Whether the same call may succeed later without changes
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpdateStreamError::ServiceDisabled)
    }
}

impl From<BinlogError> for UpdateStreamError {
    fn from(err: BinlogError) -> Self {
        if err.is_invalid_position() {
            UpdateStreamError::InvalidPosition(err.message().to_string())
        } else {
            UpdateStreamError::Binlog(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_message_is_exact() {
        assert_eq!(
            UpdateStreamError::ServiceDisabled.to_string(),
            "update stream service is not enabled"
        );
        assert_eq!(UpdateStreamError::SessionClosed.to_string(), "stream session is closed");
    }

    #[test]
    fn test_codes_and_retryability() {
        assert_eq!(UpdateStreamError::ServiceDisabled.code(), "SERVICE_DISABLED");
        assert!(UpdateStreamError::ServiceDisabled.is_retryable());
        assert!(!UpdateStreamError::InvalidPosition("x".into()).is_retryable());
    }

    #[test]
    fn test_invalid_position_from_binlog() {
        let err: UpdateStreamError =
            BinlogError::invalid_position("position 9 is ahead of the binlog head 3").into();
        assert_eq!(err.code(), "INVALID_POSITION");
        assert!(err.to_string().contains("ahead of the binlog head"));

        let err: UpdateStreamError = BinlogError::corruption("bad crc").into();
        assert_eq!(err.code(), "BINLOG_FAILURE");
    }
}
