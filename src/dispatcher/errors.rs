//! # Dispatcher Errors
//!
//! Errors of the streaming transport, on both the server and client side.

use thiserror::Error;

/// Result type for dispatcher operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Dispatcher errors
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Connection closed by the peer
    #[error("Connection closed")]
    ConnectionClosed,

    /// Transport failure
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Message that does not follow the protocol
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Error reported by the server; displays as the server's message
    #[error("{message}")]
    Server { code: String, message: String },

    /// `stream_next` after the session delivered its terminal event
    #[error("stream session is closed")]
    SessionClosed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DispatchError {
    /// Returns the close code for WebSocket
    pub fn close_code(&self) -> u16 {
        match self {
            DispatchError::ConnectionClosed => 1000,
            DispatchError::InvalidMessage(_) => 1003,
            DispatchError::SessionClosed => 4001,
            DispatchError::Server { .. } => 4002,
            DispatchError::ConnectionError(_) => 4502,
            DispatchError::ConfigError(_) => 4501,
        }
    }

    /// Server error code, if the server reported this error
    pub fn server_code(&self) -> Option<&str> {
        match self {
            DispatchError::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_displays_message_only() {
        let err = DispatchError::Server {
            code: "SERVICE_DISABLED".to_string(),
            message: "update stream service is not enabled".to_string(),
        };
        assert_eq!(err.to_string(), "update stream service is not enabled");
        assert_eq!(err.server_code(), Some("SERVICE_DISABLED"));
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(DispatchError::ConnectionClosed.close_code(), 1000);
        assert_eq!(DispatchError::InvalidMessage("x".into()).close_code(), 1003);
        assert_eq!(DispatchError::ConnectionClosed.server_code(), None);
    }
}
