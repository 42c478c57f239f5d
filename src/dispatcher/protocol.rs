//! Wire protocol
//!
//! JSON text frames tagged by `type`. One request gets exactly one
//! `event` or `error` reply; heartbeats can be interleaved at any time.

use serde::{Deserialize, Serialize};

use crate::updatestream::{Event, UpdateStreamError};

/// Error codes sent in `error` messages.
pub mod codes {
    pub const SERVICE_DISABLED: &str = "SERVICE_DISABLED";
    pub const INVALID_POSITION: &str = "INVALID_POSITION";
    pub const SESSION_CLOSED: &str = "SESSION_CLOSED";
    pub const NO_SESSION: &str = "NO_SESSION";
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    pub const UNSUPPORTED: &str = "UNSUPPORTED";
    pub const BINLOG_FAILURE: &str = "BINLOG_FAILURE";
}

/// Message from client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a session after `position`, replacing any open session
    StreamStart { position: String },

    /// Next event of the open session
    StreamNext,

    /// Heartbeat/ping
    Heartbeat {
        #[serde(default)]
        ref_id: Option<String>,
    },
}

/// Message to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One stream event
    Event { event: Event },

    /// Request failed
    Error { code: String, message: String },

    /// Heartbeat
    Heartbeat {
        ref_id: Option<String>,
        server_time: i64,
    },
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn heartbeat(ref_id: Option<String>) -> Self {
        ServerMessage::Heartbeat {
            ref_id,
            server_time: chrono::Utc::now().timestamp(),
        }
    }
}

impl From<&UpdateStreamError> for ServerMessage {
    fn from(err: &UpdateStreamError) -> Self {
        ServerMessage::error(err.code(), err.to_string())
    }
}
