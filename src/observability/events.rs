//! Lifecycle events
//!
//! Every event the server logs is named here, so log consumers can rely on
//! a closed vocabulary.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Boot & lifecycle
    BootStart,
    BootComplete,
    ShutdownStart,
    ShutdownComplete,
    ConfigLoaded,

    // Binlog
    BinlogInitialized,
    BinlogOpened,
    BinlogRotated,
    BinlogPurged,
    /// Unreadable log (FATAL)
    BinlogCorruption,

    // Service state
    RoleChanged,
    UpdateStreamEnabled,
    UpdateStreamDisabled,

    // Sessions
    SessionStart,
    SessionRejected,
    /// Session terminated with an ERR event
    SessionFatal,
    SessionClosed,

    // Replica apply path
    ReplicaApplyStart,
    ReplicaApplyStopped,
    ReplicaApplyFailed,

    // Network surfaces
    DispatcherListening,
    ClientConnected,
    ClientDisconnected,
    HttpListening,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "AEROSTREAM_STARTUP_BEGIN",
            Event::BootComplete => "AEROSTREAM_STARTUP_COMPLETE",
            Event::ShutdownStart => "SHUTDOWN_START",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::BinlogInitialized => "BINLOG_INITIALIZED",
            Event::BinlogOpened => "BINLOG_OPENED",
            Event::BinlogRotated => "BINLOG_ROTATED",
            Event::BinlogPurged => "BINLOG_PURGED",
            Event::BinlogCorruption => "BINLOG_CORRUPTION",

            Event::RoleChanged => "ROLE_CHANGED",
            Event::UpdateStreamEnabled => "UPDATE_STREAM_ENABLED",
            Event::UpdateStreamDisabled => "UPDATE_STREAM_DISABLED",

            Event::SessionStart => "STREAM_SESSION_START",
            Event::SessionRejected => "STREAM_SESSION_REJECTED",
            Event::SessionFatal => "STREAM_SESSION_FATAL",
            Event::SessionClosed => "STREAM_SESSION_CLOSED",

            Event::ReplicaApplyStart => "REPLICA_APPLY_START",
            Event::ReplicaApplyStopped => "REPLICA_APPLY_STOPPED",
            Event::ReplicaApplyFailed => "REPLICA_APPLY_FAILED",

            Event::DispatcherListening => "DISPATCHER_LISTENING",
            Event::ClientConnected => "CLIENT_CONNECTED",
            Event::ClientDisconnected => "CLIENT_DISCONNECTED",
            Event::HttpListening => "HTTP_LISTENING",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::BinlogCorruption => Severity::Fatal,
            Event::ReplicaApplyFailed => Severity::Error,
            Event::SessionRejected | Event::SessionFatal => Severity::Warn,
            Event::ClientConnected | Event::ClientDisconnected => Severity::Trace,
            _ => Severity::Info,
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
