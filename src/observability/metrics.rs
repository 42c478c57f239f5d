//! Update stream counters
//!
//! Counters only move forward, except `active_sessions` which tracks the
//! number of live sessions. Relaxed ordering throughout.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for the update stream service.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    sessions_started: AtomicU64,
    sessions_rejected: AtomicU64,
    sessions_closed: AtomicU64,
    active_sessions: AtomicU64,
    events_streamed: AtomicU64,
    transactions_streamed: AtomicU64,
    ddls_streamed: AtomicU64,
    fatal_disconnects: AtomicU64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session was opened
    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// A `stream_start` was refused
    pub fn session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A session was dropped
    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn event_streamed(&self) {
        self.events_streamed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transaction_streamed(&self) {
        self.transactions_streamed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ddl_streamed(&self) {
        self.ddls_streamed.fetch_add(1, Ordering::Relaxed);
    }

    /// A session ended with an ERR event
    pub fn fatal_disconnect(&self) {
        self.fatal_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            events_streamed: self.events_streamed.load(Ordering::Relaxed),
            transactions_streamed: self.transactions_streamed.load(Ordering::Relaxed),
            ddls_streamed: self.ddls_streamed.load(Ordering::Relaxed),
            fatal_disconnects: self.fatal_disconnects.load(Ordering::Relaxed),
        }
    }

    /// Counters as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_rejected: u64,
    pub sessions_closed: u64,
    pub active_sessions: u64,
    pub events_streamed: u64,
    pub transactions_streamed: u64,
    pub ddls_streamed: u64,
    pub fatal_disconnects: u64,
}
