//! Stream sessions
//!
//! A session owns one log cursor and one framer. It is revoked when the
//! service leaves the enabled period it was opened in; revocation and log
//! failures are delivered as a terminal ERR event, after which every call
//! fails with `SessionClosed`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use super::errors::{UpdateStreamError, UpdateStreamResult, DISABLED_WHILE_STREAMING};
use super::event::Event;
use super::framer::TransactionFramer;
use super::state::StateSnapshot;
use crate::binlog::{LogCursor, Position};
use crate::observability::{log_event_with_fields, Event as LogEvent, StreamMetrics};

/// Registration record of a live session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub start_position: Position,
    pub started_at: DateTime<Utc>,
}

/// Live sessions, keyed by id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, info: SessionInfo) {
        self.lock().insert(info.id, info);
    }

    fn deregister(&self, id: &Uuid) -> Option<SessionInfo> {
        self.lock().remove(id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.lock().values().cloned().collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, SessionInfo>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One consumer's stream.
pub struct StreamSession {
    id: Uuid,
    start: Position,
    cursor: LogCursor,
    framer: TransactionFramer,
    state_rx: watch::Receiver<StateSnapshot>,
    epoch: u64,
    closed: bool,
    metrics: Arc<StreamMetrics>,
    registry: Arc<SessionRegistry>,
}

impl StreamSession {
    pub(super) fn new(
        cursor: LogCursor,
        state_rx: watch::Receiver<StateSnapshot>,
        epoch: u64,
        metrics: Arc<StreamMetrics>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let info = SessionInfo {
            id: Uuid::new_v4(),
            start_position: cursor.position(),
            started_at: Utc::now(),
        };
        let id = info.id;
        let start = info.start_position;
        registry.register(info);
        metrics.session_started();

        let id_text = id.to_string();
        let start_text = start.to_string();
        log_event_with_fields(
            LogEvent::SessionStart,
            &[
                ("position", start_text.as_str()),
                ("session_id", id_text.as_str()),
            ],
        );

        Self {
            id,
            start,
            cursor,
            framer: TransactionFramer::new(),
            state_rx,
            epoch,
            closed: false,
            metrics,
            registry,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Position the session was started at.
    pub fn start_position(&self) -> Position {
        self.start
    }

    /// Group id of the last log entry read.
    pub fn position(&self) -> Position {
        self.cursor.position()
    }

    /// Whether the terminal event has been delivered.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Waits for the next event.
    ///
    /// Cancel-safe: dropping the future loses no event.
    ///
    /// # Errors
    ///
    /// `SessionClosed` once a terminal ERR event has been returned.
    pub async fn next_event(&mut self) -> UpdateStreamResult<Event> {
        if self.closed {
            return Err(UpdateStreamError::SessionClosed);
        }
        if !self.state_rx.borrow().permits(self.epoch) {
            return Ok(self.terminate(DISABLED_WHILE_STREAMING.to_string()));
        }

        loop {
            if let Some(event) = self.framer.pop() {
                return Ok(self.deliver(event));
            }

            tokio::select! {
                biased;
                _ = revoked(&mut self.state_rx, self.epoch) => {
                    return Ok(self.terminate(DISABLED_WHILE_STREAMING.to_string()));
                }
                entry = self.cursor.next() => match entry {
                    Ok(entry) => self.framer.push(entry),
                    Err(e) => {
                        if e.is_fatal() {
                            log_event_with_fields(
                                LogEvent::BinlogCorruption,
                                &[("error", e.to_string().as_str())],
                            );
                        }
                        return Ok(self.terminate(e.to_string()));
                    }
                },
            }
        }
    }

    fn deliver(&mut self, event: Event) -> Event {
        self.metrics.event_streamed();
        match event {
            Event::Pos { .. } => self.metrics.transaction_streamed(),
            Event::Ddl { .. } => self.metrics.ddl_streamed(),
            _ => {}
        }
        event
    }

    fn terminate(&mut self, message: String) -> Event {
        self.closed = true;
        self.metrics.fatal_disconnect();
        let id_text = self.id.to_string();
        log_event_with_fields(
            LogEvent::SessionFatal,
            &[("message", message.as_str()), ("session_id", id_text.as_str())],
        );
        Event::error(message)
    }
}

/// Resolves once a session of `epoch` may no longer stream.
async fn revoked(state_rx: &mut watch::Receiver<StateSnapshot>, epoch: u64) {
    // A dropped controller revokes every session
    let _ = state_rx.wait_for(|s| !s.permits(epoch)).await;
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.registry.deregister(&self.id);
        self.metrics.session_closed();
        let id_text = self.id.to_string();
        let position = self.cursor.position().to_string();
        log_event_with_fields(
            LogEvent::SessionClosed,
            &[
                ("position", position.as_str()),
                ("session_id", id_text.as_str()),
            ],
        );
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("position", &self.cursor.position())
            .field("epoch", &self.epoch)
            .field("closed", &self.closed)
            .finish()
    }
}
