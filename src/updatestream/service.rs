//! Update stream service
//!
//! Entry point for consumers: `stream_start` checks the service state,
//! resolves the position and hands back a session with its first event.

use std::sync::Arc;

use serde::Serialize;

use super::errors::{UpdateStreamError, UpdateStreamResult};
use super::event::Event;
use super::role::NodeRole;
use super::session::{SessionInfo, SessionRegistry, StreamSession};
use super::state::{ServiceState, UpdateStreamControl};
use crate::binlog::{Binlog, Position};
use crate::observability::{log_event_with_fields, Event as LogEvent, MetricsSnapshot, StreamMetrics};

/// Point-in-time view of the service for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub epoch: u64,
    pub role: Option<NodeRole>,
    pub binlog_head: Position,
    pub earliest_position: Position,
    pub sessions: Vec<SessionInfo>,
    pub stats: MetricsSnapshot,
}

/// The update stream service of one node.
#[derive(Debug, Clone)]
pub struct UpdateStreamService {
    binlog: Arc<Binlog>,
    control: Arc<UpdateStreamControl>,
    metrics: Arc<StreamMetrics>,
    sessions: Arc<SessionRegistry>,
}

impl UpdateStreamService {
    pub fn new(binlog: Arc<Binlog>, control: Arc<UpdateStreamControl>) -> Self {
        Self {
            binlog,
            control,
            metrics: Arc::new(StreamMetrics::new()),
            sessions: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn binlog(&self) -> &Arc<Binlog> {
        &self.binlog
    }

    pub fn control(&self) -> &Arc<UpdateStreamControl> {
        &self.control
    }

    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }

    /// Opens a session positioned after `position` without waiting for data.
    ///
    /// # Errors
    ///
    /// - `ServiceDisabled` if the service is not enabled
    /// - `InvalidPosition` if `position` is unparsable or not retained
    pub fn open_session(&self, position: &str) -> UpdateStreamResult<StreamSession> {
        // Subscribe first so a transition after the check still reaches the session
        let mut state_rx = self.control.subscribe();
        let snapshot = *state_rx.borrow_and_update();

        if snapshot.state != ServiceState::Enabled {
            return Err(self.reject(position, UpdateStreamError::ServiceDisabled));
        }

        let cursor = Position::parse(position)
            .and_then(|p| self.binlog.cursor(p))
            .map_err(|e| self.reject(position, e.into()))?;

        Ok(StreamSession::new(
            cursor,
            state_rx,
            snapshot.epoch,
            Arc::clone(&self.metrics),
            Arc::clone(&self.sessions),
        ))
    }

    /// Begins or resumes a stream after `position`.
    ///
    /// Returns the session together with its first event.
    pub async fn stream_start(&self, position: &str) -> UpdateStreamResult<(StreamSession, Event)> {
        let mut session = self.open_session(position)?;
        let first = session.next_event().await?;
        Ok((session, first))
    }

    /// Number of live sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn status(&self) -> ServiceStatus {
        let snapshot = self.control.snapshot();
        ServiceStatus {
            state: snapshot.state,
            epoch: snapshot.epoch,
            role: self.control.role(),
            binlog_head: self.binlog.head(),
            earliest_position: self.binlog.earliest_position(),
            sessions: self.sessions.list(),
            stats: self.metrics.snapshot(),
        }
    }

    fn reject(&self, position: &str, err: UpdateStreamError) -> UpdateStreamError {
        self.metrics.session_rejected();
        log_event_with_fields(
            LogEvent::SessionRejected,
            &[
                ("code", err.code()),
                ("position", position),
                ("reason", err.to_string().as_str()),
            ],
        );
        err
    }
}
