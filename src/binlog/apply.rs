//! Replica apply path
//!
//! Tails a source binlog and re-writes each group into a replica binlog
//! under the same group id, so positions mean the same thing on both.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use super::cursor::LogCursor;
use super::errors::BinlogResult;
use super::log::Binlog;
use super::position::Position;
use super::writer::BinlogWriter;
use crate::observability::{log_event_with_fields, Event};

/// Copies groups from a source log into a replica writer.
pub struct ReplicaApplier {
    source: Arc<Binlog>,
    cursor: LogCursor,
    writer: BinlogWriter,
    head_rx: watch::Receiver<Position>,
    pending: Option<(Position, Vec<String>)>,
}

impl ReplicaApplier {
    /// Starts applying after the replica's current head.
    pub fn new(source: Arc<Binlog>, writer: BinlogWriter) -> BinlogResult<Self> {
        let head_rx = source.subscribe_head();
        let cursor = source.cursor(writer.head())?;
        Ok(Self {
            source,
            cursor,
            writer,
            head_rx,
            pending: None,
        })
    }

    /// Highest group applied to the replica.
    pub fn applied(&self) -> Position {
        self.writer.head()
    }

    /// Applies every group that is complete in the source right now.
    ///
    /// # Returns
    ///
    /// The number of groups written to the replica.
    pub fn apply_available(&mut self) -> BinlogResult<usize> {
        // Groups are published after their single write is fsynced, so a
        // group at or below this head was fully readable before the scan
        let head = *self.head_rx.borrow_and_update();
        let mut applied = 0;

        while let Some(entry) = self.cursor.try_next()? {
            let boundary =
                matches!(&self.pending, Some((group, _)) if *group != entry.position);
            if boundary {
                applied += self.flush()?;
            }
            self.pending
                .get_or_insert_with(|| (entry.position, Vec::new()))
                .1
                .push(entry.sql);
        }

        if matches!(&self.pending, Some((group, _)) if *group <= head) {
            applied += self.flush()?;
        }
        Ok(applied)
    }

    /// Applies groups as they arrive until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> BinlogResult<()> {
        let from = self.applied().to_string();
        log_event_with_fields(
            Event::ReplicaApplyStart,
            &[
                ("from", from.as_str()),
                ("source", self.source.dir().display().to_string().as_str()),
            ],
        );

        loop {
            if let Err(e) = self.apply_available() {
                log_event_with_fields(
                    Event::ReplicaApplyFailed,
                    &[("error", e.to_string().as_str())],
                );
                return Err(e);
            }

            tokio::select! {
                changed = self.head_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        let applied = self.applied().to_string();
        log_event_with_fields(Event::ReplicaApplyStopped, &[("applied", applied.as_str())]);
        Ok(())
    }

    fn flush(&mut self) -> BinlogResult<usize> {
        match self.pending.take() {
            Some((group, statements)) => {
                self.writer.append_replicated(group, &statements)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}
