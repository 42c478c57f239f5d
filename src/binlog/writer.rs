//! Binlog writer with fsync enforcement
//!
//! - A group is written with a single `write_all`, then fsynced
//! - The head is published only after fsync
//! - Rotation creates, fsyncs and registers the successor before closing
//!   the current segment, so a reader never finds a rotate record without
//!   its target
//! - Exactly one writer per `Binlog`

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::sync::Arc;

use super::errors::{BinlogError, BinlogResult};
use super::log::{create_segment_file, segment_name, sync_dir, Binlog, SegmentInfo};
use super::position::Position;
use super::record::BinlogRecord;
use crate::observability::{log_event_with_fields, Event};

/// Default size at which the active segment is rotated.
pub const DEFAULT_MAX_SEGMENT_BYTES: u64 = 1024 * 1024 * 1024;

/// The single writer of a binlog.
///
/// Dropping the writer releases the log for another writer.
#[derive(Debug)]
pub struct BinlogWriter {
    log: Arc<Binlog>,
    file: File,
    segment: SegmentInfo,
    segment_bytes: u64,
    head: Position,
    max_segment_bytes: u64,
}

impl BinlogWriter {
    /// Opens the last segment for append. Called through `Binlog::writer`.
    pub(super) fn attach(log: Arc<Binlog>) -> BinlogResult<Self> {
        let segment = log.segments().pop().ok_or_else(|| {
            BinlogError::append_failed(
                "Binlog has no active segment",
                io::Error::from(io::ErrorKind::NotFound),
            )
        })?;
        let path = log.segment_path(&segment.name);
        let file = OpenOptions::new().append(true).open(&path).map_err(|e| {
            BinlogError::append_failed(
                format!("Failed to open segment for append: {}", path.display()),
                e,
            )
        })?;
        let segment_bytes = file
            .metadata()
            .map_err(|e| BinlogError::append_failed("Failed to stat active segment", e))?
            .len();
        let head = log.head();

        Ok(Self {
            log,
            file,
            segment,
            segment_bytes,
            head,
            max_segment_bytes: DEFAULT_MAX_SEGMENT_BYTES,
        })
    }

    /// Sets the size at which the active segment is rotated.
    pub fn with_max_segment_bytes(mut self, max_segment_bytes: u64) -> Self {
        self.max_segment_bytes = max_segment_bytes.max(1);
        self
    }

    /// Returns the shared log this writer appends to.
    pub fn log(&self) -> &Arc<Binlog> {
        &self.log
    }

    /// Highest group id written by this writer.
    pub fn head(&self) -> Position {
        self.head
    }

    /// Name of the segment currently appended to.
    pub fn active_segment(&self) -> &str {
        &self.segment.name
    }

    /// Appends one group under the next group id.
    ///
    /// # Returns
    ///
    /// The position assigned to the group.
    ///
    /// # Errors
    ///
    /// - `AERO_BINLOG_APPEND_FAILED` if the group is empty or the write fails
    /// - `AERO_BINLOG_FSYNC_FAILED` if fsync fails (FATAL)
    /// - `AERO_BINLOG_NON_MONOTONIC` if the head is already the largest group id
    pub fn append_group<S: AsRef<str>>(&mut self, statements: &[S]) -> BinlogResult<Position> {
        let position = self
            .head
            .next()
            .ok_or_else(|| BinlogError::group_ids_exhausted(self.head.group_id()))?;
        self.write_group(position, statements)?;
        Ok(position)
    }

    /// Appends `BEGIN`, the statements and `COMMIT` as one group.
    pub fn commit_transaction<S: AsRef<str>>(&mut self, dml: &[S]) -> BinlogResult<Position> {
        let mut statements = Vec::with_capacity(dml.len() + 2);
        statements.push("BEGIN");
        statements.extend(dml.iter().map(|s| s.as_ref()));
        statements.push("COMMIT");
        self.append_group(statements.as_slice())
    }

    /// Appends a self-contained schema change as its own group.
    pub fn execute_ddl(&mut self, sql: &str) -> BinlogResult<Position> {
        self.append_group(&[sql])
    }

    /// Appends a group received from an upstream log, keeping its group id.
    ///
    /// # Errors
    ///
    /// `AERO_BINLOG_NON_MONOTONIC` if `group_id` does not advance the head.
    pub fn append_replicated<S: AsRef<str>>(
        &mut self,
        group_id: Position,
        statements: &[S],
    ) -> BinlogResult<()> {
        if group_id <= self.head {
            return Err(BinlogError::non_monotonic(
                group_id.group_id(),
                self.head.group_id(),
            ));
        }
        self.write_group(group_id, statements)
    }

    fn write_group<S: AsRef<str>>(
        &mut self,
        group_id: Position,
        statements: &[S],
    ) -> BinlogResult<()> {
        if statements.is_empty() {
            return Err(BinlogError::append_failed(
                format!("Refusing to write empty group {}", group_id),
                io::Error::from(io::ErrorKind::InvalidInput),
            ));
        }

        let mut buf = Vec::new();
        for sql in statements {
            buf.extend_from_slice(
                &BinlogRecord::statement(group_id.group_id(), sql.as_ref()).serialize(),
            );
        }

        self.file.write_all(&buf).map_err(|e| {
            BinlogError::append_failed(format!("Failed to write group {}", group_id), e)
        })?;
        self.file.sync_all().map_err(|e| {
            BinlogError::fsync_failed(format!("fsync failed after group {}", group_id), e)
        })?;

        self.segment_bytes += buf.len() as u64;
        self.head = group_id;
        self.log.publish_head(group_id);

        if self.segment_bytes >= self.max_segment_bytes {
            self.rotate()?;
        }
        Ok(())
    }

    /// Closes the active segment and continues in a new one ("flush logs").
    ///
    /// # Returns
    ///
    /// The name of the new active segment.
    pub fn rotate(&mut self) -> BinlogResult<String> {
        let next = SegmentInfo {
            name: segment_name(self.segment.index + 1),
            index: self.segment.index + 1,
            prev_head: self.head,
        };
        let new_file = create_segment_file(self.log.dir(), &next.name, self.head)?;
        let new_bytes = new_file
            .metadata()
            .map_err(|e| BinlogError::append_failed("Failed to stat new segment", e))?
            .len();

        // Switch before the successor becomes visible, so no group can land
        // in the old segment once a cursor may have moved past it
        let mut old_file = std::mem::replace(&mut self.file, new_file);
        let old = std::mem::replace(&mut self.segment, next.clone());
        self.segment_bytes = new_bytes;
        self.log.push_segment(next);

        let rotate = BinlogRecord::rotate(self.head.group_id(), self.segment.name.as_str());
        old_file.write_all(&rotate.serialize()).map_err(|e| {
            BinlogError::append_failed(
                format!("Failed to write rotate record to {}", old.name),
                e,
            )
        })?;
        old_file.sync_all().map_err(|e| {
            BinlogError::fsync_failed(format!("fsync failed after rotating {}", old.name), e)
        })?;

        let head_text = self.head.to_string();
        log_event_with_fields(
            Event::BinlogRotated,
            &[
                ("from", old.name.as_str()),
                ("head", head_text.as_str()),
                ("to", self.segment.name.as_str()),
            ],
        );

        Ok(self.segment.name.clone())
    }

    /// Deletes every segment older than `segment`.
    ///
    /// Positions before the `prev_head` of `segment` become unresolvable.
    ///
    /// # Returns
    ///
    /// The number of segments removed.
    pub fn purge_before(&mut self, segment: &str) -> BinlogResult<usize> {
        let target = self
            .log
            .segments()
            .into_iter()
            .find(|s| s.name == segment)
            .ok_or_else(|| {
                BinlogError::read_failed(
                    format!("Unknown segment: {}", segment),
                    io::Error::from(io::ErrorKind::NotFound),
                )
            })?;

        let purged = self.log.retain_segments_from(target.index);
        for info in &purged {
            let path = self.log.segment_path(&info.name);
            fs::remove_file(&path).map_err(|e| {
                BinlogError::append_failed(
                    format!("Failed to remove segment: {}", path.display()),
                    e,
                )
            })?;
        }
        sync_dir(self.log.dir())?;

        let count = purged.len().to_string();
        let earliest = target.prev_head.to_string();
        log_event_with_fields(
            Event::BinlogPurged,
            &[
                ("earliest", earliest.as_str()),
                ("segments", count.as_str()),
                ("up_to", segment),
            ],
        );

        Ok(purged.len())
    }
}

impl Drop for BinlogWriter {
    fn drop(&mut self) {
        self.log.detach_writer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binlog::reader::SegmentReader;
    use crate::binlog::record::RecordType;
    use tempfile::TempDir;

    fn statements_of(log: &Binlog, segment: &str) -> Vec<(u64, String)> {
        let mut reader = SegmentReader::open(&log.segment_path(segment)).unwrap();
        reader
            .read_available()
            .unwrap()
            .into_iter()
            .filter(|r| r.record_type == RecordType::Statement)
            .map(|r| (r.group_id, r.payload))
            .collect()
    }

    #[test]
    fn test_commit_transaction_assigns_one_group_id() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();

        let position = writer
            .commit_transaction(&["insert into t values (1)", "insert into t values (2)"])
            .unwrap();
        assert_eq!(position, Position::new(1));
        assert_eq!(log.head(), Position::new(1));

        let stmts = statements_of(&log, "binlog.000001");
        assert_eq!(stmts.len(), 4);
        assert!(stmts.iter().all(|(g, _)| *g == 1));
        assert_eq!(stmts[0].1, "BEGIN");
        assert_eq!(stmts[3].1, "COMMIT");
    }

    #[test]
    fn test_group_ids_increase() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();

        let a = writer.execute_ddl("create table t (id int)").unwrap();
        let b = writer.commit_transaction(&["insert into t values (1)"]).unwrap();
        assert!(a < b);
        assert_eq!(writer.head(), b);
    }

    #[test]
    fn test_empty_group_rejected() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        let empty: [&str; 0] = [];
        assert!(writer.append_group(&empty).is_err());
        assert_eq!(log.head(), Position::GENESIS);
    }

    #[test]
    fn test_append_replicated_keeps_group_id() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();

        writer
            .append_replicated(Position::new(7), &["create table t (id int)"])
            .unwrap();
        assert_eq!(log.head(), Position::new(7));

        let err = writer
            .append_replicated(Position::new(7), &["drop table t"])
            .unwrap_err();
        assert_eq!(err.code().code(), "AERO_BINLOG_NON_MONOTONIC");

        // Local groups continue after the replicated id
        assert_eq!(writer.execute_ddl("drop table t").unwrap(), Position::new(8));
    }

    #[test]
    fn test_group_ids_exhausted() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        writer
            .append_replicated(Position::new(u64::MAX), &["create table t (id int)"])
            .unwrap();

        let err = writer.execute_ddl("drop table t").unwrap_err();
        assert_eq!(err.code().code(), "AERO_BINLOG_NON_MONOTONIC");
        assert_eq!(log.head(), Position::new(u64::MAX));
    }

    #[test]
    fn test_rotate_keeps_head() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        writer.commit_transaction(&["insert into t values (1)"]).unwrap();

        let next = writer.rotate().unwrap();
        assert_eq!(next, "binlog.000002");
        assert_eq!(writer.active_segment(), "binlog.000002");
        assert_eq!(log.head(), Position::new(1));
        assert_eq!(log.segments()[1].prev_head, Position::new(1));

        let position = writer.commit_transaction(&["insert into t values (2)"]).unwrap();
        assert_eq!(position, Position::new(2));
        assert_eq!(statements_of(&log, "binlog.000002").len(), 3);
    }

    #[test]
    fn test_auto_rotation() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap().with_max_segment_bytes(200);

        for i in 0..5 {
            writer
                .commit_transaction(&[format!("insert into t values ({})", i)])
                .unwrap();
        }
        assert!(log.segments().len() > 1);
        assert_eq!(log.head(), Position::new(5));
    }

    #[test]
    fn test_purge_before() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        writer.commit_transaction(&["insert into t values (1)"]).unwrap();
        writer.rotate().unwrap();
        writer.commit_transaction(&["insert into t values (2)"]).unwrap();
        let active = writer.rotate().unwrap();

        assert_eq!(writer.purge_before(&active).unwrap(), 2);
        assert_eq!(log.segments().len(), 1);
        assert_eq!(log.earliest_position(), Position::new(2));
        assert!(!dir.path().join("binlog.000001").exists());
        assert!(log.resolve(Position::new(1)).unwrap_err().is_invalid_position());
        assert!(log.resolve(Position::new(2)).is_ok());
    }

    #[test]
    fn test_purge_unknown_segment_fails() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        assert!(writer.purge_before("binlog.000009").is_err());
    }
}
