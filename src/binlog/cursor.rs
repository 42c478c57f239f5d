//! Log cursor
//!
//! Yields every statement of every group after a starting position, in log
//! order, following rotations. When it reaches the end of the durable log it
//! waits on the head watch instead of polling.

use std::io;
use std::sync::Arc;

use tokio::sync::watch;

use super::errors::{BinlogError, BinlogResult};
use super::log::{parse_segment_index, segment_name, Binlog, SegmentInfo};
use super::position::Position;
use super::reader::SegmentReader;
use super::record::{RawEntry, RecordType};

/// Positioned reader over a `Binlog`.
///
/// Dropping the cursor closes its segment file. `next` is cancel-safe: the
/// only await point is the head watch, and no record is consumed across it.
pub struct LogCursor {
    log: Arc<Binlog>,
    reader: SegmentReader,
    segment: SegmentInfo,
    from: Position,
    position: Position,
    head_rx: watch::Receiver<Position>,
}

impl LogCursor {
    /// Opens a cursor yielding the statements of every group after `from`.
    ///
    /// # Errors
    ///
    /// `AERO_BINLOG_INVALID_POSITION` if `from` cannot be resolved against
    /// the retained segments.
    pub fn open(log: Arc<Binlog>, from: Position) -> BinlogResult<Self> {
        // Subscribe before resolving so no publish can slip between the two
        let head_rx = log.subscribe_head();
        let segment = log.resolve(from)?;
        let reader = SegmentReader::open(&log.segment_path(&segment.name))?;

        Ok(Self {
            log,
            reader,
            segment,
            from,
            position: from,
            head_rx,
        })
    }

    /// Group id of the last statement consumed, or the starting position.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Segment currently being read.
    pub fn segment(&self) -> &str {
        &self.segment.name
    }

    /// Returns the next statement if one is durable, without waiting.
    pub fn try_next(&mut self) -> BinlogResult<Option<RawEntry>> {
        loop {
            let record = match self.reader.read_next()? {
                Some(record) => record,
                None => {
                    // A successor in the index means this segment is closed
                    // even if its rotate record is not readable yet. Every
                    // group of this segment was written before the successor
                    // was registered, so one more read sees all of them.
                    let Some(next) = self.log.successor_of(self.segment.index) else {
                        return Ok(None);
                    };
                    match self.reader.read_next()? {
                        Some(record) => record,
                        None => {
                            self.switch_to(next)?;
                            continue;
                        }
                    }
                }
            };

            match record.record_type {
                RecordType::Header => continue,
                RecordType::Rotate => {
                    let next = self.next_segment(&record.payload)?;
                    self.switch_to(next)?;
                }
                RecordType::Statement => {
                    let group = Position::new(record.group_id);
                    if group <= self.from {
                        continue;
                    }
                    self.position = group;
                    return Ok(Some(RawEntry::new(group, record.payload)));
                }
            }
        }
    }

    /// Waits for and returns the next statement.
    pub async fn next(&mut self) -> BinlogResult<RawEntry> {
        loop {
            // Mark the current head as seen before reading, so a publish
            // racing with the read still wakes the wait below
            self.head_rx.borrow_and_update();
            if let Some(entry) = self.try_next()? {
                return Ok(entry);
            }
            if self.head_rx.changed().await.is_err() {
                return Err(BinlogError::read_failed(
                    "Binlog closed while waiting for new groups",
                    io::Error::from(io::ErrorKind::BrokenPipe),
                ));
            }
        }
    }

    /// The segment a rotate record in the current segment points to.
    fn next_segment(&self, rotated_to: &str) -> BinlogResult<SegmentInfo> {
        let expected = self.segment.index + 1;
        if parse_segment_index(rotated_to) != Some(expected) {
            return Err(BinlogError::corruption(format!(
                "segment {} rotates to {} but the next segment is {}",
                self.segment.name,
                rotated_to,
                segment_name(expected)
            )));
        }
        self.log
            .successor_of(self.segment.index)
            .ok_or_else(|| not_retained(expected))
    }

    /// Moves to `next`, which must directly follow the current segment.
    fn switch_to(&mut self, next: SegmentInfo) -> BinlogResult<()> {
        let expected = self.segment.index + 1;
        if next.index != expected {
            return Err(not_retained(expected));
        }
        self.reader = SegmentReader::open(&self.log.segment_path(&next.name))?;
        self.segment = next;
        Ok(())
    }
}

fn not_retained(index: u32) -> BinlogError {
    BinlogError::read_failed(
        format!("Successor segment {} is not retained", segment_name(index)),
        io::Error::from(io::ErrorKind::NotFound),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn drain(cursor: &mut LogCursor) -> Vec<RawEntry> {
        let mut out = Vec::new();
        while let Some(entry) = cursor.try_next().unwrap() {
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_reads_from_genesis() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        writer.execute_ddl("create table t (id int)").unwrap();
        writer.commit_transaction(&["insert into t values (1)"]).unwrap();

        let mut cursor = log.cursor(Position::GENESIS).unwrap();
        let entries = drain(&mut cursor);
        let sql: Vec<_> = entries.iter().map(|e| e.sql.as_str()).collect();
        assert_eq!(
            sql,
            vec!["create table t (id int)", "BEGIN", "insert into t values (1)", "COMMIT"]
        );
        assert_eq!(cursor.position(), Position::new(2));
    }

    #[test]
    fn test_skips_groups_up_to_start() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        let first = writer.commit_transaction(&["insert into t values (1)"]).unwrap();
        writer.commit_transaction(&["insert into t values (2)"]).unwrap();

        let mut cursor = log.cursor(first).unwrap();
        let entries = drain(&mut cursor);
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.position == Position::new(2)));
        assert_eq!(entries[1].sql, "insert into t values (2)");
    }

    #[test]
    fn test_follows_rotation() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        writer.commit_transaction(&["insert into t values (1)"]).unwrap();
        writer.rotate().unwrap();
        writer.rotate().unwrap();
        writer.commit_transaction(&["insert into t values (2)"]).unwrap();

        let mut cursor = log.cursor(Position::GENESIS).unwrap();
        let positions: Vec<_> = drain(&mut cursor).iter().map(|e| e.position).collect();
        assert_eq!(positions.len(), 6);
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(cursor.segment(), "binlog.000003");
    }

    #[test]
    fn test_follows_rotation_after_current_segment_purged() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        writer.commit_transaction(&["insert into t values (1)"]).unwrap();

        let mut cursor = log.cursor(Position::GENESIS).unwrap();
        assert_eq!(drain(&mut cursor).len(), 3);

        let next = writer.rotate().unwrap();
        writer.commit_transaction(&["insert into t values (2)"]).unwrap();
        writer.purge_before(&next).unwrap();

        let entries = drain(&mut cursor);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].sql, "insert into t values (2)");
        assert_eq!(cursor.position(), Position::new(2));
        assert_eq!(cursor.segment(), "binlog.000002");
    }

    #[test]
    fn test_purged_successor_is_an_error() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        writer.commit_transaction(&["insert into t values (1)"]).unwrap();

        let mut cursor = log.cursor(Position::GENESIS).unwrap();
        assert_eq!(drain(&mut cursor).len(), 3);

        writer.rotate().unwrap();
        writer.commit_transaction(&["insert into t values (2)"]).unwrap();
        let last = writer.rotate().unwrap();
        writer.purge_before(&last).unwrap();

        let err = cursor.try_next().unwrap_err();
        assert!(err.to_string().contains("binlog.000002 is not retained"));
    }

    #[test]
    fn test_start_in_later_segment() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        let first = writer.commit_transaction(&["insert into t values (1)"]).unwrap();
        writer.rotate().unwrap();
        writer.commit_transaction(&["insert into t values (2)"]).unwrap();

        let cursor = log.cursor(first).unwrap();
        assert_eq!(cursor.segment(), "binlog.000002");
    }

    #[test]
    fn test_rejects_position_ahead_of_head() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let err = log.cursor(Position::new(1)).err().unwrap();
        assert!(err.is_invalid_position());
    }

    #[tokio::test]
    async fn test_next_waits_for_commit() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut cursor = log.cursor(Position::GENESIS).unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(50), cursor.next()).await;
        assert!(pending.is_err());

        let mut writer = log.writer().unwrap();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.execute_ddl("create table t (id int)").unwrap();
        });

        let entry = tokio::time::timeout(Duration::from_secs(5), cursor.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.sql, "create table t (id int)");
        assert_eq!(entry.position, Position::new(1));
        handle.await.unwrap();
    }
}
