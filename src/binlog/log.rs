//! Shared binlog handle
//!
//! `Binlog` owns the segment index of one binlog directory and publishes the
//! head (highest durable group id) through a watch channel. The single
//! writer and any number of cursors share one `Arc<Binlog>`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use super::cursor::LogCursor;
use super::errors::{BinlogError, BinlogResult};
use super::position::Position;
use super::reader::{read_segment_header, SegmentReader};
use super::record::BinlogRecord;
use super::writer::BinlogWriter;
use crate::observability::{log_event_with_fields, Event};

/// File name prefix shared by all segments.
pub const SEGMENT_PREFIX: &str = "binlog.";

/// Name of the segment with the given index.
pub fn segment_name(index: u32) -> String {
    format!("{}{:06}", SEGMENT_PREFIX, index)
}

/// Index of a segment name, if it is one.
pub fn parse_segment_index(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(SEGMENT_PREFIX)?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// One retained segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Segment file name
    pub name: String,
    /// Segment index parsed from the name
    pub index: u32,
    /// Head of the log when the segment was created
    pub prev_head: Position,
}

/// Shared handle over a binlog directory.
#[derive(Debug)]
pub struct Binlog {
    dir: PathBuf,
    segments: RwLock<Vec<SegmentInfo>>,
    head_tx: watch::Sender<Position>,
    writer_attached: AtomicBool,
}

impl Binlog {
    /// Initializes an empty binlog directory with its genesis segment.
    ///
    /// # Errors
    ///
    /// Fails if the directory already holds segments.
    pub fn create(dir: &Path) -> BinlogResult<Arc<Self>> {
        fs::create_dir_all(dir).map_err(|e| {
            BinlogError::append_failed(
                format!("Failed to create binlog directory: {}", dir.display()),
                e,
            )
        })?;
        if !list_segments(dir)?.is_empty() {
            return Err(BinlogError::append_failed(
                format!("Binlog directory already initialized: {}", dir.display()),
                std::io::Error::from(std::io::ErrorKind::AlreadyExists),
            ));
        }

        create_segment_file(dir, &segment_name(1), Position::GENESIS)?;
        log_event_with_fields(
            Event::BinlogInitialized,
            &[("binlog_dir", dir.display().to_string().as_str())],
        );
        Self::open(dir)
    }

    /// Opens an existing binlog directory, initializing it if it is empty.
    pub fn open_or_create(dir: &Path) -> BinlogResult<Arc<Self>> {
        if dir.exists() && !list_segments(dir)?.is_empty() {
            Self::open(dir)
        } else {
            Self::create(dir)
        }
    }

    /// Opens an existing binlog directory.
    ///
    /// Validates every segment header and scans the last segment to find
    /// the head.
    pub fn open(dir: &Path) -> BinlogResult<Arc<Self>> {
        let names = list_segments(dir)?;
        if names.is_empty() {
            return Err(BinlogError::read_failed(
                format!("No binlog segments in {}", dir.display()),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }

        let mut segments: Vec<SegmentInfo> = Vec::with_capacity(names.len());
        for (index, name) in names {
            let prev_head = Position::new(read_segment_header(&dir.join(&name))?);
            if let Some(last) = segments.last() {
                if prev_head < last.prev_head {
                    return Err(BinlogError::corruption(format!(
                        "segment {} starts before its predecessor {}",
                        name, last.name
                    )));
                }
            }
            segments.push(SegmentInfo {
                name,
                index,
                prev_head,
            });
        }

        let head = match segments.last() {
            Some(last) => scan_head(&dir.join(&last.name), last.prev_head)?,
            None => Position::GENESIS,
        };

        let (head_tx, _) = watch::channel(head);
        let head_text = head.to_string();
        let segment_count = segments.len().to_string();
        log_event_with_fields(
            Event::BinlogOpened,
            &[
                ("binlog_dir", dir.display().to_string().as_str()),
                ("head", head_text.as_str()),
                ("segments", segment_count.as_str()),
            ],
        );

        Ok(Arc::new(Self {
            dir: dir.to_path_buf(),
            segments: RwLock::new(segments),
            head_tx,
            writer_attached: AtomicBool::new(false),
        }))
    }

    /// Returns the binlog directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a segment by name.
    pub fn segment_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Highest durable group id.
    pub fn head(&self) -> Position {
        *self.head_tx.borrow()
    }

    /// Oldest position that can still be resolved.
    pub fn earliest_position(&self) -> Position {
        self.read_segments()
            .first()
            .map(|s| s.prev_head)
            .unwrap_or(Position::GENESIS)
    }

    /// Snapshot of the retained segments, oldest first.
    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.read_segments().clone()
    }

    /// Subscribes to head changes.
    pub fn subscribe_head(&self) -> watch::Receiver<Position> {
        self.head_tx.subscribe()
    }

    /// Waits until the head reaches `position`.
    pub async fn wait_for_head(&self, position: Position) {
        let mut rx = self.subscribe_head();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|head| *head >= position).await;
    }

    /// Attaches the single writer.
    pub fn writer(self: &Arc<Self>) -> BinlogResult<BinlogWriter> {
        if self
            .writer_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BinlogError::writer_busy(&self.dir.display().to_string()));
        }
        BinlogWriter::attach(Arc::clone(self)).inspect_err(|_| self.detach_writer())
    }

    /// Opens a cursor that yields every statement after `from`.
    pub fn cursor(self: &Arc<Self>, from: Position) -> BinlogResult<LogCursor> {
        LogCursor::open(Arc::clone(self), from)
    }

    /// Finds the segment a cursor starting after `from` must begin with.
    ///
    /// # Errors
    ///
    /// `AERO_BINLOG_INVALID_POSITION` if `from` is ahead of the head or
    /// predates the earliest retained segment.
    pub fn resolve(&self, from: Position) -> BinlogResult<SegmentInfo> {
        let head = self.head();
        if from > head {
            return Err(BinlogError::invalid_position(format!(
                "position {} is ahead of the binlog head {}",
                from, head
            )));
        }

        let segments = self.read_segments();
        let earliest = segments
            .first()
            .map(|s| s.prev_head)
            .unwrap_or(Position::GENESIS);
        if from < earliest {
            return Err(BinlogError::invalid_position(format!(
                "position {} predates earliest retained log (earliest {})",
                from, earliest
            )));
        }

        segments
            .iter()
            .rev()
            .find(|s| s.prev_head <= from)
            .cloned()
            .ok_or_else(|| {
                BinlogError::invalid_position(format!("no segment covers position {}", from))
            })
    }

    /// First retained segment after segment `index`, if any.
    ///
    /// Segment `index` itself need not be retained any more.
    pub fn successor_of(&self, index: u32) -> Option<SegmentInfo> {
        self.read_segments()
            .iter()
            .find(|s| s.index > index)
            .cloned()
    }

    pub(crate) fn publish_head(&self, head: Position) {
        self.head_tx.send_replace(head);
    }

    pub(crate) fn push_segment(&self, segment: SegmentInfo) {
        self.write_segments().push(segment);
    }

    pub(crate) fn retain_segments_from(&self, index: u32) -> Vec<SegmentInfo> {
        let mut segments = self.write_segments();
        let (purged, kept): (Vec<_>, Vec<_>) =
            segments.drain(..).partition(|s| s.index < index);
        *segments = kept;
        purged
    }

    pub(crate) fn detach_writer(&self) {
        self.writer_attached.store(false, Ordering::Release);
    }

    fn read_segments(&self) -> RwLockReadGuard<'_, Vec<SegmentInfo>> {
        self.segments.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_segments(&self) -> RwLockWriteGuard<'_, Vec<SegmentInfo>> {
        self.segments.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Lists segment files in `dir`, sorted by index.
fn list_segments(dir: &Path) -> BinlogResult<Vec<(u32, String)>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        BinlogError::read_failed(
            format!("Failed to list binlog directory: {}", dir.display()),
            e,
        )
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| BinlogError::read_failed("Failed to read directory entry", e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(index) = parse_segment_index(&name) {
            names.push((index, name));
        }
    }
    names.sort();
    Ok(names)
}

/// Highest group id in a segment, or its `prev_head` if it has none.
fn scan_head(path: &Path, prev_head: Position) -> BinlogResult<Position> {
    let mut reader = SegmentReader::open(path)?;
    let head = reader
        .read_available()?
        .iter()
        .map(|r| Position::new(r.group_id))
        .max()
        .unwrap_or(prev_head);
    Ok(head.max(prev_head))
}

/// Creates a new segment holding only its header, fsynced with its directory.
pub(crate) fn create_segment_file(
    dir: &Path,
    name: &str,
    prev_head: Position,
) -> BinlogResult<fs::File> {
    let path = dir.join(name);
    let mut file = OpenOptions::new()
        .create_new(true)
        .append(true)
        .open(&path)
        .map_err(|e| {
            BinlogError::append_failed(format!("Failed to create segment: {}", path.display()), e)
        })?;

    let header = BinlogRecord::header(prev_head.group_id(), chrono::Utc::now().to_rfc3339());
    file.write_all(&header.serialize()).map_err(|e| {
        BinlogError::append_failed(format!("Failed to write segment header: {}", name), e)
    })?;
    file.sync_all().map_err(|e| {
        BinlogError::fsync_failed(format!("Failed to fsync segment header: {}", name), e)
    })?;
    sync_dir(dir)?;

    Ok(file)
}

/// Fsyncs a directory so that file creation and removal are durable.
pub(crate) fn sync_dir(dir: &Path) -> BinlogResult<()> {
    let handle = OpenOptions::new().read(true).open(dir).map_err(|e| {
        BinlogError::append_failed(
            format!("Failed to open binlog directory for fsync: {}", dir.display()),
            e,
        )
    })?;
    handle.sync_all().map_err(|e| {
        BinlogError::fsync_failed(
            format!("Failed to fsync binlog directory: {}", dir.display()),
            e,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_segment_names() {
        assert_eq!(segment_name(1), "binlog.000001");
        assert_eq!(parse_segment_index("binlog.000042"), Some(42));
        assert_eq!(parse_segment_index("binlog.42"), None);
        assert_eq!(parse_segment_index("binlog.index"), None);
        assert_eq!(parse_segment_index("relay.000001"), None);
    }

    #[test]
    fn test_create_writes_genesis_segment() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();

        assert_eq!(log.head(), Position::GENESIS);
        assert_eq!(log.earliest_position(), Position::GENESIS);
        let segments = log.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].name, "binlog.000001");
        assert!(dir.path().join("binlog.000001").exists());
    }

    #[test]
    fn test_create_refuses_initialized_dir() {
        let dir = TempDir::new().unwrap();
        Binlog::create(dir.path()).unwrap();
        assert!(Binlog::create(dir.path()).is_err());
        assert!(Binlog::open_or_create(dir.path()).is_ok());
    }

    #[test]
    fn test_open_empty_dir_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Binlog::open(dir.path()).is_err());
    }

    #[test]
    fn test_reopen_recovers_head() {
        let dir = TempDir::new().unwrap();
        {
            let log = Binlog::create(dir.path()).unwrap();
            let mut writer = log.writer().unwrap();
            writer.commit_transaction(&["insert into t values (1)"]).unwrap();
            writer.rotate().unwrap();
            writer.execute_ddl("create table u (id int)").unwrap();
        }

        let log = Binlog::open(dir.path()).unwrap();
        assert_eq!(log.head(), Position::new(2));
        assert_eq!(log.segments().len(), 2);
        assert_eq!(log.segments()[1].prev_head, Position::new(1));
    }

    #[test]
    fn test_resolve_bounds() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        writer.commit_transaction(&["insert into t values (1)"]).unwrap();

        assert_eq!(log.resolve(Position::GENESIS).unwrap().name, "binlog.000001");
        assert_eq!(log.resolve(Position::new(1)).unwrap().name, "binlog.000001");
        assert!(log.resolve(Position::new(2)).unwrap_err().is_invalid_position());
    }

    #[test]
    fn test_resolve_picks_latest_covering_segment() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let mut writer = log.writer().unwrap();
        writer.commit_transaction(&["insert into t values (1)"]).unwrap();
        writer.rotate().unwrap();
        writer.commit_transaction(&["insert into t values (2)"]).unwrap();

        assert_eq!(log.resolve(Position::GENESIS).unwrap().name, "binlog.000001");
        assert_eq!(log.resolve(Position::new(1)).unwrap().name, "binlog.000002");
        assert_eq!(log.resolve(Position::new(2)).unwrap().name, "binlog.000002");
    }

    #[test]
    fn test_single_writer() {
        let dir = TempDir::new().unwrap();
        let log = Binlog::create(dir.path()).unwrap();
        let writer = log.writer().unwrap();
        assert_eq!(
            log.writer().unwrap_err().code().code(),
            "AERO_BINLOG_WRITER_BUSY"
        );
        drop(writer);
        assert!(log.writer().is_ok());
    }
}
