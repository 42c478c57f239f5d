//! Segment reader
//!
//! Reads records from one segment file in order, validating checksums and
//! structure. Segments may still be growing: a record whose bytes are not
//! yet all on disk is reported as "not yet available" and re-read on the
//! next call, never as corruption.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::errors::{BinlogError, BinlogResult};
use super::record::{BinlogRecord, RecordType, RECORD_OVERHEAD};

/// Upper bound on a single record; anything larger is a garbage length prefix.
const MAX_RECORD_SIZE: u64 = 64 * 1024 * 1024;

/// Sequential reader over one segment file.
pub struct SegmentReader {
    path: PathBuf,
    name: String,
    file: File,
    offset: u64,
    last_group_id: u64,
    rotated_to: Option<String>,
}

impl SegmentReader {
    /// Opens a segment for reading from its first record.
    pub fn open(path: &Path) -> BinlogResult<Self> {
        let file = File::open(path).map_err(|e| {
            BinlogError::read_failed(format!("Failed to open segment: {}", path.display()), e)
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            name,
            file,
            offset: 0,
            last_group_id: 0,
            rotated_to: None,
        })
    }

    /// Returns the segment path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the segment file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the byte offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Successor segment, once the rotate record has been read.
    pub fn rotated_to(&self) -> Option<&str> {
        self.rotated_to.as_deref()
    }

    /// Reads the next complete record.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))` if a complete record was read
    /// - `Ok(None)` if the segment currently ends at or inside the next record
    /// - `Err` on I/O failure or corruption
    pub fn read_next(&mut self) -> BinlogResult<Option<BinlogRecord>> {
        if self.rotated_to.is_some() {
            return Ok(None);
        }

        let file_len = self
            .file
            .metadata()
            .map_err(|e| BinlogError::read_failed("Failed to stat segment", e))?
            .len();
        if file_len < self.offset + 4 {
            return Ok(None);
        }

        self.seek_to_offset()?;
        let mut len_buf = [0u8; 4];
        self.read_exact(&mut len_buf)?;
        let record_len = u32::from_le_bytes(len_buf) as u64;

        if record_len < RECORD_OVERHEAD as u64 || record_len > MAX_RECORD_SIZE {
            return Err(self.corruption(format!("Invalid record length: {}", record_len)));
        }
        if file_len < self.offset + record_len {
            // Tail still being written
            return Ok(None);
        }

        let mut buf = vec![0u8; record_len as usize];
        buf[..4].copy_from_slice(&len_buf);
        self.read_exact(&mut buf[4..])?;

        let record = BinlogRecord::deserialize(&buf).map_err(|e| self.corruption(e.to_string()))?;
        self.validate(&record)?;

        self.offset += record_len;
        self.last_group_id = record.group_id;
        if record.record_type == RecordType::Rotate {
            self.rotated_to = Some(record.payload.clone());
        }

        Ok(Some(record))
    }

    /// Reads every record currently on disk.
    pub fn read_available(&mut self) -> BinlogResult<Vec<BinlogRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_next()? {
            records.push(record);
        }
        Ok(records)
    }

    fn validate(&self, record: &BinlogRecord) -> BinlogResult<()> {
        let is_header = record.record_type == RecordType::Header;
        if self.offset == 0 && !is_header {
            return Err(self.corruption("segment does not start with a header record"));
        }
        if self.offset > 0 && is_header {
            return Err(self.corruption("header record in the middle of a segment"));
        }
        if record.group_id < self.last_group_id {
            return Err(self.corruption(format!(
                "group id moved backwards: {} after {}",
                record.group_id, self.last_group_id
            )));
        }
        Ok(())
    }

    fn seek_to_offset(&mut self) -> BinlogResult<()> {
        self.file
            .seek(SeekFrom::Start(self.offset))
            .map(|_| ())
            .map_err(|e| BinlogError::read_failed("Failed to seek in segment", e))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> BinlogResult<()> {
        self.file.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                self.corruption("segment shrank while reading")
            } else {
                BinlogError::read_failed(format!("Failed to read segment {}", self.name), e)
            }
        })
    }

    fn corruption(&self, reason: impl Into<String>) -> BinlogError {
        BinlogError::corruption_at(&self.name, self.offset, reason)
    }
}

/// Reads the header record of a segment, returning its `prev_head`.
pub fn read_segment_header(path: &Path) -> BinlogResult<u64> {
    let mut reader = SegmentReader::open(path)?;
    match reader.read_next()? {
        Some(record) => Ok(record.group_id),
        None => Err(BinlogError::corruption(format!(
            "segment has no complete header: {}",
            path.display()
        ))),
    }
}
