//! Binlog error types
//!
//! Error codes:
//! - AERO_BINLOG_APPEND_FAILED (ERROR severity)
//! - AERO_BINLOG_FSYNC_FAILED (FATAL severity)
//! - AERO_BINLOG_CORRUPTION (FATAL severity)
//! - AERO_BINLOG_READ_FAILED (ERROR severity)
//! - AERO_BINLOG_INVALID_POSITION (ERROR severity)
//! - AERO_BINLOG_WRITER_BUSY (ERROR severity)
//! - AERO_BINLOG_NON_MONOTONIC (ERROR severity)

use std::fmt;
use std::io;

/// Severity levels for binlog errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, server continues
    Error,
    /// The log can no longer be trusted
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Binlog-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinlogErrorCode {
    /// Segment write failed
    AeroBinlogAppendFailed,
    /// Segment fsync failed
    AeroBinlogFsyncFailed,
    /// Checksum or structure failure
    AeroBinlogCorruption,
    /// Segment could not be opened or read
    AeroBinlogReadFailed,
    /// Position cannot be resolved against retained history
    AeroBinlogInvalidPosition,
    /// A writer is already attached to this log
    AeroBinlogWriterBusy,
    /// Replicated group id does not advance the head
    AeroBinlogNonMonotonic,
}

impl BinlogErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            BinlogErrorCode::AeroBinlogAppendFailed => "AERO_BINLOG_APPEND_FAILED",
            BinlogErrorCode::AeroBinlogFsyncFailed => "AERO_BINLOG_FSYNC_FAILED",
            BinlogErrorCode::AeroBinlogCorruption => "AERO_BINLOG_CORRUPTION",
            BinlogErrorCode::AeroBinlogReadFailed => "AERO_BINLOG_READ_FAILED",
            BinlogErrorCode::AeroBinlogInvalidPosition => "AERO_BINLOG_INVALID_POSITION",
            BinlogErrorCode::AeroBinlogWriterBusy => "AERO_BINLOG_WRITER_BUSY",
            BinlogErrorCode::AeroBinlogNonMonotonic => "AERO_BINLOG_NON_MONOTONIC",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            BinlogErrorCode::AeroBinlogFsyncFailed | BinlogErrorCode::AeroBinlogCorruption => {
                Severity::Fatal
            }
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for BinlogErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Binlog error type with full context
#[derive(Debug)]
pub struct BinlogError {
    code: BinlogErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl BinlogError {
    fn new(code: BinlogErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Segment write failed
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(BinlogErrorCode::AeroBinlogAppendFailed, message)
        }
    }

    /// Segment fsync failed
    pub fn fsync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(BinlogErrorCode::AeroBinlogFsyncFailed, message)
        }
    }

    /// Segment could not be opened or read
    pub fn read_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(BinlogErrorCode::AeroBinlogReadFailed, message)
        }
    }

    /// Structural corruption
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(BinlogErrorCode::AeroBinlogCorruption, message)
    }

    /// Corruption with segment and byte offset context
    pub fn corruption_at(segment: &str, offset: u64, reason: impl Into<String>) -> Self {
        Self {
            details: Some(format!("segment: {}, byte_offset: {}", segment, offset)),
            ..Self::new(BinlogErrorCode::AeroBinlogCorruption, reason)
        }
    }

    /// Position cannot be resolved
    pub fn invalid_position(message: impl Into<String>) -> Self {
        Self::new(BinlogErrorCode::AeroBinlogInvalidPosition, message)
    }

    /// A writer already holds the log
    pub fn writer_busy(dir: &str) -> Self {
        Self {
            details: Some(format!("binlog_dir: {}", dir)),
            ..Self::new(
                BinlogErrorCode::AeroBinlogWriterBusy,
                "a writer is already attached to this binlog",
            )
        }
    }

    /// Replicated group would move the head backwards
    pub fn non_monotonic(group_id: u64, head: u64) -> Self {
        Self {
            details: Some(format!("group_id: {}, head: {}", group_id, head)),
            ..Self::new(
                BinlogErrorCode::AeroBinlogNonMonotonic,
                "group id does not advance the binlog head",
            )
        }
    }

    /// No group id is left after `head`
    pub fn group_ids_exhausted(head: u64) -> Self {
        Self {
            details: Some(format!("head: {}", head)),
            ..Self::new(
                BinlogErrorCode::AeroBinlogNonMonotonic,
                "no group id left after the binlog head",
            )
        }
    }

    /// Returns the error code
    pub fn code(&self) -> BinlogErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether this error is fatal
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns whether this error rejects a requested position
    pub fn is_invalid_position(&self) -> bool {
        self.code == BinlogErrorCode::AeroBinlogInvalidPosition
    }
}

impl fmt::Display for BinlogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for BinlogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for binlog operations
pub type BinlogResult<T> = Result<T, BinlogError>;
