//! Binlog: the durable, segmented replication log
//!
//! - Positions are group ids, preserved across rotation and by replicas
//! - One writer per log, fsync before the head is published
//! - Cursors wait on the head watch and follow rotations
//! - Segments can be purged; positions before the earliest retained
//!   segment are rejected

mod apply;
mod checksum;
mod cursor;
mod errors;
mod log;
mod position;
mod reader;
mod record;
mod writer;

pub use apply::ReplicaApplier;
pub use cursor::LogCursor;
pub use errors::{BinlogError, BinlogErrorCode, BinlogResult, Severity};
pub use log::{parse_segment_index, segment_name, Binlog, SegmentInfo};
pub use position::Position;
pub use reader::{read_segment_header, SegmentReader};
pub use record::{BinlogRecord, RawEntry, RecordType};
pub use writer::{BinlogWriter, DEFAULT_MAX_SEGMENT_BYTES};
