//! Binlog record layout
//!
//! Each record in a segment is:
//! - Record Length (u32 LE, whole record)
//! - Record Type (u8): HEADER / STATEMENT / ROTATE
//! - Group Id (u64 LE)
//! - Payload Length (u32 LE)
//! - Payload (UTF-8)
//! - Checksum (u32 LE) over type, group id and payload

use std::io;

use super::checksum::{compute_checksum, verify_checksum};
use super::position::Position;

/// Bytes of a record that are not payload.
pub const RECORD_OVERHEAD: usize = 4 + 1 + 8 + 4 + 4;

/// Binlog record types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// First record of every segment; group id is the head before the segment
    Header = 0,
    /// One SQL statement belonging to a group
    Statement = 1,
    /// Last record of a closed segment; payload names the successor
    Rotate = 2,
}

impl RecordType {
    /// Convert from u8, returns None for invalid values
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RecordType::Header),
            1 => Some(RecordType::Statement),
            2 => Some(RecordType::Rotate),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A single record as stored in a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinlogRecord {
    pub record_type: RecordType,
    pub group_id: u64,
    pub payload: String,
}

impl BinlogRecord {
    pub fn new(record_type: RecordType, group_id: u64, payload: impl Into<String>) -> Self {
        Self {
            record_type,
            group_id,
            payload: payload.into(),
        }
    }

    /// Segment header record.
    pub fn header(prev_head: u64, created_at: impl Into<String>) -> Self {
        Self::new(RecordType::Header, prev_head, created_at)
    }

    /// Statement record.
    pub fn statement(group_id: u64, sql: impl Into<String>) -> Self {
        Self::new(RecordType::Statement, group_id, sql)
    }

    /// Rotate record naming the successor segment.
    pub fn rotate(head: u64, next_segment: impl Into<String>) -> Self {
        Self::new(RecordType::Rotate, head, next_segment)
    }

    /// Size of the serialized record in bytes.
    pub fn encoded_len(&self) -> usize {
        RECORD_OVERHEAD + self.payload.len()
    }

    fn serialize_body(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 8 + 4 + self.payload.len());
        buf.push(self.record_type.as_u8());
        buf.extend_from_slice(&self.group_id.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.payload.as_bytes());
        buf
    }

    /// Serialize the complete record.
    pub fn serialize(&self) -> Vec<u8> {
        let body = self.serialize_body();
        let total = (4 + body.len() + 4) as u32;
        let mut buf = Vec::with_capacity(total as usize);
        buf.extend_from_slice(&total.to_le_bytes());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&compute_checksum(&body).to_le_bytes());
        buf
    }

    /// Deserialize one complete record.
    ///
    /// `data` must hold exactly the bytes announced by the length prefix.
    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        if data.len() < RECORD_OVERHEAD {
            return Err(invalid(format!("record too short: {} bytes", data.len())));
        }

        let declared = u32::from_le_bytes(read_array(data, 0)) as usize;
        if declared != data.len() {
            return Err(invalid(format!(
                "record length {} does not match buffer of {} bytes",
                declared,
                data.len()
            )));
        }

        let body = &data[4..data.len() - 4];
        let checksum = u32::from_le_bytes(read_array(data, data.len() - 4));
        if !verify_checksum(body, checksum) {
            return Err(invalid("checksum mismatch".to_string()));
        }

        let record_type = RecordType::from_u8(body[0])
            .ok_or_else(|| invalid(format!("unknown record type: {}", body[0])))?;
        let group_id = u64::from_le_bytes(read_array(body, 1));
        let payload_len = u32::from_le_bytes(read_array(body, 9)) as usize;
        let payload_bytes = &body[13..];
        if payload_bytes.len() != payload_len {
            return Err(invalid(format!(
                "payload length {} does not match {} remaining bytes",
                payload_len,
                payload_bytes.len()
            )));
        }
        let payload = String::from_utf8(payload_bytes.to_vec())
            .map_err(|e| invalid(format!("invalid UTF-8 payload: {}", e)))?;

        Ok(Self {
            record_type,
            group_id,
            payload,
        })
    }
}

fn read_array<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[offset..offset + N]);
    out
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// A statement entry as handed to consumers of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Group the statement belongs to
    pub position: Position,
    /// Embedded SQL payload
    pub sql: String,
}

impl RawEntry {
    pub fn new(position: Position, sql: impl Into<String>) -> Self {
        Self {
            position,
            sql: sql.into(),
        }
    }
}
