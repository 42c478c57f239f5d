//! Replication log positions
//!
//! A position is the group id of the log: every committed transaction and
//! every schema change is assigned the next group id by the primary, and
//! replicas preserve it verbatim. Rotation never consumes or resets a group
//! id, so positions observed on any segment of any replica of the same data
//! share one total order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::{BinlogError, BinlogResult};

/// Totally ordered marker into the replication log.
///
/// The textual form is the unpadded decimal group id; ordering is numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Position(u64);

impl Position {
    /// Position before any group was written.
    pub const GENESIS: Position = Position(0);

    /// Create a position from a raw group id.
    pub fn new(group_id: u64) -> Self {
        Self(group_id)
    }

    /// Raw group id.
    pub fn group_id(&self) -> u64 {
        self.0
    }

    /// The position of the group that follows this one, if the id space
    /// is not exhausted.
    pub fn next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Whether this is the genesis position.
    pub fn is_genesis(&self) -> bool {
        self.0 == 0
    }

    /// Parse the textual form.
    ///
    /// Surrounding whitespace is ignored; anything else that is not a
    /// decimal `u64` is rejected as an invalid position.
    pub fn parse(text: &str) -> BinlogResult<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BinlogError::invalid_position(format!(
                "unparsable position: '{}'",
                text
            )));
        }
        trimmed.parse::<u64>().map(Self).map_err(|e| {
            BinlogError::invalid_position(format!("unparsable position '{}': {}", text, e))
        })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Position {
    type Err = BinlogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Position> for String {
    fn from(position: Position) -> Self {
        position.to_string()
    }
}

impl TryFrom<String> for Position {
    type Error = BinlogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}
