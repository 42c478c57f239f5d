//! Stream events
//!
//! Events travel as JSON objects with PascalCase field names:
//! `{"Category":"POS","GroupId":"42"}`. `Sql` is present for DDL and DML,
//! `GroupId` for DDL and POS, `Error` for ERR.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::binlog::Position;

/// Tag distinguishing the kinds of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    /// Schema change, its own transaction
    #[serde(rename = "DDL")]
    Ddl,
    /// Data change inside a transaction
    #[serde(rename = "DML")]
    Dml,
    /// Transaction close
    #[serde(rename = "POS")]
    Pos,
    /// Terminal error
    #[serde(rename = "ERR")]
    Err,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Ddl => "DDL",
            Category::Dml => "DML",
            Category::Pos => "POS",
            Category::Err => "ERR",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One event of an update stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Ddl { sql: String, position: Position },
    Dml { sql: String },
    Pos { position: Position },
    Error { message: String },
}

impl Event {
    pub fn ddl(sql: impl Into<String>, position: Position) -> Self {
        Event::Ddl {
            sql: sql.into(),
            position,
        }
    }

    pub fn dml(sql: impl Into<String>) -> Self {
        Event::Dml { sql: sql.into() }
    }

    pub fn pos(position: Position) -> Self {
        Event::Pos { position }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Event::Ddl { .. } => Category::Ddl,
            Event::Dml { .. } => Category::Dml,
            Event::Pos { .. } => Category::Pos,
            Event::Error { .. } => Category::Err,
        }
    }

    /// SQL text for DDL and DML events.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Event::Ddl { sql, .. } | Event::Dml { sql } => Some(sql),
            _ => None,
        }
    }

    /// Resume point carried by DDL and POS events.
    pub fn position(&self) -> Option<Position> {
        match self {
            Event::Ddl { position, .. } | Event::Pos { position } => Some(*position),
            _ => None,
        }
    }

    /// Whether the session ends after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Error { .. })
    }
}

/// Serialized shape of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireEvent {
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Event> for WireEvent {
    fn from(event: Event) -> Self {
        let category = event.category();
        let group_id = event.position().map(|p| p.to_string());
        match event {
            Event::Ddl { sql, .. } | Event::Dml { sql } => WireEvent {
                category,
                sql: Some(sql),
                group_id,
                error: None,
            },
            Event::Pos { .. } => WireEvent {
                category,
                sql: None,
                group_id,
                error: None,
            },
            Event::Error { message } => WireEvent {
                category,
                sql: None,
                group_id: None,
                error: Some(message),
            },
        }
    }
}

impl WireEvent {
    /// Decodes the wire shape back into an event.
    pub fn into_event(self) -> Result<Event, String> {
        let WireEvent {
            category,
            sql,
            group_id,
            error,
        } = self;
        let position = || -> Result<Position, String> {
            let text = group_id
                .as_deref()
                .ok_or_else(|| format!("{} event without GroupId", category))?;
            Position::parse(text).map_err(|e| e.message().to_string())
        };

        match category {
            Category::Ddl => Ok(Event::ddl(sql.unwrap_or_default(), position()?)),
            Category::Dml => Ok(Event::dml(sql.unwrap_or_default())),
            Category::Pos => Ok(Event::pos(position()?)),
            Category::Err => Ok(Event::error(error.unwrap_or_default())),
        }
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEvent::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        WireEvent::deserialize(deserializer)?
            .into_event()
            .map_err(de::Error::custom)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Ddl { sql, position } => write!(f, "DDL@{} {}", position, sql),
            Event::Dml { sql } => write!(f, "DML {}", sql),
            Event::Pos { position } => write!(f, "POS@{}", position),
            Event::Error { message } => write!(f, "ERR {}", message),
        }
    }
}
