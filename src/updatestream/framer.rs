//! Transaction framer
//!
//! Turns the raw statement sequence of the log into events. DML is held
//! back until its transaction commits, so a consumer never sees part of a
//! transaction that is later rolled back or cut off.

use std::collections::VecDeque;
use std::sync::OnceLock;

use regex::Regex;

use super::event::Event;
use crate::binlog::{Position, RawEntry};

/// What a statement means for transaction framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Begin,
    Commit,
    Rollback,
    Dml,
    Ddl,
    /// No data relevance (`SET`, `USE`, ...)
    Other,
}

static LEADING_KEYWORDS: OnceLock<Option<Regex>> = OnceLock::new();

fn leading_keywords() -> Option<&'static Regex> {
    LEADING_KEYWORDS
        .get_or_init(|| Regex::new(r"^(?s)(?:\s+|/\*.*?\*/)*([A-Za-z]+)(?:\s+([A-Za-z]+))?").ok())
        .as_ref()
}

/// Classifies a statement by its leading keyword.
///
/// Matching is case-insensitive and skips leading whitespace and
/// `/* ... */` comments.
pub fn classify(sql: &str) -> StatementKind {
    let Some(caps) = leading_keywords().and_then(|re| re.captures(sql)) else {
        return StatementKind::Other;
    };
    let first = caps
        .get(1)
        .map(|m| m.as_str().to_ascii_uppercase())
        .unwrap_or_default();
    let second = caps.get(2).map(|m| m.as_str().to_ascii_uppercase());

    match first.as_str() {
        "BEGIN" => StatementKind::Begin,
        "START" if second.as_deref() == Some("TRANSACTION") => StatementKind::Begin,
        "COMMIT" => StatementKind::Commit,
        "ROLLBACK" => StatementKind::Rollback,
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => StatementKind::Dml,
        "CREATE" | "ALTER" | "DROP" | "RENAME" | "TRUNCATE" => StatementKind::Ddl,
        _ => StatementKind::Other,
    }
}

/// Groups raw entries into DDL, DML and POS events.
#[derive(Debug, Default)]
pub struct TransactionFramer {
    in_transaction: bool,
    buffered: Vec<String>,
    txn_position: Position,
    ready: VecDeque<Event>,
}

impl TransactionFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw entry.
    pub fn push(&mut self, entry: RawEntry) {
        match classify(&entry.sql) {
            StatementKind::Begin => {
                if self.in_transaction {
                    self.commit(self.txn_position);
                }
                self.in_transaction = true;
                self.txn_position = entry.position;
            }
            // A COMMIT outside a transaction closes nothing
            StatementKind::Commit if self.in_transaction => self.commit(entry.position),
            StatementKind::Commit => {}
            StatementKind::Rollback => {
                self.buffered.clear();
                self.in_transaction = false;
            }
            StatementKind::Dml => {
                self.in_transaction = true;
                self.txn_position = entry.position;
                self.buffered.push(entry.sql);
            }
            StatementKind::Ddl => {
                if self.in_transaction {
                    if self.buffered.is_empty() && self.txn_position == entry.position {
                        // The DDL itself marks the end of its group
                        self.in_transaction = false;
                    } else {
                        self.commit(self.txn_position);
                    }
                }
                self.ready.push_back(Event::ddl(entry.sql, entry.position));
            }
            StatementKind::Other => {}
        }
    }

    /// Next event ready for delivery.
    pub fn pop(&mut self) -> Option<Event> {
        self.ready.pop_front()
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Number of DML statements held back in the open transaction.
    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    fn commit(&mut self, position: Position) {
        self.ready
            .extend(self.buffered.drain(..).map(Event::dml));
        self.ready.push_back(Event::pos(position));
        self.in_transaction = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(group: u64, sql: &str) -> RawEntry {
        RawEntry::new(Position::new(group), sql)
    }

    fn frame(entries: &[(u64, &str)]) -> Vec<Event> {
        let mut framer = TransactionFramer::new();
        let mut out = Vec::new();
        for (group, sql) in entries {
            framer.push(entry(*group, sql));
            while let Some(event) = framer.pop() {
                out.push(event);
            }
        }
        out
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("BEGIN"), StatementKind::Begin);
        assert_eq!(classify("start transaction"), StatementKind::Begin);
        assert_eq!(classify("  commit"), StatementKind::Commit);
        assert_eq!(classify("ROLLBACK"), StatementKind::Rollback);
        assert_eq!(classify("insert into t values (1)"), StatementKind::Dml);
        assert_eq!(classify("Update t set a=1"), StatementKind::Dml);
        assert_eq!(classify("/* _stream t (id) (1); */ delete from t"), StatementKind::Dml);
        assert_eq!(classify("create table t (\nid int\n)"), StatementKind::Ddl);
        assert_eq!(classify("\n\tDROP TABLE t"), StatementKind::Ddl);
        assert_eq!(classify("SET timestamp=1"), StatementKind::Other);
        assert_eq!(classify("start slave"), StatementKind::Other);
        assert_eq!(classify(""), StatementKind::Other);
    }

    #[test]
    fn test_transaction_emits_dml_then_pos() {
        let events = frame(&[
            (1, "BEGIN"),
            (1, "insert into t values (1)"),
            (1, "insert into t values (2)"),
            (1, "COMMIT"),
        ]);
        assert_eq!(
            events,
            vec![
                Event::dml("insert into t values (1)"),
                Event::dml("insert into t values (2)"),
                Event::pos(Position::new(1)),
            ]
        );
    }

    #[test]
    fn test_dml_held_until_commit() {
        let mut framer = TransactionFramer::new();
        framer.push(entry(1, "BEGIN"));
        framer.push(entry(1, "insert into t values (1)"));
        assert!(framer.pop().is_none());
        assert_eq!(framer.buffered(), 1);
        assert!(framer.in_transaction());

        framer.push(entry(1, "COMMIT"));
        assert_eq!(framer.pop(), Some(Event::dml("insert into t values (1)")));
        assert_eq!(framer.pop(), Some(Event::pos(Position::new(1))));
        assert!(!framer.in_transaction());
    }

    #[test]
    fn test_ddl_is_self_contained() {
        let sql = "create table vt_b (\neid bigint,\nname varchar(128),\nprimary key(eid)\n) Engine=InnoDB";
        let events = frame(&[(4, sql)]);
        assert_eq!(events, vec![Event::ddl(sql, Position::new(4))]);
        assert_eq!(events[0].sql(), Some(sql));
    }

    #[test]
    fn test_rollback_discards() {
        let events = frame(&[
            (1, "BEGIN"),
            (1, "insert into t values (1)"),
            (1, "ROLLBACK"),
            (2, "BEGIN"),
            (2, "delete from t"),
            (2, "COMMIT"),
        ]);
        assert_eq!(
            events,
            vec![Event::dml("delete from t"), Event::pos(Position::new(2))]
        );
    }

    #[test]
    fn test_ddl_implicitly_commits_open_transaction() {
        let events = frame(&[
            (1, "BEGIN"),
            (1, "insert into t values (1)"),
            (2, "alter table t add column b int"),
        ]);
        assert_eq!(
            events,
            vec![
                Event::dml("insert into t values (1)"),
                Event::pos(Position::new(1)),
                Event::ddl("alter table t add column b int", Position::new(2)),
            ]
        );
    }

    #[test]
    fn test_ddl_inside_transaction_has_one_resume_point() {
        let events = frame(&[
            (3, "BEGIN"),
            (3, "create table t (id int)"),
            (3, "COMMIT"),
        ]);
        assert_eq!(events, vec![Event::ddl("create table t (id int)", Position::new(3))]);
    }

    #[test]
    fn test_dml_and_ddl_in_one_group() {
        let events = frame(&[
            (3, "BEGIN"),
            (3, "insert into t values (1)"),
            (3, "create table u (id int)"),
            (3, "COMMIT"),
        ]);
        assert_eq!(
            events,
            vec![
                Event::dml("insert into t values (1)"),
                Event::pos(Position::new(3)),
                Event::ddl("create table u (id int)", Position::new(3)),
            ]
        );
    }

    #[test]
    fn test_stray_commit_ignored() {
        let events = frame(&[(2, "COMMIT")]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_begin_closes_open_transaction() {
        let events = frame(&[
            (1, "BEGIN"),
            (1, "insert into t values (1)"),
            (2, "BEGIN"),
            (2, "insert into t values (2)"),
            (2, "COMMIT"),
        ]);
        assert_eq!(events.len(), 4);
        assert_eq!(events[1], Event::pos(Position::new(1)));
        assert_eq!(events[3], Event::pos(Position::new(2)));
    }

    #[test]
    fn test_empty_transaction_emits_pos() {
        let events = frame(&[(5, "BEGIN"), (5, "COMMIT")]);
        assert_eq!(events, vec![Event::pos(Position::new(5))]);
    }

    #[test]
    fn test_irrelevant_statements_skipped() {
        let events = frame(&[
            (1, "SET names utf8"),
            (1, "BEGIN"),
            (1, "SET timestamp=1"),
            (1, "update t set a=2"),
            (1, "COMMIT"),
        ]);
        assert_eq!(
            events,
            vec![Event::dml("update t set a=2"), Event::pos(Position::new(1))]
        );
    }
}
