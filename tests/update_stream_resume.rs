//! Update Stream Resume Tests
//!
//! Position handling end to end:
//! - resuming after a POS yields exactly the later transactions
//! - DDL text is delivered verbatim
//! - positions only grow across segment rotation
//! - purged and malformed positions are rejected up front

use std::sync::Arc;
use std::time::Duration;

use aerostream::binlog::{Binlog, Position};
use aerostream::updatestream::{
    Event, NodeRole, StreamSession, UpdateStreamControl, UpdateStreamError, UpdateStreamService,
};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

fn setup() -> (TempDir, Arc<Binlog>, UpdateStreamService) {
    let dir = TempDir::new().unwrap();
    let binlog = Binlog::create(dir.path()).unwrap();
    let control = Arc::new(UpdateStreamControl::with_role(NodeRole::Replica));
    let service = UpdateStreamService::new(Arc::clone(&binlog), control);
    (dir, binlog, service)
}

async fn next(session: &mut StreamSession) -> Event {
    tokio::time::timeout(TIMEOUT, session.next_event())
        .await
        .unwrap()
        .unwrap()
}

/// Reads until the event closing group `last`, starting with `first`.
async fn collect_until(session: &mut StreamSession, first: Event, last: Position) -> Vec<Event> {
    let mut events = vec![first];
    while events.last().and_then(Event::position) != Some(last) {
        events.push(next(session).await);
    }
    events
}

// =============================================================================
// Resume Correctness
// =============================================================================

/// Resuming at a POS yields the transactions after it, in commit order.
#[tokio::test]
async fn test_resume_after_pos() {
    let (_dir, binlog, service) = setup();
    let mut writer = binlog.writer().unwrap();
    writer.execute_ddl("create table resume_t (id int)").unwrap();
    writer.commit_transaction(&["insert into resume_t values (1)"]).unwrap();
    writer.commit_transaction(&["insert into resume_t values (2)"]).unwrap();

    // Find the resume point the way a consumer would: from a POS it received
    let (mut session, first) = service.stream_start("0").await.unwrap();
    let events = collect_until(&mut session, first, Position::new(2)).await;
    let resume = match events.last() {
        Some(Event::Pos { position }) => *position,
        other => panic!("expected POS, got {:?}", other),
    };
    drop(session);

    for i in 10..15 {
        writer
            .commit_transaction(&[format!("insert into resume_t values ({})", i)])
            .unwrap();
    }
    let last = writer
        .commit_transaction(&["delete from resume_t where id = 10"])
        .unwrap();

    let (mut session, first) = service.stream_start(&resume.to_string()).await.unwrap();
    let events = collect_until(&mut session, first, last).await;

    let mut expected = vec![
        Event::dml("insert into resume_t values (2)"),
        Event::pos(Position::new(3)),
    ];
    for (offset, i) in (10..15).enumerate() {
        expected.push(Event::dml(format!("insert into resume_t values ({})", i)));
        expected.push(Event::pos(Position::new(4 + offset as u64)));
    }
    expected.push(Event::dml("delete from resume_t where id = 10"));
    expected.push(Event::pos(last));

    assert_eq!(events, expected);
}

/// Resuming at the head waits for the next commit instead of replaying.
#[tokio::test]
async fn test_resume_at_head_waits() {
    let (_dir, binlog, service) = setup();
    let mut writer = binlog.writer().unwrap();
    let head = writer.commit_transaction(&["insert into resume_t values (1)"]).unwrap();

    let mut session = service.open_session(&head.to_string()).unwrap();
    let pending = tokio::time::timeout(Duration::from_millis(100), session.next_event()).await;
    assert!(pending.is_err());

    writer.commit_transaction(&["insert into resume_t values (2)"]).unwrap();
    assert_eq!(next(&mut session).await, Event::dml("insert into resume_t values (2)"));
    assert_eq!(next(&mut session).await, Event::pos(Position::new(2)));
}

/// A rolled back transaction produces no events.
#[tokio::test]
async fn test_rollback_is_not_streamed() {
    let (_dir, binlog, service) = setup();
    let mut writer = binlog.writer().unwrap();
    writer
        .append_group(&["BEGIN", "insert into resume_t values (1)", "ROLLBACK"])
        .unwrap();
    writer.commit_transaction(&["insert into resume_t values (2)"]).unwrap();

    let (mut session, first) = service.stream_start("0").await.unwrap();
    assert_eq!(first, Event::dml("insert into resume_t values (2)"));
    assert_eq!(next(&mut session).await, Event::pos(Position::new(2)));
}

// =============================================================================
// DDL Fidelity
// =============================================================================

/// Multi-line DDL with comments arrives byte for byte.
#[tokio::test]
async fn test_ddl_text_preserved() {
    let (_dir, binlog, service) = setup();
    let ddl = "create table fidelity_t (\n\
               \tid bigint not null,\n\
               \tpayload varchar(128), /* free text */\n\
               \tprimary key (id)\n\
               ) comment 'vitess_sequence'";
    let mut writer = binlog.writer().unwrap();
    let group = writer.execute_ddl(ddl).unwrap();
    writer.execute_ddl("  DROP TABLE   fidelity_old").unwrap();

    let (mut session, first) = service.stream_start("0").await.unwrap();
    assert_eq!(first, Event::ddl(ddl, group));
    assert_eq!(
        next(&mut session).await,
        Event::ddl("  DROP TABLE   fidelity_old", Position::new(2))
    );
}

/// DDL inside an open transaction commits it first.
#[tokio::test]
async fn test_ddl_closes_open_transaction() {
    let (_dir, binlog, service) = setup();
    let mut writer = binlog.writer().unwrap();
    writer
        .append_group(&["BEGIN", "insert into resume_t values (1)"])
        .unwrap();
    writer.execute_ddl("alter table resume_t add column c int").unwrap();

    let (mut session, first) = service.stream_start("0").await.unwrap();
    assert_eq!(first, Event::dml("insert into resume_t values (1)"));
    assert_eq!(next(&mut session).await, Event::pos(Position::new(1)));
    assert_eq!(
        next(&mut session).await,
        Event::ddl("alter table resume_t add column c int", Position::new(2))
    );
}

/// DDL sent as a transaction yields one DDL event and no extra POS.
#[tokio::test]
async fn test_ddl_in_transaction_streams_once() {
    let (_dir, binlog, service) = setup();
    let mut writer = binlog.writer().unwrap();
    let group = writer
        .commit_transaction(&["create table once_t (id int)"])
        .unwrap();
    writer.commit_transaction(&["insert into once_t values (1)"]).unwrap();

    let (mut session, first) = service.stream_start("0").await.unwrap();
    assert_eq!(first, Event::ddl("create table once_t (id int)", group));
    assert_eq!(next(&mut session).await, Event::dml("insert into once_t values (1)"));
    assert_eq!(next(&mut session).await, Event::pos(Position::new(2)));
}

// =============================================================================
// Rotation
// =============================================================================

/// Positions never move backwards while the log rotates underneath a session.
#[tokio::test]
async fn test_positions_monotonic_across_rotation() {
    let (_dir, binlog, service) = setup();
    let mut writer = binlog.writer().unwrap().with_max_segment_bytes(300);

    let mut session = service.open_session("0").unwrap();
    let producer = tokio::task::spawn_blocking(move || {
        let mut last = Position::GENESIS;
        for i in 0..50 {
            last = writer
                .commit_transaction(&[format!("insert into rotate_t values ({})", i)])
                .unwrap();
        }
        last
    });

    let mut positions = Vec::new();
    let mut dml = 0;
    while positions.last() != Some(&Position::new(50)) {
        match next(&mut session).await {
            Event::Pos { position } => positions.push(position),
            Event::Dml { .. } => dml += 1,
            other => panic!("unexpected event {:?}", other),
        }
    }

    assert_eq!(producer.await.unwrap(), Position::new(50));
    assert_eq!(dml, 50);
    let expected: Vec<_> = (1..=50).map(Position::new).collect();
    assert_eq!(positions, expected);
    assert!(binlog.segments().len() > 1);
}

/// Purging the segment a live session is reading does not end the session.
#[tokio::test]
async fn test_session_survives_purge_of_its_segment() {
    let (_dir, binlog, service) = setup();
    let mut writer = binlog.writer().unwrap();
    writer.commit_transaction(&["insert into resume_t values (1)"]).unwrap();

    let (mut session, first) = service.stream_start("0").await.unwrap();
    assert_eq!(first, Event::dml("insert into resume_t values (1)"));
    assert_eq!(next(&mut session).await, Event::pos(Position::new(1)));

    let segment = writer.rotate().unwrap();
    writer.commit_transaction(&["insert into resume_t values (2)"]).unwrap();
    writer.purge_before(&segment).unwrap();
    assert_eq!(binlog.segments().len(), 1);

    assert_eq!(next(&mut session).await, Event::dml("insert into resume_t values (2)"));
    assert_eq!(next(&mut session).await, Event::pos(Position::new(2)));
    assert!(!session.is_closed());
}

// =============================================================================
// Rejected Positions
// =============================================================================

/// Positions in purged segments are too old.
#[tokio::test]
async fn test_purged_position_rejected() {
    let (_dir, binlog, service) = setup();
    let mut writer = binlog.writer().unwrap();
    writer.commit_transaction(&["insert into resume_t values (1)"]).unwrap();
    writer.commit_transaction(&["insert into resume_t values (2)"]).unwrap();
    let segment = writer.rotate().unwrap();
    writer.commit_transaction(&["insert into resume_t values (3)"]).unwrap();
    writer.purge_before(&segment).unwrap();

    assert_eq!(binlog.earliest_position(), Position::new(2));

    for stale in ["0", "1"] {
        let err = service.open_session(stale).unwrap_err();
        assert!(matches!(err, UpdateStreamError::InvalidPosition(_)), "{}", stale);
        assert_eq!(err.code(), "INVALID_POSITION");
        assert!(!err.is_retryable());
    }

    let (_session, first) = service.stream_start("2").await.unwrap();
    assert_eq!(first, Event::dml("insert into resume_t values (3)"));
}

/// Malformed and future positions never open a session.
#[tokio::test]
async fn test_unresolvable_positions_rejected() {
    let (_dir, binlog, service) = setup();
    let mut writer = binlog.writer().unwrap();
    writer.commit_transaction(&["insert into resume_t values (1)"]).unwrap();

    for bad in ["", "abc", "-1", "1.5", "99"] {
        let err = service.open_session(bad).unwrap_err();
        assert!(matches!(err, UpdateStreamError::InvalidPosition(_)), "{:?}", bad);
    }
    assert_eq!(service.active_sessions(), 0);
    assert_eq!(service.metrics().snapshot().sessions_rejected, 5);
}
