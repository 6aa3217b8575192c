use std::time::Duration;

use ppeye::event::parse_timestamp;
use ppeye::{
    summarize, ClassLabelPolicy, CsvEventStore, EventStore, FrameLoopController,
    InMemoryEventStore, MonitorError, ScriptedDetector, SqliteEventStore, StopSignal,
    SyntheticCamera, ViolationLogger,
};

fn session(store: Box<dyn EventStore>, script: Vec<Vec<u32>>, frames: u64) -> FrameLoopController {
    FrameLoopController::new(
        Box::new(SyntheticCamera::new("stub://site", 4, 4).unwrap()),
        Box::new(ScriptedDetector::new(script)),
        ClassLabelPolicy::default(),
        ViolationLogger::new(store),
    )
    .with_frame_delay(Duration::ZERO)
    .with_frame_limit(Some(frames))
}

#[test]
fn logged_violations_are_summarized_per_label_and_day() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("violations.csv");

    let mut logger = ViolationLogger::new(Box::new(CsvEventStore::new(&path)));
    logger
        .log("No Helmet", parse_timestamp("2025-03-01 08:15:00").unwrap())
        .unwrap();
    logger
        .log("No Vest", parse_timestamp("2025-03-01 09:40:12").unwrap())
        .unwrap();

    let summary = summarize(&mut CsvEventStore::new(&path)).unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.count_for("No Helmet"), 1);
    assert_eq!(summary.count_for("No Vest"), 1);
    assert_eq!(summary.daily.len(), 2);
    assert!(summary
        .daily
        .iter()
        .all(|day| day.date.to_string() == "2025-03-01" && day.count == 1));
}

#[test]
fn totals_match_events_written_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("violations.csv");

    // 4 frames of [7, 5] then 3 frames of [7]: 8 + 3 events.
    let mut first = session(Box::new(CsvEventStore::new(&path)), vec![vec![7, 5]], 4);
    first.run_session(&StopSignal::new()).unwrap();
    drop(first);
    let mut second = session(Box::new(CsvEventStore::new(&path)), vec![vec![7]], 3);
    second.run_session(&StopSignal::new()).unwrap();

    let summary = summarize(&mut CsvEventStore::new(&path)).unwrap();
    assert_eq!(summary.total, 11);
    assert_eq!(summary.count_for("No Helmet"), 7);
    assert_eq!(summary.count_for("No Vest"), 4);
    assert_eq!(summary.by_label.values().sum::<u64>(), summary.total);
}

#[test]
fn summarize_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("violations.db");
    let mut ctl = session(
        Box::new(SqliteEventStore::new(&path)),
        vec![vec![7], vec![], vec![5]],
        9,
    );
    ctl.run_session(&StopSignal::new()).unwrap();

    let mut reader = SqliteEventStore::new(&path);
    let once = summarize(&mut reader).unwrap();
    let twice = summarize(&mut reader).unwrap();
    assert_eq!(once, twice);
    assert_eq!(once.total, 6);
}

#[test]
fn missing_or_empty_store_is_no_data() {
    let dir = tempfile::tempdir().unwrap();

    let missing = summarize(&mut CsvEventStore::new(dir.path().join("absent.csv")));
    assert!(matches!(missing, Err(MonitorError::NoData { .. })));

    let header_only = dir.path().join("header.csv");
    std::fs::write(&header_only, "timestamp,violation\n").unwrap();
    let empty = summarize(&mut CsvEventStore::new(&header_only));
    assert!(matches!(empty, Err(MonitorError::NoData { .. })));

    let memory = summarize(&mut InMemoryEventStore::new());
    assert!(matches!(memory, Err(MonitorError::NoData { .. })));
}

#[test]
fn malformed_rows_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("violations.csv");
    std::fs::write(
        &path,
        "timestamp,violation\n2025-03-01 08:00:00,No Helmet\nnot-a-time,No Vest\n2025-03-02 08:00:00,No Gloves\n",
    )
    .unwrap();

    let summary = summarize(&mut CsvEventStore::new(&path)).unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.skipped_rows, 1);
    assert_eq!(summary.count_for("No Gloves"), 1);
}
