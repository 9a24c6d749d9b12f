//! End-to-end flow: raw captures through the engine to a queried timeline,
//! across a simulated host restart on a real SQLite store.

use qcwatch_core::config::QcwatchConfig;
use qcwatch_core::entry::{DashboardEntry, EntryKind, EntryStatus};
use qcwatch_core::event::RawCapture;
use qcwatch_core::persist::LoadOutcome;
use qcwatch_core::query::EntryFilterInput;
use qcwatch_core::runtime::Engine;
use qcwatch_core::store::SqliteStore;

const OP_A: &str = "e0f7d12345abcdef67890123";
const OP_B: &str = "aaaa000011112222333344bb";

fn capture(op: &str, action: &str, at: i64) -> RawCapture {
    RawCapture {
        url: format!("https://app.outlier.ai/api/qaOperations/{op}/{action}"),
        method: "POST".to_string(),
        request_body: Some(serde_json::json!({"maxTimeSeconds": 600})),
        response_body: None,
        timestamp: at,
    }
}

fn engine_at(path: &std::path::Path) -> Engine {
    let store = SqliteStore::open(path).expect("open sqlite store");
    let (engine, _) = Engine::load(Box::new(store), QcwatchConfig::default()).expect("load engine");
    engine
}

#[test]
fn full_capture_to_query_flow_with_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("qcw.db");

    // First process: one audit begins and completes, a second begins.
    {
        let mut engine = engine_at(&db_path);
        engine.handle_capture(&capture(OP_A, "begin", 1_000));
        engine.handle_capture(&capture(OP_B, "begin", 2_000));
        engine.handle_capture(&capture(OP_A, "complete", 301_000));
        assert_eq!(engine.in_flight_count(), 2);
    }

    // Restart: state reconstructed entirely from the store.
    let mut engine = {
        let store = SqliteStore::open(&db_path).unwrap();
        let (engine, outcome) =
            Engine::load(Box::new(store), QcwatchConfig::default()).unwrap();
        assert!(matches!(outcome, LoadOutcome::Loaded(_)));
        engine
    };
    assert_eq!(engine.in_flight_count(), 2);

    // Grace window expires for the completed audit.
    engine.handle_tick(301_000 + 20_000);
    assert_eq!(engine.in_flight_count(), 1);

    // Off-platform activity logged alongside.
    engine.add_off_platform(DashboardEntry::off_platform(
        50_000,
        10_000,
        "meeting",
        Some("standup".to_string()),
    ));

    let entries = engine.entries();
    assert_eq!(entries.len(), 3);

    let completed = entries
        .iter()
        .find(|e| e.qa_operation_id.as_deref() == Some(OP_A))
        .unwrap();
    assert_eq!(completed.status, EntryStatus::Completed);
    assert_eq!(completed.duration_ms, 300_000);
    assert_eq!(completed.ended_at, Some(301_000));

    let in_progress = entries
        .iter()
        .find(|e| e.qa_operation_id.as_deref() == Some(OP_B))
        .unwrap();
    assert_eq!(in_progress.status, EntryStatus::InProgress);

    // Query: audit entries only.
    let filter = EntryFilterInput {
        kind: Some(EntryKind::Audit),
        ..Default::default()
    }
    .validate()
    .unwrap();
    assert_eq!(engine.query(&filter).len(), 2);
}

#[test]
fn out_of_order_complete_yields_reconstructed_entry() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("qcw.db");
    let mut engine = engine_at(&db_path);

    // The Begin was lost to a restart; only the Complete is observed.
    engine.handle_capture(&capture(OP_A, "complete", 900_000));

    let entries = engine.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, EntryStatus::Completed);
    assert!(entries[0].reconstructed);
    // Start approximated from maxTimeSeconds in the capture body.
    assert_eq!(entries[0].started_at, 300_000);

    // The Begin finally arrives, late: a fresh session starts and its
    // finalization replaces the reconstructed estimate downstream.
    engine.handle_capture(&capture(OP_A, "begin", 910_000));
    engine.handle_capture(&capture(OP_A, "transition", 950_000));

    let entries = engine.entries();
    assert_eq!(entries.len(), 1, "one entry per QA operation id");
    assert_eq!(entries[0].duration_ms, 40_000);
    assert!(!entries[0].reconstructed);
}

#[test]
fn abandonment_is_canceled_and_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("qcw.db");

    {
        let mut engine = engine_at(&db_path);
        engine.handle_capture(&capture(OP_A, "begin", 0));
    }

    let mut engine = engine_at(&db_path);
    // Cutoff: 600 s * 3 = 1800 s.
    engine.handle_tick(1_800_000);

    let entries = engine.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, EntryStatus::Canceled);
    assert_eq!(entries[0].duration_ms, 0);
    assert_eq!(engine.in_flight_count(), 0);
}
