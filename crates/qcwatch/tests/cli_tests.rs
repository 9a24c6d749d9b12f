//! CLI integration tests for qcw.

use assert_cmd::Command;
use predicates::prelude::*;

const OP_ID: &str = "e0f7d12345abcdef67890123";

fn qcw(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("qcw").unwrap();
    cmd.current_dir(dir)
        .arg("--db")
        .arg(dir.join("qcw.db"))
        .env_remove("QCWATCH_CONFIG");
    cmd
}

fn write_captures(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("captures.jsonl");
    let begin = serde_json::json!({
        "url": format!("https://app.outlier.ai/api/qaOperations/{OP_ID}/begin"),
        "method": "POST",
        "timestamp": 1_000,
    });
    let transition = serde_json::json!({
        "url": format!("https://app.outlier.ai/api/qaOperations/{OP_ID}/transition"),
        "method": "POST",
        "timestamp": 61_000,
    });
    std::fs::write(&path, format!("{begin}\n{transition}\nnot json\n")).unwrap();
    path
}

#[test]
fn entries_on_fresh_database_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    qcw(dir.path())
        .args(["entries"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No entries."));
}

#[test]
fn ingest_then_entries_shows_completed_audit() {
    let dir = tempfile::tempdir().unwrap();
    let captures = write_captures(dir.path());

    qcw(dir.path())
        .arg("ingest")
        .arg(&captures)
        .assert()
        .success()
        .stdout(predicate::str::contains("Ingested 2 captures (1 skipped)"));

    qcw(dir.path())
        .args(["entries"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed").and(predicate::str::contains("1m 00s")));
}

#[test]
fn entries_json_output_is_parseable() {
    let dir = tempfile::tempdir().unwrap();
    let captures = write_captures(dir.path());
    qcw(dir.path()).arg("ingest").arg(&captures).assert().success();

    let output = qcw(dir.path())
        .args(["entries", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let entries: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["qa_operation_id"], OP_ID);
}

#[test]
fn log_records_off_platform_entry() {
    let dir = tempfile::tempdir().unwrap();
    qcw(dir.path())
        .args([
            "log",
            "--minutes",
            "30",
            "--activity",
            "meeting",
            "--description",
            "standup",
            "--start",
            "2024-01-15T09:00:00Z",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged off-platform entry off_"));

    qcw(dir.path())
        .args(["entries", "--kind", "off-platform"])
        .assert()
        .success()
        .stdout(predicate::str::contains("meeting").and(predicate::str::contains("30m 00s")));
}

#[test]
fn entries_date_filter_excludes_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    qcw(dir.path())
        .args([
            "log",
            "--minutes",
            "10",
            "--activity",
            "break",
            "--start",
            "2024-01-15T09:00:00Z",
        ])
        .assert()
        .success();

    qcw(dir.path())
        .args(["entries", "--start-date", "2024-02-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No entries."));

    qcw(dir.path())
        .args(["entries", "--start-date", "2024-01-15", "--end-date", "2024-01-15"])
        .assert()
        .success()
        .stdout(predicate::str::contains("break"));
}

#[test]
fn invalid_date_filter_fails_with_message() {
    let dir = tempfile::tempdir().unwrap();
    qcw(dir.path())
        .args(["entries", "--start-date", "15/01/2024"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid"));
}

#[test]
fn resolve_finds_deep_link() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("page.json");
    std::fs::write(
        &page,
        serde_json::json!({
            "nodes": [{
                "_id": OP_ID,
                "qaOperation": {"_id": "qaop_111", "relatedObjectId": "batch_x"},
            }]
        })
        .to_string(),
    )
    .unwrap();

    // Prefix fragment resolves to the full deep link.
    qcw(dir.path())
        .args(["resolve", "e0f7d123", "--page"])
        .arg(&page)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "https://app.outlier.ai/en/expert/outlieradmin/tools/chat_bulk_audit/batch_x",
        ));
}

#[test]
fn resolve_unknown_cell_is_nonfatal() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("page.json");
    std::fs::write(&page, "{\"nodes\": []}").unwrap();

    qcw(dir.path())
        .args(["resolve", "ffffffff", "--page"])
        .arg(&page)
        .assert()
        .success()
        .stdout(predicate::str::contains("no link available"));
}

#[test]
fn prune_reports_counts() {
    let dir = tempfile::tempdir().unwrap();
    qcw(dir.path())
        .arg("prune")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pruned 0 entries"));
}

#[test]
fn status_reports_database_and_counts() {
    let dir = tempfile::tempdir().unwrap();
    qcw(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("entries: 0")
                .and(predicate::str::contains("in-flight sessions: 0")),
        );
}
