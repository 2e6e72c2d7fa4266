#![allow(clippy::uninlined_format_args)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};

const SEEDED_LEAD_ID: &str = "01J0SQQP7M70P6Y3R4T8D8G8M2";

fn fl_binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fl"))
}

fn fl_output(data_file: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(fl_binary_path());
    command.arg("--data-file").arg(data_file);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run fl command {:?}: {err}", args),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn fl_json(data_file: &Path, args: &[&str]) -> Value {
    let output = fl_output(data_file, args);
    assert!(
        output.status.success(),
        "fl {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    stdout_json(&output)
}

/// Legacy layout: no schema version and a lead without workflow fields.
fn seed_legacy_document(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("db.json");
    let legacy = json!({
        "leads": [{
            "id": SEEDED_LEAD_ID,
            "name": "Dana Fleet",
            "email": "dana@example.com",
            "fleetSize": "200 trucks",
            "priority": "Need both acquisition and sell-off",
            "message": "please help asap",
            "sessionId": "sess-1",
            "source": "website",
            "score": 61,
            "grade": "A",
            "createdAt": "2026-02-07T12:00:00.000Z"
        }],
        "crmQueue": [{
            "id": "crm-1",
            "leadId": SEEDED_LEAD_ID,
            "payload": {
                "name": "Dana Fleet",
                "email": "dana@example.com",
                "priority": "Need both acquisition and sell-off",
                "score": 61,
                "grade": "A"
            },
            "createdAt": "2026-02-07T12:00:00.000Z"
        }]
    });
    if let Err(err) = fs::write(&path, legacy.to_string()) {
        panic!("failed to seed document: {err}");
    }
    path
}

fn temp_dir() -> tempfile::TempDir {
    match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(err) => panic!("failed to create temp dir: {err}"),
    }
}

#[test]
fn help_lists_operator_commands() {
    let output = match Command::new(fl_binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["migrate", "lead", "dashboard", "funnel", "audit", "crm", "score"] {
        assert!(
            stdout.contains(required),
            "expected help output to contain subcommand {required}; output={stdout}"
        );
    }
}

#[test]
fn migrate_creates_missing_document() {
    let dir = temp_dir();
    let path = dir.path().join("nested").join("db.json");

    let report = fl_json(&path, &["migrate"]);
    assert_eq!(report["to_version"], json!(2));
    assert!(path.exists());
}

#[test]
fn migrate_backfills_legacy_lead_then_reports_no_change() {
    let dir = temp_dir();
    let path = seed_legacy_document(&dir);

    let report = fl_json(&path, &["migrate"]);
    assert_eq!(report["from_version"], json!(1));
    assert_eq!(report["to_version"], json!(2));

    let shown = fl_json(&path, &["lead", "show", SEEDED_LEAD_ID]);
    assert_eq!(shown["lead"]["status"], json!("new"));
    assert_eq!(shown["lead"]["score"], json!(61));
    assert_eq!(shown["lead"]["updatedAt"], shown["lead"]["createdAt"]);

    let again = fl_json(&path, &["migrate"]);
    assert_eq!(again["records_backfilled"], json!(0));
    assert_eq!(again["from_version"], json!(2));
}

#[test]
fn dashboard_and_funnel_apply_filters() {
    let dir = temp_dir();
    let path = seed_legacy_document(&dir);

    let dashboard = fl_json(&path, &["dashboard", "--grade", "a"]);
    assert_eq!(dashboard["totals"]["leads"], json!(1));
    assert_eq!(dashboard["totals"]["pendingCrmSync"], json!(1));

    let funnel = fl_json(&path, &["funnel", "--status", "won"]);
    assert_eq!(funnel["total"], json!(0));
}

#[test]
fn crm_sync_is_idempotent_and_audited_once() {
    let dir = temp_dir();
    let path = seed_legacy_document(&dir);

    let first = fl_json(&path, &["crm", "sync", "--operator", "ops"]);
    assert_eq!(first, json!({ "synced": 1 }));
    let second = fl_json(&path, &["crm", "sync"]);
    assert_eq!(second, json!({ "synced": 0 }));

    let audit = fl_json(&path, &["audit", "list", "--limit", "5"]);
    let events = match audit["events"].as_array() {
        Some(events) => events.clone(),
        None => panic!("audit output has no events: {audit}"),
    };
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["action"], json!("crm.sync_mock"));
    assert_eq!(events[0]["actor"]["username"], json!("ops"));
    assert_eq!(events[0]["details"]["synced"], json!(1));
}

#[test]
fn unknown_lead_exits_non_zero() {
    let dir = temp_dir();
    let path = seed_legacy_document(&dir);

    let output = fl_output(&path, &["lead", "show", "missing"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Lead not found."));
}

#[test]
fn score_preview_does_not_need_existing_leads() {
    let dir = temp_dir();
    let path = dir.path().join("db.json");

    let scored = fl_json(
        &path,
        &[
            "score",
            "preview",
            "--priority",
            "Sell off units",
            "--fleet-size",
            "95",
            "--annual-burden",
            "250000",
        ],
    );
    assert_eq!(scored["score"], json!(30));
    assert_eq!(scored["grade"], json!("B"));
}
