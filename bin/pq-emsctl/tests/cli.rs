//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Control CLI for operators grouping power-quality events."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use serde_json::json;
use tempfile::tempdir;

fn seed(path: &Path) {
    let event = |id: &str, ts: &str, kind: &str| {
        json!({
            "id": id,
            "substation_id": "SS-12",
            "timestamp": ts,
            "event_type": kind,
            "severity": "high",
            "magnitude": 0.55,
            "duration_ms": 120,
        })
    };
    let events = json!([
        event("e1", "2024-05-01T08:00:00Z", "voltage_dip"),
        event("e2", "2024-05-01T08:02:00Z", "voltage_dip"),
        event("e3", "2024-05-01T08:15:00Z", "interruption"),
    ]);
    fs::write(path, serde_json::to_vec_pretty(&events).unwrap()).unwrap();
}

fn ctl(snapshot: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pq-emsctl").unwrap();
    cmd.env_remove("PQ_EMS_CONFIG")
        .env("RUST_LOG", "error")
        .arg("--snapshot")
        .arg(snapshot);
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn auto_then_tree_then_ungroup() {
    let dir = tempdir().unwrap();
    let snapshot = dir.path().join("events.json");
    seed(&snapshot);

    let out = stdout_of(ctl(&snapshot).arg("auto").arg("--dry-run"));
    assert!(out.contains("mother e1 <- e2"));
    assert!(out.contains("dry run: nothing written"));

    let out = stdout_of(ctl(&snapshot).arg("auto"));
    assert!(out.contains("1 groups, 1 children, 2 updates"));

    let out = stdout_of(ctl(&snapshot).arg("tree"));
    assert!(out.contains("[-] e1"));
    assert!(out.contains("`- e2"));
    assert!(out.contains("2 roots, 3 events"));

    let out = stdout_of(ctl(&snapshot).arg("tree").arg("--collapsed"));
    assert!(out.contains("[+] e1"));
    assert!(!out.contains("`- e2"));

    stdout_of(ctl(&snapshot).arg("check"));

    let out = stdout_of(ctl(&snapshot).arg("ungroup").arg("e1"));
    assert!(out.contains("ungrouped e1 (1 children cleared)"));
}

#[test]
fn manual_grouping_marks_rows() {
    let dir = tempdir().unwrap();
    let snapshot = dir.path().join("events.json");
    seed(&snapshot);

    stdout_of(ctl(&snapshot).args(["manual", "e3", "e1"]));
    let out = stdout_of(ctl(&snapshot).arg("tree"));
    assert!(out.contains("[-] e1"));
    assert!(out.contains("`- e3"));
    assert!(out.contains("manual"));
}

#[test]
fn unknown_mother_fails() {
    let dir = tempdir().unwrap();
    let snapshot = dir.path().join("events.json");
    seed(&snapshot);

    ctl(&snapshot).args(["ungroup", "e2"]).assert().failure();
}

#[test]
fn missing_snapshot_fails() {
    let dir = tempdir().unwrap();
    ctl(&dir.path().join("absent.json")).arg("tree").assert().failure();
}
