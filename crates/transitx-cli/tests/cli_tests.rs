#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end runs of the `transitx` binary against a scratch data directory

use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn transitx(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_transitx"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .output()
        .expect("Failed to execute CLI")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "CLI command should succeed. Stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

fn write_feed(dir: &TempDir) -> String {
    let path = dir.path().join("bart.json");
    fs::write(
        &path,
        r#"{
            "routes": [ { "id": "RED", "agencyId": "BART", "routeType": 1 } ],
            "stops": [ { "id": "EMBR", "name": "Embarcadero", "lat": 37.79, "lon": -122.39 } ]
        }"#,
    )
    .unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn test_import_snapshot_list_restore() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    let feed = write_feed(&dir);

    let status = stdout_json(&transitx(
        &data,
        &["dataset", "import", "--dataset", "BART", "--file", &feed],
    ));
    assert_eq!(status["completed"], true);
    assert_eq!(status["error"], false);
    assert_eq!(status["completedName"], "BART:1");

    let status = stdout_json(&transitx(
        &data,
        &["snapshot", "create", "--dataset", "BART", "--name", "initial", "--promote"],
    ));
    assert_eq!(status["message"], "Created snapshot!");

    let list = stdout_json(&transitx(&data, &["snapshot", "list", "--dataset", "BART"]));
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["current"], true);

    let status = stdout_json(&transitx(
        &data,
        &["snapshot", "restore", "--dataset", "BART", "--version", "1"],
    ));
    assert_eq!(status["completedName"], "BART:2");

    let versions = stdout_json(&transitx(&data, &["dataset", "versions", "--dataset", "BART"]));
    assert_eq!(versions["head"], 2);
    assert_eq!(versions["versions"], serde_json::json!([1, 2]));
}

#[test]
fn test_failed_job_exits_non_zero() {
    let dir = TempDir::new().unwrap();
    let output = transitx(
        &dir.path().join("data"),
        &["snapshot", "create", "--dataset", "NOPE", "--name", "x"],
    );

    assert!(!output.status.success());
    let status: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["error"], true);
    assert_eq!(status["exceptionType"], "ERR_NOT_FOUND");
    assert!(String::from_utf8_lossy(&output.stderr).contains("ERR_JOB_EXECUTION"));
}

#[test]
fn test_bad_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("transitx.toml");
    fs::write(&config, "executor = { bounded = { workers = 0 } }").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_transitx"))
        .arg("--config")
        .arg(&config)
        .args(["dataset", "versions", "--dataset", "BART"])
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ERR_INVALID_INPUT"));
}
