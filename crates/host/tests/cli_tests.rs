//! End-to-end runs of the `inference-host` binary against the local backend.

use std::path::Path;
use std::process::{Command, Output};

fn run(state: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_inference-host"))
        .env_clear()
        .args(["--backend", "local", "--state-file"])
        .arg(state)
        .args(args)
        .args([
            "--name",
            "demo-host",
            "--ssh-key",
            "operator",
            "--allowed-cidr",
            "203.0.113.5/32",
            "--model",
            "demo:1b",
        ])
        .output()
        .unwrap()
}

#[test]
fn test_render_script() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&dir.path().join("state.json"), &["render", "--target", "script"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let script = String::from_utf8(output.stdout).unwrap();
    assert!(script.starts_with("#!/usr/bin/env bash"));
    assert!(script.contains("ollama pull 'demo:1b'"));
}

#[test]
fn test_apply_then_plan_is_converged() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");

    let applied = run(&state, &["apply", "--yes"]);
    assert!(applied.status.success(), "{}", String::from_utf8_lossy(&applied.stderr));
    assert!(state.exists());

    let planned = run(&state, &["plan", "--json"]);
    assert!(planned.status.success(), "{}", String::from_utf8_lossy(&planned.stderr));
    let changes: serde_json::Value = serde_json::from_slice(&planned.stdout).unwrap();
    assert_eq!(changes["operations"], serde_json::json!([]));
}

#[test]
fn test_invalid_cidr_fails_before_backend() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");

    let output = Command::new(env!("CARGO_BIN_EXE_inference-host"))
        .env_clear()
        .args(["--backend", "local", "--state-file"])
        .arg(&state)
        .args(["plan", "--ssh-key", "operator", "--allowed-cidr", "203.0.113.5"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("allowed_cidr"));
    assert!(!state.exists());
}
