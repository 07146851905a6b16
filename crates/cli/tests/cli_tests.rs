//! CLI integration tests

use std::process::{Command, Output};

fn kubetop(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kubetop"))
        .args(args)
        .env_remove("KUBETOP_INTERVAL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = kubetop(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Live CPU and memory usage"),
        "Should show description"
    );
    for flag in [
        "--interval",
        "--namespace",
        "--node",
        "--pod",
        "--container",
        "--sortby-cpu",
        "--sortby-cpu-utilization",
        "--sortby-mem",
        "--sortby-mem-utilization",
        "--sortby-pod-name",
        "--kubeconfig",
        "--format",
    ] {
        assert!(stdout.contains(flag), "Should show {} option", flag);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = kubetop(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("kubetop"), "Should show binary name");
}

/// Test that an invalid interval is rejected before contacting a cluster
#[test]
fn test_invalid_interval() {
    let output = kubetop(&["--interval", "soon"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Invalid interval should fail");
    assert!(stderr.contains("invalid duration"), "Should explain the error");
}

/// Test that a zero interval is rejected
#[test]
fn test_zero_interval() {
    let output = kubetop(&["--interval", "0s"]);

    assert!(!output.status.success(), "Zero interval should fail");
}

/// Test that an unknown output format is rejected
#[test]
fn test_invalid_format() {
    let output = kubetop(&["--format", "yaml"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Unknown format should fail");
    assert!(stderr.contains("table"), "Should list valid formats");
}
