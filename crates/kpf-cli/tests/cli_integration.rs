//! CLI integration tests
//!
//! Tests the kpf binary using assert_cmd. Nothing here reaches a cluster.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn kpf() -> Command {
    Command::cargo_bin("kpf")
        .expect("Failed to locate kpf binary - ensure it's built before running tests")
}

#[test]
fn test_cli_help() {
    kpf()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("kpf"))
        .stdout(predicate::str::contains("Kubernetes port forwarding TUI"))
        .stdout(predicate::str::contains("--kubeconfig"))
        .stdout(predicate::str::contains("--namespace"));
}

#[test]
fn test_cli_version() {
    kpf()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("kpf"));
}

#[test]
fn test_cli_unknown_flag() {
    kpf()
        .arg("--no-such-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--no-such-flag"));
}

#[test]
fn test_cli_missing_config_file() {
    kpf()
        .args(["--config", "/nonexistent/kpf/config.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_cli_invalid_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "page_size = \"many\"").unwrap();

    kpf()
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
