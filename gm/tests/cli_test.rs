//! Tests for the `gm` binary
//!
//! Every command runs against a temporary store, with config and log
//! directories redirected into the same temp dir.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn gm(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("gm").expect("gm binary");
    cmd.current_dir(temp_dir.path())
        .env("XDG_DATA_HOME", temp_dir.path().join("data"))
        .env("XDG_CONFIG_HOME", temp_dir.path().join("config"))
        .env("HOME", temp_dir.path())
        .env_remove("GOOGLE_API_KEY")
        .env_remove("VITE_GEMINI_API_KEY")
        .env_remove("RUST_LOG")
        .arg("--store")
        .arg(temp_dir.path().join("store"));
    cmd
}

fn created_id(output: &[u8]) -> String {
    let value: serde_json::Value = serde_json::from_slice(output).expect("JSON output");
    value["id"].as_str().expect("id field").to_string()
}

#[test]
fn test_conversation_create_list_show_delete() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let output = gm(&temp_dir)
        .args(["conversation", "create", "--user", "alice", "--title", "Marathon"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"user_id\": \"alice\""))
        .get_output()
        .stdout
        .clone();
    let id = created_id(&output);
    assert!(id.starts_with("conv-"));

    gm(&temp_dir)
        .args(["conversation", "list", "--user", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()));

    gm(&temp_dir)
        .args(["conversation", "show", "--user", "alice", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"messages\": []"));

    gm(&temp_dir)
        .args(["conversation", "delete", "--user", "alice", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"));

    gm(&temp_dir)
        .args(["conversation", "list", "--user", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()).not());
}

#[test]
fn test_other_users_conversation_is_forbidden() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output = gm(&temp_dir)
        .args(["conversation", "create", "--user", "alice"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let id = created_id(&output);

    gm(&temp_dir)
        .args(["conversation", "show", "--user", "bob", &id])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"code\": \"forbidden\""));

    gm(&temp_dir)
        .args(["conversation", "show", "--user", "alice", "conv-missing"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"code\": \"not_found\""));
}

#[test]
fn test_read_commands_need_no_api_key() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    gm(&temp_dir)
        .args(["roadmap", "list", "--user", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));

    gm(&temp_dir)
        .args(["checkin", "reject", "--user", "alice", "ci-missing"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("not_found"));
}

#[test]
fn test_model_commands_require_api_key() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    gm(&temp_dir)
        .args(["chat", "Hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GOOGLE_API_KEY"));
}

#[test]
fn test_bad_update_is_a_usage_error() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    gm(&temp_dir)
        .args(["checkin", "confirm", "--user", "alice", "ci-1", "--update", "n1:lots"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad delta"));
}
