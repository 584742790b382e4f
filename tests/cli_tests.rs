//! Integration tests for the offline CLI commands
//!
//! Each test points the binary at its own configuration directory.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const ACCESS_KEY: &str = "ss://Y2hhY2hhMjAtaWV0Zi1wb2x5MTMwNTpzZWNyZXQ@203.0.113.7:8388#Office";

fn outlinetv(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_outlinetv"))
        .args(args)
        .env("OUTLINETV_CONFIG_DIR", config_dir)
        .env("NO_COLOR", "1")
        .env_remove("JOURNAL_STREAM")
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_saved_server_shows_in_status() {
    let config_dir = TempDir::new().unwrap();

    let saved = outlinetv(config_dir.path(), &["save-server", ACCESS_KEY]);
    assert!(saved.status.success(), "save-server failed: {:?}", saved);
    assert!(config_dir.path().join("preferences.toml").exists());

    let status = outlinetv(config_dir.path(), &["status"]);
    assert!(status.status.success());
    let text = stdout(&status);
    assert!(text.contains("Office"), "Should show saved server: {}", text);
    assert!(text.contains("down"), "Tunnel should be down: {}", text);
}

#[test]
fn test_save_server_with_custom_name() {
    let config_dir = TempDir::new().unwrap();

    let saved = outlinetv(
        config_dir.path(),
        &["save-server", ACCESS_KEY, "--name", "Lisbon"],
    );
    assert!(saved.status.success());

    let text = stdout(&outlinetv(config_dir.path(), &["status"]));
    assert!(text.contains("Lisbon"));
}

#[test]
fn test_forget_clears_saved_server() {
    let config_dir = TempDir::new().unwrap();
    outlinetv(config_dir.path(), &["save-server", ACCESS_KEY]);

    let forgot = outlinetv(config_dir.path(), &["forget", "--yes"]);
    assert!(forgot.status.success());

    let text = stdout(&outlinetv(config_dir.path(), &["status"]));
    assert!(!text.contains("Office"));
    assert!(text.contains("none"));
}

#[test]
fn test_invalid_access_key_is_a_usage_error() {
    let config_dir = TempDir::new().unwrap();

    let saved = outlinetv(config_dir.path(), &["save-server", "https://example.com"]);
    assert_eq!(saved.status.code(), Some(2));

    let connected = outlinetv(config_dir.path(), &["connect", "not-a-key"]);
    assert_eq!(connected.status.code(), Some(2));
}

#[test]
fn test_invalid_config_exits_with_config_error() {
    let config_dir = TempDir::new().unwrap();
    std::fs::write(
        config_dir.path().join("config.toml"),
        "[update]\nreleases_url = \"ftp://example.com\"\n",
    )
    .unwrap();

    let output = outlinetv(config_dir.path(), &["update", "--check-only"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_connect_without_terminal_fails_permission() {
    let config_dir = TempDir::new().unwrap();

    // Command::output() leaves stdin detached from any terminal
    let output = outlinetv(config_dir.path(), &["connect", ACCESS_KEY]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Failed to launch permission prompt"),
        "Should explain the missing prompt: {}",
        stderr
    );
}
