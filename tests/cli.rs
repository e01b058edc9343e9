//! Command-line surface.

use assert_cmd::Command;
use execute_sync::SyncConfig;
use predicates::prelude::*;
use tempfile::TempDir;

fn cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("execute-sync").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("EXECUTESYNC_EXECUTE_URL")
        .env_remove("EXECUTESYNC_EXECUTE_APIKEY_ID")
        .env_remove("EXECUTESYNC_EXECUTE_APIKEY_SECRET")
        .env_remove("RUST_LOG")
        .env("EXECUTESYNC_LOG_LEVEL", "quiet");
    cmd
}

#[test]
fn help_lists_commands() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("push"))
        .stdout(predicate::str::contains("create-views"))
        .stdout(predicate::str::contains("clone"));
}

#[test]
fn version_prints_crate_version() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(execute_sync::VERSION));
}

#[test]
fn init_writes_loadable_config() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .args(["init", "--output", "sample.toml"])
        .assert()
        .success();

    let config = SyncConfig::from_file(dir.path().join("sample.toml")).unwrap();
    assert_eq!(config.upstream.max_documents, 1000);
    assert_eq!(config.sync.chunk_size, 10000);
}

#[test]
fn config_command_hides_secrets() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .arg("config")
        .env("EXECUTESYNC_EXECUTE_URL", "https://execute.example.com/")
        .env("EXECUTESYNC_EXECUTE_APIKEY_ID", "key-id")
        .env("EXECUTESYNC_EXECUTE_APIKEY_SECRET", "super-secret")
        .assert()
        .success()
        .stdout(predicate::str::contains("https://execute.example.com/"))
        .stdout(predicate::str::contains("super-secret").not());
}

#[test]
fn missing_configuration_fails() {
    let dir = TempDir::new().unwrap();
    cmd(&dir).arg("push").assert().failure();
}

#[test]
fn push_fails_when_upstream_is_unreachable() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .arg("push")
        .env("EXECUTESYNC_EXECUTE_URL", "http://127.0.0.1:9/")
        .env("EXECUTESYNC_EXECUTE_APIKEY_ID", "key-id")
        .env("EXECUTESYNC_EXECUTE_APIKEY_SECRET", "key-secret")
        .env("EXECUTESYNC_DATABASE_DSN", ":memory:")
        .assert()
        .failure();
}

#[test]
fn logging_section_of_config_file_is_applied() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("execute-sync.toml"),
        r#"
[upstream]
url = "https://execute.example.com/"
key_id = "key-id"
key_secret = "key-secret"

[logging]
level = "info"
file = "sync.log"
"#,
    )
    .unwrap();

    cmd(&dir)
        .env_remove("EXECUTESYNC_LOG_LEVEL")
        .env_remove("EXECUTESYNC_LOG_FILE")
        .arg("config")
        .assert()
        .success();

    let log = std::fs::read_to_string(dir.path().join("sync.log")).unwrap();
    assert!(log.contains("Loaded config from execute-sync.toml"));
}

#[test]
fn log_level_flag_overrides_config_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("execute-sync.toml"),
        r#"
[upstream]
url = "https://execute.example.com/"
key_id = "key-id"
key_secret = "key-secret"

[logging]
level = "info"
file = "sync.log"
"#,
    )
    .unwrap();

    cmd(&dir)
        .args(["--log-level", "quiet", "config"])
        .assert()
        .success();

    let log = std::fs::read_to_string(dir.path().join("sync.log")).unwrap_or_default();
    assert!(!log.contains("Loaded config from"));
}
