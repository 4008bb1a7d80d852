use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

fn snapbridge(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("snapbridge").expect("binary built");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_CACHE_HOME", home.join("cache"))
        .env("SNAPBRIDGE_STORAGE__PATH", home.join("state.db"))
        .env("SNAPBRIDGE_LOG__FILE", "");
    cmd
}

#[test]
fn version_and_help_exit_before_touching_state() {
    let home = tempdir().unwrap();

    snapbridge(home.path())
        .arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::starts_with(format!(
            "SnapBridge {}",
            env!("CARGO_PKG_VERSION")
        )));

    snapbridge(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--export [DIR]")
                .and(predicate::str::contains("--version, -V")),
        );

    assert!(!home.path().join("state.db").exists());
}

#[test]
fn export_writes_sample_feed_on_first_run() {
    let home = tempdir().unwrap();
    let out = tempdir().unwrap();

    snapbridge(home.path())
        .arg("--export")
        .arg(out.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("snapbridge_feed.json"));

    let body = std::fs::read_to_string(out.path().join("snapbridge_feed.json")).unwrap();
    let posts: Value = serde_json::from_str(&body).unwrap();
    let posts = posts.as_array().expect("array of posts");
    assert_eq!(posts.len(), 3);
    for post in posts {
        assert!(post["src"].as_str().unwrap().starts_with("https://"));
        assert_eq!(post["persistent"], Value::Bool(true));
    }
}

#[test]
fn export_uses_configured_directory() {
    let home = tempdir().unwrap();
    let out = tempdir().unwrap();

    snapbridge(home.path())
        .env("SNAPBRIDGE_EXPORT__DIR", out.path())
        .arg("--export")
        .assert()
        .success();

    assert!(out.path().join("snapbridge_feed.json").is_file());
}

#[test]
fn export_fails_when_target_is_a_file() {
    let home = tempdir().unwrap();
    let blocker = home.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();

    snapbridge(home.path())
        .arg("--export")
        .arg(&blocker)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Export failed"));
}
