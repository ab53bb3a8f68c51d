use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use harbor_core::config;

fn harbor_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("harbor"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

fn add_app(home: &Path, args: &[&str]) -> std::process::Output {
    harbor_cmd(home)
        .args(["apps", "add"])
        .args(args)
        .output()
        .expect("run apps add")
}

#[test]
fn add_then_list_json_applies_defaults() {
    let home = TempDir::new().expect("home");

    let output = add_app(home.path(), &["shop", "acme/mono/apps/shop", "--route", "/shop"]);
    assert!(
        output.status.success(),
        "apps add failed: {}",
        String::from_utf8_lossy(&output.stderr),
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Added 'shop'"));

    add_app(
        home.path(),
        &["blog", "acme/blog", "-r", "/blog", "-r", "/news", "--branch", "dev", "--port", "4100"],
    );

    let output = harbor_cmd(home.path())
        .args(["apps", "list", "--json"])
        .output()
        .expect("run apps list");
    assert!(output.status.success());

    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    let rows = rows.as_array().expect("array");
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0]["id"], "shop");
    assert_eq!(rows[0]["repo"], "acme/mono/apps/shop");
    assert_eq!(rows[0]["branch"], "main");
    assert_eq!(rows[0]["port"], 3000);
    assert!(rows[0]["folder"]
        .as_str()
        .expect("folder")
        .ends_with(".harbor/apps/shop"));

    assert_eq!(rows[1]["branch"], "dev");
    assert_eq!(rows[1]["port"], 4100);
    assert_eq!(rows[1]["routes"], serde_json::json!(["/blog", "/news"]));

    let saved = config::load_at(home.path()).expect("config written");
    assert_eq!(saved.apps.len(), 2);
}

#[test]
fn add_rejects_duplicate_id_and_leaves_config_untouched() {
    let home = TempDir::new().expect("home");
    assert!(add_app(home.path(), &["shop", "acme/shop", "--route", "/shop"])
        .status
        .success());
    let before = fs::read_to_string(config::config_path_at(home.path())).expect("config");

    harbor_cmd(home.path())
        .args(["apps", "add", "shop", "acme/other", "--route", "/other"])
        .assert()
        .failure()
        .stderr(contains("already registered"));

    let after = fs::read_to_string(config::config_path_at(home.path())).expect("config");
    assert_eq!(before, after);
}

#[test]
fn add_rejects_malformed_repo() {
    let home = TempDir::new().expect("home");

    harbor_cmd(home.path())
        .args(["apps", "add", "shop", "just-a-name", "--route", "/shop"])
        .assert()
        .failure()
        .stderr(contains("repo"));

    assert!(!config::config_path_at(home.path()).exists());
}

#[test]
fn add_requires_a_route() {
    let home = TempDir::new().expect("home");

    harbor_cmd(home.path())
        .args(["apps", "add", "shop", "acme/shop"])
        .assert()
        .failure()
        .stderr(contains("--route"));
}

#[test]
fn list_without_config_prints_hint() {
    let home = TempDir::new().expect("home");

    harbor_cmd(home.path())
        .args(["apps", "list"])
        .assert()
        .success()
        .stdout(contains("No apps configured"));
}

#[test]
fn check_reports_invalid_apps() {
    let home = TempDir::new().expect("home");
    let config_path = config::config_path_at(home.path());
    fs::create_dir_all(config_path.parent().expect("parent")).expect("mkdir");
    fs::write(
        &config_path,
        "apps:\n  - id: good\n    repo: acme/good\n    route: /good\n  - id: bad\n    repo: acme/bad\n",
    )
    .expect("write config");

    harbor_cmd(home.path())
        .args(["apps", "check"])
        .assert()
        .failure()
        .stdout(contains("good"))
        .stdout(contains("bad: invalid app registration: route"))
        .stderr(contains("1 of 2 apps are invalid"));
}

#[test]
fn check_passes_for_valid_config() {
    let home = TempDir::new().expect("home");
    assert!(add_app(home.path(), &["shop", "acme/shop", "--route", "/shop"])
        .status
        .success());

    harbor_cmd(home.path())
        .args(["apps", "check"])
        .assert()
        .success()
        .stdout(contains("1 apps valid"));
}

#[test]
fn app_commands_need_a_running_daemon() {
    let home = TempDir::new().expect("home");

    for cmd in ["version", "update", "start", "stop", "restart"] {
        harbor_cmd(home.path())
            .args(["app", cmd, "shop"])
            .assert()
            .failure()
            .stderr(contains("daemon is not running"));
    }
}

#[test]
fn daemon_status_reports_not_running() {
    let home = TempDir::new().expect("home");

    let output = harbor_cmd(home.path())
        .args(["daemon", "status"])
        .output()
        .expect("run daemon status");
    assert!(output.status.success());

    let status: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(status["running"], false);
}

#[test]
fn notify_rejects_malformed_payload() {
    let home = TempDir::new().expect("home");
    let payload = home.path().join("push.json");
    fs::write(&payload, r#"{"ref": "refs/heads/main"}"#).expect("write payload");

    harbor_cmd(home.path())
        .arg("notify")
        .arg(&payload)
        .assert()
        .failure()
        .stderr(contains("not a push notification"));
}

#[test]
fn app_logs_prints_tail_of_process_log() {
    let home = TempDir::new().expect("home");
    assert!(add_app(home.path(), &["shop", "acme/shop", "--route", "/shop"])
        .status
        .success());

    let log = config::logs_dir(home.path()).join("shop-3000.log");
    fs::create_dir_all(log.parent().expect("parent")).expect("mkdir logs");
    let lines: Vec<String> = (1..=10).map(|n| format!("line {n}")).collect();
    fs::write(&log, lines.join("\n")).expect("write log");

    let output = harbor_cmd(home.path())
        .args(["app", "logs", "shop", "--lines", "3"])
        .output()
        .expect("run app logs");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("line 8"));
    assert!(stdout.contains("line 10"));
    assert!(!stdout.contains("line 7"));
}

#[test]
fn app_logs_rejects_unknown_app() {
    let home = TempDir::new().expect("home");

    harbor_cmd(home.path())
        .args(["app", "logs", "ghost"])
        .assert()
        .failure()
        .stderr(contains("no app registered with id 'ghost'"));
}
