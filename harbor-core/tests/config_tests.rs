//! Config error-message, atomic-write-safety, and add-app integration tests.
//! Storage: ~/.harbor/config.yaml

use assert_fs::prelude::*;
use harbor_core::{
    config::{self, HarborConfig},
    AppSpec, ConfigError,
};
use predicates::prelude::predicate;
use std::fs;

fn svc_a() -> AppSpec {
    AppSpec::new("svc-a", "acme/svc-a", "/svc-a")
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config not found"));
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".harbor");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"), "must contain file path, got: {err}");
}

#[test]
fn load_wrong_type_yaml_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".harbor");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), b"- this is a list, not a mapping\n").expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn app_missing_fields_still_parses_for_validation() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".harbor/config.yaml")
        .write_str("apps:\n  - repo: acme/svc-a\n    route: /svc-a\n")
        .expect("write");

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.apps.len(), 1);
    assert!(loaded.apps[0].id.is_empty(), "missing id is left for the registry to reject");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn mid_write_crash_leaves_original_intact() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::add_app_at(home.path(), svc_a()).expect("add");

    let path = config::config_path_at(home.path());
    let original_bytes = fs::read(&path).expect("read original");

    // Simulate crash: .tmp written but process died before rename
    let tmp = path.with_file_name("config.yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    let current_bytes = fs::read(&path).expect("read after crash");
    assert_eq!(original_bytes, current_bytes, "original must be unchanged after crash");
    assert!(config::load_at(home.path()).is_ok());
}

#[test]
fn save_writes_mode_0600() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &HarborConfig::default()).expect("save");

    home.child(".harbor/config.yaml").assert(predicate::path::exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = config::config_path_at(home.path());
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "expected 0600, got {mode:o}");
    }
}

// ---------------------------------------------------------------------------
// 3. Add app
// ---------------------------------------------------------------------------

#[test]
fn add_app_creates_config_when_absent() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let config = config::add_app_at(home.path(), svc_a()).expect("add");
    assert_eq!(config.apps.len(), 1);

    home.child(".harbor/config.yaml").assert(predicate::str::contains("svc-a"));
}

#[test]
fn add_app_preserves_existing_sections_and_order() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".harbor/config.yaml")
        .write_str("supervisor:\n  kind: pm2\npeers:\n  - /run/peer.sock\napps: []\n")
        .expect("write");

    config::add_app_at(home.path(), svc_a()).expect("add a");
    config::add_app_at(home.path(), AppSpec::new("svc-b", "acme/svc-b", "/svc-b")).expect("add b");

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.supervisor.kind, config::SupervisorKind::Pm2);
    assert_eq!(loaded.peers.len(), 1);
    let ids: Vec<_> = loaded.apps.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["svc-a", "svc-b"]);
}

#[test]
fn add_app_duplicate_id_errors_and_leaves_file_unchanged() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::add_app_at(home.path(), svc_a()).expect("add");
    let before = fs::read(config::config_path_at(home.path())).expect("read");

    let err = config::add_app_at(home.path(), svc_a()).unwrap_err();
    assert!(err.to_string().contains("already present"));

    let after = fs::read(config::config_path_at(home.path())).expect("read");
    assert_eq!(before, after);
}
