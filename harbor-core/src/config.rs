//! `config.yaml` persistence.
//!
//! # Storage layout
//!
//! ```text
//! ~/.harbor/
//!   config.yaml     (mode 0600; defaults, adapters, peers, apps)
//!   apps/<id>/      (materialized app code, owned by the source client)
//! ```
//!
//! # API pattern
//!
//! Every function that touches disk takes `home` explicitly (`fn_at(home, …)`);
//! callers resolve it once, tests pass a `TempDir`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{AppSpec, RegistryConfig, DEFAULT_BRANCH, DEFAULT_MANIFEST_FILE, DEFAULT_PORT};

// ---------------------------------------------------------------------------
// 1. Schema
// ---------------------------------------------------------------------------

/// Root of `config.yaml`. Every section is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HarborConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub install: InstallConfig,
    /// Control sockets of peer daemons that receive fan-out events.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<PathBuf>,
    #[serde(default)]
    pub apps: Vec<AppSpec>,
}

/// Registration defaults as written in YAML; resolved against `home` by
/// [`DefaultsConfig::registry_config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DefaultsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_folder: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_file: Option<String>,
}

impl DefaultsConfig {
    pub fn registry_config(&self, home: &Path) -> RegistryConfig {
        RegistryConfig {
            default_branch: self
                .default_branch
                .clone()
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            default_port: self.default_port.unwrap_or(DEFAULT_PORT),
            target_folder: self
                .target_folder
                .clone()
                .unwrap_or_else(|| apps_root(home)),
            manifest_file: self
                .manifest_file
                .clone()
                .unwrap_or_else(|| DEFAULT_MANIFEST_FILE.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Github,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    /// Sent as a bearer token on manifest fetches and embedded in clone URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Base for raw file fetches: `{api_base}/{owner}/{name}/{branch}/{path}`.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Base for clones: `{clone_base}/{owner}/{name}.git`.
    #[serde(default = "default_clone_base")]
    pub clone_base: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            token: None,
            api_base: default_api_base(),
            clone_base: default_clone_base(),
        }
    }
}

fn default_api_base() -> String {
    "https://raw.githubusercontent.com".to_string()
}

fn default_clone_base() -> String {
    "https://github.com".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorKind {
    /// Children spawned and tracked by the daemon itself.
    #[default]
    Local,
    /// Delegate to an installed `pm2`.
    Pm2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub kind: SupervisorKind,
    /// Program and leading arguments; `--port <port>` is appended per app.
    #[serde(default = "default_start_command")]
    pub start_command: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            kind: SupervisorKind::default(),
            start_command: default_start_command(),
        }
    }
}

fn default_start_command() -> Vec<String> {
    ["npm", "start", "--"].iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_install_command")]
    pub command: Vec<String>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_install_command(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_install_command() -> Vec<String> {
    ["npm", "install", "--production"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.harbor/`
pub fn harbor_root(home: &Path) -> PathBuf {
    home.join(".harbor")
}

/// `<home>/.harbor/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    harbor_root(home).join("config.yaml")
}

/// `<home>/.harbor/apps/`: default root for materialized apps.
pub fn apps_root(home: &Path) -> PathBuf {
    harbor_root(home).join("apps")
}

/// `<home>/.harbor/logs/`: output of locally supervised apps.
pub fn logs_dir(home: &Path) -> PathBuf {
    harbor_root(home).join("logs")
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load `<home>/.harbor/config.yaml`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<HarborConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// Like [`load_at`], but a missing file yields the default config.
pub fn load_or_default_at(home: &Path) -> Result<HarborConfig, ConfigError> {
    match load_at(home) {
        Err(ConfigError::NotFound { .. }) => Ok(HarborConfig::default()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `config` to `<home>/.harbor/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &HarborConfig) -> Result<(), ConfigError> {
    let root = harbor_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root)?;
        set_dir_permissions(&root)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// 5. Add app
// ---------------------------------------------------------------------------

/// Append `spec` to the `apps:` list, creating the config file if needed.
///
/// Only the id is checked here; full validation happens when a registry is
/// built from the config.
pub fn add_app_at(home: &Path, spec: AppSpec) -> Result<HarborConfig, ConfigError> {
    let mut config = load_or_default_at(home)?;
    if config.apps.iter().any(|existing| existing.id == spec.id) {
        return Err(ConfigError::DuplicateApp { id: spec.id });
    }
    config.apps.push(spec);
    save_at(home, &config)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_home() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    #[test]
    fn config_path_is_correct() {
        let home = make_home();
        assert!(config_path_at(home.path()).ends_with(".harbor/config.yaml"));
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config: HarborConfig = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(config, HarborConfig::default());
        assert!(config.install.enabled);
        assert_eq!(config.supervisor.kind, SupervisorKind::Local);
        assert_eq!(config.supervisor.start_command, vec!["npm", "start", "--"]);
    }

    #[test]
    fn defaults_resolve_against_home() {
        let home = make_home();
        let defaults = DefaultsConfig {
            default_port: Some(8080),
            ..DefaultsConfig::default()
        };
        let resolved = defaults.registry_config(home.path());
        assert_eq!(resolved.default_port, 8080);
        assert_eq!(resolved.default_branch, "main");
        assert_eq!(resolved.target_folder, apps_root(home.path()));
        assert_eq!(resolved.manifest_file, "package.json");
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = make_home();
        let mut config = HarborConfig::default();
        config.peers.push(PathBuf::from("/run/harbor-b.sock"));
        config
            .apps
            .push(AppSpec::new("svc-a", "acme/svc-a", "/svc-a").with_port(4100));
        save_at(home.path(), &config).expect("save");

        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = make_home();
        save_at(home.path(), &HarborConfig::default()).expect("save");
        let tmp = config_path_at(home.path()).with_file_name("config.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn load_missing_config_returns_not_found() {
        let home = make_home();
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
        assert!(load_or_default_at(home.path()).is_ok());
    }

    #[test]
    fn add_app_rejects_duplicate_id() {
        let home = make_home();
        add_app_at(home.path(), AppSpec::new("svc-a", "acme/svc-a", "/a")).expect("first");
        let err = add_app_at(home.path(), AppSpec::new("svc-a", "acme/other", "/b")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateApp { ref id } if id == "svc-a"));
    }
}
