//! Domain types for Harbor apps and their configuration.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Everything here is plain data: serializable via serde + serde_yaml, no I/O.

use std::borrow::Borrow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Branch used when neither the app spec nor the config names one.
pub const DEFAULT_BRANCH: &str = "main";

/// Port used when neither the app spec nor the config names one.
pub const DEFAULT_PORT: u16 = 3000;

/// Manifest file read from both the remote repo and the local checkout.
pub const DEFAULT_MANIFEST_FILE: &str = "package.json";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed, caller-assigned app identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub String);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AppId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Borrow<str> for AppId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AppId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Repository identifier
// ---------------------------------------------------------------------------

/// `owner/name[/sub/path]`, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSpec {
    pub owner: String,
    pub name: String,
    /// Remainder after the first two segments; empty for a repo-root app.
    pub sub_path: String,
}

impl RepoSpec {
    /// `owner/name`, the key notifications are matched on.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = s.trim().split('/').filter(|seg| !seg.is_empty());
        let owner = segments.next();
        let name = segments.next();
        match (owner, name) {
            (Some(owner), Some(name)) => Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
                sub_path: segments.collect::<Vec<_>>().join("/"),
            }),
            _ => Err(format!(
                "'{s}' is not a repository identifier; expected owner/name[/sub/path]"
            )),
        }
    }
}

impl fmt::Display for RepoSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)?;
        if !self.sub_path.is_empty() {
            write!(f, "/{}", self.sub_path)?;
        }
        Ok(())
    }
}

/// Everything a source client needs to locate an app's code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub repo: RepoSpec,
    pub branch: String,
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.branch)
    }
}

// ---------------------------------------------------------------------------
// Registration input
// ---------------------------------------------------------------------------

/// A route as written in config: either one string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteSpec {
    One(String),
    Many(Vec<String>),
}

impl Default for RouteSpec {
    fn default() -> Self {
        RouteSpec::Many(vec![])
    }
}

impl RouteSpec {
    /// Non-empty routes, in declaration order. Routes are otherwise opaque.
    pub fn routes(&self) -> Vec<String> {
        let all = match self {
            RouteSpec::One(route) => vec![route.clone()],
            RouteSpec::Many(routes) => routes.clone(),
        };
        all.into_iter().filter(|r| !r.trim().is_empty()).collect()
    }
}

impl From<&str> for RouteSpec {
    fn from(s: &str) -> Self {
        RouteSpec::One(s.to_owned())
    }
}

impl From<Vec<String>> for RouteSpec {
    fn from(v: Vec<String>) -> Self {
        RouteSpec::Many(v)
    }
}

/// Registration input for one app, as found under `apps:` in `config.yaml`.
///
/// Required fields default to empty so that a missing field reaches
/// validation and is reported by name rather than as a YAML error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub route: RouteSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Root under which `<id>/` is materialized. Overrides the configured root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_folder: Option<PathBuf>,
}

impl AppSpec {
    pub fn new(id: impl Into<String>, repo: impl Into<String>, route: impl Into<RouteSpec>) -> Self {
        Self {
            id: id.into(),
            repo: repo.into(),
            route: route.into(),
            ..Self::default()
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_target_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.target_folder = Some(folder.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Registry defaults
// ---------------------------------------------------------------------------

/// Defaults applied at registration time. Passed into the registry at
/// construction; nothing reads these from ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub default_branch: String,
    pub default_port: u16,
    /// Root for materialized apps; each app lives in `<target_folder>/<id>`.
    pub target_folder: PathBuf,
    pub manifest_file: String,
}

impl RegistryConfig {
    /// Defaults rooted at `<home>/.harbor/apps`.
    pub fn with_home(home: &Path) -> Self {
        Self {
            default_branch: DEFAULT_BRANCH.to_string(),
            default_port: DEFAULT_PORT,
            target_folder: crate::config::apps_root(home),
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// The slice of a package manifest Harbor cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Manifest {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            name: None,
        }
    }

    /// Parse a `package.json`-style document; unknown fields are ignored.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
