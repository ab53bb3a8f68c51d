//! Harbor core library: domain types, config persistence, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes, registration input and manifest types
//! - [`error`]: [`ConfigError`]
//! - [`config`]: `config.yaml` schema, load / save / add app

pub mod config;
pub mod error;
pub mod types;

pub use config::HarborConfig;
pub use error::ConfigError;
pub use types::{
    AppId, AppSpec, Manifest, RegistryConfig, RepoSpec, RouteSpec, SourceRef, DEFAULT_BRANCH,
    DEFAULT_MANIFEST_FILE, DEFAULT_PORT,
};
