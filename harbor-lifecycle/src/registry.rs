//! In-memory app registry.
//!
//! Apps are validated on registration and then held for the registry's
//! lifetime. There is no deregistration: the set only grows.

use std::collections::HashMap;
use std::sync::Arc;

use harbor_core::{AppId, AppSpec, RegistryConfig, RepoSpec, SourceRef};

use crate::app::App;
use crate::error::RegistryError;

/// Registered apps in insertion order, indexed by id.
#[derive(Debug)]
pub struct AppRegistry {
    config: RegistryConfig,
    apps: Vec<Arc<App>>,
    index: HashMap<AppId, usize>,
}

impl AppRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            apps: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a registry from specs, failing on the first invalid one.
    pub fn from_specs(
        config: RegistryConfig,
        specs: impl IntoIterator<Item = AppSpec>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new(config);
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Validate `spec`, apply defaults and add the app.
    ///
    /// Checks, in order: `id`, `repo`, `route`, then id uniqueness.
    pub fn register(&mut self, spec: AppSpec) -> Result<Arc<App>, RegistryError> {
        let id = validate_id(&spec.id)?;
        let repo: RepoSpec = spec
            .repo
            .parse()
            .map_err(|reason| RegistryError::Validation {
                field: "repo",
                reason,
            })?;
        let routes = spec.route.routes();
        if routes.is_empty() {
            return Err(RegistryError::Validation {
                field: "route",
                reason: "at least one non-empty route is required".to_string(),
            });
        }
        if self.index.contains_key(&id) {
            return Err(RegistryError::DuplicateId { id });
        }

        let branch = spec
            .branch
            .clone()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| self.config.default_branch.clone());
        let root = spec
            .target_folder
            .clone()
            .unwrap_or_else(|| self.config.target_folder.clone());
        let app = Arc::new(App::new(
            id.clone(),
            SourceRef { repo, branch },
            root.join(&id.0),
            spec.port.unwrap_or(self.config.default_port),
            routes,
            self.config.manifest_file.clone(),
            spec,
        ));

        self.index.insert(id, self.apps.len());
        self.apps.push(Arc::clone(&app));
        Ok(app)
    }

    pub fn find(&self, id: &str) -> Result<Arc<App>, RegistryError> {
        self.index
            .get(id)
            .map(|&i| Arc::clone(&self.apps[i]))
            .ok_or_else(|| RegistryError::NotFound { id: AppId::from(id) })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Every app, in registration order.
    pub fn list(&self) -> &[Arc<App>] {
        &self.apps
    }

    /// Apps tracking `full_name` (`owner/name`) on `branch`.
    pub fn matching(&self, full_name: &str, branch: &str) -> Vec<Arc<App>> {
        self.apps
            .iter()
            .filter(|app| app.source.repo.full_name() == full_name && app.branch() == branch)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

fn validate_id(raw: &str) -> Result<AppId, RegistryError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(RegistryError::Validation {
            field: "id",
            reason: "id is required".to_string(),
        });
    }
    // The id names the app's folder under the target root.
    if id.contains(['/', '\\']) || id == "." || id == ".." {
        return Err(RegistryError::Validation {
            field: "id",
            reason: format!("'{id}' cannot be used as a folder name"),
        });
    }
    Ok(AppId::from(id))
}
