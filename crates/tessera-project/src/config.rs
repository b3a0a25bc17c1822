use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_types::Locator;

use crate::error::{ProjectError, ProjectResult};

/// Configuration for opening a [`Project`](crate::Project).
///
/// Every field has a default, so a TOML file only needs the keys it
/// overrides:
///
/// ```toml
/// locator = "tessera:/work/router"
/// connect_timeout_ms = 5000
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Display name. Falls back to the locator's name.
    pub name: Option<String>,
    /// The project's own locator.
    pub locator: Option<Locator>,
    /// Upper bound on a single view connection attempt.
    pub connect_timeout_ms: u64,
    /// Where project metadata is saved. Relative paths are resolved against
    /// the directory that holds a local project; the default is
    /// `<name>.tessera.json` in that directory.
    pub metadata_file: Option<PathBuf>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: None,
            locator: None,
            connect_timeout_ms: 30_000,
            metadata_file: None,
        }
    }
}

impl ProjectConfig {
    /// Configuration for the project at `locator`, all else default.
    pub fn for_locator(locator: Locator) -> Self {
        Self {
            locator: Some(locator),
            ..Default::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> ProjectResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> ProjectResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ProjectError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Metadata location for a local project at `locator`.
    pub fn metadata_path(&self, locator: &Locator) -> ProjectResult<PathBuf> {
        let project_dir = locator.local_path().ok_or_else(|| {
            ProjectError::InvalidLocator(format!("{locator} is not a local project"))
        })?;
        let base = project_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Ok(match &self.metadata_file {
            Some(file) if file.is_absolute() => file.clone(),
            Some(file) => base.join(file),
            None => base.join(format!("{}.tessera.json", locator.name())),
        })
    }
}
