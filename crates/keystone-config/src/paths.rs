//! Path utilities and XDG directory discovery

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// XDG-compliant paths for Keystone
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    /// Create a new Paths instance with XDG discovery
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("com", "Keystone", "keystone"),
        }
    }

    /// Get user config directory (~/.config/keystone/)
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("Failed to determine user config directory".to_string())
            })
    }

    /// Get user config file path (~/.config/keystone/config.toml)
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// Get project config file path (keystone.toml)
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("keystone.toml")
    }

    /// Get local config file path (keystone.local.toml, gitignored)
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("keystone.local.toml")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
