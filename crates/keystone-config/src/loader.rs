//! Configuration loader with multi-source merging

use crate::{KeystoneConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    include_user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "KEYSTONE".to_string(),
            include_user_config: true,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "KEYSTONE")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/keystone/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.include_user_config = false;
        self
    }

    /// Load configuration from all sources with proper precedence
    ///
    /// Environment keys nest with a double underscore, so
    /// `KEYSTONE_CACHE__REFRESH_INTERVAL_SECS=5` sets `cache.refresh_interval_secs`.
    pub fn load(self) -> Result<KeystoneConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = KeystoneConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/keystone/config.toml)
        if self.include_user_config {
            if let Ok(user_config_file) = Paths::new().user_config_file() {
                if user_config_file.exists() {
                    builder = builder.add_source(
                        config::File::from(user_config_file)
                            .required(false)
                            .format(config::FileFormat::Toml),
                    );
                }
            }
        }

        // 3. Project config (keystone.toml)
        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Local config (keystone.local.toml, gitignored)
        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables (KEYSTONE_*)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("decision.fulfillable_obligations")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut keystone_config: KeystoneConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        keystone_config.resolve_paths(&self.project_dir);
        keystone_config
            .validate()
            .context("Configuration failed validation")?;

        Ok(keystone_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> KeystoneConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
