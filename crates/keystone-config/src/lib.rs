//! Configuration management for Keystone
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence)
//! 2. Environment variables (KEYSTONE_* prefix)
//! 3. keystone.local.toml (gitignored, local overrides)
//! 4. keystone.toml (git-tracked, project config)
//! 5. ~/.config/keystone/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main Keystone configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoneConfig {
    pub policy: PolicyConfig,
    pub cache: CacheConfig,
    pub decision: DecisionConfig,
    pub logging: LoggingConfig,
}

/// Where the policy document comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// JSON policy document used when no `--policy` is given.
    pub fixture: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub refresh_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh_interval_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Default for `--comprehensive` on entitlement queries.
    pub comprehensive_hierarchy: bool,
    pub skip_environment_entities: bool,
    /// Obligation value FQNs the PEP can always fulfil.
    pub fulfillable_obligations: Vec<String>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            comprehensive_hierarchy: false,
            skip_environment_entities: true,
            fulfillable_obligations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl KeystoneConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parse a single TOML file, without layering.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check values the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.enabled && self.cache.refresh_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache.refresh_interval_secs must be positive when the cache is enabled"
                    .to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        if self.decision.fulfillable_obligations.iter().any(|fqn| fqn.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "decision.fulfillable_obligations contains an empty FQN".to_string(),
            ));
        }
        Ok(())
    }

    /// Pick the policy document path: the explicit one, else the configured fixture.
    pub fn policy_fixture(&self, explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| self.policy.fixture.clone())
            .ok_or(ConfigError::MissingPolicyFixture)
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if let Some(fixture) = self.policy.fixture.as_mut() {
            if fixture.is_relative() {
                *fixture = base.join(&*fixture);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = KeystoneConfig::default();
        assert!(config.policy.fixture.is_none());
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.refresh_interval(), Duration::from_secs(30));
        assert!(config.decision.skip_environment_entities);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let mut config = KeystoneConfig::default();
        config.cache.enabled = true;
        config.cache.refresh_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_rejects_unknown_level() {
        let mut config = KeystoneConfig::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        config.logging.level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policy_fixture_precedence() {
        let mut config = KeystoneConfig::default();
        assert!(matches!(
            config.policy_fixture(None),
            Err(ConfigError::MissingPolicyFixture)
        ));

        config.policy.fixture = Some(PathBuf::from("/srv/policy.json"));
        assert_eq!(
            config.policy_fixture(None).unwrap(),
            PathBuf::from("/srv/policy.json")
        );
        assert_eq!(
            config.policy_fixture(Some(Path::new("other.json"))).unwrap(),
            PathBuf::from("other.json")
        );
    }

    #[test]
    fn test_path_resolution() {
        let mut config = KeystoneConfig::default();
        config.policy.fixture = Some(PathBuf::from("policy/fixture.json"));
        config.resolve_paths("/home/user/project");

        assert_eq!(
            config.policy.fixture,
            Some(PathBuf::from("/home/user/project/policy/fixture.json"))
        );
    }

    #[test]
    fn test_from_file() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("keystone.toml");
        std::fs::write(
            &path,
            r#"
[decision]
fulfillable_obligations = ["https://example.com/obl/drm/value/watermark"]
"#,
        )
        .expect("Failed to write config");

        let config = KeystoneConfig::from_file(&path).expect("Failed to parse config");
        assert_eq!(config.decision.fulfillable_obligations.len(), 1);
        assert!(config.decision.skip_environment_entities);
    }

    #[test]
    fn test_from_file_errors() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let missing = temp_dir.path().join("missing.toml");
        assert!(matches!(
            KeystoneConfig::from_file(&missing),
            Err(ConfigError::ReadError { .. })
        ));

        let broken = temp_dir.path().join("broken.toml");
        std::fs::write(&broken, "[cache\nenabled = ").expect("Failed to write config");
        assert!(matches!(
            KeystoneConfig::from_file(&broken),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
