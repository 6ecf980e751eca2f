use std::path::Path;

use serde::Deserialize;

use crate::log::LogLevel;
use crate::scope::DEFAULT_MAX_HIERARCHY_DEPTH;
use crate::types::FailurePolicy;

pub const CONFIG_FILE_NAME: &str = "scope-golem.toml";

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ScopeGolemConfig {
    pub registry: DirectoryConfig,
    pub logging: LoggingConfig,
}

/// Settings for a [`crate::ScopeDirectory`].
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DirectoryConfig {
    pub failure_policy: FailurePolicy,
    /// Parent-chain walks longer than this fail with `HierarchyCycle`.
    pub max_hierarchy_depth: usize,
    /// Drop a scope from the directory once its close phase has run.
    pub evict_on_close: bool,
}

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Abort,
            max_hierarchy_depth: DEFAULT_MAX_HIERARCHY_DEPTH,
            evict_on_close: true,
        }
    }
}

impl DirectoryConfig {
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_max_hierarchy_depth(mut self, depth: usize) -> Self {
        self.max_hierarchy_depth = depth;
        self
    }

    pub fn with_evict_on_close(mut self, evict: bool) -> Self {
        self.evict_on_close = evict;
        self
    }
}

pub fn validate(config: &ScopeGolemConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.registry.max_hierarchy_depth < 1 {
        errors.push("registry.max_hierarchy_depth must be >= 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Load `scope-golem.toml` from `project_root`, falling back to defaults
/// when the file does not exist.
pub fn load_config(project_root: &Path) -> Result<ScopeGolemConfig, String> {
    let config_path = project_root.join(CONFIG_FILE_NAME);

    if !config_path.exists() {
        return Ok(ScopeGolemConfig::default());
    }

    load_config_from(&config_path)
}

/// Load and validate an explicit config file. The file must exist.
pub fn load_config_from(config_path: &Path) -> Result<ScopeGolemConfig, String> {
    let contents = std::fs::read_to_string(config_path)
        .map_err(|e| format!("Failed to read {}: {}", config_path.display(), e))?;

    let config: ScopeGolemConfig = toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse {}: {}", config_path.display(), e))?;

    validate(&config).map_err(|errors| {
        format!(
            "Config validation failed:\n{}",
            errors
                .iter()
                .map(|e| format!("  - {}", e))
                .collect::<Vec<_>>()
                .join("\n")
        )
    })?;

    Ok(config)
}
