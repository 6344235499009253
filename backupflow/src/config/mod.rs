//! Configuration loading and validation.
//!
//! Configuration is YAML. Each entry of `models` becomes one [`ModelConfig`]
//! whose working paths are unique per load, so concurrently running models
//! never share a directory.

mod model;

pub use model::{
    ArchiveConfig, CompressConfig, DestinationConfig, ModelConfig, SplitConfig, SubConfig,
    COMMON_NOTIFIER,
};

use crate::compression::CompressionPlanner;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base working directory for per-run temp paths.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Optional log file, appended to by the logging layer.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Models keyed by name.
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
}

fn default_workdir() -> PathBuf {
    std::env::temp_dir().join("backupflow")
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(yaml)?;

        let workdir = config.workdir.clone();
        for (name, model) in &mut config.models {
            model.name.clone_from(name);
            model.assign_work_paths(&workdir, &Uuid::new_v4().to_string());
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for model in self.models.values() {
            validate_model(model)?;
        }
        Ok(())
    }

    /// Look up a model by name.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.get(name)
    }
}

/// Validate one model.
pub fn validate_model(model: &ModelConfig) -> Result<(), ConfigError> {
    let prefix = format!("models.{}", model.name);

    CompressionPlanner::plan(&model.compress_with.kind)
        .map_err(|e| e.with_key(format!("{prefix}.compress_with.type")))?;

    if model.archive_includes().is_empty() && !model.has_databases() {
        return Err(ConfigError::new(format!(
            "Model {}: archive.includes have no config and no databases are configured",
            model.name
        ))
        .with_key(format!("{prefix}.archive.includes")));
    }

    for (name, dest) in model.destinations() {
        if dest.type_tag.trim().is_empty() {
            return Err(ConfigError::new(format!(
                "Model {}: notifier {name} has no type",
                model.name
            ))
            .with_key(format!("{prefix}.notifiers.{name}.type")));
        }
    }

    Ok(())
}
