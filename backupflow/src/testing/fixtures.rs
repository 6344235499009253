//! Model fixtures.

use std::path::Path;

use crate::config::{ArchiveConfig, CompressConfig, DestinationConfig, ModelConfig, SubConfig};

/// A file-only model compressing `/etc/app` with gzip, working below `workdir`.
#[must_use]
pub fn files_model(name: &str, workdir: &Path) -> ModelConfig {
    let mut model = ModelConfig::new(name);
    model.assign_work_paths(workdir, "test-run");
    model.compress_with = CompressConfig::new("tgz");
    model.archive = Some(ArchiveConfig {
        includes: vec!["/etc/app".to_string()],
        excludes: vec!["/etc/app/cache".to_string()],
        additional_arguments: Vec::new(),
    });
    model
}

/// A model with one PostgreSQL database and no file includes.
#[must_use]
pub fn database_model(name: &str, workdir: &Path) -> ModelConfig {
    let mut model = ModelConfig::new(name);
    model.assign_work_paths(workdir, "test-run");
    model.compress_with = CompressConfig::new("tar.zst");
    model.databases.insert(
        "main".to_string(),
        SubConfig::new("postgresql").with_setting("database", serde_json::json!("app")),
    );
    model
}

/// Adds a notification destination to `model`.
#[must_use]
pub fn with_destination(mut model: ModelConfig, name: &str, destination: DestinationConfig) -> ModelConfig {
    model.notifiers.insert(name.to_string(), destination);
    model
}
