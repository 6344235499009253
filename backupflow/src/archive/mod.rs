//! The archive pre-stage.
//!
//! A model with both data sources and file includes packs the includes into
//! `<dump_path>/archive.tar` first, so the compress stage sees a single dump
//! directory. Without data sources the includes go straight to the compress
//! stage and this stage does nothing.

use crate::compression::tar_args;
use crate::config::ModelConfig;
use crate::errors::{ConfigError, Result};
use crate::process::{CommandExecutor, CommandSpec, ToolCapabilities};
use crate::stages::Archiver;
use crate::utils::clean_paths;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// File name of the intermediate tarball inside the dump directory.
pub const ARCHIVE_FILE: &str = "archive.tar";

/// Tars declared includes into the dump directory.
pub struct TarArchiver {
    executor: Arc<dyn CommandExecutor>,
    capabilities: ToolCapabilities,
}

impl std::fmt::Debug for TarArchiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarArchiver")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl TarArchiver {
    /// Creates an archiver running `tar` through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>, capabilities: ToolCapabilities) -> Self {
        Self {
            executor,
            capabilities,
        }
    }

    /// Whether the pre-stage has work to do for `model`.
    #[must_use]
    pub fn applies(model: &ModelConfig) -> bool {
        model.archive.is_some() && model.has_databases()
    }

    /// Path of the intermediate tarball.
    #[must_use]
    pub fn archive_path(model: &ModelConfig) -> PathBuf {
        model.dump_path.join(ARCHIVE_FILE)
    }

    /// The `tar` argument vector for the pre-stage.
    pub fn options(&self, model: &ModelConfig) -> std::result::Result<Vec<String>, ConfigError> {
        let includes = clean_paths(model.archive_includes());
        if includes.is_empty() {
            return Err(ConfigError::new("archive.includes have no config")
                .with_key(format!("models.{}.archive.includes", model.name)));
        }
        debug!(model = %model.name, count = includes.len(), "Resolved include rules");

        Ok(tar_args(
            self.capabilities.gnu_tar,
            Vec::new(),
            model,
            &Self::archive_path(model),
            includes,
        ))
    }
}

#[async_trait]
impl Archiver for TarArchiver {
    async fn archive(&self, model: &ModelConfig) -> Result<()> {
        if !Self::applies(model) {
            return Ok(());
        }

        let opts = self.options(model)?;
        tokio::fs::create_dir_all(&model.dump_path).await?;
        info!(model = %model.name, args = ?opts, "tar");

        self.executor.exec(&CommandSpec::new("tar").args(opts)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchiveConfig, SubConfig};
    use crate::testing::RecordingExecutor;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn model(with_databases: bool) -> ModelConfig {
        let mut model = ModelConfig::new("mixed");
        model.assign_work_paths(Path::new("/tmp/backupflow"), "run");
        model.archive = Some(ArchiveConfig {
            includes: vec!["/etc/app/".to_string()],
            excludes: vec!["/etc/app/tmp".to_string()],
            additional_arguments: Vec::new(),
        });
        if with_databases {
            model
                .databases
                .insert("main".to_string(), SubConfig::new("postgresql"));
        }
        model
    }

    #[test]
    fn test_options() {
        let archiver = TarArchiver::new(Arc::new(RecordingExecutor::new()), ToolCapabilities::new(true, None));
        let opts = archiver.options(&model(true)).unwrap();
        assert_eq!(
            opts,
            vec![
                "--ignore-failed-read",
                "-cP",
                "--exclude=/etc/app/tmp",
                "-f",
                "/tmp/backupflow/mixed/run/mixed/archive.tar",
                "/etc/app",
            ]
        );
    }

    #[tokio::test]
    async fn test_skipped_without_databases() {
        let executor = Arc::new(RecordingExecutor::new());
        let archiver = TarArchiver::new(executor.clone(), ToolCapabilities::new(true, None));

        archiver.archive(&model(false)).await.unwrap();
        archiver.archive(&ModelConfig::new("bare")).await.unwrap();
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_runs_tar_into_dump_directory() {
        let workdir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor::new());
        let archiver = TarArchiver::new(executor.clone(), ToolCapabilities::new(false, None));
        let mut model = model(true);
        model.assign_work_paths(workdir.path(), "run");

        archiver.archive(&model).await.unwrap();

        assert!(model.dump_path.is_dir());
        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args[0], "-cP");
    }
}
