//! The combined archive and compress stage.

use crate::compression::CompressionPlan;
use crate::config::ModelConfig;
use crate::errors::{ConfigError, Result};
use crate::process::{CommandExecutor, CommandSpec, ToolCapabilities};
use crate::stages::{ArchiveResult, Compressor};
use crate::utils::{archive_timestamp, clean_path, clean_paths};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Builds the `tar` argument vector and runs it once.
///
/// When the plan declares a parallel codec and it is found on the search
/// path, `-a` is replaced by `--use-compress-program <path>`. A missing
/// codec silently falls back to `-a`.
pub struct TarCompressor {
    executor: Arc<dyn CommandExecutor>,
    capabilities: ToolCapabilities,
}

impl std::fmt::Debug for TarCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarCompressor")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl TarCompressor {
    /// Creates a compressor running `tar` through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>, capabilities: ToolCapabilities) -> Self {
        Self {
            executor,
            capabilities,
        }
    }

    /// Where the artifact for `model` is written when compressing at `at`.
    #[must_use]
    pub fn artifact_path(model: &ModelConfig, plan: &CompressionPlan, at: DateTime<Local>) -> PathBuf {
        model.temp_path.join(format!(
            "{}-{}{}",
            model.name,
            archive_timestamp(at),
            plan.extension
        ))
    }

    /// Normalized include paths.
    ///
    /// A model with data sources archives its dump directory, which already
    /// holds `archive.tar` when file includes are declared too. Otherwise the
    /// declared includes are used.
    ///
    /// Declared includes do not take precedence over the dump directory here:
    /// the archive pre-stage has already packed them into it, and listing them
    /// again would leave the dumps out of the artifact.
    pub fn resolve_includes(model: &ModelConfig) -> std::result::Result<Vec<String>, ConfigError> {
        if model.has_databases() {
            return Ok(vec![clean_path(&model.dump_path.to_string_lossy())]);
        }

        let includes = clean_paths(model.archive_includes());
        if includes.is_empty() {
            return Err(ConfigError::new("archive.includes have no config")
                .with_key(format!("models.{}.archive.includes", model.name)));
        }
        Ok(includes)
    }

    /// The full `tar` argument vector writing to `dest`.
    pub fn options(
        &self,
        model: &ModelConfig,
        plan: &CompressionPlan,
        dest: &Path,
    ) -> std::result::Result<Vec<String>, ConfigError> {
        let includes = Self::resolve_includes(model)?;
        debug!(model = %model.name, count = includes.len(), "Resolved include rules");

        Ok(tar_args(
            self.capabilities.gnu_tar,
            self.compression_args(plan),
            model,
            dest,
            includes,
        ))
    }

    fn compression_args(&self, plan: &CompressionPlan) -> Vec<String> {
        let located = plan
            .parallel_program
            .and_then(|program| self.capabilities.locate(program));

        match located {
            Some(path) => vec![
                "--use-compress-program".to_string(),
                path.to_string_lossy().into_owned(),
            ],
            None => vec!["-a".to_string()],
        }
    }
}

/// Assembles `tar` arguments in their fixed order.
///
/// GNU tolerance flag, compression flags, `-cP`, extra arguments, one
/// `--exclude=` per exclude, `-f <dest>`, then the includes.
pub(crate) fn tar_args(
    gnu_tar: bool,
    compression: Vec<String>,
    model: &ModelConfig,
    dest: &Path,
    includes: Vec<String>,
) -> Vec<String> {
    let mut opts = Vec::new();
    if gnu_tar {
        opts.push("--ignore-failed-read".to_string());
    }
    opts.extend(compression);
    opts.push("-cP".to_string());
    opts.extend(model.archive_arguments().iter().cloned());
    opts.extend(
        clean_paths(model.archive_excludes())
            .into_iter()
            .map(|exclude| format!("--exclude={exclude}")),
    );
    opts.push("-f".to_string());
    opts.push(dest.to_string_lossy().into_owned());
    opts.extend(includes);
    opts
}

#[async_trait]
impl Compressor for TarCompressor {
    async fn compress(&self, model: &ModelConfig, plan: &CompressionPlan) -> Result<ArchiveResult> {
        info!(model = %model.name, kind = plan.kind, "Compress");

        let dest = Self::artifact_path(model, plan, Local::now());
        let opts = self.options(model, plan, &dest)?;
        info!(model = %model.name, args = ?opts, "tar");

        tokio::fs::create_dir_all(&model.temp_path).await?;

        let mut spec = CommandSpec::new("tar").args(opts);
        if model.has_databases() {
            if let Some(parent) = model.dump_path.parent() {
                spec = spec.current_dir(parent);
            }
        }
        self.executor.exec(&spec).await?;

        info!(model = %model.name, path = %dest.display(), "Compressed");
        Ok(ArchiveResult::new(dest, plan.extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionPlanner;
    use crate::config::{ArchiveConfig, SubConfig};
    use crate::errors::BackupError;
    use crate::testing::RecordingExecutor;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::ffi::OsString;

    fn files_model(includes: &[&str], excludes: &[&str], extra: &[&str]) -> ModelConfig {
        let mut model = ModelConfig::new("files");
        model.assign_work_paths(Path::new("/tmp/backupflow"), "run");
        model.archive = Some(ArchiveConfig {
            includes: includes.iter().map(ToString::to_string).collect(),
            excludes: excludes.iter().map(ToString::to_string).collect(),
            additional_arguments: extra.iter().map(ToString::to_string).collect(),
        });
        model
    }

    fn no_codecs(gnu_tar: bool) -> ToolCapabilities {
        ToolCapabilities::new(gnu_tar, Some(OsString::new()))
    }

    fn compressor(caps: ToolCapabilities) -> (TarCompressor, Arc<RecordingExecutor>) {
        let executor = Arc::new(RecordingExecutor::new());
        (TarCompressor::new(executor.clone(), caps), executor)
    }

    #[test]
    fn test_options_fixed_order() {
        let (tar, _) = compressor(no_codecs(true));
        let model = files_model(&["/a", "/b"], &["/c"], &["-h"]);
        let plan = CompressionPlanner::plan("tgz").unwrap();

        let opts = tar.options(&model, &plan, Path::new("/tmp/out.tar.gz")).unwrap();
        assert_eq!(
            opts,
            vec!["--ignore-failed-read", "-a", "-cP", "-h", "--exclude=/c", "-f", "/tmp/out.tar.gz", "/a", "/b"]
        );
    }

    #[test]
    fn test_options_without_gnu_tar() {
        let (tar, _) = compressor(no_codecs(false));
        let model = files_model(&["/a"], &[], &[]);
        let plan = CompressionPlanner::plan("").unwrap();

        let opts = tar.options(&model, &plan, Path::new("/o.tar")).unwrap();
        assert_eq!(opts, vec!["-a", "-cP", "-f", "/o.tar", "/a"]);
    }

    #[test]
    fn test_options_normalize_paths_in_order() {
        let (tar, _) = compressor(no_codecs(true));
        let model = files_model(
            &["/var/lib//app/", "/etc/./nginx", "/home/u/../v"],
            &["/var/lib/app/cache/", "/var//log"],
            &[],
        );
        let plan = CompressionPlanner::plan("xz").unwrap();

        let opts = tar.options(&model, &plan, Path::new("/o.tar.xz")).unwrap();
        assert_eq!(
            opts,
            vec![
                "--ignore-failed-read",
                "-a",
                "-cP",
                "--exclude=/var/lib/app/cache",
                "--exclude=/var/log",
                "-f",
                "/o.tar.xz",
                "/var/lib/app",
                "/etc/nginx",
                "/home/v",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_parallel_codec_substitution() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pigz = dir.path().join("pigz");
        std::fs::write(&pigz, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&pigz, std::fs::Permissions::from_mode(0o755)).unwrap();

        let caps = ToolCapabilities::new(true, Some(dir.path().as_os_str().to_owned()));
        let (tar, _) = compressor(caps);
        let model = files_model(&["/a"], &[], &[]);

        let gz = tar
            .options(&model, &CompressionPlanner::plan("gz").unwrap(), Path::new("/o"))
            .unwrap();
        assert_eq!(gz[1], "--use-compress-program");
        assert_eq!(gz[2], pigz.to_string_lossy());
        assert_eq!(gz[3], "-cP");

        // pixz is not on the search path, so xz falls back silently.
        let xz = tar
            .options(&model, &CompressionPlanner::plan("xz").unwrap(), Path::new("/o"))
            .unwrap();
        assert_eq!(xz[1], "-a");
    }

    #[test]
    fn test_databases_archive_dump_directory() {
        let mut model = ModelConfig::new("db");
        model.assign_work_paths(Path::new("/tmp/backupflow"), "run");
        model
            .databases
            .insert("main".to_string(), SubConfig::new("postgresql"));

        let includes = TarCompressor::resolve_includes(&model).unwrap();
        assert_eq!(includes, vec!["/tmp/backupflow/db/run/db".to_string()]);
    }

    #[test]
    fn test_databases_with_includes_archive_dump_directory() {
        let mut model = files_model(&["/etc/app", "/var/www"], &[], &[]);
        model
            .databases
            .insert("main".to_string(), SubConfig::new("postgresql"));

        let includes = TarCompressor::resolve_includes(&model).unwrap();
        assert_eq!(includes, vec!["/tmp/backupflow/files/run/files".to_string()]);

        let (tar, _) = compressor(no_codecs(true));
        let plan = CompressionPlanner::plan("tgz").unwrap();
        let opts = tar.options(&model, &plan, Path::new("/out/files.tar.gz")).unwrap();
        assert_eq!(opts.last().map(String::as_str), Some("/tmp/backupflow/files/run/files"));
        assert!(!opts.iter().any(|o| o == "/etc/app" || o == "/var/www"));
    }

    #[test]
    fn test_artifact_path() {
        let model = files_model(&["/a"], &[], &[]);
        let plan = CompressionPlanner::plan("tar.zst").unwrap();
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();

        assert_eq!(
            TarCompressor::artifact_path(&model, &plan, at),
            PathBuf::from("/tmp/backupflow/files/run/files-2024-03-09-07-05-01.tar.zst")
        );
    }

    #[tokio::test]
    async fn test_compress_without_includes_spawns_nothing() {
        let (tar, executor) = compressor(no_codecs(true));
        let mut model = ModelConfig::new("empty");
        model.assign_work_paths(Path::new("/tmp/backupflow"), "run");

        let err = tar
            .compress(&model, &CompressionPlanner::plan("gz").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_compress_runs_tar_once() {
        let workdir = tempfile::tempdir().unwrap();
        let (tar, executor) = compressor(no_codecs(true));
        let mut model = files_model(&["/a"], &[], &[]);
        model.assign_work_paths(workdir.path(), "run");

        let result = tar
            .compress(&model, &CompressionPlanner::plan("gz").unwrap())
            .await
            .unwrap();

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "tar");
        assert_eq!(calls[0].args.last().map(String::as_str), Some("/a"));
        assert_eq!(calls[0].current_dir, None);
        assert!(result.path.starts_with(&model.temp_path));
        assert_eq!(result.extension, ".tar.gz");
    }

    #[tokio::test]
    async fn test_compress_failure_is_stage_error() {
        let workdir = tempfile::tempdir().unwrap();
        let (tar, executor) = compressor(no_codecs(true));
        executor.fail_program("tar", "tar: /a: Cannot stat");
        let mut model = files_model(&["/a"], &[], &[]);
        model.assign_work_paths(workdir.path(), "run");

        let err = tar
            .compress(&model, &CompressionPlanner::plan("tar").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Stage(_)));
        assert!(err.to_string().contains("Cannot stat"));
    }
}
