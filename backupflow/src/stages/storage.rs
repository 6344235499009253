//! Storage adapters.

use crate::config::{ModelConfig, SubConfig};
use crate::errors::{ConfigError, Result};
use crate::stages::{FileEntry, Storage};
use crate::utils::clean_path;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const ARCHIVE_STAMP_LEN: usize = "YYYY-MM-DD-HH-MM-SS".len();

/// Every storage configured on a model.
///
/// Uploads go to each storage in name order and stop at the first error.
/// Listing and download through the [`Storage`] impl use the first storage;
/// [`StorageSet::select`] picks another one by name.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageSet;

impl StorageSet {
    /// Builds the adapter for one storage entry.
    pub fn resolve(name: &str, config: &SubConfig) -> std::result::Result<Box<dyn Storage>, ConfigError> {
        match config.type_tag.as_str() {
            "local" => Ok(Box::new(LocalStorage::from_config(name, config)?)),
            other => Err(ConfigError::new(format!("Unsupported storage type: {other}"))
                .with_key(format!("storages.{name}.type"))),
        }
    }

    /// Builds the adapter for the storage called `name`, or for the first
    /// storage in name order when `name` is `None`.
    pub fn select(model: &ModelConfig, name: Option<&str>) -> std::result::Result<Box<dyn Storage>, ConfigError> {
        let Some(name) = name else {
            return Self::first(model);
        };
        let config = model.storages.get(name).ok_or_else(|| {
            ConfigError::new(format!("Model {} has no storage named {name}", model.name))
                .with_key(format!("storages.{name}"))
        })?;
        Self::resolve(name, config)
    }

    fn first(model: &ModelConfig) -> std::result::Result<Box<dyn Storage>, ConfigError> {
        let (name, config) = model
            .storages
            .iter()
            .next()
            .ok_or_else(|| ConfigError::new(format!("Model {} has no storages", model.name)))?;
        Self::resolve(name, config)
    }
}

#[async_trait]
impl Storage for StorageSet {
    async fn upload(&self, model: &ModelConfig, path: &Path) -> Result<()> {
        let storages = model
            .storages
            .iter()
            .map(|(name, config)| Self::resolve(name, config).map(|s| (name, s)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (name, storage) in storages {
            info!(model = %model.name, storage = %name, "Upload");
            storage.upload(model, path).await?;
        }
        Ok(())
    }

    async fn list(&self, model: &ModelConfig, parent: &str) -> Result<Vec<FileEntry>> {
        Self::first(model)?.list(model, parent).await
    }

    async fn download(&self, model: &ModelConfig, path: &str) -> Result<String> {
        Self::first(model)?.download(model, path).await
    }
}

/// Copies artifacts into a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStorage {
    root: PathBuf,
    keep: Option<usize>,
}

impl LocalStorage {
    /// Creates a local storage rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, keep: Option<usize>) -> Self {
        Self {
            root: root.into(),
            keep,
        }
    }

    /// Reads `path` and the optional `keep` count.
    pub fn from_config(name: &str, config: &SubConfig) -> std::result::Result<Self, ConfigError> {
        let root = config
            .get_str("path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ConfigError::new("local storage requires path").with_key(format!("storages.{name}.path"))
            })?;
        let keep = config
            .get_str("keep")
            .map(|k| {
                k.parse::<usize>().map_err(|_| {
                    ConfigError::new(format!("invalid keep value: {k}"))
                        .with_key(format!("storages.{name}.keep"))
                })
            })
            .transpose()?
            .filter(|k| *k > 0);

        Ok(Self::new(root, keep))
    }

    fn resolve(&self, relative: &str) -> std::result::Result<PathBuf, ConfigError> {
        let cleaned = clean_path(relative.trim_start_matches('/'));
        if cleaned == ".." || cleaned.starts_with("../") {
            return Err(ConfigError::new(format!("path escapes storage root: {relative}")));
        }
        Ok(if cleaned == "." {
            self.root.clone()
        } else {
            self.root.join(cleaned)
        })
    }

    async fn prune(&self, model: &ModelConfig, keep: usize, uploaded: &Path) -> Result<()> {
        let mut artifacts = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stamp) = artifact_stamp(&model.name, &name) {
                artifacts.push((stamp, entry.path()));
            }
        }

        artifacts.sort();
        let excess = artifacts.len().saturating_sub(keep);
        for (_, old) in artifacts.into_iter().take(excess) {
            if old == uploaded {
                continue;
            }
            info!(model = %model.name, path = %old.display(), "Remove expired artifact");
            let removed = if old.is_dir() {
                tokio::fs::remove_dir_all(&old).await
            } else {
                tokio::fs::remove_file(&old).await
            };
            if let Err(e) = removed {
                warn!(path = %old.display(), error = %e, "Failed to remove expired artifact");
            }
        }
        Ok(())
    }
}

/// The archive timestamp of `file_name` when it is an artifact of `model`.
///
/// Artifacts are named `<model>-YYYY-MM-DD-HH-MM-SS<ext>`, optionally with a
/// `-split` suffix. Anything else in the storage root, including artifacts of
/// models whose name merely starts with `model`, yields `None`.
fn artifact_stamp(model: &str, file_name: &str) -> Option<NaiveDateTime> {
    let rest = file_name.strip_prefix(model)?.strip_prefix('-')?;
    let stamp = rest.get(..ARCHIVE_STAMP_LEN)?;
    let tail = &rest[ARCHIVE_STAMP_LEN..];
    if !(tail.is_empty() || tail.starts_with('.') || tail.starts_with('-')) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d-%H-%M-%S").ok()
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(&self, model: &ModelConfig, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .ok_or_else(|| ConfigError::new(format!("artifact has no file name: {}", path.display())))?;
        let dest = self.root.join(name);
        tokio::fs::create_dir_all(&self.root).await?;

        copy_recursive(path, &dest).await?;
        info!(model = %model.name, dest = %dest.display(), "Stored artifact");

        if let Some(keep) = self.keep {
            self.prune(model, keep, &dest).await?;
        }
        Ok(())
    }

    async fn list(&self, _model: &ModelConfig, parent: &str) -> Result<Vec<FileEntry>> {
        let dir = self.resolve(parent)?;
        let mut result = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            result.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
                is_dir: meta.is_dir(),
            });
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn download(&self, _model: &ModelConfig, path: &str) -> Result<String> {
        let file = self.resolve(path)?;
        let file = tokio::fs::canonicalize(&file).await?;
        Ok(format!("file://{}", file.display()))
    }
}

async fn copy_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    if !tokio::fs::metadata(src).await?.is_dir() {
        tokio::fs::copy(src, dest).await?;
        return Ok(());
    }

    let mut pending = vec![(src.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), target).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackupError;
    use serde_json::json;

    fn local_model(root: &Path, keep: Option<u64>) -> ModelConfig {
        let mut config = SubConfig::new("local").with_setting("path", json!(root.to_string_lossy()));
        if let Some(keep) = keep {
            config = config.with_setting("keep", json!(keep));
        }
        let mut model = ModelConfig::new("app");
        model.storages.insert("disk".to_string(), config);
        model
    }

    #[tokio::test]
    async fn test_upload_list_download() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let artifact = src.path().join("app-2024-01-01-00-00-00.tar.gz");
        std::fs::write(&artifact, b"data").unwrap();

        let model = local_model(dest.path(), None);
        StorageSet.upload(&model, &artifact).await.unwrap();

        let entries = StorageSet.list(&model, "/").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "app-2024-01-01-00-00-00.tar.gz");
        assert_eq!(entries[0].size, 4);
        assert!(!entries[0].is_dir);

        let url = StorageSet
            .download(&model, "app-2024-01-01-00-00-00.tar.gz")
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("app-2024-01-01-00-00-00.tar.gz"));
    }

    #[tokio::test]
    async fn test_upload_chunk_directory() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let chunks = src.path().join("app-1.tar-split");
        std::fs::create_dir_all(&chunks).unwrap();
        std::fs::write(chunks.join("app-1.tar-000"), b"a").unwrap();
        std::fs::write(chunks.join("app-1.tar-001"), b"b").unwrap();

        StorageSet
            .upload(&local_model(dest.path(), None), &chunks)
            .await
            .unwrap();
        assert!(dest.path().join("app-1.tar-split/app-1.tar-001").is_file());
    }

    async fn stored_names(model: &ModelConfig) -> Vec<String> {
        StorageSet
            .list(model, "")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    #[tokio::test]
    async fn test_keep_prunes_oldest() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let model = local_model(dest.path(), Some(2));

        for stamp in ["2024-01-01-00-00-00", "2024-01-02-00-00-00", "2024-01-03-00-00-00"] {
            let artifact = src.path().join(format!("app-{stamp}.tar"));
            std::fs::write(&artifact, b"x").unwrap();
            StorageSet.upload(&model, &artifact).await.unwrap();
        }

        assert_eq!(
            stored_names(&model).await,
            vec!["app-2024-01-02-00-00-00.tar", "app-2024-01-03-00-00-00.tar"]
        );
    }

    #[tokio::test]
    async fn test_keep_ignores_models_sharing_a_prefix() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(dest.path().join("app-prod-2024-01-01-00-00-00.tar.gz"), b"other").unwrap();
        std::fs::write(dest.path().join("app-notes.txt"), b"other").unwrap();

        let model = local_model(dest.path(), Some(1));
        let artifact = src.path().join("app-2024-06-01-00-00-00.tar.gz");
        std::fs::write(&artifact, b"x").unwrap();
        StorageSet.upload(&model, &artifact).await.unwrap();

        assert_eq!(
            stored_names(&model).await,
            vec![
                "app-2024-06-01-00-00-00.tar.gz",
                "app-notes.txt",
                "app-prod-2024-01-01-00-00-00.tar.gz",
            ]
        );
    }

    #[tokio::test]
    async fn test_keep_never_removes_fresh_upload() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        // Clock skew: an existing artifact stamped later than the new one.
        std::fs::write(dest.path().join("app-2030-01-01-00-00-00.tar.gz"), b"future").unwrap();

        let model = local_model(dest.path(), Some(1));
        let artifact = src.path().join("app-2024-06-01-00-00-00.tar.gz");
        std::fs::write(&artifact, b"x").unwrap();
        StorageSet.upload(&model, &artifact).await.unwrap();

        assert!(dest.path().join("app-2024-06-01-00-00-00.tar.gz").is_file());
    }

    #[test]
    fn test_artifact_stamp() {
        assert!(artifact_stamp("db", "db-2024-01-01-00-00-00.tar.gz").is_some());
        assert!(artifact_stamp("db", "db-2024-01-01-00-00-00.tar.gz.enc-split").is_some());
        assert!(artifact_stamp("db", "db-prod-2024-01-01-00-00-00.tar.gz").is_none());
        assert!(artifact_stamp("db", "db-2024-13-01-00-00-00.tar").is_none());
        assert!(artifact_stamp("db", "db-2024").is_none());
    }

    #[tokio::test]
    async fn test_select_by_name() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("app-2024-01-01-00-00-00.tar"), b"x").unwrap();

        let mut model = local_model(first.path(), None);
        model.storages.insert(
            "offsite".to_string(),
            SubConfig::new("local").with_setting("path", json!(second.path().to_string_lossy())),
        );

        assert!(StorageSet::select(&model, None).unwrap().list(&model, "").await.unwrap().is_empty());
        let entries = StorageSet::select(&model, Some("offsite"))
            .unwrap()
            .list(&model, "")
            .await
            .unwrap();
        assert_eq!(entries[0].name, "app-2024-01-01-00-00-00.tar");

        let err = StorageSet::select(&model, Some("tape")).err().unwrap();
        assert_eq!(err.key.as_deref(), Some("storages.tape"));
    }

    #[tokio::test]
    async fn test_list_rejects_escape() {
        let dest = tempfile::tempdir().unwrap();
        let err = StorageSet
            .list(&local_model(dest.path(), None), "../etc")
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_unknown_storage_type() {
        let err = StorageSet::resolve("remote", &SubConfig::new("ftp")).err().unwrap();
        assert_eq!(err.key.as_deref(), Some("storages.remote.type"));
    }

    #[test]
    fn test_local_requires_path() {
        let err = LocalStorage::from_config("disk", &SubConfig::new("local")).unwrap_err();
        assert_eq!(err.key.as_deref(), Some("storages.disk.path"));
    }
}
