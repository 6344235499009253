//! Stage collaborators.
//!
//! The runner only sees these traits. Each trait has built-in adapters
//! selected by the `type` tag of the model configuration.

mod database;
mod encryptor;
mod splitter;
mod storage;

pub use database::{DatabaseDumper, DumpCommand};
pub use encryptor::OpensslEncryptor;
pub use splitter::ChunkSplitter;
pub use storage::{LocalStorage, StorageSet};

use crate::compression::CompressionPlan;
use crate::config::ModelConfig;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The artifact produced by the compress stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveResult {
    /// Path of the artifact on disk.
    pub path: PathBuf,
    /// File extension, including the leading dot.
    pub extension: String,
}

impl ArchiveResult {
    /// Creates an archive result.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            extension: extension.into(),
        }
    }
}

/// One entry returned by [`Storage::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Entry name, relative to the listed parent.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Dumps every configured data source below the model's dump path.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Runs all dumps; the first failure aborts.
    async fn dump(&self, model: &ModelConfig) -> Result<()>;
}

/// Prepares file includes before compression.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Runs the archive pre-stage.
    async fn archive(&self, model: &ModelConfig) -> Result<()>;
}

/// Produces the compressed artifact.
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Archives and compresses according to `plan`.
    async fn compress(&self, model: &ModelConfig, plan: &CompressionPlan) -> Result<ArchiveResult>;
}

/// Optionally encrypts the artifact.
#[async_trait]
pub trait Encryptor: Send + Sync {
    /// Returns `path` unchanged when no encryption is configured.
    async fn encrypt(&self, path: &Path, model: &ModelConfig) -> Result<PathBuf>;
}

/// Optionally splits the artifact into chunks.
#[async_trait]
pub trait Splitter: Send + Sync {
    /// Returns `path` unchanged when no splitting is configured.
    async fn split(&self, path: &Path, model: &ModelConfig) -> Result<PathBuf>;
}

/// Remote (or local) artifact storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Uploads the artifact at `path`.
    async fn upload(&self, model: &ModelConfig, path: &Path) -> Result<()>;

    /// Lists entries below `parent`.
    async fn list(&self, model: &ModelConfig, parent: &str) -> Result<Vec<FileEntry>>;

    /// Returns a download URL for `path`.
    async fn download(&self, model: &ModelConfig, path: &str) -> Result<String>;
}
