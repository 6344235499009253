//! Artifact splitting through `split`.

use crate::config::ModelConfig;
use crate::errors::Result;
use crate::process::{CommandExecutor, CommandSpec};
use crate::stages::Splitter;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Splits the artifact into numbered chunks inside `<path>-split/`.
pub struct ChunkSplitter {
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for ChunkSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSplitter").finish_non_exhaustive()
    }
}

impl ChunkSplitter {
    /// Creates a splitter running `split` through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Builds the `split` command and the chunk directory for `path`.
    #[must_use]
    pub fn command(path: &Path, chunk_size: &str) -> (CommandSpec, PathBuf) {
        let mut dir = path.as_os_str().to_owned();
        dir.push("-split");
        let dir = PathBuf::from(dir);

        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let prefix = dir.join(format!("{base}-"));

        let spec = CommandSpec::new("split")
            .args(["-a", "3", "-b", chunk_size, "-d"])
            .arg(path.to_string_lossy())
            .arg(prefix.to_string_lossy());

        (spec, dir)
    }
}

#[async_trait]
impl Splitter for ChunkSplitter {
    async fn split(&self, path: &Path, model: &ModelConfig) -> Result<PathBuf> {
        let Some(config) = &model.split_with else {
            return Ok(path.to_path_buf());
        };

        let (spec, dir) = Self::command(path, &config.chunk_size);
        tokio::fs::create_dir_all(&dir).await?;
        info!(model = %model.name, chunk_size = %config.chunk_size, dir = %dir.display(), "Split");
        self.executor.exec(&spec).await?;
        Ok(dir)
    }
}
