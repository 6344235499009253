//! End-of-run cleanup.
//!
//! Removal of the working directory must happen exactly once per run, after
//! notification and before a fault is escalated. [`CleanupGuard`] enforces
//! that: the async path consumes the guard, and a guard dropped without
//! running (the run future was cancelled or unwound past it) falls back to a
//! synchronous removal in `Drop`.

use crate::config::ModelConfig;
use crate::errors::Result;
use crate::events::{EventSink, RUN_CLEANUP};
use crate::pipeline::RunContext;
use crate::process::{CommandExecutor, CommandSpec};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Releases what a run left behind.
#[async_trait]
pub trait Cleaner: Send + Sync {
    /// Removes the run's working directory and runs the after-script.
    ///
    /// Errors are reported to the caller, which logs them and moves on.
    async fn cleanup(&self, model: &ModelConfig) -> Result<()>;
}

/// Deletes `temp_path`, then runs `after_script` through the shell.
pub struct WorkdirCleaner {
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for WorkdirCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkdirCleaner").finish_non_exhaustive()
    }
}

impl WorkdirCleaner {
    /// Creates a cleaner running the after-script through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Cleaner for WorkdirCleaner {
    async fn cleanup(&self, model: &ModelConfig) -> Result<()> {
        let mut first_error = None;

        if !model.temp_path.as_os_str().is_empty() {
            match tokio::fs::remove_dir_all(&model.temp_path).await {
                Ok(()) => info!(model = %model.name, path = %model.temp_path.display(), "Removed temp path"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(model = %model.name, path = %model.temp_path.display(), error = %e, "Cleanup temp path failed");
                    first_error = Some(e.into());
                }
            }
        }

        // The after-script still runs when the removal failed.
        if !model.after_script.is_empty() {
            let script = model.after_script.join("\n");
            info!(model = %model.name, "Running after_script");
            if let Err(e) = self.executor.exec(&CommandSpec::shell(script)).await {
                warn!(model = %model.name, error = %e, "after_script failed");
                first_error.get_or_insert(e.into());
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Guarantees one cleanup pass per run.
pub struct CleanupGuard {
    model: String,
    temp_path: Option<PathBuf>,
    events: Arc<dyn EventSink>,
    identity: Value,
}

impl std::fmt::Debug for CleanupGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupGuard")
            .field("model", &self.model)
            .field("armed", &self.temp_path.is_some())
            .finish()
    }
}

impl CleanupGuard {
    /// Arms a guard for the run described by `ctx`.
    #[must_use]
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            model: ctx.model().name.clone(),
            temp_path: Some(ctx.model().temp_path.clone()),
            events: ctx.events(),
            identity: ctx.payload(Value::Null),
        }
    }

    fn payload(&self, ok: bool, fallback: bool) -> Value {
        let mut payload = self.identity.clone();
        if let Some(map) = payload.as_object_mut() {
            map.insert("ok".to_string(), json!(ok));
            map.insert("fallback".to_string(), json!(fallback));
        }
        payload
    }

    /// Whether cleanup has not happened yet.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.temp_path.is_some()
    }

    /// Runs `cleaner` and disarms the guard.
    ///
    /// A panicking cleaner is contained here; the guard is disarmed either way
    /// so the `Drop` fallback never repeats the work.
    pub async fn run(mut self, cleaner: &dyn Cleaner, model: &ModelConfig) -> bool {
        use futures::FutureExt;
        use std::panic::AssertUnwindSafe;

        self.temp_path = None;
        let ok = match AssertUnwindSafe(cleaner.cleanup(model)).catch_unwind().await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(model = %model.name, error = %e, "Cleanup failed");
                false
            }
            Err(_) => {
                warn!(model = %model.name, "Cleanup panicked");
                false
            }
        };

        self.events.emit(RUN_CLEANUP, Some(self.payload(ok, false))).await;
        ok
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Some(path) = self.temp_path.take() {
            warn!(model = %self.model, path = %path.display(), "Run ended before cleanup, removing temp path");
            let ok = path.as_os_str().is_empty() || std::fs::remove_dir_all(&path).is_ok() || !path.exists();
            self.events.try_emit(RUN_CLEANUP, Some(self.payload(ok, true)));
        }
    }
}
