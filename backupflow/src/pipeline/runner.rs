//! The run state machine.
//!
//! `plan → before_script → dump → archive → compress → encrypt → split →
//! upload → notify → cleanup`. The first stage error skips the rest of the
//! stages; notification and cleanup happen on every path. A panic anywhere
//! in the stages is caught at this boundary and escalated as a [`Fault`]
//! once cleanup has run.

use crate::archive::TarArchiver;
use crate::compression::{CompressionPlanner, TarCompressor};
use crate::config::ModelConfig;
use crate::errors::{BackupError, DispatchError, Fault};
use crate::events::{
    EventSink, NoOpEventSink, RUN_FAULT, RUN_FINISHED, RUN_NOTIFIED, RUN_STARTED, STAGE_COMPLETED,
    STAGE_FAILED, STAGE_STARTED,
};
use crate::notifier::{default_registry, DispatchSummary, NotificationDispatcher, NotificationEvent};
use crate::observability::StageTimer;
use crate::pipeline::cleanup::{Cleaner, CleanupGuard, WorkdirCleaner};
use crate::pipeline::RunContext;
use crate::process::{CommandExecutor, CommandSpec, SystemExecutor, ToolCapabilities};
use crate::stages::{
    Archiver, ChunkSplitter, Compressor, DataSource, DatabaseDumper, Encryptor, OpensslEncryptor,
    Splitter, Storage, StorageSet,
};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// The collaborators a run drives, one per stage.
#[derive(Clone)]
pub struct Collaborators {
    /// Database dumps.
    pub data_source: Arc<dyn DataSource>,
    /// Archive pre-stage.
    pub archiver: Arc<dyn Archiver>,
    /// Archive and compress.
    pub compressor: Arc<dyn Compressor>,
    /// Optional encryption.
    pub encryptor: Arc<dyn Encryptor>,
    /// Optional chunking.
    pub splitter: Arc<dyn Splitter>,
    /// Upload targets.
    pub storage: Arc<dyn Storage>,
    /// End-of-run cleanup.
    pub cleaner: Arc<dyn Cleaner>,
    /// Runs the before-script.
    pub scripts: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Built-in collaborators spawning real processes.
    #[must_use]
    pub fn system(capabilities: ToolCapabilities) -> Self {
        Self::with_executor(Arc::new(SystemExecutor), capabilities)
    }

    /// Built-in collaborators running every command through `executor`.
    #[must_use]
    pub fn with_executor(executor: Arc<dyn CommandExecutor>, capabilities: ToolCapabilities) -> Self {
        Self {
            data_source: Arc::new(DatabaseDumper::new(Arc::clone(&executor))),
            archiver: Arc::new(TarArchiver::new(Arc::clone(&executor), capabilities.clone())),
            compressor: Arc::new(TarCompressor::new(Arc::clone(&executor), capabilities)),
            encryptor: Arc::new(OpensslEncryptor::new(Arc::clone(&executor))),
            splitter: Arc::new(ChunkSplitter::new(Arc::clone(&executor))),
            storage: Arc::new(StorageSet),
            cleaner: Arc::new(WorkdirCleaner::new(Arc::clone(&executor))),
            scripts: executor,
        }
    }
}

/// How a run ended, short of a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every stage completed.
    Succeeded,
    /// A stage returned an error; later stages were skipped.
    Failed {
        /// The failing stage.
        stage: String,
        /// The error text sent with the failure notification.
        message: String,
    },
}

/// Summary of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Model name.
    pub model: String,
    /// Run identity.
    pub run_id: Uuid,
    /// Success or the first failure.
    pub outcome: RunOutcome,
    /// The uploaded artifact, on success.
    pub artifact: Option<PathBuf>,
    /// Wall time of the whole run.
    pub duration_ms: u64,
    /// Per-destination notification results.
    pub notifications: DispatchSummary,
}

impl RunReport {
    /// Whether every stage completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }
}

#[derive(Debug)]
struct StageFailure {
    stage: &'static str,
    message: String,
}

/// Runs models through the backup pipeline.
pub struct PipelineRunner {
    collaborators: Collaborators,
    dispatcher: NotificationDispatcher,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    /// Creates a runner from its collaborators and dispatcher.
    #[must_use]
    pub fn new(collaborators: Collaborators, dispatcher: NotificationDispatcher) -> Self {
        Self {
            collaborators,
            dispatcher,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Runner with the built-in collaborators, host capabilities and every
    /// built-in notification provider.
    pub fn with_defaults() -> Result<Self, DispatchError> {
        let registry = default_registry()?;
        Ok(Self::new(
            Collaborators::system(ToolCapabilities::detected()),
            NotificationDispatcher::new(Arc::new(registry)),
        ))
    }

    /// Sends run events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Runs one model to its terminal state.
    ///
    /// Stage errors end in `Ok` with a failed outcome. `Err` is returned only
    /// for a fault, after the failure notification and cleanup have run.
    pub async fn perform(&self, model: Arc<ModelConfig>) -> Result<RunReport, Fault> {
        let ctx = RunContext::new(model, Arc::clone(&self.events));
        let span = ctx.span().clone();
        self.perform_in(&ctx).instrument(span).await
    }

    /// Runs several models concurrently. Runs share nothing but the
    /// collaborators, which hold no per-run state.
    pub async fn perform_all<I>(&self, models: I) -> Vec<(String, Result<RunReport, Fault>)>
    where
        I: IntoIterator<Item = Arc<ModelConfig>>,
    {
        let runs = models.into_iter().map(|model| {
            let name = model.name.clone();
            self.perform(model).map(move |result| (name, result))
        });
        futures::future::join_all(runs).await
    }

    async fn perform_in(&self, ctx: &RunContext) -> Result<RunReport, Fault> {
        let model = ctx.model();
        info!("Performing backup");
        ctx.emit(RUN_STARTED, json!({})).await;

        let guard = CleanupGuard::new(ctx);
        let current = Mutex::new("plan");

        let (result, fault) = match AssertUnwindSafe(self.run_stages(ctx, &current))
            .catch_unwind()
            .await
        {
            Ok(result) => (result, None),
            Err(payload) => {
                let stage = *current.lock();
                let fault = Fault::from_panic(&model.name, stage, payload.as_ref());
                error!(stage, error = %fault, "Run faulted");
                let failure = StageFailure {
                    stage,
                    message: fault.to_string(),
                };
                (Err(failure), Some(fault))
            }
        };

        let notifications = self.notify(ctx, &result).await;

        guard.run(self.collaborators.cleaner.as_ref(), model).await;

        if let Some(fault) = fault {
            ctx.emit(RUN_FAULT, json!({ "stage": fault.stage, "message": fault.message }))
                .await;
            return Err(fault);
        }

        let (outcome, artifact) = match result {
            Ok(path) => (RunOutcome::Succeeded, Some(path)),
            Err(StageFailure { stage, message }) => (
                RunOutcome::Failed {
                    stage: stage.to_string(),
                    message,
                },
                None,
            ),
        };
        let report = RunReport {
            model: model.name.clone(),
            run_id: ctx.run_id(),
            outcome,
            artifact,
            duration_ms: ctx.elapsed_ms(),
            notifications,
        };

        info!(success = report.is_success(), duration_ms = report.duration_ms, "Backup finished");
        ctx.emit(RUN_FINISHED, json!({ "outcome": report.outcome, "duration_ms": report.duration_ms }))
            .await;
        Ok(report)
    }

    async fn run_stages(&self, ctx: &RunContext, current: &Mutex<&'static str>) -> Result<PathBuf, StageFailure> {
        let model = ctx.model();
        let c = &self.collaborators;

        let plan = self
            .stage(ctx, current, "plan", async {
                CompressionPlanner::plan(&model.compress_with.kind).map_err(BackupError::from)
            })
            .await?;

        if !model.before_script.is_empty() {
            *current.lock() = "before_script";
            info!("Running before_script");
            let script = CommandSpec::shell(model.before_script.join("\n"));
            if let Err(e) = c.scripts.exec(&script).await {
                warn!(error = %e, "before_script failed");
            }
        }

        self.stage(ctx, current, "dump", c.data_source.dump(model)).await?;
        self.stage(ctx, current, "archive", c.archiver.archive(model)).await?;
        let artifact = self
            .stage(ctx, current, "compress", c.compressor.compress(model, &plan))
            .await?;
        let path = self
            .stage(ctx, current, "encrypt", c.encryptor.encrypt(&artifact.path, model))
            .await?;
        let path = self.stage(ctx, current, "split", c.splitter.split(&path, model)).await?;
        self.stage(ctx, current, "upload", c.storage.upload(model, &path)).await?;

        Ok(path)
    }

    async fn stage<T, F>(
        &self,
        ctx: &RunContext,
        current: &Mutex<&'static str>,
        name: &'static str,
        work: F,
    ) -> Result<T, StageFailure>
    where
        F: Future<Output = crate::errors::Result<T>>,
    {
        *current.lock() = name;
        ctx.emit(STAGE_STARTED, json!({ "stage": name })).await;
        let timer = StageTimer::start(name);

        match work.await {
            Ok(value) => {
                let duration_ms = timer.finish();
                ctx.emit(STAGE_COMPLETED, json!({ "stage": name, "duration_ms": duration_ms }))
                    .await;
                Ok(value)
            }
            Err(e) => {
                let duration_ms = timer.fail(&e);
                ctx.emit(
                    STAGE_FAILED,
                    json!({
                        "stage": name,
                        "duration_ms": duration_ms,
                        "kind": e.kind(),
                        "error": e.to_string(),
                    }),
                )
                .await;
                Err(StageFailure {
                    stage: name,
                    message: e.to_string(),
                })
            }
        }
    }

    async fn notify(&self, ctx: &RunContext, result: &Result<PathBuf, StageFailure>) -> DispatchSummary {
        let model = ctx.model();
        let event = match result {
            Ok(_) => NotificationEvent::success(model),
            Err(failure) => NotificationEvent::failure(model, &failure.message),
        };

        let summary = match AssertUnwindSafe(self.dispatcher.dispatch(model, &event))
            .catch_unwind()
            .await
        {
            Ok(summary) => summary,
            Err(_) => {
                error!("Notification dispatch panicked");
                DispatchSummary::default()
            }
        };

        ctx.emit(
            RUN_NOTIFIED,
            json!({
                "kind": event.kind,
                "delivered": summary.delivered,
                "skipped": summary.skipped,
                "failed": summary.failed.len(),
            }),
        )
        .await;
        summary
    }
}
