//! Test doubles for executors, collaborators and notifiers.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::compression::CompressionPlan;
use crate::config::ModelConfig;
use crate::errors::{DispatchError, Result, StageError};
use crate::notifier::{Notifier, NotifierRegistry};
use crate::pipeline::{Cleaner, Collaborators};
use crate::process::{CommandExecutor, CommandOutput, CommandSpec};
use crate::stages::{
    ArchiveResult, Archiver, Compressor, DataSource, Encryptor, FileEntry, Splitter, Storage,
};

/// Records every command instead of spawning it.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<CommandSpec>>,
    failures: Mutex<HashMap<String, String>>,
}

impl RecordingExecutor {
    /// Creates an executor where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call to `program` exit with code 1 and `stderr`.
    pub fn fail_program(&self, program: impl Into<String>, stderr: impl Into<String>) {
        self.failures.lock().insert(program.into(), stderr.into());
    }

    /// Commands executed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    /// Number of commands executed so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn exec(&self, spec: &CommandSpec) -> std::result::Result<CommandOutput, StageError> {
        self.calls.lock().push(spec.clone());
        match self.failures.lock().get(&spec.program) {
            Some(stderr) => Err(StageError::CommandFailed {
                program: spec.program.clone(),
                code: 1,
                stdout: String::new(),
                stderr: stderr.clone(),
            }),
            None => Ok(CommandOutput::default()),
        }
    }
}

/// Shared, ordered log of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry`.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// All entries, in call order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// How often `entry` was recorded.
    #[must_use]
    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }

    /// Index of the first `entry`.
    #[must_use]
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    /// Whether `entry` was recorded.
    #[must_use]
    pub fn contains(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }
}

/// What a [`FakeCollaborator`] does when a stage reaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Return success.
    Succeed,
    /// Return a stage error with this message.
    Fail(String),
    /// Panic with this message.
    Panic(String),
}

/// One object standing in for every stage collaborator.
///
/// Each call is recorded in the [`CallLog`] under the stage name (`dump`,
/// `archive`, `compress`, `encrypt`, `split`, `upload`, `cleanup`, `script`)
/// before the configured [`Behavior`] is applied.
#[derive(Debug, Default)]
pub struct FakeCollaborator {
    log: CallLog,
    behaviors: Mutex<HashMap<&'static str, Behavior>>,
}

impl FakeCollaborator {
    /// Creates a fake where every stage succeeds.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            behaviors: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the behavior of `stage`.
    #[must_use]
    pub fn with(self, stage: &'static str, behavior: Behavior) -> Self {
        self.behaviors.lock().insert(stage, behavior);
        self
    }

    /// Wires this fake into every collaborator slot.
    #[must_use]
    pub fn collaborators(self: Arc<Self>) -> Collaborators {
        Collaborators {
            data_source: self.clone(),
            archiver: self.clone(),
            compressor: self.clone(),
            encryptor: self.clone(),
            splitter: self.clone(),
            storage: self.clone(),
            cleaner: self.clone(),
            scripts: self,
        }
    }

    fn act(&self, stage: &'static str) -> Result<()> {
        self.log.record(stage);
        let behavior = self
            .behaviors
            .lock()
            .get(stage)
            .cloned()
            .unwrap_or(Behavior::Succeed);
        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(message) => Err(StageError::collaborator(stage, message).into()),
            Behavior::Panic(message) => panic!("{message}"),
        }
    }
}

#[async_trait]
impl DataSource for FakeCollaborator {
    async fn dump(&self, _model: &ModelConfig) -> Result<()> {
        self.act("dump")
    }
}

#[async_trait]
impl Archiver for FakeCollaborator {
    async fn archive(&self, _model: &ModelConfig) -> Result<()> {
        self.act("archive")
    }
}

#[async_trait]
impl Compressor for FakeCollaborator {
    async fn compress(&self, model: &ModelConfig, plan: &CompressionPlan) -> Result<ArchiveResult> {
        self.act("compress")?;
        let path = model
            .temp_path
            .join(format!("{}{}", model.name, plan.extension));
        Ok(ArchiveResult::new(path, plan.extension))
    }
}

#[async_trait]
impl Encryptor for FakeCollaborator {
    async fn encrypt(&self, path: &Path, _model: &ModelConfig) -> Result<PathBuf> {
        self.act("encrypt")?;
        Ok(path.to_path_buf())
    }
}

#[async_trait]
impl Splitter for FakeCollaborator {
    async fn split(&self, path: &Path, _model: &ModelConfig) -> Result<PathBuf> {
        self.act("split")?;
        Ok(path.to_path_buf())
    }
}

#[async_trait]
impl Storage for FakeCollaborator {
    async fn upload(&self, _model: &ModelConfig, _path: &Path) -> Result<()> {
        self.act("upload")
    }

    async fn list(&self, _model: &ModelConfig, _parent: &str) -> Result<Vec<FileEntry>> {
        Ok(Vec::new())
    }

    async fn download(&self, _model: &ModelConfig, path: &str) -> Result<String> {
        Ok(format!("fake://{path}"))
    }
}

#[async_trait]
impl Cleaner for FakeCollaborator {
    async fn cleanup(&self, _model: &ModelConfig) -> Result<()> {
        self.act("cleanup")
    }
}

#[async_trait]
impl CommandExecutor for FakeCollaborator {
    async fn exec(&self, spec: &CommandSpec) -> std::result::Result<CommandOutput, StageError> {
        self.act("script").map_err(|e| StageError::collaborator("script", e.to_string()))?;
        Ok(CommandOutput {
            stdout: spec.display(),
            ..CommandOutput::default()
        })
    }
}

/// Deliveries seen by the `record` notifier of [`recording_registry`].
#[derive(Debug, Clone, Default)]
pub struct DeliveryLog {
    deliveries: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl DeliveryLog {
    /// Destination names, in delivery order.
    #[must_use]
    pub fn destinations(&self) -> Vec<String> {
        self.deliveries.lock().iter().map(|(d, _, _)| d.clone()).collect()
    }

    /// Delivered titles, in delivery order.
    #[must_use]
    pub fn titles(&self) -> Vec<String> {
        self.deliveries.lock().iter().map(|(_, t, _)| t.clone()).collect()
    }

    /// Delivered messages, in delivery order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.deliveries.lock().iter().map(|(_, _, m)| m.clone()).collect()
    }

    /// Number of deliveries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Whether nothing was delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deliveries.lock().is_empty()
    }

    /// Forgets every delivery.
    pub fn clear(&self) {
        self.deliveries.lock().clear();
    }
}

struct RecordingNotifier {
    name: String,
    log: DeliveryLog,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, title: &str, message: &str) -> std::result::Result<(), DispatchError> {
        self.log
            .deliveries
            .lock()
            .push((self.name.clone(), title.to_string(), message.to_string()));
        Ok(())
    }
}

struct BrokenNotifier;

#[async_trait]
impl Notifier for BrokenNotifier {
    async fn deliver(&self, _title: &str, _message: &str) -> std::result::Result<(), DispatchError> {
        Err(DispatchError::transport("broken", "connection refused"))
    }
}

struct PanickingNotifier;

#[async_trait]
impl Notifier for PanickingNotifier {
    async fn deliver(&self, _title: &str, _message: &str) -> std::result::Result<(), DispatchError> {
        panic!("notifier crashed")
    }
}

/// A registry with three providers: `record`, which logs every delivery,
/// `broken`, which always fails, and `panic`, which panics on delivery.
#[must_use]
pub fn recording_registry() -> (NotifierRegistry, DeliveryLog) {
    let log = DeliveryLog::default();
    let mut registry = NotifierRegistry::empty();

    let record_log = log.clone();
    registry.register("record", move |name, _config| {
        let notifier: Box<dyn Notifier> = Box::new(RecordingNotifier {
            name: name.to_string(),
            log: record_log.clone(),
        });
        Ok(notifier)
    });
    registry.register("broken", |_name, _config| {
        let notifier: Box<dyn Notifier> = Box::new(BrokenNotifier);
        Ok(notifier)
    });
    registry.register("panic", |_name, _config| {
        let notifier: Box<dyn Notifier> = Box::new(PanickingNotifier);
        Ok(notifier)
    });

    (registry, log)
}
