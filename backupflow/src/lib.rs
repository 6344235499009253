//! # Backupflow
//!
//! A backup pipeline engine. Each configured model runs through a fixed
//! sequence of stages:
//!
//! - **dump**: database dumps into the model's dump directory
//! - **archive / compress**: one `tar` invocation producing the artifact,
//!   with a parallel codec substituted when one is installed
//! - **encrypt / split**: optional transforms of the artifact
//! - **upload**: every configured storage
//!
//! Every run ends with exactly one notification and exactly one cleanup
//! pass, and a panic inside a stage is escalated as a [`errors::Fault`] only
//! after cleanup has run.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use backupflow::prelude::*;
//! use std::sync::Arc;
//!
//! let config = Config::load("backupflow.yml")?;
//! let runner = PipelineRunner::with_defaults()?;
//! for model in config.models.into_values() {
//!     let report = runner.perform(Arc::new(model)).await?;
//!     println!("{}: {:?}", report.model, report.outcome);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod archive;
pub mod compression;
pub mod config;
pub mod errors;
pub mod events;
pub mod notifier;
pub mod observability;
pub mod pipeline;
pub mod process;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::compression::{CompressionPlan, CompressionPlanner, TarCompressor};
    pub use crate::config::{Config, DestinationConfig, ModelConfig};
    pub use crate::errors::{BackupError, ConfigError, DispatchError, Fault, StageError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::notifier::{
        default_registry, EventKind, NotificationDispatcher, NotificationEvent, NotifierRegistry,
    };
    pub use crate::observability::{init_logging, LogConfig};
    pub use crate::pipeline::{Collaborators, PipelineRunner, RunOutcome, RunReport};
    pub use crate::process::{CommandExecutor, CommandSpec, SystemExecutor, ToolCapabilities};
    pub use crate::stages::{ArchiveResult, Storage, StorageSet};
}
