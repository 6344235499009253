//! Run events.
//!
//! The runner reports its progress to an [`EventSink`] passed in explicitly.
//! Every payload carries the `model` and `run_id` of the run it belongs to.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run began.
pub const RUN_STARTED: &str = "run.started";
/// A stage began.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage completed.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage failed and the remaining stages are skipped.
pub const STAGE_FAILED: &str = "stage.failed";
/// The end-of-run notification was dispatched.
pub const RUN_NOTIFIED: &str = "run.notified";
/// The run's working directory was cleaned up.
pub const RUN_CLEANUP: &str = "run.cleanup";
/// The run faulted; emitted after cleanup.
pub const RUN_FAULT: &str = "run.fault";
/// The run reached its terminal state without a fault.
pub const RUN_FINISHED: &str = "run.finished";
