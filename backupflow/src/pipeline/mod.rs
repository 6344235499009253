//! Run orchestration.
//!
//! [`PipelineRunner`] drives one model through its stages with an explicit
//! [`RunContext`]; [`CleanupGuard`] makes the end-of-run cleanup happen
//! exactly once on every path.

mod cleanup;
mod context;
mod runner;

#[cfg(test)]
mod integration_tests;

pub use cleanup::{Cleaner, CleanupGuard, WorkdirCleaner};
pub use context::RunContext;
pub use runner::{Collaborators, PipelineRunner, RunOutcome, RunReport};
