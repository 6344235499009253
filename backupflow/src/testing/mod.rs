//! Test doubles and fixtures.
//!
//! [`RecordingExecutor`] stands in for process spawning, [`FakeCollaborator`]
//! for every stage of a run and [`recording_registry`] for the notification
//! providers.

mod fixtures;
mod mocks;

pub use fixtures::{database_model, files_model, with_destination};
pub use mocks::{
    recording_registry, Behavior, CallLog, DeliveryLog, FakeCollaborator, RecordingExecutor,
};
