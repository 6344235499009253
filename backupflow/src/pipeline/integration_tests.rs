//! End-to-end runs against fake collaborators.

use crate::config::DestinationConfig;
use crate::events::{
    CollectingEventSink, RUN_CLEANUP, RUN_FAULT, RUN_FINISHED, RUN_NOTIFIED, RUN_STARTED, STAGE_FAILED,
};
use crate::notifier::{NotificationDispatcher, NotifierRegistry};
use crate::pipeline::{Collaborators, PipelineRunner, RunOutcome};
use crate::process::ToolCapabilities;
use crate::stages::MockStorage;
use crate::testing::{
    files_model, recording_registry, with_destination, Behavior, CallLog, FakeCollaborator,
    RecordingExecutor,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;

fn runner(collaborators: Collaborators, registry: NotifierRegistry, sink: &Arc<CollectingEventSink>) -> PipelineRunner {
    PipelineRunner::new(collaborators, NotificationDispatcher::new(Arc::new(registry)))
        .with_event_sink(sink.clone())
}

fn position(types: &[String], event_type: &str) -> usize {
    types
        .iter()
        .position(|t| t == event_type)
        .unwrap_or_else(|| panic!("missing event {event_type}"))
}

fn notified_model(workdir: &Path) -> crate::config::ModelConfig {
    with_destination(files_model("files", workdir), "ops", DestinationConfig::new("record"))
}

#[tokio::test]
async fn test_successful_run_visits_every_stage() {
    let workdir = tempfile::tempdir().unwrap();
    let model = Arc::new(notified_model(workdir.path()));
    let log = CallLog::new();
    let fake = Arc::new(FakeCollaborator::new(log.clone()));
    let (registry, deliveries) = recording_registry();
    let sink = Arc::new(CollectingEventSink::new());

    let report = runner(fake.collaborators(), registry, &sink)
        .perform(model.clone())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.artifact, Some(model.temp_path.join("files.tar.gz")));
    assert_eq!(
        log.entries(),
        vec!["dump", "archive", "compress", "encrypt", "split", "upload", "cleanup"]
    );
    assert_eq!(deliveries.titles(), vec!["[Backupflow] OK: Backup *files* successful"]);
    assert_eq!(report.notifications.delivered, vec!["ops"]);

    let types = sink.types();
    assert_eq!(types.first().map(String::as_str), Some(RUN_STARTED));
    assert_eq!(types.last().map(String::as_str), Some(RUN_FINISHED));
    assert!(position(&types, RUN_NOTIFIED) < position(&types, RUN_CLEANUP));
    assert_eq!(sink.first(RUN_FINISHED).unwrap()["model"], "files");
}

#[tokio::test]
async fn test_archive_failure_skips_later_stages() {
    let workdir = tempfile::tempdir().unwrap();
    let model = Arc::new(notified_model(workdir.path()));
    let log = CallLog::new();
    let fake = Arc::new(FakeCollaborator::new(log.clone()).with("archive", Behavior::Fail("disk full".into())));
    let (registry, deliveries) = recording_registry();
    let sink = Arc::new(CollectingEventSink::new());

    let report = runner(fake.collaborators(), registry, &sink)
        .perform(model)
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        RunOutcome::Failed {
            stage: "archive".to_string(),
            message: "archive: disk full".to_string(),
        }
    );
    assert_eq!(report.artifact, None);
    for skipped in ["compress", "encrypt", "split", "upload"] {
        assert!(!log.contains(skipped), "{skipped} ran after a failed archive");
    }
    assert_eq!(log.count("cleanup"), 1);

    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries.titles(), vec!["[Backupflow] ERROR: Backup *files* failed"]);
    assert!(deliveries.messages()[0].ends_with("archive: disk full"));

    let failed = sink.first(STAGE_FAILED).unwrap();
    assert_eq!(failed["stage"], "archive");
    assert_eq!(failed["kind"], "stage");
}

#[tokio::test]
async fn test_upload_panic_cleans_up_before_escalating() {
    let workdir = tempfile::tempdir().unwrap();
    let model = Arc::new(notified_model(workdir.path()));
    let log = CallLog::new();
    let fake = Arc::new(FakeCollaborator::new(log.clone()).with("upload", Behavior::Panic("bucket vanished".into())));
    let (registry, deliveries) = recording_registry();
    let sink = Arc::new(CollectingEventSink::new());

    let fault = runner(fake.collaborators(), registry, &sink)
        .perform(model)
        .await
        .unwrap_err();

    assert_eq!(fault.model, "files");
    assert_eq!(fault.stage, "upload");
    assert_eq!(fault.message, "bucket vanished");

    assert_eq!(log.count("cleanup"), 1);
    assert!(log.position("upload") < log.position("cleanup"));

    let types = sink.types();
    assert!(position(&types, RUN_CLEANUP) < position(&types, RUN_FAULT));
    assert!(!types.iter().any(|t| t == RUN_FINISHED));

    assert_eq!(deliveries.len(), 1);
    assert!(deliveries.messages()[0].contains("PANIC in model 'files' during upload: bucket vanished"));
}

#[tokio::test]
async fn test_unknown_compression_spawns_nothing() {
    let workdir = tempfile::tempdir().unwrap();
    let mut model = notified_model(workdir.path());
    model.compress_with.kind = "rar".to_string();
    model.before_script = vec!["echo start".to_string()];
    let executor = Arc::new(RecordingExecutor::new());
    let collaborators = Collaborators::with_executor(executor.clone(), ToolCapabilities::new(true, None));
    let (registry, deliveries) = recording_registry();
    let sink = Arc::new(CollectingEventSink::new());

    let report = runner(collaborators, registry, &sink)
        .perform(Arc::new(model))
        .await
        .unwrap();

    assert_eq!(executor.call_count(), 0);
    assert!(matches!(report.outcome, RunOutcome::Failed { ref stage, .. } if stage == "plan"));
    assert!(deliveries.messages()[0].ends_with("Unsupported compress type: rar"));
}

#[tokio::test]
async fn test_before_script_failure_does_not_abort() {
    let workdir = tempfile::tempdir().unwrap();
    let mut model = files_model("files", workdir.path());
    model.before_script = vec!["exit 1".to_string()];
    let log = CallLog::new();
    let fake = Arc::new(FakeCollaborator::new(log.clone()).with("script", Behavior::Fail("exit 1".into())));
    let (registry, _) = recording_registry();
    let sink = Arc::new(CollectingEventSink::new());

    let report = runner(fake.collaborators(), registry, &sink)
        .perform(Arc::new(model))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(log.entries()[0], "script");
    assert!(log.contains("upload"));
}

#[tokio::test]
async fn test_cleanup_panic_is_contained() {
    let workdir = tempfile::tempdir().unwrap();
    let log = CallLog::new();
    let fake = Arc::new(FakeCollaborator::new(log.clone()).with("cleanup", Behavior::Panic("rm failed".into())));
    let (registry, _) = recording_registry();
    let sink = Arc::new(CollectingEventSink::new());

    let report = runner(fake.collaborators(), registry, &sink)
        .perform(Arc::new(files_model("files", workdir.path())))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(log.count("cleanup"), 1);
    assert_eq!(sink.first(RUN_CLEANUP).unwrap()["ok"], false);
}

#[tokio::test]
async fn test_notifier_panic_still_cleans_up() {
    let workdir = tempfile::tempdir().unwrap();
    let model = with_destination(files_model("files", workdir.path()), "pager", DestinationConfig::new("panic"));
    let log = CallLog::new();
    let fake = Arc::new(FakeCollaborator::new(log.clone()));
    let (registry, _) = recording_registry();
    let sink = Arc::new(CollectingEventSink::new());

    let report = runner(fake.collaborators(), registry, &sink)
        .perform(Arc::new(model))
        .await
        .unwrap();

    assert!(report.is_success());
    assert!(report.notifications.delivered.is_empty());
    assert_eq!(log.count("cleanup"), 1);

    let types = sink.types();
    assert!(position(&types, RUN_NOTIFIED) < position(&types, RUN_CLEANUP));
    assert_eq!(types.last().map(String::as_str), Some(RUN_FINISHED));
}

#[tokio::test]
async fn test_upload_receives_threaded_artifact() {
    let workdir = tempfile::tempdir().unwrap();
    let model = Arc::new(files_model("files", workdir.path()));
    let expected = model.temp_path.join("files.tar.gz");

    let mut storage = MockStorage::new();
    storage
        .expect_upload()
        .withf(move |model, path| model.name == "files" && path.to_path_buf() == expected)
        .times(1)
        .returning(|_, _| Ok(()));

    let fake = Arc::new(FakeCollaborator::new(CallLog::new()));
    let mut collaborators = fake.collaborators();
    collaborators.storage = Arc::new(storage);
    let (registry, _) = recording_registry();
    let sink = Arc::new(CollectingEventSink::new());

    let report = runner(collaborators, registry, &sink).perform(model).await.unwrap();
    assert!(report.is_success());
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let workdir = tempfile::tempdir().unwrap();
    let log = CallLog::new();
    let fake = Arc::new(FakeCollaborator::new(log.clone()));
    let (registry, _) = recording_registry();
    let sink = Arc::new(CollectingEventSink::new());
    let runner = runner(fake.collaborators(), registry, &sink);

    let results = runner
        .perform_all([
            Arc::new(files_model("alpha", workdir.path())),
            Arc::new(files_model("beta", workdir.path())),
        ])
        .await;

    assert_eq!(results.len(), 2);
    let ids: Vec<_> = results
        .iter()
        .map(|(_, result)| result.as_ref().unwrap().run_id)
        .collect();
    assert_ne!(ids[0], ids[1]);
    assert_eq!(results[0].0, "alpha");
    assert_eq!(log.count("cleanup"), 2);
}
