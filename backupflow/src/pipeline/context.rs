//! Per-run context.

use crate::config::ModelConfig;
use crate::events::{EventSink, NoOpEventSink};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::Span;
use uuid::Uuid;

/// Everything one run carries: the model, its identity, the log span and
/// the event sink.
///
/// Passed explicitly to every step of the run instead of living in globals,
/// so concurrent runs never see each other's state.
#[derive(Clone)]
pub struct RunContext {
    model: Arc<ModelConfig>,
    run_id: Uuid,
    span: Span,
    events: Arc<dyn EventSink>,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("model", &self.model.name)
            .field("run_id", &self.run_id)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Creates a context for one run of `model`.
    #[must_use]
    pub fn new(model: Arc<ModelConfig>, events: Arc<dyn EventSink>) -> Self {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", model = %model.name, run_id = %run_id);
        Self {
            model,
            run_id,
            span,
            events,
            started_at: Utc::now(),
        }
    }

    /// Creates a context that discards events.
    #[must_use]
    pub fn detached(model: Arc<ModelConfig>) -> Self {
        Self::new(model, Arc::new(NoOpEventSink))
    }

    /// The model being run.
    #[must_use]
    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    /// Unique id of this run.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Span tagging every log line of this run.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The event sink.
    #[must_use]
    pub fn events(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.events)
    }

    /// When the run started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Milliseconds since the run started.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from((Utc::now() - self.started_at).num_milliseconds()).unwrap_or(0)
    }

    /// Emits `event_type`, merging `data` with the run's identity.
    pub async fn emit(&self, event_type: &str, data: Value) {
        self.events.emit(event_type, Some(self.payload(data))).await;
    }

    pub(crate) fn payload(&self, data: Value) -> Value {
        let mut payload = json!({
            "model": self.model.name,
            "run_id": self.run_id.to_string(),
        });
        if let (Some(target), Value::Object(extra)) = (payload.as_object_mut(), data) {
            target.extend(extra);
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;

    #[tokio::test]
    async fn test_emit_carries_identity() {
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = RunContext::new(Arc::new(ModelConfig::new("db")), sink.clone());

        ctx.emit("stage.started", json!({ "stage": "dump" })).await;

        let data = sink.first("stage.started").unwrap();
        assert_eq!(data["model"], "db");
        assert_eq!(data["stage"], "dump");
        assert_eq!(data["run_id"], ctx.run_id().to_string());
    }

    #[test]
    fn test_run_ids_are_unique() {
        let model = Arc::new(ModelConfig::new("db"));
        let a = RunContext::detached(model.clone());
        let b = RunContext::detached(model);
        assert_ne!(a.run_id(), b.run_id());
    }
}
