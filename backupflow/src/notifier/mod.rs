//! Notification fan-out.
//!
//! A run ends with one [`NotificationEvent`]. The [`NotificationDispatcher`]
//! builds one handler per configured destination, applies the destination's
//! `on_success`/`on_failure` gate and delivers. Failures stay with the
//! destination that produced them.

mod mail;
mod registry;
mod sigv4;
mod webhook;

pub use mail::MailNotifier;
pub use registry::{default_registry, NotifierFactory, NotifierRegistry};
pub use webhook::{HttpNotifier, HttpRequest, ProviderKind, SuccessPolicy};

use crate::config::{DestinationConfig, ModelConfig};
use crate::errors::DispatchError;
use crate::utils::local_timestamp;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Delivers a title and message to one destination.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends the notification.
    async fn deliver(&self, title: &str, message: &str) -> Result<(), DispatchError>;
}

/// Outcome a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Every stage completed.
    Success,
    /// A stage failed or the run faulted.
    Failure,
}

impl EventKind {
    /// Whether `destination` accepts this kind.
    #[must_use]
    pub fn enabled_for(self, destination: &DestinationConfig) -> bool {
        match self {
            Self::Success => destination.on_success,
            Self::Failure => destination.on_failure,
        }
    }
}

/// The notification sent at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Success or failure.
    pub kind: EventKind,
    /// Title line.
    pub title: String,
    /// Message body.
    pub message: String,
}

impl NotificationEvent {
    /// Success event for `model`, with `common` overrides applied.
    #[must_use]
    pub fn success(model: &ModelConfig) -> Self {
        Self::success_at(model, Local::now())
    }

    /// Success event stamped at `at`.
    #[must_use]
    pub fn success_at(model: &ModelConfig, at: DateTime<Local>) -> Self {
        let event = Self {
            kind: EventKind::Success,
            title: format!("[Backupflow] OK: Backup *{}* successful", model.name),
            message: format!(
                "Backup of *{}* completed successfully at {}",
                model.name,
                local_timestamp(at)
            ),
        };
        event.with_overrides(model.common_notifier(), "title_success", "message_success")
    }

    /// Failure event for `model` carrying `reason`.
    #[must_use]
    pub fn failure(model: &ModelConfig, reason: &str) -> Self {
        Self::failure_at(model, reason, Local::now())
    }

    /// Failure event stamped at `at`.
    #[must_use]
    pub fn failure_at(model: &ModelConfig, reason: &str, at: DateTime<Local>) -> Self {
        let event = Self {
            kind: EventKind::Failure,
            title: format!("[Backupflow] ERROR: Backup *{}* failed", model.name),
            message: format!(
                "Backup of *{}* failed at {}:\n{}\n{reason}",
                model.name,
                local_timestamp(at),
                "-".repeat(46)
            ),
        };
        event.with_overrides(model.common_notifier(), "title_failure", "message_failure")
    }

    fn with_overrides(mut self, common: Option<&DestinationConfig>, title_key: &str, message_key: &str) -> Self {
        if let Some(common) = common {
            if let Some(title) = common.get_str(title_key) {
                self.title = title;
            }
            if let Some(message) = common.get_str(message_key) {
                self.message = message;
            }
        }
        self
    }
}

/// What happened to each destination during one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Destinations that accepted the notification.
    pub delivered: Vec<String>,
    /// Destinations gated off for this event kind.
    pub skipped: Vec<String>,
    /// Destinations that failed, with the error text.
    pub failed: Vec<(String, String)>,
}

/// Fans one event out to every configured destination.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    registry: Arc<NotifierRegistry>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher resolving handlers through `registry`.
    #[must_use]
    pub fn new(registry: Arc<NotifierRegistry>) -> Self {
        Self { registry }
    }

    /// Delivers `event` to the model's destinations in name order.
    ///
    /// Never fails: every per-destination error is logged and recorded in the
    /// summary, and the remaining destinations still receive the event.
    pub async fn dispatch(&self, model: &ModelConfig, event: &NotificationEvent) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let destinations: Vec<_> = model.destinations().collect();
        info!(model = %model.name, count = destinations.len(), kind = ?event.kind, "Running notifiers");

        for (name, config) in destinations {
            let notifier = match self.registry.build(name, config) {
                Ok(notifier) => notifier,
                Err(e) => {
                    error!(model = %model.name, destination = %name, error = %e, "Notifier unavailable");
                    summary.failed.push((name.clone(), e.to_string()));
                    continue;
                }
            };

            if !event.kind.enabled_for(config) {
                summary.skipped.push(name.clone());
                continue;
            }

            match notifier.deliver(&event.title, &event.message).await {
                Ok(()) => {
                    info!(model = %model.name, destination = %name, "Notified");
                    summary.delivered.push(name.clone());
                }
                Err(e) => {
                    warn!(model = %model.name, destination = %name, error = %e, "Notification failed");
                    summary.failed.push((name.clone(), e.to_string()));
                }
            }
        }

        summary
    }
}
