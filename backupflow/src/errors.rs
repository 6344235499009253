//! Error types for backupflow.
//!
//! The taxonomy mirrors how a run reacts to each failure:
//! - [`ConfigError`] aborts the run before external work starts.
//! - [`StageError`] aborts the remaining stages of the current run.
//! - [`DispatchError`] is confined to one notification destination.
//! - [`Fault`] is an unexpected runtime fault, escalated after cleanup.

use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BackupError>;

/// The main error type for backupflow operations.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Invalid or missing configuration.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// An external tool or collaborator failed.
    #[error("{0}")]
    Stage(#[from] StageError),

    /// A notification destination failed.
    #[error("{0}")]
    Dispatch(#[from] DispatchError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Short machine-readable kind, used in run events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Stage(_) => "stage",
            Self::Dispatch(_) => "dispatch",
            Self::Io(_) => "io",
        }
    }
}

/// Error raised for invalid or missing settings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ConfigError {
    /// The error message.
    pub message: String,
    /// Dotted path of the offending setting, when known.
    pub key: Option<String>,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            key: None,
        }
    }

    /// Sets the offending key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::new(format!("Invalid config: {err}"))
    }
}

/// Errors raised by external tools and stage collaborators.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// The program ran and exited unsuccessfully.
    #[error("{program} exited with code {code}: {}", output_excerpt(.stderr, .stdout))]
    CommandFailed {
        /// Program name.
        program: String,
        /// Exit code (-1 when terminated by a signal).
        code: i32,
        /// Captured stdout.
        stdout: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The program could not be started.
    #[error("failed to spawn {program}: {reason}")]
    Spawn {
        /// Program name.
        program: String,
        /// The underlying reason.
        reason: String,
    },

    /// The program exceeded its timeout.
    #[error("{program} timed out after {timeout_secs}s")]
    Timeout {
        /// Program name.
        program: String,
        /// Timeout in seconds.
        timeout_secs: u64,
    },

    /// A collaborator failed without an external process.
    #[error("{stage}: {message}")]
    Collaborator {
        /// The stage name.
        stage: String,
        /// The failure message.
        message: String,
    },
}

impl StageError {
    /// Creates a collaborator error.
    #[must_use]
    pub fn collaborator(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Converts to a dictionary representation for run events.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        match self {
            Self::CommandFailed {
                program,
                code,
                stdout,
                stderr,
            } => {
                map.insert("type".to_string(), json!("CommandFailed"));
                map.insert("program".to_string(), json!(program));
                map.insert("code".to_string(), json!(code));
                map.insert("stdout".to_string(), json!(stdout));
                map.insert("stderr".to_string(), json!(stderr));
            }
            Self::Spawn { program, reason } => {
                map.insert("type".to_string(), json!("Spawn"));
                map.insert("program".to_string(), json!(program));
                map.insert("reason".to_string(), json!(reason));
            }
            Self::Timeout {
                program,
                timeout_secs,
            } => {
                map.insert("type".to_string(), json!("Timeout"));
                map.insert("program".to_string(), json!(program));
                map.insert("timeout_secs".to_string(), json!(timeout_secs));
            }
            Self::Collaborator { stage, message } => {
                map.insert("type".to_string(), json!("Collaborator"));
                map.insert("stage".to_string(), json!(stage));
                map.insert("reason".to_string(), json!(message));
            }
        }
        map.insert("message".to_string(), json!(self.to_string()));
        map
    }
}

fn output_excerpt<'a>(stderr: &'a str, stdout: &'a str) -> &'a str {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        stdout.trim()
    } else {
        stderr
    }
}

/// Errors confined to a single notification destination.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The destination's type tag is not registered.
    #[error("Notifier: {name} has unsupported type '{type_tag}'")]
    UnsupportedType {
        /// Destination name.
        name: String,
        /// The unknown type tag.
        type_tag: String,
    },

    /// A required provider setting is missing.
    #[error("Notifier: {name} is missing setting '{key}'")]
    MissingSetting {
        /// Destination name.
        name: String,
        /// The missing key.
        key: String,
    },

    /// The provider answered with a status outside its success predicate.
    #[error("{service}: status {status}, body: {body}")]
    Rejected {
        /// Provider service name.
        service: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The request could not be sent or the local relay failed.
    #[error("{service}: {reason}")]
    Transport {
        /// Provider service name.
        service: String,
        /// The underlying reason.
        reason: String,
    },
}

impl DispatchError {
    /// Creates a missing setting error.
    #[must_use]
    pub fn missing(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingSetting {
            name: name.into(),
            key: key.into(),
        }
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            service: service.into(),
            reason: reason.to_string(),
        }
    }
}

/// An unexpected runtime fault (panic) intercepted at the run boundary.
#[derive(Debug, Clone, Error)]
#[error("PANIC in model '{model}' during {stage}: {message}")]
pub struct Fault {
    /// The model whose run faulted.
    pub model: String,
    /// The stage that was executing when the fault occurred.
    pub stage: String,
    /// The panic payload rendered as text.
    pub message: String,
}

impl Fault {
    /// Builds a fault from a caught panic payload.
    #[must_use]
    pub fn from_panic(
        model: impl Into<String>,
        stage: impl Into<String>,
        payload: &(dyn std::any::Any + Send),
    ) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };

        Self {
            model: model.into(),
            stage: stage.into(),
            message,
        }
    }
}
