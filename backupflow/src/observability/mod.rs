//! Logging setup and stage timing.
//!
//! The library only emits `tracing` events. Binaries call [`init_logging`]
//! once to install a subscriber; per-run fields come from the span held by
//! the run context.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: Level,
    /// Emit newline-delimited JSON.
    pub json: bool,
    /// Add file and line locations and lower the default level to `DEBUG`.
    pub debug: bool,
    /// Append plain-text log lines to this file as well.
    pub log_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            debug: debug_from_env(),
            log_file: None,
        }
    }
}

impl LogConfig {
    /// Enables debug mode.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = self.debug || debug;
        self
    }

    /// Enables JSON output.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Sets the log file.
    #[must_use]
    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    fn default_directive(&self) -> &'static str {
        if self.debug {
            Level::DEBUG.as_str()
        } else {
            self.level.as_str()
        }
    }
}

fn debug_from_env() -> bool {
    std::env::var("DEBUG").is_ok_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

/// Installs the global subscriber.
///
/// Only the first call takes effect. Fails only when the log file cannot be
/// opened.
pub fn init_logging(config: &LogConfig) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let stdout = if config.json {
        fmt::layer()
            .json()
            .with_file(config.debug)
            .with_line_number(config.debug)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_file(config.debug)
            .with_line_number(config.debug)
            .boxed()
    };

    let file = match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init()
        .ok();

    Ok(())
}

/// Logs the start and end of one stage with its duration.
#[derive(Debug)]
pub struct StageTimer {
    stage: &'static str,
    start: Instant,
}

impl StageTimer {
    /// Starts timing `stage`.
    #[must_use]
    pub fn start(stage: &'static str) -> Self {
        info!(stage, "Stage started");
        Self {
            stage,
            start: Instant::now(),
        }
    }

    /// Milliseconds since the stage started.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Logs completion and returns the duration.
    pub fn finish(self) -> u64 {
        let duration_ms = self.elapsed_ms();
        info!(stage = self.stage, duration_ms, "Stage completed");
        duration_ms
    }

    /// Logs the failure and returns the duration.
    pub fn fail(self, error: &dyn std::fmt::Display) -> u64 {
        let duration_ms = self.elapsed_ms();
        error!(stage = self.stage, duration_ms, error = %error, "Stage failed");
        duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        let config = LogConfig {
            debug: false,
            ..LogConfig::default()
        };
        assert_eq!(config.default_directive(), "INFO");
        assert_eq!(config.with_debug(true).default_directive(), "DEBUG");
    }

    #[test]
    fn test_builders() {
        let config = LogConfig::default()
            .with_json(true)
            .with_log_file(Some(PathBuf::from("/tmp/backupflow.log")));
        assert!(config.json);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/backupflow.log")));
    }

    #[test]
    fn test_init_logging_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/backupflow.log");
        let config = LogConfig::default().with_log_file(Some(path.clone()));

        init_logging(&config).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_stage_timer() {
        let timer = StageTimer::start("compress");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.finish() >= 5);
    }
}
