//! backupflow CLI - run, check and inspect backup models.

use anyhow::{anyhow, bail, Context, Result};
use backupflow::config::{Config, ModelConfig};
use backupflow::events::{EventSink, LoggingEventSink, NoOpEventSink};
use backupflow::observability::{init_logging, LogConfig};
use backupflow::pipeline::PipelineRunner;
use backupflow::stages::{Storage, StorageSet};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "backupflow")]
#[command(about = "Backup pipeline runner")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "BACKUPFLOW_CONFIG", default_value = "backupflow.yml")]
    config: PathBuf,

    /// Append log lines to this file (overrides `log_file` in the config)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Debug logging with source locations and run events
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run models now
    Perform {
        /// Models to run; all models when omitted
        #[arg(short, long = "model")]
        models: Vec<String>,

        /// Print each run report as JSON on stdout
        #[arg(long)]
        output_json: bool,
    },

    /// Validate the configuration and print each model's plan
    Check,

    /// List stored artifacts of a model
    List {
        /// Model name
        #[arg(short, long)]
        model: String,

        /// Storage to read; the first configured storage when omitted
        #[arg(short, long)]
        storage: Option<String>,

        /// Directory below the storage root
        #[arg(default_value = "")]
        path: String,
    },

    /// Print a download URL for a stored artifact
    Download {
        /// Model name
        #[arg(short, long)]
        model: String,

        /// Storage to read; the first configured storage when omitted
        #[arg(short, long)]
        storage: Option<String>,

        /// Path below the storage root
        path: String,
    },
}

const EXIT_FAILED: u8 = 1;
const EXIT_FAULT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "backupflow failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FAILED)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let log_config = LogConfig::default()
        .with_debug(cli.debug)
        .with_json(cli.json_logs)
        .with_log_file(cli.log_file.clone().or_else(|| config.log_file.clone()));
    init_logging(&log_config).context("opening log file")?;
    info!(config = %cli.config.display(), models = config.models.len(), "Loaded configuration");

    match cli.command {
        Commands::Perform { models, output_json } => {
            let selected = select_models(&config, &models)?;
            let events: Arc<dyn EventSink> = if log_config.debug {
                Arc::new(LoggingEventSink::debug())
            } else {
                Arc::new(NoOpEventSink)
            };
            let runner = PipelineRunner::with_defaults()?.with_event_sink(events);
            perform(&runner, selected, output_json).await
        }
        Commands::Check => {
            for model in config.models.values() {
                let plan = backupflow::compression::CompressionPlanner::plan(&model.compress_with.kind)?;
                println!(
                    "{}: {} databases, {} includes, {} storages, {} notifiers, artifact *{}",
                    model.name,
                    model.databases.len(),
                    model.archive_includes().len(),
                    model.storages.len(),
                    model.destinations().count(),
                    plan.extension,
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::List { model, storage, path } => {
            let model = find_model(&config, &model)?;
            let storage = StorageSet::select(model, storage.as_deref())?;
            for entry in storage.list(model, &path).await? {
                let kind = if entry.is_dir { "dir" } else { "file" };
                let modified = entry.modified.map(|t| t.to_rfc3339()).unwrap_or_default();
                println!("{kind}\t{}\t{modified}\t{}", entry.size, entry.name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Download { model, storage, path } => {
            let model = find_model(&config, &model)?;
            let storage = StorageSet::select(model, storage.as_deref())?;
            println!("{}", storage.download(model, &path).await?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn perform(runner: &PipelineRunner, models: Vec<Arc<ModelConfig>>, output_json: bool) -> Result<ExitCode> {
    let mut code = ExitCode::SUCCESS;
    let mut faulted = false;

    for (name, result) in runner.perform_all(models).await {
        match result {
            Ok(report) => {
                if output_json {
                    println!("{}", serde_json::to_string(&report)?);
                }
                if !report.is_success() {
                    code = ExitCode::from(EXIT_FAILED);
                }
            }
            Err(fault) => {
                error!(model = %name, error = %fault, "Run faulted");
                eprintln!("{fault}");
                faulted = true;
            }
        }
    }

    Ok(if faulted { ExitCode::from(EXIT_FAULT) } else { code })
}

fn find_model<'a>(config: &'a Config, name: &str) -> Result<&'a ModelConfig> {
    config.model(name).ok_or_else(|| anyhow!("Model {name} is not configured"))
}

fn select_models(config: &Config, names: &[String]) -> Result<Vec<Arc<ModelConfig>>> {
    if names.is_empty() {
        if config.models.is_empty() {
            bail!("No models configured");
        }
        return Ok(config.models.values().cloned().map(Arc::new).collect());
    }
    names
        .iter()
        .map(|name| find_model(config, name).map(|m| Arc::new(m.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r"
workdir: /tmp/backupflow-cli-test
models:
  app:
    archive:
      includes: [/etc/app]
  db:
    databases:
      main:
        type: postgresql
        database: app
";

    #[test]
    fn test_parse_perform() {
        let cli = Cli::try_parse_from([
            "backupflow", "-c", "/etc/backupflow.yml", "--debug", "perform", "-m", "app", "-m", "db",
        ])
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.config, PathBuf::from("/etc/backupflow.yml"));
        match cli.command {
            Commands::Perform { models, output_json } => {
                assert_eq!(models, vec!["app", "db"]);
                assert!(!output_json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_list_requires_model() {
        assert!(Cli::try_parse_from(["backupflow", "list"]).is_err());
        let cli = Cli::try_parse_from(["backupflow", "list", "--model", "app", "2024"]).unwrap();
        assert!(matches!(cli.command, Commands::List { ref path, storage: None, .. } if path == "2024"));
    }

    #[test]
    fn test_parse_storage_selection() {
        let cli = Cli::try_parse_from(["backupflow", "list", "-m", "app", "--storage", "offsite"]).unwrap();
        match cli.command {
            Commands::List { storage, path, .. } => {
                assert_eq!(storage.as_deref(), Some("offsite"));
                assert_eq!(path, "");
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["backupflow", "download", "-m", "app", "-s", "disk", "a.tar"]).unwrap();
        assert!(matches!(cli.command, Commands::Download { storage: Some(ref s), .. } if s == "disk"));
    }

    #[test]
    fn test_unknown_storage_is_config_error() {
        let config = Config::from_yaml(YAML).unwrap();
        let model = find_model(&config, "app").unwrap();
        let err = StorageSet::select(model, Some("offsite")).err().unwrap();
        assert_eq!(err.key.as_deref(), Some("storages.offsite"));
    }

    #[test]
    fn test_select_models() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(select_models(&config, &[]).unwrap().len(), 2);

        let picked = select_models(&config, &["db".to_string()]).unwrap();
        assert_eq!(picked[0].name, "db");

        let err = select_models(&config, &["missing".to_string()]).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
