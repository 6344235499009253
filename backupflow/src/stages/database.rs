//! Database dump adapters.

use crate::config::{ModelConfig, SubConfig};
use crate::errors::{ConfigError, Result};
use crate::process::{CommandExecutor, CommandSpec};
use crate::stages::DataSource;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// One database dump invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpCommand {
    /// The command to run.
    pub spec: CommandSpec,
    /// Where the dump is written.
    pub output: PathBuf,
}

impl DumpCommand {
    /// Builds the dump command for database `name` below `dump_path`.
    pub fn build(name: &str, config: &SubConfig, dump_path: &Path) -> std::result::Result<Self, ConfigError> {
        let dir = dump_path.join(&config.type_tag);
        let output = dir.join(format!("{name}.sql"));
        let database = config.get_str("database").unwrap_or_else(|| name.to_string());
        let host = config.get_str("host").unwrap_or_else(|| "localhost".to_string());

        let spec = match config.type_tag.as_str() {
            "postgresql" => {
                let port = config.get_str("port").unwrap_or_else(|| "5432".to_string());
                let mut spec = CommandSpec::new("pg_dump")
                    .arg(format!("--host={host}"))
                    .arg(format!("--port={port}"));
                if let Some(username) = config.get_str("username") {
                    spec = spec.arg(format!("--username={username}"));
                }
                if let Some(password) = config.get_str("password") {
                    spec = spec.env("PGPASSWORD", password);
                }
                for table in config.get_list("tables") {
                    spec = spec.arg(format!("--table={table}"));
                }
                for table in config.get_list("exclude_tables") {
                    spec = spec.arg(format!("--exclude-table={table}"));
                }
                spec.args(config.get_list("args"))
                    .arg("-f")
                    .arg(output.to_string_lossy())
                    .arg(database)
            }
            "mysql" => {
                let port = config.get_str("port").unwrap_or_else(|| "3306".to_string());
                let mut spec = CommandSpec::new("mysqldump")
                    .arg(format!("--host={host}"))
                    .arg(format!("--port={port}"));
                if let Some(username) = config.get_str("username") {
                    spec = spec.arg(format!("--user={username}"));
                }
                if let Some(password) = config.get_str("password") {
                    spec = spec.env("MYSQL_PWD", password);
                }
                for table in config.get_list("exclude_tables") {
                    spec = spec.arg(format!("--ignore-table={database}.{table}"));
                }
                spec.args(config.get_list("args"))
                    .arg(format!("--result-file={}", output.to_string_lossy()))
                    .arg(database)
                    .args(config.get_list("tables"))
            }
            other => {
                return Err(ConfigError::new(format!("Unsupported database type: {other}"))
                    .with_key(format!("databases.{name}.type")));
            }
        };

        Ok(Self { spec, output })
    }
}

/// Runs the dump command of every configured database, in name order.
pub struct DatabaseDumper {
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for DatabaseDumper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseDumper").finish_non_exhaustive()
    }
}

impl DatabaseDumper {
    /// Creates a dumper running commands through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl DataSource for DatabaseDumper {
    async fn dump(&self, model: &ModelConfig) -> Result<()> {
        // Validate every entry before the first dump starts.
        let commands = model
            .databases
            .iter()
            .map(|(name, config)| DumpCommand::build(name, config, &model.dump_path))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for command in commands {
            if let Some(dir) = command.output.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            info!(model = %model.name, output = %command.output.display(), "Dump database");
            self.executor.exec(&command.spec).await?;
        }

        Ok(())
    }
}
