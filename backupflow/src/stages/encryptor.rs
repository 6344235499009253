//! Artifact encryption through `openssl enc`.

use crate::config::{ModelConfig, SubConfig};
use crate::errors::{ConfigError, Result};
use crate::process::{CommandExecutor, CommandSpec};
use crate::stages::Encryptor;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const PASSWORD_ENV: &str = "BACKUPFLOW_ENCRYPT_PASSWORD";

/// Encrypts with `openssl enc`, writing `<path>.enc`.
pub struct OpensslEncryptor {
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for OpensslEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpensslEncryptor").finish_non_exhaustive()
    }
}

impl OpensslEncryptor {
    /// Creates an encryptor running `openssl` through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Builds the `openssl` command encrypting `path`.
    ///
    /// The password is passed through the environment, never the argument
    /// list.
    pub fn command(config: &SubConfig, path: &Path) -> std::result::Result<(CommandSpec, PathBuf), ConfigError> {
        if config.type_tag != "openssl" {
            return Err(ConfigError::new(format!("Unsupported encryptor type: {}", config.type_tag))
                .with_key("encrypt_with.type"));
        }
        let password = config
            .get_str("password")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::new("encrypt_with.password is required").with_key("encrypt_with.password"))?;

        let mut output = path.as_os_str().to_owned();
        output.push(".enc");
        let output = PathBuf::from(output);

        let cipher = config.get_str("cipher").unwrap_or_else(|| "aes-256-cbc".to_string());
        let mut spec = CommandSpec::new("openssl").arg("enc").arg(format!("-{cipher}"));
        if config.get_bool("salt").unwrap_or(true) {
            spec = spec.arg("-salt");
        }
        if config.get_bool("base64").unwrap_or(false) {
            spec = spec.arg("-base64");
        }
        if config.get_bool("pbkdf2").unwrap_or(true) {
            spec = spec.arg("-pbkdf2");
        }
        let spec = spec
            .arg("-pass")
            .arg(format!("env:{PASSWORD_ENV}"))
            .args(config.get_list("args"))
            .arg("-in")
            .arg(path.to_string_lossy())
            .arg("-out")
            .arg(output.to_string_lossy())
            .env(PASSWORD_ENV, password);

        Ok((spec, output))
    }
}

#[async_trait]
impl Encryptor for OpensslEncryptor {
    async fn encrypt(&self, path: &Path, model: &ModelConfig) -> Result<PathBuf> {
        let Some(config) = &model.encrypt_with else {
            return Ok(path.to_path_buf());
        };

        let (spec, output) = Self::command(config, path)?;
        info!(model = %model.name, output = %output.display(), "Encrypt");
        self.executor.exec(&spec).await?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingExecutor;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_command_keeps_password_out_of_args() {
        let config = SubConfig::new("openssl")
            .with_setting("password", json!("s3cret"))
            .with_setting("base64", json!(true));

        let (spec, output) = OpensslEncryptor::command(&config, Path::new("/t/a.tar.gz")).unwrap();
        assert_eq!(output, PathBuf::from("/t/a.tar.gz.enc"));
        assert_eq!(
            spec.args,
            vec![
                "enc",
                "-aes-256-cbc",
                "-salt",
                "-base64",
                "-pbkdf2",
                "-pass",
                "env:BACKUPFLOW_ENCRYPT_PASSWORD",
                "-in",
                "/t/a.tar.gz",
                "-out",
                "/t/a.tar.gz.enc",
            ]
        );
        assert!(!spec.args.iter().any(|a| a.contains("s3cret")));
        assert_eq!(spec.env[0].1, "s3cret");
    }

    #[test]
    fn test_command_requires_password() {
        let err = OpensslEncryptor::command(&SubConfig::new("openssl"), Path::new("/a")).unwrap_err();
        assert_eq!(err.key.as_deref(), Some("encrypt_with.password"));
    }

    #[tokio::test]
    async fn test_no_encryption_returns_same_path() {
        let executor = Arc::new(RecordingExecutor::new());
        let model = ModelConfig::new("m");

        let out = OpensslEncryptor::new(executor.clone())
            .encrypt(Path::new("/t/a.tar"), &model)
            .await
            .unwrap();
        assert_eq!(out, PathBuf::from("/t/a.tar"));
        assert_eq!(executor.call_count(), 0);
    }
}
