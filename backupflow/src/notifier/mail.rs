//! Mail delivery through the local `sendmail` relay.

use crate::config::DestinationConfig;
use crate::errors::DispatchError;
use crate::notifier::Notifier;
use crate::process::{CommandExecutor, CommandSpec};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const SERVICE: &str = "Mail";

/// Pipes a plain-text message into `sendmail -t -i`.
pub struct MailNotifier {
    name: String,
    config: DestinationConfig,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for MailNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailNotifier")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl MailNotifier {
    /// Creates a mail notifier for destination `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, config: DestinationConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            name: name.into(),
            config,
            executor,
        }
    }

    /// Builds the relay command with the rendered message on stdin.
    pub fn command(&self, title: &str, message: &str) -> Result<CommandSpec, DispatchError> {
        let from = self
            .config
            .get_str("from")
            .ok_or_else(|| DispatchError::missing(&self.name, "from"))?;
        let to = self.config.get_list("to");
        if to.is_empty() {
            return Err(DispatchError::missing(&self.name, "to"));
        }

        let body = format!(
            "From: {from}\r\nTo: {}\r\nSubject: {title}\r\nContent-Type: text/plain; charset=UTF-8\r\n\r\n{message}\r\n",
            to.join(", ")
        );
        let program = self.config.get_str("sendmail").unwrap_or_else(|| "sendmail".to_string());

        Ok(CommandSpec::new(program)
            .args(["-t", "-i"])
            .stdin(body)
            .timeout(Duration::from_secs(60)))
    }
}

#[async_trait]
impl Notifier for MailNotifier {
    async fn deliver(&self, title: &str, message: &str) -> Result<(), DispatchError> {
        let spec = self.command(title, message)?;
        self.executor
            .exec(&spec)
            .await
            .map_err(|e| DispatchError::transport(SERVICE, e))?;
        Ok(())
    }
}
