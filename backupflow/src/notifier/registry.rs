//! Notifier registry keyed by type tag.

use crate::config::DestinationConfig;
use crate::errors::DispatchError;
use crate::notifier::mail::MailNotifier;
use crate::notifier::webhook::{HttpNotifier, ProviderKind};
use crate::notifier::Notifier;
use crate::process::{CommandExecutor, SystemExecutor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Builds one notifier for a named destination.
pub type NotifierFactory =
    Arc<dyn Fn(&str, &DestinationConfig) -> Result<Box<dyn Notifier>, DispatchError> + Send + Sync>;

/// Maps destination type tags to notifier factories.
#[derive(Clone, Default)]
pub struct NotifierRegistry {
    factories: HashMap<String, NotifierFactory>,
}

impl std::fmt::Debug for NotifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

impl NotifierRegistry {
    /// Creates a registry with no providers.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in provider.
    ///
    /// HTTP providers share `client`; mail runs `sendmail` through `executor`.
    #[must_use]
    pub fn with_builtin(client: reqwest::Client, executor: Arc<dyn CommandExecutor>) -> Self {
        let mut registry = Self::empty();

        for kind in ProviderKind::ALL {
            let client = client.clone();
            registry.register(kind.tag(), move |name, config| {
                let notifier: Box<dyn Notifier> =
                    Box::new(HttpNotifier::new(name, kind, config.clone(), client.clone()));
                Ok(notifier)
            });
        }

        registry.register("mail", move |name, config| {
            let notifier: Box<dyn Notifier> =
                Box::new(MailNotifier::new(name, config.clone(), executor.clone()));
            Ok(notifier)
        });

        registry
    }

    /// Registers (or replaces) the factory for `tag`.
    pub fn register<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&str, &DestinationConfig) -> Result<Box<dyn Notifier>, DispatchError> + Send + Sync + 'static,
    {
        self.factories.insert(tag.into(), Arc::new(factory));
    }

    /// Builds the notifier for destination `name`.
    pub fn build(&self, name: &str, config: &DestinationConfig) -> Result<Box<dyn Notifier>, DispatchError> {
        let factory = self
            .factories
            .get(&config.type_tag)
            .ok_or_else(|| DispatchError::UnsupportedType {
                name: name.to_string(),
                type_tag: config.type_tag.clone(),
            })?;
        factory(name, config)
    }

    /// Whether `tag` is registered.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Registered tags, sorted.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<_> = self.factories.keys().cloned().collect();
        tags.sort();
        tags
    }
}

/// Builds a registry with the built-in providers and a default HTTP client.
pub fn default_registry() -> Result<NotifierRegistry, DispatchError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("backupflow/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DispatchError::transport("http", e))?;
    Ok(NotifierRegistry::with_builtin(client, Arc::new(SystemExecutor)))
}
