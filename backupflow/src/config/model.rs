//! Model configuration types.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// The reserved notifier key holding shared title/message overrides.
pub const COMMON_NOTIFIER: &str = "common";

/// One named backup configuration.
///
/// Loaded before a run starts and read-only for the rest of the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name, injected from the key of the `models` map.
    #[serde(skip_deserializing, default)]
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Per-run temporary directory, removed during cleanup.
    #[serde(skip)]
    pub temp_path: PathBuf,

    /// Directory data-source dumps are written into.
    #[serde(skip)]
    pub dump_path: PathBuf,

    /// Declared compression.
    #[serde(default)]
    pub compress_with: CompressConfig,

    /// File archive rules.
    #[serde(default)]
    pub archive: Option<ArchiveConfig>,

    /// Shell snippets executed before the pipeline.
    #[serde(default, deserialize_with = "one_or_many")]
    pub before_script: Vec<String>,

    /// Shell snippets executed after cleanup.
    #[serde(default, deserialize_with = "one_or_many")]
    pub after_script: Vec<String>,

    /// Configured data sources keyed by name.
    #[serde(default)]
    pub databases: BTreeMap<String, SubConfig>,

    /// Optional encryption.
    #[serde(default)]
    pub encrypt_with: Option<SubConfig>,

    /// Optional splitting.
    #[serde(default)]
    pub split_with: Option<SplitConfig>,

    /// Storages keyed by name.
    #[serde(default)]
    pub storages: BTreeMap<String, SubConfig>,

    /// Notification destinations keyed by name.
    #[serde(default)]
    pub notifiers: BTreeMap<String, DestinationConfig>,
}

impl ModelConfig {
    /// Creates an empty model with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Assigns per-run working paths below `workdir`.
    ///
    /// `temp_path` is `<workdir>/<model>/<run_id>` and `dump_path` is
    /// `<temp_path>/<model>`.
    pub fn assign_work_paths(&mut self, workdir: &Path, run_id: &str) {
        self.temp_path = workdir.join(&self.name).join(run_id);
        self.dump_path = self.temp_path.join(&self.name);
    }

    /// Whether any data source is configured.
    #[must_use]
    pub fn has_databases(&self) -> bool {
        !self.databases.is_empty()
    }

    /// Archive includes, empty when no archive is declared.
    #[must_use]
    pub fn archive_includes(&self) -> &[String] {
        self.archive.as_ref().map_or(&[], |a| a.includes.as_slice())
    }

    /// Archive excludes, empty when no archive is declared.
    #[must_use]
    pub fn archive_excludes(&self) -> &[String] {
        self.archive.as_ref().map_or(&[], |a| a.excludes.as_slice())
    }

    /// Extra archival tool arguments, empty when no archive is declared.
    #[must_use]
    pub fn archive_arguments(&self) -> &[String] {
        self.archive
            .as_ref()
            .map_or(&[], |a| a.additional_arguments.as_slice())
    }

    /// The `common` notifier entry, if any.
    #[must_use]
    pub fn common_notifier(&self) -> Option<&DestinationConfig> {
        self.notifiers.get(COMMON_NOTIFIER)
    }

    /// Real destinations, i.e. every notifier except `common`, in name order.
    pub fn destinations(&self) -> impl Iterator<Item = (&String, &DestinationConfig)> {
        self.notifiers
            .iter()
            .filter(|(name, _)| name.as_str() != COMMON_NOTIFIER)
    }
}

/// Compression declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompressConfig {
    /// Compression kind alias; empty means archive-only.
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl CompressConfig {
    /// Creates a compression declaration.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

/// Archive include/exclude rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Paths to include.
    #[serde(default)]
    pub includes: Vec<String>,
    /// Paths to exclude.
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Extra archival tool arguments, inserted verbatim.
    #[serde(default)]
    pub additional_arguments: Vec<String>,
}

/// Split settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitConfig {
    /// Chunk size understood by `split -b`, e.g. `1G` or `512M`.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: String,
}

fn default_chunk_size() -> String {
    "1G".to_string()
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

/// A typed sub-configuration with free-form settings.
///
/// Used for databases, storages and encryption.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubConfig {
    /// Type tag selecting the adapter.
    #[serde(rename = "type", default)]
    pub type_tag: String,
    /// Adapter-specific settings.
    #[serde(flatten)]
    pub settings: HashMap<String, serde_json::Value>,
}

impl SubConfig {
    /// Creates a sub-config with the given type tag.
    #[must_use]
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            settings: HashMap::new(),
        }
    }

    /// Adds a setting.
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Reads a setting as a string; numbers and booleans are stringified.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        setting_as_string(self.settings.get(key)?)
    }

    /// Reads a boolean setting.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.settings.get(key).and_then(serde_json::Value::as_bool)
    }

    /// Reads a list setting; a single string yields a one-element list.
    #[must_use]
    pub fn get_list(&self, key: &str) -> Vec<String> {
        setting_as_list(self.settings.get(key))
    }
}

/// One configured notification destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DestinationConfig {
    /// Provider type tag; empty for the `common` entry.
    #[serde(rename = "type", default)]
    pub type_tag: String,
    /// Deliver success events.
    #[serde(default = "default_true")]
    pub on_success: bool,
    /// Deliver failure events.
    #[serde(default = "default_true")]
    pub on_failure: bool,
    /// Overrides the provider's success status codes.
    #[serde(default)]
    pub success_codes: Option<Vec<u16>>,
    /// Provider-specific settings.
    #[serde(flatten)]
    pub settings: HashMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            type_tag: String::new(),
            on_success: true,
            on_failure: true,
            success_codes: None,
            settings: HashMap::new(),
        }
    }
}

impl DestinationConfig {
    /// Creates a destination with the given type tag and both gates open.
    #[must_use]
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            ..Self::default()
        }
    }

    /// Sets the enablement gates.
    #[must_use]
    pub fn with_gates(mut self, on_success: bool, on_failure: bool) -> Self {
        self.on_success = on_success;
        self.on_failure = on_failure;
        self
    }

    /// Adds a setting.
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Reads a setting as a string; empty strings count as unset.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        setting_as_string(self.settings.get(key)?).filter(|s| !s.is_empty())
    }

    /// Reads a list setting; a single string yields a one-element list.
    #[must_use]
    pub fn get_list(&self, key: &str) -> Vec<String> {
        setting_as_list(self.settings.get(key))
    }

    /// Reads a string map setting, e.g. extra HTTP headers.
    #[must_use]
    pub fn get_map(&self, key: &str) -> BTreeMap<String, String> {
        self.settings
            .get(key)
            .and_then(serde_json::Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| setting_as_string(v).map(|v| (k.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn setting_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn setting_as_list(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::Array(items)) => items.iter().filter_map(setting_as_string).collect(),
        Some(other) => setting_as_string(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) if s.trim().is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}
