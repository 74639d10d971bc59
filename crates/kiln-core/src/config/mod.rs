//! Configuration module for Kiln Core.
//!
//! Settings come from an optional TOML file (`$KILN_CONFIG`, or
//! `~/.kiln/config.toml`) with environment variables layered on top.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use zeroize::Zeroizing;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Artifact hub settings.
#[derive(Clone, Deserialize)]
pub struct HubSettings {
    /// Repository holding `tools/` and `agents/`.
    #[serde(default = "default_repo_id")]
    pub repo_id: String,
    /// Hub base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Repository type (`space`, `model` or `dataset`).
    #[serde(default = "default_repo_type")]
    pub repo_type: String,
    /// Branch or commit to read from and commit to.
    #[serde(default = "default_revision")]
    pub revision: String,
    /// Local snapshot directory.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Access token for private repositories and uploads.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub token: Option<Zeroizing<String>>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            repo_id: default_repo_id(),
            endpoint: default_endpoint(),
            repo_type: default_repo_type(),
            revision: default_revision(),
            cache_dir: default_cache_dir(),
            token: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl fmt::Debug for HubSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubSettings")
            .field("repo_id", &self.repo_id)
            .field("endpoint", &self.endpoint)
            .field("repo_type", &self.repo_type)
            .field("revision", &self.revision)
            .field("cache_dir", &self.cache_dir)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Resource limits applied to every dynamically loaded script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PluginLimits {
    /// Maximum number of operations a script may execute.
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
    /// Maximum function call depth.
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,
    /// Maximum length of any string value, in bytes.
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,
}

impl Default for PluginLimits {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_string_size: default_max_string_size(),
        }
    }
}

/// Feedly item source settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedlySettings {
    /// API base URL.
    #[serde(default = "default_feedly_url")]
    pub base_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FeedlySettings {
    fn default() -> Self {
        Self { base_url: default_feedly_url(), timeout_secs: default_timeout_secs() }
    }
}

fn default_repo_id() -> String {
    "NeuralNotwork/extendable-agents".to_string()
}

fn default_endpoint() -> String {
    "https://huggingface.co".to_string()
}

fn default_repo_type() -> String {
    "space".to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_cache_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(std::env::temp_dir, PathBuf::from)
        .join(".cache")
        .join("kiln")
        .join("hub")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_operations() -> u64 {
    1_000_000
}

fn default_max_call_levels() -> usize {
    64
}

fn default_max_string_size() -> usize {
    1024 * 1024
}

fn default_feedly_url() -> String {
    "https://cloud.feedly.com".to_string()
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<Zeroizing<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(Zeroizing::new))
}

/// Root configuration for Kiln.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Artifact hub settings.
    #[serde(default)]
    pub hub: HubSettings,
    /// Script resource limits.
    #[serde(default)]
    pub plugins: PluginLimits,
    /// Feedly settings.
    #[serde(default)]
    pub feedly: FeedlySettings,
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the config file (if any) and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os("KILN_CONFIG").map(PathBuf::from).or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".kiln").join("config.toml"))
        });

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&content)
    }

    /// Apply environment-style overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(repo_id) = lookup("KILN_HUB_REPO_ID").or_else(|| lookup("HF_REPO_ID")) {
            self.hub.repo_id = repo_id;
        }
        if let Some(endpoint) = lookup("KILN_HUB_ENDPOINT").or_else(|| lookup("HF_ENDPOINT")) {
            self.hub.endpoint = endpoint;
        }
        if let Some(revision) = lookup("KILN_HUB_REVISION") {
            self.hub.revision = revision;
        }
        if let Some(cache_dir) = lookup("KILN_CACHE_DIR") {
            self.hub.cache_dir = PathBuf::from(cache_dir);
        }
        if let Some(token) = lookup("HF_TOKEN") {
            self.hub.token = Some(Zeroizing::new(token));
        }
        if let Some(url) = lookup("KILN_FEEDLY_URL") {
            self.feedly.base_url = url;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.hub.repo_id.trim().is_empty() {
            return Err(ConfigError::Invalid("hub.repo_id cannot be empty".to_string()));
        }
        if !matches!(self.hub.repo_type.as_str(), "space" | "model" | "dataset") {
            return Err(ConfigError::Invalid(format!(
                "hub.repo_type must be one of space, model, dataset (got '{}')",
                self.hub.repo_type
            )));
        }
        if self.plugins.max_call_levels == 0 {
            return Err(ConfigError::Invalid("plugins.max_call_levels must be positive".to_string()));
        }
        Ok(())
    }
}
