//! Agent configuration format.
//!
//! Agent configs are JSON documents stored under `agents/` in the artifact
//! hub. Every field except `model` has a default.

use kiln_abstraction::{EndStrategy, McpServerSpec, ModelSettings};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::hub::{ArtifactKind, ArtifactStore, HubError};

/// Agent configuration errors.
#[derive(Debug, Error)]
pub enum AgentConfigError {
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Hub error while loading or publishing.
    #[error("hub error: {0}")]
    Hub(#[from] HubError),
}

/// Result type for agent configuration operations.
pub type Result<T> = std::result::Result<T, AgentConfigError>;

/// A sub-process server entry: either a raw command line or a structured spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerEntry {
    /// `"command arg1 arg2"`, split on whitespace.
    Command(String),
    /// `{ "command": ..., "args": [...] }`.
    Spec(McpServerSpec),
}

impl McpServerEntry {
    /// The launch spec, or `None` for a blank command line.
    pub fn to_spec(&self) -> Option<McpServerSpec> {
        match self {
            Self::Command(line) => {
                let mut parts = line.split_whitespace().map(str::to_string);
                let command = parts.next()?;
                Some(McpServerSpec::new(command, parts.collect()))
            }
            Self::Spec(spec) => Some(spec.clone()),
        }
    }
}

fn default_name() -> String {
    "Agent".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_retries() -> u32 {
    1
}

fn default_result_type() -> Vec<String> {
    vec!["str".to_string()]
}

fn default_result_tool_name() -> String {
    "final_result".to_string()
}

fn default_config_version() -> String {
    "0.0.1".to_string()
}

/// Declarative description of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider-qualified model identifier, e.g. `openai:gpt-4o-mini`.
    pub model: String,

    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub model_settings: Option<ModelSettings>,

    /// Retries for tool calls.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Result type tokens; more than one means a union.
    #[serde(default = "default_result_type")]
    pub result_type: Vec<String>,

    #[serde(default = "default_result_tool_name")]
    pub result_tool_name: String,

    #[serde(default)]
    pub result_tool_description: Option<String>,

    #[serde(default)]
    pub result_retries: Option<u32>,

    /// Tool artifacts to load.
    #[serde(default)]
    pub tools: Vec<String>,

    /// Tool artifacts to load, listed before `tools`.
    #[serde(default)]
    pub known_tools: Vec<String>,

    /// Externally hosted tools.
    #[serde(default)]
    pub hf_tools: Vec<String>,

    #[serde(default)]
    pub mcp_servers: Vec<McpServerEntry>,

    /// Skip the model check when the agent is built.
    #[serde(default)]
    pub defer_model_check: bool,

    #[serde(default)]
    pub end_strategy: EndStrategy,

    #[serde(default = "default_config_version")]
    pub config_version: String,
}

impl AgentConfig {
    /// Creates a config with defaults for everything but the model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            name: default_name(),
            system_prompt: default_system_prompt(),
            model_settings: None,
            retries: default_retries(),
            result_type: default_result_type(),
            result_tool_name: default_result_tool_name(),
            result_tool_description: None,
            result_retries: None,
            tools: Vec::new(),
            known_tools: Vec::new(),
            hf_tools: Vec::new(),
            mcp_servers: Vec::new(),
            defer_model_check: false,
            end_strategy: EndStrategy::default(),
            config_version: default_config_version(),
        }
    }

    /// Set the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the result type tokens.
    #[must_use]
    pub fn with_result_type<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.result_type = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Set the tool artifact names.
    #[must_use]
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Parses a config from JSON.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or `model` is missing.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Canonical pretty JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads the config stored as `agents/<name>.json`.
    ///
    /// # Errors
    /// Hub errors, or a JSON error if the stored document is not a config.
    pub async fn from_hub(store: &ArtifactStore, name: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(AgentConfigError::Invalid("config name cannot be empty".to_string()));
        }
        let map = store.load_config(name).await?;
        Ok(serde_json::from_value(Value::Object(map))?)
    }

    /// Validates and publishes this config as `agents/<name>.json`.
    ///
    /// # Errors
    /// Validation, serialization or hub errors.
    pub async fn push_to_hub(&self, store: &ArtifactStore) -> Result<()> {
        self.validate()?;
        store.upload_content(&self.name, &self.to_json()?, ArtifactKind::Config).await?;
        info!(agent = %self.name, "Published agent config");
        Ok(())
    }

    /// Checks the fields that can be checked without I/O.
    ///
    /// # Errors
    /// `Invalid` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(AgentConfigError::Invalid("model cannot be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(AgentConfigError::Invalid("agent name cannot be empty".to_string()));
        }
        if self.result_tool_name.trim().is_empty() {
            return Err(AgentConfigError::Invalid("result tool name cannot be empty".to_string()));
        }
        if self.result_type.iter().any(|token| token.trim().is_empty()) {
            return Err(AgentConfigError::Invalid("result type tokens cannot be blank".to_string()));
        }
        Ok(())
    }

    /// Tool artifact names: `known_tools`, then `tools`, first occurrence wins.
    pub fn artifact_tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(self.known_tools.len() + self.tools.len());
        for name in self.known_tools.iter().chain(&self.tools) {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config = AgentConfig::from_json(r#"{"model": "openai:gpt-4o-mini"}"#).unwrap();
        assert_eq!(config, AgentConfig::new("openai:gpt-4o-mini"));
        assert_eq!(config.name, "Agent");
        assert_eq!(config.system_prompt, "You are a helpful assistant.");
        assert_eq!(config.retries, 1);
        assert_eq!(config.result_type, vec!["str".to_string()]);
        assert_eq!(config.result_tool_name, "final_result");
        assert_eq!(config.end_strategy, EndStrategy::Early);
        assert_eq!(config.config_version, "0.0.1");
        assert!(!config.defer_model_check);
    }

    #[test]
    fn test_model_is_required() {
        assert!(matches!(AgentConfig::from_json("{}"), Err(AgentConfigError::Json(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = AgentConfig::new("anthropic:claude-3-5-haiku-latest")
            .with_name("Weather")
            .with_result_type(["str", "Shape"])
            .with_tools(["get_weather"]);
        config.model_settings = Some(ModelSettings { temperature: Some(0.1), ..ModelSettings::default() });
        config.mcp_servers = vec![
            McpServerEntry::Command("npx -y server".to_string()),
            McpServerEntry::Spec(McpServerSpec::new("uvx", vec!["tool".to_string()])),
        ];
        config.end_strategy = EndStrategy::Exhaustive;

        let json = config.to_json().unwrap();
        let back = AgentConfig::from_json(&json).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.to_json().unwrap(), json);
    }

    #[test]
    fn test_mcp_entry_to_spec() {
        let raw = McpServerEntry::Command("  deno run -A server.ts ".to_string());
        assert_eq!(
            raw.to_spec(),
            Some(McpServerSpec::new(
                "deno",
                vec!["run".to_string(), "-A".to_string(), "server.ts".to_string()]
            ))
        );
        assert_eq!(McpServerEntry::Command("cmd".to_string()).to_spec(), Some(McpServerSpec::new("cmd", vec![])));
        assert_eq!(McpServerEntry::Command("   ".to_string()).to_spec(), None);
    }

    #[test]
    fn test_validate() {
        assert!(AgentConfig::new("openai:gpt-4o").validate().is_ok());
        assert!(AgentConfig::new(" ").validate().is_err());
        assert!(AgentConfig::new("openai:gpt-4o").with_name("").validate().is_err());
        assert!(AgentConfig::new("openai:gpt-4o").with_result_type(["str", " "]).validate().is_err());
    }

    #[test]
    fn test_artifact_tool_names_order() {
        let mut config = AgentConfig::new("openai:gpt-4o").with_tools(["b", "a"]);
        config.known_tools = vec!["c".to_string(), "a".to_string()];
        assert_eq!(config.artifact_tool_names(), vec!["c", "a", "b"]);
    }
}
