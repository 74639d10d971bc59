//! Agent runtime abstraction layer for Kiln.
//!
//! This crate defines the vocabulary shared between the agent factory and the
//! runtime that actually talks to a model provider: sampling settings, the
//! message history, tools, and the [`AgentRuntime`] trait itself.

pub mod messages;
pub mod tool;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use messages::{MessagePart, ModelMessage, ToolCallPart};
pub use tool::{Tool, ToolDefinition, ToolHandler, ToolParameters, ToolPropertySchema};

/// Represents an error that can occur while an agent runs.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeError {
    /// An error occurred during the API request (e.g., network issues, invalid request).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The model returned an error (e.g., invalid input, rate limiting).
    #[error("Model Response Error: {0}")]
    ModelResponseError(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// The model provider is not supported or configured.
    #[error("Unsupported Model Provider: {0}")]
    UnsupportedModelProvider(String),

    /// A tool was called with arguments it cannot accept.
    #[error("Invalid arguments for tool '{tool}': {reason}")]
    InvalidToolArguments {
        /// Tool name.
        tool: String,
        /// Why the arguments were rejected.
        reason: String,
    },

    /// A tool failed while executing.
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution {
        /// Tool name.
        tool: String,
        /// Error text reported by the tool.
        message: String,
    },

    /// The final output does not match the agent's result type.
    #[error("Result rejected: {0}")]
    ResultValidation(String),

    /// Other unexpected errors.
    #[error("Other Runtime Error: {0}")]
    Other(String),
}

/// Sampling parameters passed through to the model provider.
///
/// Known parameters get typed fields; anything else a provider understands
/// is kept verbatim in `extra` so configs survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// What sampling temperature to use, between 0 and 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Nucleus sampling probability mass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// The maximum number of tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Seed for providers that support deterministic sampling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    /// Sequences where the API will stop generating further tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Provider-specific settings.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// When a run stops once a final result tool has been called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndStrategy {
    /// Stop at the first final result, skipping remaining tool calls.
    #[default]
    Early,
    /// Execute every tool call in the response before stopping.
    Exhaustive,
}

impl fmt::Display for EndStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Early => write!(f, "early"),
            Self::Exhaustive => write!(f, "exhaustive"),
        }
    }
}

impl FromStr for EndStrategy {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "early" => Ok(Self::Early),
            "exhaustive" => Ok(Self::Exhaustive),
            other => Err(RuntimeError::Other(format!("unknown end strategy '{other}'"))),
        }
    }
}

/// A sub-process (MCP) server the runtime may launch during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerSpec {
    /// Executable to launch.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
}

impl McpServerSpec {
    /// Creates a server spec.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self { command: command.into(), args }
    }
}

/// Token usage reported for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompts sent.
    pub prompt_tokens: u32,
    /// Number of tokens generated.
    pub completion_tokens: u32,
    /// Total number of tokens used.
    pub total_tokens: u32,
}

/// Everything a runtime needs to know about an assembled agent.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    /// Provider-qualified model identifier (e.g. `openai:gpt-4o`).
    pub model: String,
    /// Display name.
    pub name: String,
    /// System prompt.
    pub system_prompt: String,
    /// Sampling settings.
    pub model_settings: Option<ModelSettings>,
    /// Retries for ordinary tool calls.
    pub retries: u32,
    /// Synthetic tools the model calls to produce its final result.
    pub result_tools: Vec<ToolDefinition>,
    /// Retries for the result tools, defaults to `retries` when unset.
    pub result_retries: Option<u32>,
    /// Function tools, in prompt order.
    pub tools: Vec<Tool>,
    /// Sub-process servers to start for the run.
    pub mcp_servers: Vec<McpServerSpec>,
    /// Whether the model check was skipped at construction.
    pub defer_model_check: bool,
    /// End strategy.
    pub end_strategy: EndStrategy,
}

impl AgentSpec {
    /// Looks up a function tool by name.
    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    /// Returns true when `name` is one of the final result tools.
    pub fn is_result_tool(&self, name: &str) -> bool {
        self.result_tools.iter().any(|tool| tool.name == name)
    }
}

/// A single run request.
#[derive(Clone, Copy)]
pub struct AgentRunRequest<'a> {
    /// The agent to run.
    pub agent: &'a AgentSpec,
    /// Provider API key.
    pub api_key: &'a str,
    /// User prompt.
    pub prompt: &'a str,
    /// Prior conversation.
    pub message_history: &'a [ModelMessage],
}

impl fmt::Debug for AgentRunRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRunRequest")
            .field("agent", &self.agent.name)
            .field("api_key", &"<redacted>")
            .field("prompt", &self.prompt)
            .field("message_history", &self.message_history.len())
            .finish()
    }
}

/// The outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunResult {
    /// Final output, shaped by the agent's result type.
    pub output: Value,
    /// Messages produced during this run, excluding the history passed in.
    pub new_messages: Vec<ModelMessage>,
    /// Optional usage statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The LLM runtime that executes an assembled agent.
///
/// Implementations own the provider network calls, the tool-call loop and
/// the MCP server lifecycle. All runtimes must be `Send + Sync` so a single
/// handle can be shared across concurrent pipeline runs.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Runs the agent on a prompt.
    ///
    /// # Errors
    /// Returns a `RuntimeError` if the provider call or a tool fails.
    async fn run(&self, request: AgentRunRequest<'_>) -> Result<AgentRunResult, RuntimeError>;

    /// Validates a model identifier before an agent is handed out.
    ///
    /// The default only checks the identifier shape and never touches the
    /// network.
    async fn check_model(&self, model: &str, api_key: &str) -> Result<(), RuntimeError> {
        let _ = api_key;
        split_model_id(model).map(|_| ())
    }
}

/// Splits a provider-qualified model identifier into `(provider, model)`.
///
/// # Errors
/// Returns `UnsupportedModelProvider` when either half is missing.
pub fn split_model_id(model: &str) -> Result<(&str, &str), RuntimeError> {
    match model.split_once(':') {
        Some((provider, name)) if !provider.trim().is_empty() && !name.trim().is_empty() => {
            Ok((provider, name))
        }
        _ => Err(RuntimeError::UnsupportedModelProvider(format!(
            "expected '<provider>:<model>', got '{model}'"
        ))),
    }
}
