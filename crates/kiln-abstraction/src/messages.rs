//! Conversation messages exchanged with the model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::RuntimeError;

/// One message in a run's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "parts", rename_all = "snake_case")]
pub enum ModelMessage {
    /// Sent to the model.
    Request(Vec<MessagePart>),
    /// Produced by the model.
    Response(Vec<MessagePart>),
}

impl ModelMessage {
    /// A request carrying a single user prompt.
    pub fn user(content: impl Into<String>) -> Self {
        Self::Request(vec![MessagePart::UserPrompt { content: content.into() }])
    }

    /// The parts of this message.
    pub fn parts(&self) -> &[MessagePart] {
        match self {
            Self::Request(parts) | Self::Response(parts) => parts,
        }
    }

    /// Whether the model produced this message.
    pub const fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }
}

/// A tagged message part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part_kind", rename_all = "kebab-case")]
pub enum MessagePart {
    /// System prompt.
    SystemPrompt { content: String },
    /// User prompt.
    UserPrompt { content: String },
    /// Plain text from the model.
    Text { content: String },
    /// The model asked for a tool to be called.
    ToolCall(ToolCallPart),
    /// The value a tool returned.
    ToolReturn {
        tool_name: String,
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
    },
    /// Asks the model to try again, optionally about a specific tool.
    RetryPrompt {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
    },
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub tool_name: String,
    /// Either an object or a JSON-encoded object string, depending on provider.
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ToolCallPart {
    pub fn new(tool_name: impl Into<String>, args: Value) -> Self {
        Self { tool_name: tool_name.into(), args, tool_call_id: None }
    }

    /// Returns the arguments as a JSON object.
    ///
    /// # Errors
    /// Returns `InvalidToolArguments` if the arguments are not an object or a
    /// string containing one.
    pub fn args_as_map(&self) -> Result<Map<String, Value>, RuntimeError> {
        let invalid = |reason: String| RuntimeError::InvalidToolArguments {
            tool: self.tool_name.clone(),
            reason,
        };
        match &self.args {
            Value::Object(map) => Ok(map.clone()),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(invalid(format!("expected an object, got {other}"))),
                Err(e) => Err(invalid(e.to_string())),
            },
            other => Err(invalid(format!("expected an object, got {other}"))),
        }
    }
}
