// Tool abstractions for agents
//
// Tools are the functions an agent may call during a run. The runtime sees a
// name, a description and a JSON schema; the handler does the work.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::RuntimeError;

/// Tool parameters schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameters {
    /// Type (always "object" for function parameters)
    #[serde(rename = "type")]
    pub param_type: String,
    /// Property definitions, ordered by name
    pub properties: BTreeMap<String, ToolPropertySchema>,
    /// Required property names, in declaration order
    pub required: Vec<String>,
}

impl ToolParameters {
    /// Create a new tool parameters schema
    pub fn new() -> Self {
        Self { param_type: "object".to_string(), properties: BTreeMap::new(), required: Vec::new() }
    }

    /// Add a property to the schema
    #[must_use]
    pub fn add_property(
        mut self,
        name: impl Into<String>,
        property_type: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(
            name.clone(),
            ToolPropertySchema {
                property_type: property_type.into(),
                description: description.into(),
            },
        );
        if required && !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    /// JSON schema for the parameters.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, schema)| {
                let mut property = json!({ "type": schema.property_type });
                if !schema.description.is_empty() {
                    property["description"] = Value::String(schema.description.clone());
                }
                (name.clone(), property)
            })
            .collect();
        json!({
            "type": self.param_type,
            "properties": properties,
            "required": self.required,
        })
    }
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self::new()
    }
}

/// Tool property schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPropertySchema {
    /// Property type
    #[serde(rename = "type")]
    pub property_type: String,
    /// Property description
    #[serde(default)]
    pub description: String,
}

/// What the runtime advertises to the model for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// Handler for tool execution
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the arguments object the model produced.
    async fn call(&self, args: &Map<String, Value>) -> Result<Value, RuntimeError>;
}

/// Tool definition for agents
#[derive(Clone)]
pub struct Tool {
    /// Tool name (used in function calls)
    pub name: String,
    /// Tool description
    pub description: String,
    /// Parameter schema
    pub parameters: ToolParameters,
    /// Handler for executing the tool
    pub handler: Arc<dyn ToolHandler>,
}

impl Tool {
    /// Create a new tool
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self { name: name.into(), description: description.into(), parameters, handler }
    }

    /// Definition advertised to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.to_json_schema(),
        }
    }

    /// Execute this tool with given arguments
    pub async fn call(&self, args: &Map<String, Value>) -> Result<Value, RuntimeError> {
        for required in &self.parameters.required {
            if !args.contains_key(required) {
                return Err(RuntimeError::InvalidToolArguments {
                    tool: self.name.clone(),
                    reason: format!("missing required argument '{required}'"),
                });
            }
        }
        self.handler.call(args).await
    }
}

// Implement Debug manually since Arc<dyn ToolHandler> doesn't implement Debug
impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("handler", &"<handler>")
            .finish()
    }
}
