//! Result types: what shape an agent's final answer must have.
//!
//! A config lists result type tokens (`["str"]`, `["Interestingness"]`,
//! `["int", "Shape"]`). Primitive tokens come from a closed table; any other
//! token names a record type, either registered in-process or defined by a
//! `structured_output` script whose top-level constant of the same name maps
//! field names to types:
//!
//! ```text
//! const Shape = #{
//!     sides: "int",
//!     name: #{ type: "str", description: "Common name" },
//! };
//! ```

use std::collections::{BTreeMap, BTreeSet};

use kiln_abstraction::ToolDefinition;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;

use crate::hub::{ArtifactKind, ArtifactStore, HubError};
use crate::plugins::{PluginError, PluginLoader, Symbol};

/// Description used for result tools when the config gives none.
pub const DEFAULT_RESULT_TOOL_DESCRIPTION: &str = "The final response which ends this conversation";

/// Result type errors.
#[derive(Debug, Error)]
pub enum ResultTypeError {
    /// The structured output artifact could not be fetched.
    #[error("failed to load result type '{name}': {source}")]
    Artifact {
        /// Token being resolved.
        name: String,
        /// Underlying error.
        #[source]
        source: HubError,
    },

    /// The structured output script failed to load.
    #[error("failed to load result type '{name}': {source}")]
    Plugin {
        /// Token being resolved.
        name: String,
        /// Underlying error.
        #[source]
        source: PluginError,
    },

    /// The artifact does not define a usable record type.
    #[error("'{name}' is not a valid structured type: {reason}")]
    InvalidStructuredType {
        /// Token being resolved.
        name: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result type for result type resolution.
pub type Result<T> = std::result::Result<T, ResultTypeError>;

/// Built-in scalar result types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Str,
    Int,
    Float,
    Bool,
}

impl PrimitiveType {
    /// Parses a config token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "str" => Some(Self::Str),
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }

    /// The config token for this type.
    pub const fn token(self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        }
    }

    /// JSON schema type name.
    pub const fn schema_type(self) -> &'static str {
        match self {
            Self::Str => "string",
            Self::Int => "integer",
            Self::Float => "number",
            Self::Bool => "boolean",
        }
    }

    /// Whether `value` is an instance of this type. Floats accept integers.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Str => value.is_string(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Bool => value.is_boolean(),
        }
    }
}

/// One field of a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: PrimitiveType,
    pub description: Option<String>,
}

impl FieldSpec {
    /// Creates a field without a description.
    pub fn new(name: impl Into<String>, ty: PrimitiveType) -> Self {
        Self { name: name.into(), ty, description: None }
    }

    /// Adds a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A named record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredType {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl StructuredType {
    /// Creates a record type.
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self { name: name.into(), fields }
    }

    /// Parses a record definition: an object mapping field names to a type
    /// token or to `{ "type": token, "description": text }`.
    ///
    /// # Errors
    /// `InvalidStructuredType` when the definition is malformed.
    pub fn from_json(name: &str, definition: &Value) -> Result<Self> {
        let invalid = |reason: String| ResultTypeError::InvalidStructuredType { name: name.to_string(), reason };

        let Value::Object(map) = definition else {
            return Err(invalid(format!("expected an object map of fields, got {definition}")));
        };
        if map.is_empty() {
            return Err(invalid("record type has no fields".to_string()));
        }

        let mut fields = Vec::with_capacity(map.len());
        for (field, spec) in map {
            let (token, description) = match spec {
                Value::String(token) => (token.as_str(), None),
                Value::Object(spec) => {
                    let token = spec
                        .get("type")
                        .and_then(Value::as_str)
                        .ok_or_else(|| invalid(format!("field '{field}' has no type")))?;
                    (token, spec.get("description").and_then(Value::as_str).map(str::to_string))
                }
                other => return Err(invalid(format!("field '{field}' has invalid spec {other}"))),
            };
            let ty = PrimitiveType::from_token(token)
                .ok_or_else(|| invalid(format!("field '{field}' has unknown type '{token}'")))?;
            fields.push(FieldSpec { name: field.clone(), ty, description });
        }
        Ok(Self { name: name.to_string(), fields })
    }

    /// Whether `value` is an object with every field present and well typed.
    pub fn accepts(&self, value: &Value) -> bool {
        value.as_object().is_some_and(|object| {
            self.fields
                .iter()
                .all(|field| object.get(&field.name).is_some_and(|v| field.ty.accepts(v)))
        })
    }

    /// JSON schema of the record.
    pub fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|field| {
                let mut schema = json!({ "type": field.ty.schema_type() });
                if let Some(description) = &field.description {
                    schema["description"] = Value::String(description.clone());
                }
                (field.name.clone(), schema)
            })
            .collect();
        let required: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        json!({
            "title": self.name,
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A resolved result type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultType {
    Primitive(PrimitiveType),
    Structured(StructuredType),
    /// Any one of the arms, in config order. Duplicates are kept.
    Union(Vec<ResultType>),
}

impl Default for ResultType {
    fn default() -> Self {
        Self::Primitive(PrimitiveType::Str)
    }
}

impl ResultType {
    /// Whether `value` is an instance of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Primitive(p) => p.accepts(value),
            Self::Structured(s) => s.accepts(value),
            Self::Union(arms) => arms.iter().any(|arm| arm.accepts(value)),
        }
    }

    /// The first arm accepting `value`.
    pub fn select_arm(&self, value: &Value) -> Option<&Self> {
        match self {
            Self::Union(arms) => arms.iter().find(|arm| arm.accepts(value)),
            other => other.accepts(value).then_some(other),
        }
    }

    /// Short name used to tell union arms apart.
    pub fn tag(&self) -> &str {
        match self {
            Self::Primitive(p) => p.token(),
            Self::Structured(s) => &s.name,
            Self::Union(_) => "union",
        }
    }

    /// JSON schema of the type.
    pub fn json_schema(&self) -> Value {
        match self {
            Self::Primitive(p) => json!({ "type": p.schema_type() }),
            Self::Structured(s) => s.json_schema(),
            Self::Union(arms) => json!({ "anyOf": arms.iter().map(Self::json_schema).collect::<Vec<_>>() }),
        }
    }

    /// Tools the model calls to hand back a final result: one for a single
    /// type, one `<name>_<tag>` per distinct arm tag for a union. Non-record
    /// types are wrapped in a `response` property since tool arguments are objects.
    pub fn result_tools(&self, name: &str, description: Option<&str>) -> Vec<ToolDefinition> {
        let description = description.unwrap_or(DEFAULT_RESULT_TOOL_DESCRIPTION);
        match self {
            Self::Union(arms) => {
                let mut seen = BTreeSet::new();
                arms.iter()
                    .filter(|arm| seen.insert(arm.tag()))
                    .map(|arm| arm.result_tool(format!("{name}_{}", arm.tag()), description))
                    .collect()
            }
            single => vec![single.result_tool(name.to_string(), description)],
        }
    }

    fn result_tool(&self, name: String, description: &str) -> ToolDefinition {
        let parameters = match self {
            Self::Structured(s) => s.json_schema(),
            other => json!({
                "type": "object",
                "properties": { "response": other.json_schema() },
                "required": ["response"],
            }),
        };
        ToolDefinition { name, description: description.to_string(), parameters }
    }
}

/// Turns result type tokens into a [`ResultType`].
///
/// Lookup order per token: primitive table, registered record types, then the
/// `structured_output` artifact of the same name. Nothing is cached between
/// calls, so edits to artifacts are picked up by the next resolution.
#[derive(Debug, Clone)]
pub struct ResultTypeResolver {
    store: ArtifactStore,
    loader: PluginLoader,
    registry: BTreeMap<String, StructuredType>,
}

impl ResultTypeResolver {
    /// Creates a resolver with an empty registry.
    pub fn new(store: ArtifactStore, loader: PluginLoader) -> Self {
        Self { store, loader, registry: BTreeMap::new() }
    }

    /// Registers an in-process record type, shadowing any artifact of the same name.
    pub fn register(&mut self, ty: StructuredType) {
        self.registry.insert(ty.name.clone(), ty);
    }

    /// Resolves a token list.
    ///
    /// # Errors
    /// The first token that fails to resolve.
    pub async fn resolve(&self, tokens: &[String]) -> Result<ResultType> {
        if tokens.is_empty() {
            return Ok(ResultType::default());
        }

        let mut arms = Vec::with_capacity(tokens.len());
        for token in tokens {
            arms.push(self.resolve_token(token).await?);
        }
        if arms.len() == 1 {
            return Ok(arms.remove(0));
        }
        debug!(arms = arms.len(), "Resolved union result type");
        Ok(ResultType::Union(arms))
    }

    async fn resolve_token(&self, token: &str) -> Result<ResultType> {
        if let Some(primitive) = PrimitiveType::from_token(token) {
            return Ok(ResultType::Primitive(primitive));
        }
        if let Some(registered) = self.registry.get(token) {
            return Ok(ResultType::Structured(registered.clone()));
        }

        let source = self
            .store
            .read_artifact(token, ArtifactKind::StructuredOutput)
            .await
            .map_err(|source| ResultTypeError::Artifact { name: token.to_string(), source })?;
        let module = self
            .loader
            .load_code_as_module(&source, token)
            .map_err(|source| ResultTypeError::Plugin { name: token.to_string(), source })?;

        let Some(Symbol::Binding { value, .. }) = module.symbols().binding(token) else {
            return Err(ResultTypeError::InvalidStructuredType {
                name: token.to_string(),
                reason: format!("module does not define a record type named '{token}'"),
            });
        };
        let definition = module
            .to_json(value)
            .map_err(|source| ResultTypeError::Plugin { name: token.to_string(), source })?;
        Ok(ResultType::Structured(StructuredType::from_json(token, &definition)?))
    }
}
