//! Script functions exposed as tools.
//!
//! The tool's schema comes from the function's doc comment:
//!
//! ```text
//! /// Returns the weather for a city.
//! /// @param city:string City name
//! /// @param days:integer How many days ahead
//! fn get_weather(city, days) { ... }
//! ```
//!
//! Parameters without an `@param` line are strings. Every parameter is
//! required.

use std::sync::Arc;

use async_trait::async_trait;
use kiln_abstraction::{RuntimeError, Tool, ToolHandler, ToolParameters};
use serde_json::{Map, Value};
use tracing::debug;

use crate::plugins::{PluginError, PluginModule, Result, Symbol};

/// One `@param` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParamDoc {
    pub name: String,
    pub ty: String,
    pub description: String,
}

/// A function's doc comment split into prose and `@param` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FunctionDoc {
    pub description: String,
    pub params: Vec<ParamDoc>,
}

impl FunctionDoc {
    pub fn parse(lines: &[String]) -> Self {
        let mut doc = Self::default();
        let mut prose = Vec::new();
        for line in lines {
            let Some(rest) = line.trim().strip_prefix("@param") else {
                prose.push(line.trim());
                continue;
            };
            let rest = rest.trim();
            let (spec, description) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let (name, ty) = spec.split_once(':').unwrap_or((spec, "string"));
            if name.is_empty() {
                continue;
            }
            doc.params.push(ParamDoc {
                name: name.to_string(),
                ty: if ty.is_empty() { "string".to_string() } else { ty.to_string() },
                description: description.trim().to_string(),
            });
        }
        doc.description = prose.join("\n").trim().to_string();
        doc
    }

    fn param(&self, name: &str) -> Option<&ParamDoc> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Calls a script function with the model's arguments mapped to positional
/// parameters by name. Missing optional values arrive as `()`.
pub struct ScriptTool {
    tool_name: String,
    module: Arc<PluginModule>,
    function: String,
    params: Vec<String>,
}

impl ScriptTool {
    /// Wraps `function` of `module` as a tool named `tool_name`.
    ///
    /// `description` replaces the doc-comment prose when given and non-empty.
    ///
    /// # Errors
    /// `MissingEntryPoint` if the module has no such function.
    pub fn into_tool(
        module: Arc<PluginModule>,
        function: &str,
        tool_name: &str,
        description: Option<&str>,
    ) -> Result<Tool> {
        let Symbol::Function { params, doc, .. } = module.entry_point(function)? else {
            return Err(PluginError::MissingEntryPoint {
                module: module.name().to_string(),
                name: function.to_string(),
            });
        };
        let (params, doc) = (params.clone(), FunctionDoc::parse(doc));

        let mut parameters = ToolParameters::new();
        for param in &params {
            let (ty, text) = doc.param(param).map_or(("string", ""), |p| (p.ty.as_str(), p.description.as_str()));
            parameters = parameters.add_property(param, ty, text, true);
        }
        let description = description.filter(|d| !d.trim().is_empty()).map_or(doc.description, str::to_string);

        debug!(tool = %tool_name, module = %module.name(), "Wrapped script function as tool");
        let handler = Self { tool_name: tool_name.to_string(), module, function: function.to_string(), params };
        Ok(Tool::new(tool_name, description, parameters, Arc::new(handler)))
    }
}

#[async_trait]
impl ToolHandler for ScriptTool {
    async fn call(&self, args: &Map<String, Value>) -> std::result::Result<Value, RuntimeError> {
        let positional: Vec<Value> =
            self.params.iter().map(|p| args.get(p).cloned().unwrap_or(Value::Null)).collect();
        self.module.call(&self.function, &positional).map_err(|e| RuntimeError::ToolExecution {
            tool: self.tool_name.clone(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::PluginLoader;
    use serde_json::json;

    const SOURCE: &str = r#"
/// Adds two numbers.
///
/// @param a:integer First operand
/// @param b:integer
fn add(a, b) { a + b }

fn shout(text) { text.to_upper() }

fn fail() { throw "nope"; }
"#;

    fn module() -> Arc<PluginModule> {
        Arc::new(PluginLoader::default().load_code_as_module(SOURCE, "math").unwrap())
    }

    #[test]
    fn test_parse_doc() {
        let doc = FunctionDoc::parse(&[
            "Does things.".to_string(),
            "@param x:number The x".to_string(),
            "@param y".to_string(),
            "More prose.".to_string(),
        ]);
        assert_eq!(doc.description, "Does things.\nMore prose.");
        assert_eq!(doc.params.len(), 2);
        assert_eq!(doc.params[0], ParamDoc { name: "x".into(), ty: "number".into(), description: "The x".into() });
        assert_eq!(doc.params[1].ty, "string");
    }

    #[test]
    fn test_into_tool_schema() {
        let tool = ScriptTool::into_tool(module(), "add", "add", None).unwrap();
        assert_eq!(tool.description, "Adds two numbers.");
        assert_eq!(tool.parameters.required, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(tool.parameters.properties["a"].property_type, "integer");
        assert_eq!(tool.parameters.properties["a"].description, "First operand");

        let shout = ScriptTool::into_tool(module(), "shout", "shout", Some("Upper-cases text")).unwrap();
        assert_eq!(shout.description, "Upper-cases text");
        assert_eq!(shout.parameters.properties["text"].property_type, "string");
    }

    #[test]
    fn test_into_tool_missing_function() {
        let err = ScriptTool::into_tool(module(), "missing", "missing", None).unwrap_err();
        assert!(matches!(err, PluginError::MissingEntryPoint { .. }));
    }

    #[tokio::test]
    async fn test_call_maps_named_arguments() {
        let tool = ScriptTool::into_tool(module(), "add", "add", None).unwrap();
        let args = json!({ "b": 40, "a": 2 });
        assert_eq!(tool.call(args.as_object().unwrap()).await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_call_reports_script_errors() {
        let tool = ScriptTool::into_tool(module(), "fail", "fail", None).unwrap();
        let err = tool.call(&Map::new()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ToolExecution { ref message, .. } if message.contains("nope")));
    }
}
