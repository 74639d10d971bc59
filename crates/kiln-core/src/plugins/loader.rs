//! Rhai script loader.

use std::fmt;

use rhai::{AST, CallFnOptions, Dynamic, Engine, Scope};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::PluginLimits;

/// Plugin errors.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The script failed to compile or run. `message` is the engine's text.
    #[error("failed to execute module '{module}': {message}")]
    CodeExecution {
        /// Module name.
        module: String,
        /// Engine error text.
        message: String,
    },

    /// The module has no top-level function with the requested name.
    #[error("module '{module}' does not define function '{name}'")]
    MissingEntryPoint {
        /// Module name.
        module: String,
        /// Function name.
        name: String,
    },

    /// A value could not cross the JSON/script boundary.
    #[error("value conversion failed in module '{module}': {message}")]
    Conversion {
        /// Module name.
        module: String,
        /// Conversion error text.
        message: String,
    },
}

/// Result type for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;

/// Something a script defines at top level.
#[derive(Debug, Clone)]
pub enum Symbol {
    /// A script function.
    Function {
        /// Function name.
        name: String,
        /// Parameter names, in order.
        params: Vec<String>,
        /// `///` doc lines preceding the definition, markers stripped.
        doc: Vec<String>,
    },
    /// A `let` or `const` binding left in scope after the run.
    Binding {
        /// Variable name.
        name: String,
        /// Final value.
        value: Dynamic,
        /// Declared with `const`.
        constant: bool,
    },
}

impl Symbol {
    /// Symbol name.
    pub fn name(&self) -> &str {
        match self {
            Self::Function { name, .. } | Self::Binding { name, .. } => name,
        }
    }
}

/// Top-level symbols of a module, in definition order.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    /// All symbols.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the module defines nothing.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// The first function called `name`.
    pub fn function(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| matches!(s, Symbol::Function { .. }) && s.name() == name)
    }

    /// The binding called `name`.
    pub fn binding(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| matches!(s, Symbol::Binding { .. }) && s.name() == name)
    }
}

/// Compiles and runs scripts into [`PluginModule`]s.
///
/// Every module gets its own `Engine` and `Scope`, so nothing leaks between
/// loads. Rhai has no file-system or network access unless the host
/// registers it, `eval` is disabled, and the configured limits bound CPU,
/// call depth and string sizes. This is not a security sandbox: load only
/// scripts from repositories you trust.
#[derive(Debug, Clone, Copy, Default)]
pub struct PluginLoader {
    limits: PluginLimits,
}

impl PluginLoader {
    /// Creates a loader with the given limits.
    pub fn new(limits: PluginLimits) -> Self {
        Self { limits }
    }

    fn engine(&self) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_call_levels(self.limits.max_call_levels);
        engine.set_max_string_size(self.limits.max_string_size);
        engine.disable_symbol("eval");
        engine
    }

    /// Compiles and runs `source` as module `module_name`.
    ///
    /// # Errors
    /// `CodeExecution` carrying the engine's error text if the script does not
    /// parse or fails while running its top-level statements.
    pub fn load_code_as_module(&self, source: &str, module_name: &str) -> Result<PluginModule> {
        let engine = self.engine();
        let failed = |message: String| PluginError::CodeExecution { module: module_name.to_string(), message };

        let ast = engine.compile(source).map_err(|e| failed(e.to_string()))?;
        let mut scope = Scope::new();
        engine.run_ast_with_scope(&mut scope, &ast).map_err(|e| failed(e.to_string()))?;

        let mut symbols = Vec::new();
        for f in ast.iter_functions() {
            let name = f.name.to_string();
            let doc = doc_lines(source, &name);
            symbols.push(Symbol::Function {
                name,
                params: f.params.iter().map(|p| p.to_string()).collect(),
                doc,
            });
        }
        for (name, constant, value) in scope.iter() {
            // Later bindings shadow earlier ones with the same name.
            symbols.retain(|s| !(matches!(s, Symbol::Binding { .. }) && s.name() == name));
            symbols.push(Symbol::Binding { name: name.to_string(), value, constant });
        }

        debug!(module = %module_name, symbols = symbols.len(), "Loaded plugin module");
        Ok(PluginModule { name: module_name.to_string(), engine, ast, symbols: SymbolTable { symbols } })
    }
}

/// A loaded script.
pub struct PluginModule {
    name: String,
    engine: Engine,
    ast: AST,
    symbols: SymbolTable,
}

impl PluginModule {
    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Top-level symbols.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Looks up a function that must exist.
    ///
    /// # Errors
    /// `MissingEntryPoint` if there is no top-level function called `name`.
    pub fn entry_point(&self, name: &str) -> Result<&Symbol> {
        self.symbols.function(name).ok_or_else(|| PluginError::MissingEntryPoint {
            module: self.name.clone(),
            name: name.to_string(),
        })
    }

    /// Calls a top-level function with JSON arguments and returns its result
    /// as JSON.
    ///
    /// # Errors
    /// `MissingEntryPoint`, `Conversion` for values that cannot cross the
    /// boundary, `CodeExecution` for script failures.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.entry_point(name)?;

        let args = args
            .iter()
            .map(|arg| rhai::serde::to_dynamic(arg).map_err(|e| self.conversion(&e.to_string())))
            .collect::<Result<Vec<Dynamic>>>()?;

        let options = CallFnOptions::new().eval_ast(false);
        let output: Dynamic = self
            .engine
            .call_fn_with_options(options, &mut Scope::new(), &self.ast, name, args)
            .map_err(|e| PluginError::CodeExecution { module: self.name.clone(), message: e.to_string() })?;

        self.to_json(&output)
    }

    /// Converts a script value to JSON.
    ///
    /// # Errors
    /// `Conversion` for values JSON cannot represent (function pointers, etc).
    pub fn to_json(&self, value: &Dynamic) -> Result<Value> {
        rhai::serde::from_dynamic::<Value>(value).map_err(|e| self.conversion(&e.to_string()))
    }

    fn conversion(&self, message: &str) -> PluginError {
        PluginError::Conversion { module: self.name.clone(), message: message.to_string() }
    }
}

impl fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginModule")
            .field("name", &self.name)
            .field("symbols", &self.symbols)
            .finish_non_exhaustive()
    }
}

/// `///` lines immediately above `fn <name>(`.
fn doc_lines(source: &str, fn_name: &str) -> Vec<String> {
    let lines: Vec<&str> = source.lines().collect();
    let Some(pos) = lines.iter().position(|line| declares_fn(line.trim_start(), fn_name)) else {
        return Vec::new();
    };

    let mut doc: Vec<String> = lines[..pos]
        .iter()
        .rev()
        .map(|line| line.trim())
        .take_while(|line| line.starts_with("///"))
        .map(|line| {
            let text = line.trim_start_matches('/');
            text.strip_prefix(' ').unwrap_or(text).trim_end().to_string()
        })
        .collect();
    doc.reverse();
    doc
}

fn declares_fn(line: &str, name: &str) -> bool {
    let line = line.strip_prefix("private ").unwrap_or(line);
    line.strip_prefix("fn ")
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix(name))
        .is_some_and(|rest| rest.trim_start().starts_with('('))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WEATHER: &str = r#"
// helper, not a doc comment
const UNITS = "celsius";
let greeting = "hi";

/// Returns the weather for a city.
/// @param city:string City name
fn get_weather(city) {
    `Sunny in ${city}`
}

fn add(a, b) { a + b }
"#;

    #[test]
    fn test_enumerates_symbols() {
        let module = PluginLoader::default().load_code_as_module(WEATHER, "weather").unwrap();
        assert_eq!(module.name(), "weather");

        match module.entry_point("get_weather").unwrap() {
            Symbol::Function { params, doc, .. } => {
                assert_eq!(params, &vec!["city".to_string()]);
                assert_eq!(
                    doc,
                    &vec![
                        "Returns the weather for a city.".to_string(),
                        "@param city:string City name".to_string()
                    ]
                );
            }
            other => panic!("expected function, got {other:?}"),
        }
        match module.entry_point("add").unwrap() {
            Symbol::Function { doc, .. } => assert!(doc.is_empty()),
            other => panic!("expected function, got {other:?}"),
        }
        match module.symbols().binding("UNITS").unwrap() {
            Symbol::Binding { value, constant, .. } => {
                assert!(*constant);
                assert_eq!(value.clone().into_string().unwrap(), "celsius");
            }
            other => panic!("expected binding, got {other:?}"),
        }
        assert!(matches!(
            module.symbols().binding("greeting"),
            Some(Symbol::Binding { constant: false, .. })
        ));
    }

    #[test]
    fn test_call_with_json() {
        let module = PluginLoader::default().load_code_as_module(WEATHER, "weather").unwrap();
        assert_eq!(module.call("add", &[json!(1), json!(2)]).unwrap(), json!(3));
        assert_eq!(module.call("get_weather", &[json!("Oslo")]).unwrap(), json!("Sunny in Oslo"));
    }

    #[test]
    fn test_call_returns_maps() {
        let source = "fn info() { #{ ok: true, tags: [\"a\"] } }";
        let module = PluginLoader::default().load_code_as_module(source, "info").unwrap();
        assert_eq!(module.call("info", &[]).unwrap(), json!({ "ok": true, "tags": ["a"] }));
    }

    #[test]
    fn test_missing_entry_point() {
        let module = PluginLoader::default().load_code_as_module(WEATHER, "weather").unwrap();
        let err = module.call("forward", &[]).unwrap_err();
        assert!(matches!(err, PluginError::MissingEntryPoint { ref name, .. } if name == "forward"));
    }

    #[test]
    fn test_parse_error_carries_engine_text() {
        let err = PluginLoader::default().load_code_as_module("fn broken( {", "broken").unwrap_err();
        match err {
            PluginError::CodeExecution { module, message } => {
                assert_eq!(module, "broken");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_runtime_error_carries_engine_text() {
        let err = PluginLoader::default().load_code_as_module(r#"throw "boom";"#, "thrower").unwrap_err();
        assert!(matches!(err, PluginError::CodeExecution { ref message, .. } if message.contains("boom")));
    }

    #[test]
    fn test_eval_is_disabled() {
        let err = PluginLoader::default().load_code_as_module(r#"let x = eval("40 + 2");"#, "evil");
        assert!(matches!(err, Err(PluginError::CodeExecution { .. })));
    }

    #[test]
    fn test_operation_limit() {
        let loader = PluginLoader::new(PluginLimits { max_operations: 1_000, ..PluginLimits::default() });
        let err = loader.load_code_as_module("loop { }", "spin").unwrap_err();
        assert!(matches!(err, PluginError::CodeExecution { .. }));
    }

    #[test]
    fn test_modules_do_not_share_state() {
        let loader = PluginLoader::default();
        loader.load_code_as_module("let shared = 1;", "first").unwrap();
        let err = loader.load_code_as_module("let y = shared + 1;", "second").unwrap_err();
        assert!(matches!(err, PluginError::CodeExecution { ref module, .. } if module == "second"));
    }

    #[test]
    fn test_doc_lines_private_fn() {
        let source = "/// Hidden.\nprivate fn secret() { 1 }";
        assert_eq!(doc_lines(source, "secret"), vec!["Hidden.".to_string()]);
        assert!(doc_lines(source, "missing").is_empty());
    }
}
