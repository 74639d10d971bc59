//! Tools an agent can call.
//!
//! - `script`: wraps a function defined in a Rhai script as a [`kiln_abstraction::Tool`]
//! - `external`: tools hosted in their own hub repositories
//! - `resolver`: turns config tool names into ready-to-use tools

pub mod external;
pub mod resolver;
pub mod script;

pub use external::{
    ExternalTool, ExternalToolError, ExternalToolSource, HubConnector, HubToolSource, RepositoryConnector,
};
pub use resolver::{ToolResolutionError, ToolResolver};
pub use script::ScriptTool;
