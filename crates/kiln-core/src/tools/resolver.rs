//! Turns tool names from an agent config into runnable tools.

use std::sync::Arc;

use kiln_abstraction::Tool;
use thiserror::Error;
use tracing::debug;

use super::external::{ExternalToolError, ExternalToolSource, load_external_tool};
use super::script::ScriptTool;
use crate::hub::{ArtifactKind, ArtifactStore, HubError};
use crate::plugins::{PluginError, PluginLoader};

/// Tool resolution errors. Each names the tool that failed.
#[derive(Debug, Error)]
pub enum ToolResolutionError {
    /// The tool artifact could not be fetched.
    #[error("failed to fetch tool '{name}': {source}")]
    Artifact {
        /// Tool name.
        name: String,
        /// Underlying error.
        #[source]
        source: HubError,
    },

    /// The tool script failed to load or lacks its entry point.
    #[error("failed to load tool '{name}': {source}")]
    Plugin {
        /// Tool name.
        name: String,
        /// Underlying error.
        #[source]
        source: PluginError,
    },

    /// The external tool could not be loaded.
    #[error("failed to load external tool '{name}': {source}")]
    External {
        /// Tool name.
        name: String,
        /// Underlying error.
        #[source]
        source: ExternalToolError,
    },
}

/// Result type for tool resolution.
pub type Result<T> = std::result::Result<T, ToolResolutionError>;

/// Resolves artifact and external tools. Stops at the first failure.
#[derive(Clone)]
pub struct ToolResolver {
    store: ArtifactStore,
    loader: PluginLoader,
    external: Option<Arc<dyn ExternalToolSource>>,
}

impl ToolResolver {
    /// Creates a resolver without an external tool source.
    pub fn new(store: ArtifactStore, loader: PluginLoader) -> Self {
        Self { store, loader, external: None }
    }

    /// Sets the external tool source.
    #[must_use]
    pub fn with_external_source(mut self, source: Arc<dyn ExternalToolSource>) -> Self {
        self.external = Some(source);
        self
    }

    /// Resolves artifact tools, then external tools, preserving order.
    ///
    /// # Errors
    /// The first tool that fails, wrapped with its name.
    pub async fn resolve<S: AsRef<str>>(&self, known: &[S], external: &[S]) -> Result<Vec<Tool>> {
        let mut tools = Vec::with_capacity(known.len() + external.len());
        for name in known {
            tools.push(self.resolve_known(name.as_ref()).await?);
        }
        for name in external {
            tools.push(self.resolve_external(name.as_ref()).await?);
        }
        debug!(count = tools.len(), "Resolved tools");
        Ok(tools)
    }

    /// Loads a `function` artifact. The script must define a function named
    /// like the artifact.
    ///
    /// # Errors
    /// `Artifact` or `Plugin` naming the tool.
    pub async fn resolve_known(&self, name: &str) -> Result<Tool> {
        let function = name.strip_suffix(ArtifactKind::Function.extension()).unwrap_or(name);
        let source = self
            .store
            .read_artifact(name, ArtifactKind::Function)
            .await
            .map_err(|source| ToolResolutionError::Artifact { name: name.to_string(), source })?;

        let plugin_error = |source| ToolResolutionError::Plugin { name: name.to_string(), source };
        let module = self.loader.load_code_as_module(&source, function).map_err(plugin_error)?;
        ScriptTool::into_tool(Arc::new(module), function, function, None).map_err(plugin_error)
    }

    /// Loads an external tool, local snapshot first.
    ///
    /// # Errors
    /// `External` naming the tool.
    pub async fn resolve_external(&self, name: &str) -> Result<Tool> {
        let external_error = |source| ToolResolutionError::External { name: name.to_string(), source };
        let Some(source) = &self.external else {
            return Err(external_error(ExternalToolError::Unavailable(name.to_string())));
        };
        load_external_tool(source.as_ref(), name).await.map_err(external_error)
    }
}

impl std::fmt::Debug for ToolResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolResolver")
            .field("store", &self.store)
            .field("external", &self.external.is_some())
            .finish_non_exhaustive()
    }
}
