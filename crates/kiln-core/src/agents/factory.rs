//! Builds runnable agents from declarative configs.

use std::fmt;
use std::sync::Arc;

use kiln_abstraction::{
    AgentRunRequest, AgentRunResult, AgentRuntime, AgentSpec, McpServerSpec, ModelMessage, RuntimeError, Tool,
};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::config::{AgentConfig, AgentConfigError};
use super::result_type::{ResultType, ResultTypeError, ResultTypeResolver, StructuredType};
use crate::config::Config;
use crate::hub::{ArtifactStore, HubError};
use crate::plugins::PluginLoader;
use crate::tools::{ExternalToolSource, HubConnector, HubToolSource, ToolResolutionError, ToolResolver};

/// Factory errors. Each variant passes the underlying error through as-is.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error(transparent)]
    Config(#[from] AgentConfigError),

    #[error(transparent)]
    ResultType(#[from] ResultTypeError),

    #[error(transparent)]
    Tool(#[from] ToolResolutionError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Hub(#[from] HubError),
}

/// Result type for factory operations.
pub type Result<T> = std::result::Result<T, FactoryError>;

/// Model provider credentials.
#[derive(Clone)]
pub struct ProviderCredentials {
    api_key: Zeroizing<String>,
}

impl ProviderCredentials {
    /// Wraps an API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: Zeroizing::new(api_key.into()) }
    }

    /// The API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials").field("api_key", &"<redacted>").finish()
    }
}

/// An agent ready to run.
pub struct ResolvedAgent {
    spec: AgentSpec,
    result_type: ResultType,
    credentials: ProviderCredentials,
    runtime: Arc<dyn AgentRuntime>,
}

impl ResolvedAgent {
    /// What the runtime sees.
    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    /// The resolved result type.
    pub fn result_type(&self) -> &ResultType {
        &self.result_type
    }

    /// Runs the agent on a prompt with no prior history.
    ///
    /// # Errors
    /// Runtime errors, or `ResultValidation` if the output does not match the
    /// result type.
    pub async fn run(&self, prompt: &str) -> std::result::Result<AgentRunResult, RuntimeError> {
        self.run_with_history(prompt, &[]).await
    }

    /// Runs the agent, continuing a conversation.
    ///
    /// # Errors
    /// See [`ResolvedAgent::run`].
    pub async fn run_with_history(
        &self,
        prompt: &str,
        message_history: &[ModelMessage],
    ) -> std::result::Result<AgentRunResult, RuntimeError> {
        let request = AgentRunRequest {
            agent: &self.spec,
            api_key: self.credentials.api_key(),
            prompt,
            message_history,
        };
        let result = self.runtime.run(request).await?;
        if !self.result_type.accepts(&result.output) {
            return Err(RuntimeError::ResultValidation(format!(
                "output {} does not match result type '{}'",
                result.output,
                self.result_type.tag()
            )));
        }
        Ok(result)
    }
}

impl fmt::Debug for ResolvedAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedAgent")
            .field("spec", &self.spec)
            .field("result_type", &self.result_type)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// Resolves agent configs against the artifact hub and hands out agents.
///
/// Every call rebuilds everything from the current artifacts.
pub struct AgentFactory {
    store: ArtifactStore,
    result_types: ResultTypeResolver,
    tools: ToolResolver,
    runtime: Arc<dyn AgentRuntime>,
}

impl AgentFactory {
    /// Creates a factory without an external tool source.
    pub fn new(store: ArtifactStore, loader: PluginLoader, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            result_types: ResultTypeResolver::new(store.clone(), loader),
            tools: ToolResolver::new(store.clone(), loader),
            store,
            runtime,
        }
    }

    /// Creates a factory backed by the configured hub, with external tools
    /// cached under `<cache_dir>/external`.
    ///
    /// # Errors
    /// Returns an error if the hub client cannot be built.
    pub fn from_config(config: &Config, runtime: Arc<dyn AgentRuntime>) -> Result<Self> {
        let store = ArtifactStore::from_settings(&config.hub)?;
        let loader = PluginLoader::new(config.plugins);
        let external = HubToolSource::new(
            Arc::new(HubConnector::new(config.hub.clone())),
            config.hub.cache_dir.join("external"),
            loader,
        );
        Ok(Self::new(store, loader, runtime).with_external_tools(Arc::new(external)))
    }

    /// Sets the external tool source.
    #[must_use]
    pub fn with_external_tools(mut self, source: Arc<dyn ExternalToolSource>) -> Self {
        self.tools = self.tools.with_external_source(source);
        self
    }

    /// Registers an in-process record type.
    #[must_use]
    pub fn with_structured_type(mut self, ty: StructuredType) -> Self {
        self.result_types.register(ty);
        self
    }

    /// The artifact store.
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Resolves the config's result type.
    ///
    /// # Errors
    /// See [`ResultTypeResolver::resolve`].
    pub async fn resolve_result_type(&self, config: &AgentConfig) -> Result<ResultType> {
        Ok(self.result_types.resolve(&config.result_type).await?)
    }

    /// Resolves artifact tools followed by external tools.
    ///
    /// # Errors
    /// The first tool that fails.
    pub async fn resolve_tools(&self, config: &AgentConfig) -> Result<Vec<Tool>> {
        let known = config.artifact_tool_names();
        let external: Vec<&str> = config.hf_tools.iter().map(String::as_str).collect();
        Ok(self.tools.resolve(known.as_slice(), external.as_slice()).await?)
    }

    /// Launch specs for the config's sub-process servers. Blank entries are dropped.
    pub fn parse_mcp_servers(config: &AgentConfig) -> Vec<McpServerSpec> {
        config.mcp_servers.iter().filter_map(|entry| entry.to_spec()).collect()
    }

    /// Builds an agent from `config`.
    ///
    /// Steps: validate, resolve the result type, resolve tools, parse server
    /// specs, check the model (unless deferred), assemble.
    ///
    /// # Errors
    /// The first failing step's error.
    pub async fn create_agent(&self, config: &AgentConfig, credentials: &ProviderCredentials) -> Result<ResolvedAgent> {
        config.validate()?;
        let result_type = self.resolve_result_type(config).await?;
        let tools = self.resolve_tools(config).await?;
        let mcp_servers = Self::parse_mcp_servers(config);

        if config.defer_model_check {
            debug!(model = %config.model, "Model check deferred");
        } else {
            self.runtime.check_model(&config.model, credentials.api_key()).await?;
        }

        let result_tools =
            result_type.result_tools(&config.result_tool_name, config.result_tool_description.as_deref());
        let spec = AgentSpec {
            model: config.model.clone(),
            name: config.name.clone(),
            system_prompt: config.system_prompt.clone(),
            model_settings: config.model_settings.clone(),
            retries: config.retries,
            result_tools,
            result_retries: config.result_retries,
            tools,
            mcp_servers,
            defer_model_check: config.defer_model_check,
            end_strategy: config.end_strategy,
        };

        info!(
            agent = %spec.name,
            model = %spec.model,
            tools = spec.tools.len(),
            result_tools = spec.result_tools.len(),
            mcp_servers = spec.mcp_servers.len(),
            "Created agent"
        );
        Ok(ResolvedAgent { spec, result_type, credentials: credentials.clone(), runtime: Arc::clone(&self.runtime) })
    }

    /// Builds the agent first and publishes its config only if that succeeds.
    ///
    /// # Errors
    /// Any `create_agent` error, or the upload error.
    pub async fn publish(&self, config: &AgentConfig, credentials: &ProviderCredentials) -> Result<ResolvedAgent> {
        let agent = self.create_agent(config, credentials).await?;
        config.push_to_hub(&self.store).await?;
        Ok(agent)
    }
}

impl fmt::Debug for AgentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentFactory")
            .field("store", &self.store)
            .field("result_types", &self.result_types)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}
