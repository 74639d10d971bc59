//! Tools hosted in their own hub repositories.
//!
//! An external tool repository contains two files:
//!
//! - `tool.json`: `{ "name": ..., "description": ..., "inputs": { arg: { "type": ..., "description": ... } } }`
//! - `tool.rhai`: a script defining `forward`, whose parameters are the inputs
//!
//! Tools are looked up in the local snapshot first and fetched only on a miss.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_abstraction::Tool;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::script::{FunctionDoc, ScriptTool};
use crate::config::HubSettings;
use crate::hub::{CachedRepository, FetchPolicy, HubClient, HubError, RemoteRepository};
use crate::plugins::{PluginError, PluginLoader, Symbol};

const METADATA_FILE: &str = "tool.json";
const CODE_FILE: &str = "tool.rhai";
const ENTRY_POINT: &str = "forward";

/// External tool errors.
#[derive(Debug, Error)]
pub enum ExternalToolError {
    /// Not in the local snapshot. Callers retry with network access.
    #[error("tool '{0}' is not available locally")]
    LocalEntryNotFound(String),

    /// No external tool source is configured.
    #[error("no external tool source configured for '{0}'")]
    Unavailable(String),

    /// Hub error.
    #[error("hub error: {0}")]
    Hub(#[from] HubError),

    /// The tool script failed to load.
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// `tool.json` is malformed.
    #[error("invalid metadata for tool '{name}': {reason}")]
    InvalidMetadata {
        /// Tool repository.
        name: String,
        /// What is wrong.
        reason: String,
    },
}

/// Result type for external tool operations.
pub type Result<T> = std::result::Result<T, ExternalToolError>;

/// A tool as loaded from an external source, before adaptation.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    /// The runnable tool, described with the externally supplied description.
    pub tool: Tool,
    /// Description taken from the implementation itself, if it has one.
    pub implementation_doc: Option<String>,
}

impl ExternalTool {
    /// Adapts the external tool for an agent: the implementation's own doc
    /// wins over the externally supplied description.
    pub fn into_tool(self) -> Tool {
        let mut tool = self.tool;
        if let Some(doc) = self.implementation_doc.filter(|d| !d.trim().is_empty()) {
            tool.description = doc;
        }
        tool
    }
}

/// Somewhere external tools can be loaded from.
#[async_trait]
pub trait ExternalToolSource: Send + Sync {
    /// Loads tool `name`. With `local_only`, a miss is
    /// `ExternalToolError::LocalEntryNotFound` and no network I/O happens.
    async fn load_tool(&self, name: &str, local_only: bool) -> Result<ExternalTool>;
}

/// Loads an external tool, local snapshot first, then remote.
///
/// # Errors
/// Any error but a local miss from the first attempt, or any error from the
/// second.
pub async fn load_external_tool(source: &dyn ExternalToolSource, name: &str) -> Result<Tool> {
    let external = match source.load_tool(name, true).await {
        Ok(tool) => tool,
        Err(ExternalToolError::LocalEntryNotFound(_)) => {
            debug!(tool = %name, "External tool not cached, fetching");
            source.load_tool(name, false).await?
        }
        Err(e) => return Err(e),
    };
    Ok(external.into_tool())
}

/// Opens a remote repository by id.
pub trait RepositoryConnector: Send + Sync {
    /// Returns a handle for `repo_id`. Must not perform network I/O.
    fn connect(&self, repo_id: &str) -> std::result::Result<Arc<dyn RemoteRepository>, HubError>;
}

/// Connects to repositories on the configured hub.
#[derive(Debug, Clone)]
pub struct HubConnector {
    settings: HubSettings,
}

impl HubConnector {
    /// Creates a connector for the hub in `settings`.
    pub fn new(settings: HubSettings) -> Self {
        Self { settings }
    }
}

impl RepositoryConnector for HubConnector {
    fn connect(&self, repo_id: &str) -> std::result::Result<Arc<dyn RemoteRepository>, HubError> {
        Ok(Arc::new(HubClient::for_repo(&self.settings, repo_id)?))
    }
}

#[derive(Debug, Deserialize)]
struct ToolMetadata {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    inputs: BTreeMap<String, InputSpec>,
}

#[derive(Debug, Deserialize)]
struct InputSpec {
    #[serde(rename = "type", default = "default_input_type")]
    ty: String,
    #[serde(default)]
    description: String,
}

fn default_input_type() -> String {
    "string".to_string()
}

/// JSON schema type for a declared input type.
fn schema_type(ty: &str) -> &str {
    match ty {
        "string" | "integer" | "number" | "boolean" | "array" | "object" => ty,
        _ => "string",
    }
}

/// Checks that `repo_id` is `name` or `owner/name` with plain segments, since
/// it becomes a directory under the cache root.
fn checked_repo_id(repo_id: &str) -> std::result::Result<&str, HubError> {
    let segments: Vec<&str> = repo_id.split('/').collect();
    let plain = |segment: &&str| {
        !segment.trim().is_empty() && *segment != "." && *segment != ".." && !segment.contains(['\\', ':'])
    };
    if segments.len() > 2 || !segments.iter().all(plain) {
        return Err(HubError::InvalidName(repo_id.to_string()));
    }
    Ok(repo_id)
}

/// External tools stored in hub repositories, cached like artifacts.
pub struct HubToolSource {
    connector: Arc<dyn RepositoryConnector>,
    cache_dir: PathBuf,
    loader: PluginLoader,
}

impl HubToolSource {
    /// Creates a source that caches tool repositories under `cache_dir`.
    pub fn new(connector: Arc<dyn RepositoryConnector>, cache_dir: impl Into<PathBuf>, loader: PluginLoader) -> Self {
        Self { connector, cache_dir: cache_dir.into(), loader }
    }

    async fn fetch(&self, cache: &CachedRepository, name: &str, file: &str, policy: FetchPolicy) -> Result<String> {
        let path = cache.resolve(file, policy).await.map_err(|e| match e {
            HubError::LocalEntryNotFound(_) => ExternalToolError::LocalEntryNotFound(name.to_string()),
            other => ExternalToolError::Hub(other),
        })?;
        Ok(tokio::fs::read_to_string(path).await.map_err(HubError::from)?)
    }
}

impl std::fmt::Debug for HubToolSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubToolSource")
            .field("cache_dir", &self.cache_dir)
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ExternalToolSource for HubToolSource {
    async fn load_tool(&self, name: &str, local_only: bool) -> Result<ExternalTool> {
        let policy = if local_only { FetchPolicy::LocalOnly } else { FetchPolicy::LocalThenRemote };
        let repo_id = checked_repo_id(name)?;
        let cache = CachedRepository::new(&self.cache_dir, repo_id, self.connector.connect(repo_id)?);

        let metadata = self.fetch(&cache, name, METADATA_FILE, policy).await?;
        let code = self.fetch(&cache, name, CODE_FILE, policy).await?;

        let metadata: ToolMetadata = serde_json::from_str(&metadata)
            .map_err(|e| ExternalToolError::InvalidMetadata { name: name.to_string(), reason: e.to_string() })?;
        let module = Arc::new(self.loader.load_code_as_module(&code, name)?);

        let implementation_doc = match module.entry_point(ENTRY_POINT)? {
            Symbol::Function { doc, .. } => Some(FunctionDoc::parse(doc).description),
            Symbol::Binding { .. } => None,
        };

        let mut tool = ScriptTool::into_tool(module, ENTRY_POINT, &metadata.name, Some(&metadata.description))?;
        for (input, spec) in &metadata.inputs {
            if let Some(property) = tool.parameters.properties.get_mut(input) {
                property.property_type = schema_type(&spec.ty).to_string();
                property.description.clone_from(&spec.description);
            }
        }

        debug!(tool = %metadata.name, repo = %name, "Loaded external tool");
        Ok(ExternalTool { tool, implementation_doc })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::MemoryRepository;
    use serde_json::json;

    struct Single(Arc<MemoryRepository>);

    impl RepositoryConnector for Single {
        fn connect(&self, _repo_id: &str) -> std::result::Result<Arc<dyn RemoteRepository>, HubError> {
            Ok(self.0.clone())
        }
    }

    fn repo(doc: &str) -> Arc<MemoryRepository> {
        let metadata = json!({
            "name": "shouter",
            "description": "Upper-cases text",
            "inputs": { "text": { "type": "string", "description": "Text to shout" } },
        });
        let code = format!("{doc}fn forward(text) {{ text.to_upper() }}");
        Arc::new(
            MemoryRepository::new()
                .with_file("tool.json", metadata.to_string())
                .with_file("tool.rhai", code),
        )
    }

    #[test]
    fn test_schema_type_mapping() {
        assert_eq!(schema_type("integer"), "integer");
        assert_eq!(schema_type("image"), "string");
        assert_eq!(schema_type("any"), "string");
    }

    #[tokio::test]
    async fn test_local_miss_then_remote() {
        let dir = tempfile::tempdir().unwrap();
        let remote = repo("");
        let source = HubToolSource::new(Arc::new(Single(remote.clone())), dir.path(), PluginLoader::default());

        let err = source.load_tool("user/shouter", true).await.unwrap_err();
        assert!(matches!(err, ExternalToolError::LocalEntryNotFound(ref n) if n == "user/shouter"));
        assert_eq!(remote.download_count(), 0);

        let tool = load_external_tool(&source, "user/shouter").await.unwrap();
        assert_eq!(tool.name, "shouter");
        assert_eq!(tool.description, "Upper-cases text");
        assert_eq!(tool.parameters.properties["text"].description, "Text to shout");
        assert_eq!(remote.download_count(), 2);
        let args = json!({ "text": "hi" });
        assert_eq!(tool.call(args.as_object().unwrap()).await.unwrap(), json!("HI"));

        // Cached now: no further downloads.
        load_external_tool(&source, "user/shouter").await.unwrap();
        assert_eq!(remote.download_count(), 2);
    }

    #[tokio::test]
    async fn test_implementation_doc_wins() {
        let dir = tempfile::tempdir().unwrap();
        let remote = repo("/// Shout the given text.\n");
        let source = HubToolSource::new(Arc::new(Single(remote)), dir.path(), PluginLoader::default());

        let tool = load_external_tool(&source, "user/shouter").await.unwrap();
        assert_eq!(tool.description, "Shout the given text.");
    }

    #[tokio::test]
    async fn test_repo_id_must_stay_in_cache() {
        let dir = tempfile::tempdir().unwrap();
        let remote = repo("");
        let source = HubToolSource::new(Arc::new(Single(remote.clone())), dir.path(), PluginLoader::default());

        for bad in ["", " ", "..", "../shouter", "user/..", "/shouter", "user/", "a/b/c", "user\\shouter", "C:x"] {
            let err = source.load_tool(bad, false).await.unwrap_err();
            assert!(
                matches!(err, ExternalToolError::Hub(HubError::InvalidName(_))),
                "repo id {bad:?} should be rejected"
            );
        }
        assert_eq!(remote.download_count(), 0);

        source.load_tool("shouter", false).await.unwrap();
        source.load_tool("user/shouter", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_remote_tool() {
        let dir = tempfile::tempdir().unwrap();
        let source = HubToolSource::new(
            Arc::new(Single(Arc::new(MemoryRepository::new()))),
            dir.path(),
            PluginLoader::default(),
        );
        let err = load_external_tool(&source, "user/none").await.unwrap_err();
        assert!(matches!(err, ExternalToolError::Hub(HubError::ArtifactNotFound(_))));
    }
}
