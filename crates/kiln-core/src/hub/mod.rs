//! Versioned artifact hub.
//!
//! Agent configs, tool scripts and result-type scripts live in a remote
//! repository with two directories (`tools/` and `agents/`). Every read goes
//! through a local snapshot first and falls back to the remote.

pub mod cache;
pub mod client;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

pub use cache::{CachedRepository, FetchPolicy};
pub use client::HubClient;
pub use store::ArtifactStore;

/// Directory holding code artifacts.
pub const TOOLS_DIR: &str = "tools";

/// Directory holding agent configs.
pub const AGENTS_DIR: &str = "agents";

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The remote repository has no such file.
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    /// The file is not in the local snapshot and the remote was not consulted.
    #[error("artifact not in local cache: {0}")]
    LocalEntryNotFound(String),

    /// Unknown artifact kind string.
    #[error("invalid artifact kind '{0}' (expected function, structured_output or config)")]
    InvalidKind(String),

    /// Artifact names must be plain file names.
    #[error("invalid artifact name '{0}'")]
    InvalidName(String),

    /// HTTP request error.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// The hub answered with an unexpected status.
    #[error("hub returned status {status} for {url}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
        /// Response body, as far as it could be read.
        body: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;

/// What an artifact is used for, which decides where it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// A tool script.
    Function,
    /// A script defining structured result types.
    StructuredOutput,
    /// An agent config.
    Config,
}

impl ArtifactKind {
    /// Repository subdirectory for this kind.
    pub const fn subdirectory(self) -> &'static str {
        match self {
            Self::Function | Self::StructuredOutput => TOOLS_DIR,
            Self::Config => AGENTS_DIR,
        }
    }

    /// File extension, including the dot.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Function | Self::StructuredOutput => ".rhai",
            Self::Config => ".json",
        }
    }

    /// Appends the kind's extension unless `name` already carries it.
    pub fn file_name(self, name: &str) -> String {
        if name.ends_with(self.extension()) {
            name.to_string()
        } else {
            format!("{name}{}", self.extension())
        }
    }

    /// Repository path (`<subdir>/<file>`) for `name`.
    pub fn repo_path(self, name: &str) -> String {
        format!("{}/{}", self.subdirectory(), self.file_name(name))
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function => write!(f, "function"),
            Self::StructuredOutput => write!(f, "structured_output"),
            Self::Config => write!(f, "config"),
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "function" => Ok(Self::Function),
            "structured_output" => Ok(Self::StructuredOutput),
            "config" => Ok(Self::Config),
            other => Err(HubError::InvalidKind(other.to_string())),
        }
    }
}

/// The remote side of the artifact hub.
///
/// Paths are repository-relative and use `/` separators.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Downloads a file. Missing files are `HubError::ArtifactNotFound`.
    async fn download(&self, path: &str) -> Result<String>;

    /// Commits a single file.
    async fn upload(&self, path: &str, content: &str, message: &str) -> Result<()>;

    /// Lists the files directly under `dir`, as repository-relative paths.
    /// A missing directory lists as empty.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;
}

/// In-process repository for offline use and tests.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    files: Mutex<BTreeMap<String, String>>,
    commits: Mutex<Vec<String>>,
    downloads: AtomicUsize,
}

impl MemoryRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, builder style.
    #[must_use]
    pub fn with_file(self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    /// Adds or replaces a file.
    pub fn insert(&self, path: impl Into<String>, content: impl Into<String>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), content.into());
    }

    /// Current content of a file.
    pub fn get(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner).get(path).cloned()
    }

    /// Number of download calls served so far, including misses.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Commit messages in the order they were received.
    pub fn commit_messages(&self) -> Vec<String> {
        self.commits.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl RemoteRepository for MemoryRepository {
    async fn download(&self, path: &str) -> Result<String> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.get(path).ok_or_else(|| HubError::ArtifactNotFound(path.to_string()))
    }

    async fn upload(&self, path: &str, content: &str, message: &str) -> Result<()> {
        self.insert(path, content);
        self.commits.lock().unwrap_or_else(PoisonError::into_inner).push(message.to_string());
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(files
            .keys()
            .filter(|path| path.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('/')))
            .cloned()
            .collect())
    }
}
