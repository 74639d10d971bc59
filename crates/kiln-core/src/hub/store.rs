//! Named artifacts on top of the cached repository.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::cache::{CachedRepository, FetchPolicy};
use super::client::HubClient;
use super::{AGENTS_DIR, ArtifactKind, HubError, Result, TOOLS_DIR};
use crate::config::HubSettings;

/// Reads and writes named artifacts, local snapshot first.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    cache: CachedRepository,
}

impl ArtifactStore {
    /// Wraps an existing cached repository.
    pub fn new(cache: CachedRepository) -> Self {
        Self { cache }
    }

    /// Builds a store backed by the hub described in `settings`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(settings: &HubSettings) -> Result<Self> {
        let client = HubClient::new(settings)?;
        info!(repo_id = %settings.repo_id, cache_dir = %settings.cache_dir.display(), "Opening artifact store");
        Ok(Self::new(CachedRepository::new(&settings.cache_dir, &settings.repo_id, Arc::new(client))))
    }

    /// The underlying cached repository.
    pub fn cache(&self) -> &CachedRepository {
        &self.cache
    }

    fn checked_path(name: &str, kind: ArtifactKind) -> Result<String> {
        let trimmed = name.trim();
        if trimmed.is_empty()
            || trimmed.contains('/')
            || trimmed.contains('\\')
            || trimmed.contains("..")
        {
            return Err(HubError::InvalidName(name.to_string()));
        }
        Ok(kind.repo_path(trimmed))
    }

    /// Resolves an artifact to a local file, downloading it on a miss.
    ///
    /// # Errors
    /// `InvalidName` for names that are not plain file names,
    /// `ArtifactNotFound` when neither the snapshot nor the remote has it.
    /// An unreachable remote surfaces as `Http`, and a server error that
    /// outlasts the retries as `Status`.
    pub async fn get_file_path(&self, name: &str, kind: ArtifactKind) -> Result<PathBuf> {
        let path = Self::checked_path(name, kind)?;
        self.cache.resolve(&path, FetchPolicy::LocalThenRemote).await
    }

    /// Reads an artifact's content.
    ///
    /// # Errors
    /// See [`ArtifactStore::get_file_path`].
    pub async fn read_artifact(&self, name: &str, kind: ArtifactKind) -> Result<String> {
        let path = self.get_file_path(name, kind).await?;
        Ok(tokio::fs::read_to_string(path).await?)
    }

    /// Loads an agent config as a JSON object. A blank name yields an empty
    /// map without touching the cache or the network.
    ///
    /// # Errors
    /// Resolution errors, or `Json` if the file is not a JSON object.
    pub async fn load_config(&self, name: &str) -> Result<Map<String, Value>> {
        if name.trim().is_empty() {
            return Ok(Map::new());
        }
        let content = self.read_artifact(name, ArtifactKind::Config).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Artifact names (extension stripped) in `tools` or `agents` of the
    /// local snapshot. Files with another extension are skipped. Never fetches.
    ///
    /// # Errors
    /// `InvalidName` for any other subdirectory, or an I/O error if the
    /// directory exists but cannot be read.
    pub async fn list_files(&self, subdirectory: &str) -> Result<BTreeSet<String>> {
        let extension = match subdirectory.trim_matches('/') {
            TOOLS_DIR => ArtifactKind::Function.extension(),
            AGENTS_DIR => ArtifactKind::Config.extension(),
            _ => return Err(HubError::InvalidName(subdirectory.to_string())),
        };
        let names = self.cache.list_local(subdirectory).await?;
        Ok(names
            .iter()
            .filter_map(|file| file.strip_suffix(extension))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Commits an artifact to the remote, then writes it into the snapshot.
    ///
    /// # Errors
    /// `InvalidName` or the remote commit error. Nothing is cached when the
    /// commit fails.
    pub async fn upload_content(&self, name: &str, content: &str, kind: ArtifactKind) -> Result<()> {
        let path = Self::checked_path(name, kind)?;
        let file_name = kind.file_name(name.trim());
        self.cache
            .remote()
            .upload(&path, content, &format!("Update {file_name}"))
            .await?;
        self.cache.write_local(&path, content).await?;
        info!(path = %path, "Uploaded artifact");
        Ok(())
    }

    /// Refreshes every file under `tools/` and `agents/` from the remote.
    /// Returns the number of files written.
    ///
    /// # Errors
    /// The first listing or download error.
    pub async fn download_files(&self) -> Result<usize> {
        let mut count = 0;
        for dir in [TOOLS_DIR, AGENTS_DIR] {
            for path in self.cache.remote().list(dir).await? {
                let content = self.cache.remote().download(&path).await?;
                self.cache.write_local(&path, &content).await?;
                debug!(path = %path, "Synced artifact");
                count += 1;
            }
        }
        info!(count, "Synced artifact snapshot");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::MemoryRepository;

    fn store_with(repo: Arc<MemoryRepository>) -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(CachedRepository::new(dir.path(), "org/repo", repo));
        (dir, store)
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let (_dir, store) = store_with(Arc::new(MemoryRepository::new()));
        for name in ["../secret", "a/b", "a\\b", "", "  "] {
            let err = store.get_file_path(name, ArtifactKind::Function).await.unwrap_err();
            assert!(matches!(err, HubError::InvalidName(_)), "{name:?}");
        }
    }

    #[tokio::test]
    async fn test_extension_is_normalized() {
        let repo = Arc::new(MemoryRepository::new().with_file("tools/add.rhai", "fn add(a, b) { a + b }"));
        let (_dir, store) = store_with(repo.clone());

        let with_ext = store.get_file_path("add.rhai", ArtifactKind::Function).await.unwrap();
        let without = store.get_file_path("add", ArtifactKind::Function).await.unwrap();
        assert_eq!(with_ext, without);
        assert_eq!(repo.download_count(), 1);
    }

    #[tokio::test]
    async fn test_list_files_strips_extensions() {
        let (_dir, store) = store_with(Arc::new(MemoryRepository::new()));
        let cache = store.cache();
        cache.write_local("tools/add.rhai", "fn add(a, b) { a + b }").await.unwrap();
        cache.write_local("tools/Shape.rhai", "const Shape = #{ sides: \"int\" };").await.unwrap();
        cache.write_local("tools/notes.txt", "scratch").await.unwrap();
        cache.write_local("agents/FeedlyPrompt.json", "{}").await.unwrap();
        cache.write_local("agents/draft.rhai", "fn x() {}").await.unwrap();

        let tools: Vec<String> = store.list_files("tools").await.unwrap().into_iter().collect();
        assert_eq!(tools, vec!["Shape", "add"]);
        let agents: Vec<String> = store.list_files("agents/").await.unwrap().into_iter().collect();
        assert_eq!(agents, vec!["FeedlyPrompt"]);

        for name in tools {
            store.get_file_path(&name, ArtifactKind::Function).await.unwrap();
        }
        assert!(matches!(store.list_files("other").await, Err(HubError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_load_config_blank_name() {
        let repo = Arc::new(MemoryRepository::new());
        let (_dir, store) = store_with(repo.clone());
        assert!(store.load_config("").await.unwrap().is_empty());
        assert_eq!(repo.download_count(), 0);
    }

    #[tokio::test]
    async fn test_load_config_requires_object() {
        let repo = Arc::new(MemoryRepository::new().with_file("agents/list.json", "[1, 2]"));
        let (_dir, store) = store_with(repo);
        assert!(matches!(store.load_config("list").await, Err(HubError::Json(_))));
    }
}
