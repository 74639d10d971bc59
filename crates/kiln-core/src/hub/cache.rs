//! Local snapshot of a remote repository.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::{HubError, RemoteRepository, Result};

/// Whether a cache miss may go to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Only the local snapshot is consulted.
    LocalOnly,
    /// Fall back to one remote download on a miss.
    LocalThenRemote,
}

/// Turns a repository id into a single directory name (`org/name` -> `org--name`).
pub fn cache_namespace(repo_id: &str) -> String {
    repo_id.replace('/', "--")
}

/// The cache-then-remote primitive shared by every hub reader.
///
/// Files are stored under `<cache_dir>/<namespace>/<repo path>`. There is no
/// locking: concurrent writers of the same file race and the last one wins.
#[derive(Clone)]
pub struct CachedRepository {
    root: PathBuf,
    remote: Arc<dyn RemoteRepository>,
}

impl CachedRepository {
    /// Creates a cache for `repo_id` rooted in `cache_dir`.
    pub fn new(cache_dir: impl AsRef<Path>, repo_id: &str, remote: Arc<dyn RemoteRepository>) -> Self {
        Self { root: cache_dir.as_ref().join(cache_namespace(repo_id)), remote }
    }

    /// Root directory of this repository's snapshot.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The remote side.
    pub fn remote(&self) -> &Arc<dyn RemoteRepository> {
        &self.remote
    }

    /// Where `path` lives in the snapshot, whether or not it exists.
    pub fn local_path(&self, path: &str) -> PathBuf {
        path.split('/').filter(|segment| !segment.is_empty()).fold(self.root.clone(), |acc, s| acc.join(s))
    }

    /// Resolves `path` to a local file, downloading it when allowed.
    ///
    /// # Errors
    /// `LocalEntryNotFound` on a miss under `LocalOnly`; otherwise whatever
    /// the remote download reports (`ArtifactNotFound` for a missing file).
    pub async fn resolve(&self, path: &str, policy: FetchPolicy) -> Result<PathBuf> {
        let local = self.local_path(path);
        if tokio::fs::try_exists(&local).await? {
            debug!(path = %path, "Cache hit");
            return Ok(local);
        }

        match policy {
            FetchPolicy::LocalOnly => Err(HubError::LocalEntryNotFound(path.to_string())),
            FetchPolicy::LocalThenRemote => {
                debug!(path = %path, "Cache miss, downloading");
                let content = self.remote.download(path).await?;
                self.write_local(path, &content).await
            }
        }
    }

    /// Writes `content` into the snapshot, creating directories as needed.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be written.
    pub async fn write_local(&self, path: &str, content: &str) -> Result<PathBuf> {
        let local = self.local_path(path);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&local, content).await?;
        Ok(local)
    }

    /// Base names of the files under `dir` in the snapshot. Never fetches.
    ///
    /// # Errors
    /// Returns an I/O error for anything other than a missing directory.
    pub async fn list_local(&self, dir: &str) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        let mut entries = match tokio::fs::read_dir(self.local_path(dir)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }
}

impl std::fmt::Debug for CachedRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedRepository")
            .field("root", &self.root)
            .field("remote", &"<remote>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::MemoryRepository;

    fn cache_with(repo: Arc<MemoryRepository>) -> (tempfile::TempDir, CachedRepository) {
        let dir = tempfile::tempdir().unwrap();
        let cache = CachedRepository::new(dir.path(), "org/repo", repo);
        (dir, cache)
    }

    #[test]
    fn test_cache_namespace() {
        assert_eq!(cache_namespace("NeuralNotwork/extendable-agents"), "NeuralNotwork--extendable-agents");
    }

    #[tokio::test]
    async fn test_miss_downloads_once_then_hits() {
        let repo = Arc::new(MemoryRepository::new().with_file("tools/a.rhai", "fn a() { 1 }"));
        let (dir, cache) = cache_with(repo.clone());

        let path = cache.resolve("tools/a.rhai", FetchPolicy::LocalThenRemote).await.unwrap();
        assert_eq!(path, dir.path().join("org--repo").join("tools").join("a.rhai"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fn a() { 1 }");
        assert_eq!(repo.download_count(), 1);

        let again = cache.resolve("tools/a.rhai", FetchPolicy::LocalThenRemote).await.unwrap();
        assert_eq!(again, path);
        assert_eq!(repo.download_count(), 1);
    }

    #[tokio::test]
    async fn test_local_only_miss() {
        let repo = Arc::new(MemoryRepository::new().with_file("tools/a.rhai", ""));
        let (_dir, cache) = cache_with(repo.clone());

        let err = cache.resolve("tools/a.rhai", FetchPolicy::LocalOnly).await.unwrap_err();
        assert!(matches!(err, HubError::LocalEntryNotFound(_)));
        assert_eq!(repo.download_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_miss() {
        let repo = Arc::new(MemoryRepository::new());
        let (_dir, cache) = cache_with(repo.clone());

        let err = cache.resolve("tools/nope.rhai", FetchPolicy::LocalThenRemote).await.unwrap_err();
        assert!(matches!(err, HubError::ArtifactNotFound(_)));
        assert_eq!(repo.download_count(), 1);
    }

    #[tokio::test]
    async fn test_list_local() {
        let (_dir, cache) = cache_with(Arc::new(MemoryRepository::new()));
        assert!(cache.list_local("tools").await.unwrap().is_empty());

        cache.write_local("tools/b.rhai", "").await.unwrap();
        cache.write_local("tools/a.rhai", "").await.unwrap();
        cache.write_local("tools/sub/c.rhai", "").await.unwrap();

        let names: Vec<_> = cache.list_local("tools").await.unwrap().into_iter().collect();
        assert_eq!(names, vec!["a.rhai".to_string(), "b.rhai".to_string()]);
    }
}
