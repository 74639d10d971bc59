//! Artifact store behavior over an in-memory repository.

mod common;

use std::sync::Arc;

use kiln_core::hub::{ArtifactKind, FetchPolicy, HubError, MemoryRepository};

#[tokio::test]
async fn test_second_read_is_served_from_cache() {
    let repo = Arc::new(MemoryRepository::new().with_file("tools/add.rhai", "fn add(a, b) { a + b }"));
    let (_dir, store) = common::memory_store(repo.clone());

    let first = store.read_artifact("add", ArtifactKind::Function).await.unwrap();
    let second = store.read_artifact("add.rhai", ArtifactKind::Function).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(repo.download_count(), 1);
}

#[tokio::test]
async fn test_cached_copy_wins_over_remote_edits() {
    let repo = Arc::new(MemoryRepository::new().with_file("agents/a.json", r#"{"model": "openai:gpt-4o"}"#));
    let (_dir, store) = common::memory_store(repo.clone());

    store.load_config("a").await.unwrap();
    repo.insert("agents/a.json", r#"{"model": "openai:gpt-4o-mini"}"#);

    let config = store.load_config("a").await.unwrap();
    assert_eq!(config["model"], "openai:gpt-4o");
}

#[tokio::test]
async fn test_upload_writes_through() {
    let repo = Arc::new(MemoryRepository::new());
    let (_dir, store) = common::memory_store(repo.clone());

    store
        .upload_content("FeedlyPrompt", &common::agent_config_json("FeedlyPrompt"), ArtifactKind::Config)
        .await
        .unwrap();

    assert_eq!(repo.commit_messages(), vec!["Update FeedlyPrompt.json"]);
    assert!(repo.get("agents/FeedlyPrompt.json").is_some());

    let config = store.load_config("FeedlyPrompt").await.unwrap();
    assert_eq!(config["name"], "FeedlyPrompt");
    assert_eq!(repo.download_count(), 0);
}

#[tokio::test]
async fn test_list_files_never_fetches() {
    let repo = Arc::new(
        MemoryRepository::new()
            .with_file("tools/add.rhai", "fn add(a, b) { a + b }")
            .with_file("tools/neg.rhai", "fn neg(x) { -x }"),
    );
    let (_dir, store) = common::memory_store(repo.clone());

    assert!(store.list_files("tools").await.unwrap().is_empty());

    store.get_file_path("neg", ArtifactKind::Function).await.unwrap();
    let listed: Vec<String> = store.list_files("tools").await.unwrap().into_iter().collect();
    assert_eq!(listed, vec!["neg"]);
    assert_eq!(repo.download_count(), 1);
}

#[tokio::test]
async fn test_download_files_then_local_only() {
    let repo = Arc::new(
        MemoryRepository::new()
            .with_file("tools/add.rhai", "fn add(a, b) { a + b }")
            .with_file("tools/Shape.rhai", "let Shape = #{ sides: \"int\" };")
            .with_file("agents/FeedlyPrompt.json", common::agent_config_json("FeedlyPrompt"))
            .with_file("README.md", "not synced"),
    );
    let (_dir, store) = common::memory_store(repo);

    assert_eq!(store.download_files().await.unwrap(), 3);

    let cache = store.cache();
    cache.resolve("tools/Shape.rhai", FetchPolicy::LocalOnly).await.unwrap();
    let err = cache.resolve("README.md", FetchPolicy::LocalOnly).await.unwrap_err();
    assert!(matches!(err, HubError::LocalEntryNotFound(_)));
}

#[tokio::test]
async fn test_names_must_be_plain() {
    let (_dir, store) = common::memory_store(Arc::new(MemoryRepository::new()));

    for name in ["", "  ", "../secrets", "nested/tool", "win\\tool"] {
        let err = store.read_artifact(name, ArtifactKind::Function).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidName(_)), "name {name:?} should be rejected");
    }
}

#[tokio::test]
async fn test_blank_config_name_is_empty_map() {
    let repo = Arc::new(MemoryRepository::new());
    let (_dir, store) = common::memory_store(repo.clone());

    assert!(store.load_config("").await.unwrap().is_empty());
    assert_eq!(repo.download_count(), 0);
}

#[tokio::test]
async fn test_missing_artifact() {
    let (_dir, store) = common::memory_store(Arc::new(MemoryRepository::new()));
    let err = store.read_artifact("nope", ArtifactKind::StructuredOutput).await.unwrap_err();
    assert!(matches!(err, HubError::ArtifactNotFound(ref path) if path == "tools/nope.rhai"));
}
