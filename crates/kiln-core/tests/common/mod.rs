//! Shared test utilities for Kiln Core integration tests.
//!
//! Provides an in-memory artifact store, a scripted agent runtime and a
//! static item source so tests never touch a real hub or model provider.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kiln_abstraction::{
    AgentRunRequest, AgentRunResult, AgentRuntime, MessagePart, ModelMessage, RuntimeError, ToolCallPart,
};
use kiln_core::config::HubSettings;
use kiln_core::hub::{ArtifactStore, CachedRepository, MemoryRepository};
use kiln_core::pipeline::feedly::LABEL_PROMPT;
use kiln_core::sources::{self, FeedItem, ItemSource};
use serde_json::{Value, json};

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Creates a store over `repo` with its snapshot in a fresh temp directory.
///
/// The returned directory must outlive the store.
pub fn memory_store(repo: Arc<MemoryRepository>) -> (tempfile::TempDir, ArtifactStore) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = ArtifactStore::new(CachedRepository::new(dir.path(), "org/agents", repo));
    (dir, store)
}

/// Hub settings pointing at a mock server.
pub fn hub_settings(endpoint: &str, cache_dir: &Path) -> HubSettings {
    HubSettings {
        repo_id: "org/agents".to_string(),
        endpoint: endpoint.to_string(),
        repo_type: "model".to_string(),
        revision: "main".to_string(),
        cache_dir: cache_dir.to_path_buf(),
        token: Some(zeroize::Zeroizing::new("hf_test_token".to_string())),
        timeout_secs: 5,
        max_retries: 2,
    }
}

/// A minimal agent config document as stored on the hub.
pub fn agent_config_json(name: &str) -> String {
    json!({
        "model": "openai:gpt-4o-mini",
        "name": name,
        "system_prompt": "You label news.",
        "defer_model_check": true,
    })
    .to_string()
}

/// Labels each title in a batch prompt; titles starting with `Ad:` are
/// uninteresting.
///
/// Records every prompt it sees. With `drop_last` set, the final label of
/// each batch is omitted.
#[derive(Default)]
pub struct ScriptedRuntime {
    prompts: Mutex<Vec<String>>,
    drop_last: bool,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dropping_last_label() -> Self {
        Self { prompts: Mutex::new(Vec::new()), drop_last: true }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn run(&self, request: AgentRunRequest<'_>) -> Result<AgentRunResult, RuntimeError> {
        self.prompts.lock().unwrap().push(request.prompt.to_string());

        let tool = request
            .agent
            .result_tools
            .first()
            .map(|t| t.name.clone())
            .ok_or_else(|| RuntimeError::Other("agent has no result tool".to_string()))?;
        let titles = request
            .prompt
            .strip_prefix(LABEL_PROMPT)
            .ok_or_else(|| RuntimeError::RequestError("unexpected prompt".to_string()))?;

        let mut labels: Vec<Value> = titles
            .split("\n* ")
            .map(|title| json!({ "title": title, "uninteresting": title.starts_with("Ad:") }))
            .collect();
        if self.drop_last {
            labels.pop();
        }

        let output = labels.last().cloned().unwrap_or_else(|| json!({ "title": "", "uninteresting": false }));
        let mut parts = vec![MessagePart::Text { content: "Labelling.".to_string() }];
        parts.extend(
            labels
                .into_iter()
                .map(|args| MessagePart::ToolCall(ToolCallPart::new(tool.clone(), args))),
        );
        Ok(AgentRunResult {
            output,
            new_messages: vec![ModelMessage::user(request.prompt), ModelMessage::Response(parts)],
            usage: None,
        })
    }
}

/// Serves a fixed item list and records which ids were marked read.
pub struct StaticItemSource {
    items: Vec<FeedItem>,
    marked: Mutex<Vec<String>>,
    tokens: Mutex<Vec<String>>,
}

impl StaticItemSource {
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self { items, marked: Mutex::new(Vec::new()), tokens: Mutex::new(Vec::new()) }
    }

    /// `count` items with ids `item-<n>` and titles `Title <n>`.
    pub fn numbered(count: usize) -> Self {
        Self::new((0..count).map(|n| FeedItem::new(format!("item-{n}"), format!("Title {n}"))).collect())
    }

    pub fn marked(&self) -> Vec<String> {
        self.marked.lock().unwrap().clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl ItemSource for StaticItemSource {
    async fn fetch(&self, max_count: usize, _category: &str, token: &str) -> sources::Result<Vec<FeedItem>> {
        self.tokens.lock().unwrap().push(token.to_string());
        Ok(self.items.iter().take(max_count).cloned().collect())
    }

    async fn mark_as_read(&self, ids: &[String], token: &str) -> sources::Result<()> {
        self.tokens.lock().unwrap().push(token.to_string());
        self.marked.lock().unwrap().extend_from_slice(ids);
        Ok(())
    }
}
