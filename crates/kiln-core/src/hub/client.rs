//! Hugging Face Hub HTTP client.
//!
//! Implements [`RemoteRepository`] against the hub's plain HTTP API:
//! `resolve/` for raw downloads, `api/.../commit` for NDJSON commits and
//! `api/.../tree` for directory listings.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{HubError, RemoteRepository, Result};
use crate::config::HubSettings;

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

/// Client for one hub repository.
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
    repo_id: String,
    repo_type: String,
    revision: String,
    token: Option<Zeroizing<String>>,
    max_retries: u32,
}

impl HubClient {
    /// Creates a client for the repository named in `settings`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &HubSettings) -> Result<Self> {
        Self::for_repo(settings, &settings.repo_id)
    }

    /// Creates a client for another repository on the same hub.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn for_repo(settings: &HubSettings, repo_id: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            repo_id: repo_id.to_string(),
            repo_type: settings.repo_type.clone(),
            revision: settings.revision.clone(),
            token: settings.token.clone(),
            max_retries: settings.max_retries,
        })
    }

    /// Repository id.
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    fn resolve_url(&self, path: &str) -> String {
        let prefix = match self.repo_type.as_str() {
            "space" => "spaces/",
            "dataset" => "datasets/",
            _ => "",
        };
        format!(
            "{}/{}{}/resolve/{}/{}",
            self.endpoint,
            prefix,
            self.repo_id,
            urlencoding::encode(&self.revision),
            path
        )
    }

    fn api_url(&self, operation: &str, suffix: &str) -> String {
        let base = format!(
            "{}/api/{}s/{}/{}/{}",
            self.endpoint,
            self.repo_type,
            self.repo_id,
            operation,
            urlencoding::encode(&self.revision)
        );
        if suffix.is_empty() { base } else { format!("{base}/{suffix}") }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.as_str()),
            None => request,
        }
    }

    /// Sends a request, retrying transport errors and 5xx answers with a
    /// linear backoff. Any other status is handed back to the caller.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            match self.authorize(build()).send().await {
                Ok(response) if response.status().is_server_error() && attempt < self.max_retries => {
                    warn!(status = %response.status(), attempt, "Hub server error, retrying");
                }
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_retries => {
                    warn!(error = %e, attempt, "Hub request failed, retrying");
                }
                Err(e) => return Err(HubError::Http(e)),
            }
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
        }
    }

    async fn status_error(response: reqwest::Response) -> HubError {
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        HubError::Status { status, url, body }
    }
}

#[async_trait]
impl RemoteRepository for HubClient {
    async fn download(&self, path: &str) -> Result<String> {
        let url = self.resolve_url(path);
        debug!(url = %url, "Downloading artifact");

        let response = self.send_with_retry(|| self.client.get(&url)).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HubError::ArtifactNotFound(path.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        Ok(response.text().await?)
    }

    async fn upload(&self, path: &str, content: &str, message: &str) -> Result<()> {
        let url = self.api_url("commit", "");
        let header = json!({
            "key": "header",
            "value": { "summary": message, "description": "" },
        });
        let file = json!({
            "key": "file",
            "value": {
                "content": BASE64_STANDARD.encode(content),
                "path": path,
                "encoding": "base64",
            },
        });
        let body = format!("{header}\n{file}");

        let response = self
            .send_with_retry(|| {
                self.client
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                    .body(body.clone())
            })
            .await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        info!(repo_id = %self.repo_id, path = %path, "Committed artifact");
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let url = self.api_url("tree", dir.trim_matches('/'));
        let response = self.send_with_retry(|| self.client.get(&url)).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let entries: Vec<TreeEntry> = serde_json::from_str(&response.text().await?)?;
        Ok(entries.into_iter().filter(|e| e.kind == "file").map(|e| e.path).collect())
    }
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("endpoint", &self.endpoint)
            .field("repo_id", &self.repo_id)
            .field("repo_type", &self.repo_type)
            .field("revision", &self.revision)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}
