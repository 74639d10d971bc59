//! Feedly cloud API client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{FeedItem, ItemSource, Result, SourceError};
use crate::config::FeedlySettings;

#[derive(Debug, Deserialize)]
struct Profile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StreamContents {
    #[serde(default)]
    items: Vec<FeedItem>,
}

/// Reads a user's category stream and marks entries as read.
#[derive(Debug, Clone)]
pub struct FeedlyClient {
    base_url: String,
    client: reqwest::Client,
}

impl FeedlyClient {
    /// Creates a client for the configured API.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &FeedlySettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { base_url: settings.base_url.trim_end_matches('/').to_string(), client })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        Err(SourceError::Status { status, url, body })
    }

    async fn user_id(&self, token: &str) -> Result<String> {
        let url = format!("{}/v3/profile", self.base_url);
        let response = Self::check(self.client.get(&url).bearer_auth(token).send().await?).await?;
        let profile: Profile = serde_json::from_str(&response.text().await?)?;
        if profile.id.is_empty() {
            return Err(SourceError::InvalidResponse("profile has no id".to_string()));
        }
        Ok(profile.id)
    }
}

#[async_trait]
impl ItemSource for FeedlyClient {
    async fn fetch(&self, max_count: usize, category: &str, token: &str) -> Result<Vec<FeedItem>> {
        let user_id = self.user_id(token).await?;
        let stream_id = format!("user/{user_id}/category/{category}");
        let url = format!(
            "{}/v3/streams/contents?streamId={}&count={}",
            self.base_url,
            urlencoding::encode(&stream_id),
            max_count
        );
        debug!(category = %category, max_count, "Fetching Feedly stream");

        let response = Self::check(self.client.get(&url).bearer_auth(token).send().await?).await?;
        let contents: StreamContents = serde_json::from_str(&response.text().await?)?;
        let mut items = contents.items;
        items.truncate(max_count);
        info!(category = %category, count = items.len(), "Fetched Feedly items");
        Ok(items)
    }

    async fn mark_as_read(&self, ids: &[String], token: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = format!("{}/v3/markers", self.base_url);
        let body = json!({ "action": "markAsRead", "type": "entries", "entryIds": ids });
        Self::check(self.client.post(&url).bearer_auth(token).json(&body).send().await?).await?;
        info!(count = ids.len(), "Marked Feedly entries as read");
        Ok(())
    }
}
