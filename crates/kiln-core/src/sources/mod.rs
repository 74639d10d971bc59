//! Item sources pipelines read from and act on.

pub mod feedly;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use feedly::FeedlyClient;

/// Item source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP request error.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// The source answered with an unexpected status.
    #[error("source returned status {status} for {url}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
        /// Response body, as far as it could be read.
        body: String,
    },

    /// JSON parse error.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid response format.
    #[error("invalid response format: {0}")]
    InvalidResponse(String),
}

/// Result type for item source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// One item from a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

impl FeedItem {
    /// Creates an item.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self { id: id.into(), title: title.into() }
    }
}

/// A feed of items that can be read and marked.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetches up to `max_count` items from `category`, in source order.
    async fn fetch(&self, max_count: usize, category: &str, token: &str) -> Result<Vec<FeedItem>>;

    /// Marks items as read.
    async fn mark_as_read(&self, ids: &[String], token: &str) -> Result<()>;
}
