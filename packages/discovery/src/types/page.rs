//! Page content types shared by the cache tiers and the crawl port.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content returned by the crawl service for one URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    /// Extracted page text (markdown or plain text)
    pub text: String,

    /// Page title, when the renderer found one
    #[serde(default)]
    pub title: Option<String>,

    /// Raw links discovered on the page, when requested
    #[serde(default)]
    pub links: Vec<String>,
}

impl PageContent {
    /// Create content with just text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            title: None,
            links: Vec::new(),
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Attach discovered links.
    pub fn with_links(mut self, links: Vec<String>) -> Self {
        self.links = links;
        self
    }
}

/// A page as stored in the cache tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPage {
    /// Normalized URL key
    pub url: String,

    /// Page content
    pub content: PageContent,

    /// SHA-256 hash of the text, for change detection
    pub content_hash: String,

    /// When the page was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedPage {
    /// Create a cached page, hashing its content.
    pub fn new(url: impl Into<String>, content: PageContent) -> Self {
        let content_hash = Self::hash_content(&content.text);
        Self {
            url: url.into(),
            content,
            content_hash,
            fetched_at: Utc::now(),
        }
    }

    /// Calculate SHA-256 hash of content text.
    pub fn hash_content(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Check if the page is older than the threshold.
    pub fn is_stale(&self, max_age: chrono::Duration) -> bool {
        Utc::now() - self.fetched_at > max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash() {
        let page = CachedPage::new("https://a.com.uy/p/1", PageContent::new("hello"));
        assert_eq!(page.content_hash.len(), 64);
        assert_eq!(page.content_hash, CachedPage::hash_content("hello"));
        assert_ne!(page.content_hash, CachedPage::hash_content("other"));
    }

    #[test]
    fn test_staleness() {
        let mut page = CachedPage::new("https://a.com.uy/p/1", PageContent::new("x"));
        page.fetched_at = Utc::now() - chrono::Duration::hours(2);
        assert!(page.is_stale(chrono::Duration::hours(1)));
        assert!(!page.is_stale(chrono::Duration::hours(3)));
    }
}
