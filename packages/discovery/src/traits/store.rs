//! Storage ports backing the content cache tiers.
//!
//! The distributed tier speaks a generic key-value-with-TTL contract; the
//! persistent tier is a page repository keyed by URL (source of truth).
//! Concrete implementations live in `stores/`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::page::CachedPage;

/// Key-value cache contract (distributed tier).
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Get a value by key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Whether the backend is currently reachable.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Persistent page repository contract (source of truth).
#[async_trait]
pub trait PageRepository: Send + Sync {
    /// Load a page by normalized URL.
    async fn get_by_url(&self, url: &str) -> Result<Option<CachedPage>>;

    /// Insert or replace a page. Idempotent by URL.
    async fn upsert(&self, page: &CachedPage) -> Result<()>;

    /// Number of stored pages (for diagnostics).
    async fn count(&self) -> Result<usize>;
}
