//! Batch content retrieval through a three-tier cache.
//!
//! Lookup order per URL: in-process LRU → distributed key-value cache →
//! persistent page repository → live bulk crawl for everything still
//! missing (one call, not one per URL). A live-crawl result populates
//! every tier; hits at slower tiers backfill the in-process tier so the
//! next lookup is fast. Failures of non-authoritative tiers are logged
//! and fall through.

pub mod memory;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::traits::crawler::{CrawlOptions, CrawlService};
use crate::traits::store::{KeyValueCache, PageRepository};
use crate::types::page::{CachedPage, PageContent};

pub use memory::MemoryTier;

/// Per-tier hit/miss counters.
#[derive(Default)]
struct TierCounters {
    memory_hits: AtomicU64,
    distributed_hits: AtomicU64,
    persistent_hits: AtomicU64,
    crawl_requests: AtomicU64,
    total_requests: AtomicU64,
}

/// Snapshot of cache performance counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub distributed_hits: u64,
    pub persistent_hits: u64,
    pub crawl_requests: u64,
    pub total_requests: u64,
    pub hit_rate_percent: f64,
    pub memory_entries: usize,
}

/// Result of one batch retrieval.
#[derive(Debug, Default)]
pub struct RetrievedBatch {
    /// URL → content for everything found
    pub contents: HashMap<String, PageContent>,

    /// Whether a live crawl was needed
    pub crawl_triggered: bool,

    /// URLs with no content from any tier or the crawl
    pub missing: Vec<String>,
}

/// Configuration for the content cache.
#[derive(Debug, Clone)]
pub struct ContentCacheConfig {
    /// In-process tier entry bound
    pub memory_entries: usize,

    /// In-process tier TTL
    pub memory_ttl: Duration,

    /// Distributed tier TTL
    pub distributed_ttl: Duration,

    /// Crawl options for miss fills
    pub crawl: CrawlOptions,
}

impl Default for ContentCacheConfig {
    fn default() -> Self {
        Self {
            memory_entries: 500,
            memory_ttl: Duration::from_secs(300),
            distributed_ttl: Duration::from_secs(3600),
            crawl: CrawlOptions::bulk(),
        }
    }
}

/// Three-tier read-through content cache over the crawl port.
///
/// Shared across concurrent jobs; all tiers are safe under concurrent
/// access and insertion is idempotent by URL.
pub struct ContentCache {
    memory: MemoryTier,
    distributed: Arc<dyn KeyValueCache>,
    persistent: Arc<dyn PageRepository>,
    crawler: Arc<dyn CrawlService>,
    config: ContentCacheConfig,
    counters: TierCounters,
}

const KV_PREFIX: &str = "webpage:";

impl ContentCache {
    /// Create a cache over the given tiers and crawl port.
    pub fn new(
        distributed: Arc<dyn KeyValueCache>,
        persistent: Arc<dyn PageRepository>,
        crawler: Arc<dyn CrawlService>,
        config: ContentCacheConfig,
    ) -> Self {
        info!(
            "ContentCache initialized: memory={} entries/{}s, distributed ttl={}s",
            config.memory_entries,
            config.memory_ttl.as_secs(),
            config.distributed_ttl.as_secs()
        );
        Self {
            memory: MemoryTier::new(config.memory_entries, config.memory_ttl),
            distributed,
            persistent,
            crawler,
            config,
            counters: TierCounters::default(),
        }
    }

    /// Retrieve content for many URLs, crawling only the misses.
    pub async fn get_batch(&self, urls: &[String]) -> Result<RetrievedBatch> {
        let mut batch = RetrievedBatch::default();
        if urls.is_empty() {
            return Ok(batch);
        }
        self.counters
            .total_requests
            .fetch_add(urls.len() as u64, Ordering::Relaxed);
        info!("Retrieving content for {} URLs", urls.len());

        let mut missing: Vec<String> = Vec::new();

        // Tier 1: in-process
        for url in urls {
            match self.memory.get(url) {
                Some(content) => {
                    self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                    batch.contents.insert(url.clone(), content);
                }
                None => missing.push(url.clone()),
            }
        }

        // Tier 2: distributed key-value
        if !missing.is_empty() {
            missing = self.check_distributed(missing, &mut batch.contents).await;
        }

        // Tier 3: persistent repository
        if !missing.is_empty() {
            missing = self.check_persistent(missing, &mut batch.contents).await;
        }

        // Tier 4: live bulk crawl
        if !missing.is_empty() {
            batch.crawl_triggered = true;
            let crawled = self.crawl_missing(&missing).await;
            for url in &missing {
                match crawled.get(url) {
                    Some(content) => {
                        batch.contents.insert(url.clone(), content.clone());
                    }
                    None => batch.missing.push(url.clone()),
                }
            }
            self.populate_all_tiers(&crawled).await;
        }

        info!(
            "Batch retrieval complete: {}/{} URLs found, crawl_triggered={}",
            batch.contents.len(),
            urls.len(),
            batch.crawl_triggered
        );
        Ok(batch)
    }

    /// Current counter snapshot.
    pub fn stats(&self) -> CacheStats {
        let memory_hits = self.counters.memory_hits.load(Ordering::Relaxed);
        let distributed_hits = self.counters.distributed_hits.load(Ordering::Relaxed);
        let persistent_hits = self.counters.persistent_hits.load(Ordering::Relaxed);
        let crawl_requests = self.counters.crawl_requests.load(Ordering::Relaxed);
        let total_requests = self.counters.total_requests.load(Ordering::Relaxed);
        let hit_rate_percent = if total_requests > 0 {
            (memory_hits + distributed_hits + persistent_hits) as f64 / total_requests as f64
                * 100.0
        } else {
            0.0
        };
        CacheStats {
            memory_hits,
            distributed_hits,
            persistent_hits,
            crawl_requests,
            total_requests,
            hit_rate_percent,
            memory_entries: self.memory.len(),
        }
    }

    /// Drop the in-process tier (for tests or cleanup).
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    async fn check_distributed(
        &self,
        missing: Vec<String>,
        contents: &mut HashMap<String, PageContent>,
    ) -> Vec<String> {
        if !self.distributed.health_check().await {
            warn!("Distributed cache not healthy, skipping tier");
            return missing;
        }
        let mut still_missing = Vec::with_capacity(missing.len());
        for url in missing {
            let key = format!("{}{}", KV_PREFIX, url);
            match self.distributed.get(&key).await {
                Ok(Some(raw)) => match serde_json::from_str::<CachedPage>(&raw) {
                    Ok(page) => {
                        self.counters.distributed_hits.fetch_add(1, Ordering::Relaxed);
                        self.memory.put(&url, page.content.clone());
                        contents.insert(url, page.content);
                    }
                    Err(e) => {
                        warn!("Failed to parse distributed entry for {}: {}", url, e);
                        still_missing.push(url);
                    }
                },
                Ok(None) => still_missing.push(url),
                Err(e) => {
                    warn!("Distributed cache check failed for {}: {}", url, e);
                    still_missing.push(url);
                }
            }
        }
        still_missing
    }

    async fn check_persistent(
        &self,
        missing: Vec<String>,
        contents: &mut HashMap<String, PageContent>,
    ) -> Vec<String> {
        let mut still_missing = Vec::with_capacity(missing.len());
        for url in missing {
            match self.persistent.get_by_url(&url).await {
                Ok(Some(page)) if !page.content.text.is_empty() => {
                    self.counters.persistent_hits.fetch_add(1, Ordering::Relaxed);
                    self.memory.put(&url, page.content.clone());
                    contents.insert(url, page.content);
                }
                Ok(_) => still_missing.push(url),
                Err(e) => {
                    warn!("Persistent store check failed for {}: {}", url, e);
                    still_missing.push(url);
                }
            }
        }
        still_missing
    }

    async fn crawl_missing(&self, missing: &[String]) -> HashMap<String, PageContent> {
        self.counters
            .crawl_requests
            .fetch_add(missing.len() as u64, Ordering::Relaxed);
        info!("Bulk crawling {} missing URLs", missing.len());
        match self.crawler.crawl_batch(missing, &self.config.crawl).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Bulk crawl request failed: {}", e);
                HashMap::new()
            }
        }
    }

    async fn populate_all_tiers(&self, crawled: &HashMap<String, PageContent>) {
        for (url, content) in crawled {
            self.memory.put(url, content.clone());

            let page = CachedPage::new(url.clone(), content.clone());
            if let Err(e) = self.persistent.upsert(&page).await {
                warn!("Failed to persist crawled page {}: {}", url, e);
            }
            match serde_json::to_string(&page) {
                Ok(serialized) => {
                    let key = format!("{}{}", KV_PREFIX, url);
                    if let Err(e) = self
                        .distributed
                        .set(&key, &serialized, self.config.distributed_ttl)
                        .await
                    {
                        warn!("Failed to populate distributed cache for {}: {}", url, e);
                    }
                }
                Err(e) => warn!("Failed to serialize page {}: {}", url, e),
            }
        }
        debug!("Populated caches with {} crawled entries", crawled.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{MemoryKeyValueCache, MemoryPageRepository};
    use crate::testing::MockCrawlService;

    fn cache_with(
        crawler: MockCrawlService,
    ) -> (Arc<MemoryKeyValueCache>, Arc<MemoryPageRepository>, ContentCache) {
        let kv = Arc::new(MemoryKeyValueCache::new());
        let repo = Arc::new(MemoryPageRepository::new());
        let cache = ContentCache::new(
            kv.clone(),
            repo.clone(),
            Arc::new(crawler),
            ContentCacheConfig::default(),
        );
        (kv, repo, cache)
    }

    #[tokio::test]
    async fn test_cold_lookup_then_hit_without_second_crawl() {
        let crawler = MockCrawlService::new()
            .with_content("https://a.com.uy/p/1", PageContent::new("body"));
        let crawl_calls = crawler.call_count();
        let (_kv, repo, cache) = cache_with(crawler);

        let urls = vec!["https://a.com.uy/p/1".to_string()];
        let first = cache.get_batch(&urls).await.unwrap();
        assert!(first.crawl_triggered);
        assert_eq!(first.contents.len(), 1);

        // All tiers populated forward
        assert_eq!(repo.count().await.unwrap(), 1);

        let second = cache.get_batch(&urls).await.unwrap();
        assert!(!second.crawl_triggered);
        assert_eq!(second.contents.len(), 1);
        // CrawlPort was not invoked twice for the same URL
        assert_eq!(crawl_calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.crawl_requests, 1);
    }

    #[tokio::test]
    async fn test_distributed_hit_backfills_memory() {
        let (kv, _repo, cache) = cache_with(MockCrawlService::new());
        let page = CachedPage::new("https://a.com.uy/p/1", PageContent::new("cached body"));
        kv.set(
            "webpage:https://a.com.uy/p/1",
            &serde_json::to_string(&page).unwrap(),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let urls = vec!["https://a.com.uy/p/1".to_string()];
        let first = cache.get_batch(&urls).await.unwrap();
        assert!(!first.crawl_triggered);
        assert_eq!(first.contents["https://a.com.uy/p/1"].text, "cached body");

        let second = cache.get_batch(&urls).await.unwrap();
        assert_eq!(second.contents.len(), 1);
        let stats = cache.stats();
        assert_eq!(stats.distributed_hits, 1);
        assert_eq!(stats.memory_hits, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_distributed_falls_through() {
        let crawler = MockCrawlService::new()
            .with_content("https://a.com.uy/p/1", PageContent::new("body"));
        let (kv, _repo, cache) = cache_with(crawler);
        kv.set_unhealthy(true);

        let urls = vec!["https://a.com.uy/p/1".to_string()];
        let batch = cache.get_batch(&urls).await.unwrap();
        // Crawl still happened; the failing tier did not block the lookup
        assert!(batch.crawl_triggered);
        assert_eq!(batch.contents.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_crawl_marks_missing() {
        let crawler = MockCrawlService::new()
            .with_content("https://a.com.uy/p/1", PageContent::new("body"))
            .fail_url("https://down.com.uy/p/9");
        let (_kv, repo, cache) = cache_with(crawler);

        let urls = vec![
            "https://a.com.uy/p/1".to_string(),
            "https://down.com.uy/p/9".to_string(),
        ];
        let batch = cache.get_batch(&urls).await.unwrap();
        assert_eq!(batch.contents.len(), 1);
        assert_eq!(batch.missing, vec!["https://down.com.uy/p/9".to_string()]);
        // The successful URL still populated the persistent tier
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    mod failing_tier {
        use super::*;
        use crate::traits::store::KeyValueCache;
        use mockall::mock;

        mock! {
            Kv {}

            #[async_trait::async_trait]
            impl KeyValueCache for Kv {
                async fn get(&self, key: &str) -> crate::error::Result<Option<String>>;
                async fn set(
                    &self,
                    key: &str,
                    value: &str,
                    ttl: Duration,
                ) -> crate::error::Result<()>;
                async fn health_check(&self) -> bool;
            }
        }

        #[tokio::test]
        async fn test_erroring_distributed_tier_does_not_block() {
            let mut kv = MockKv::new();
            kv.expect_health_check().returning(|| true);
            kv.expect_get()
                .returning(|_| Err(crate::error::DiscoveryError::Storage("kv down".into())));
            kv.expect_set()
                .returning(|_, _, _| Err(crate::error::DiscoveryError::Storage("kv down".into())));

            let crawler = MockCrawlService::new()
                .with_content("https://a.com.uy/p/1", PageContent::new("body"));
            let repo = Arc::new(MemoryPageRepository::new());
            let cache = ContentCache::new(
                Arc::new(kv),
                repo.clone(),
                Arc::new(crawler),
                ContentCacheConfig::default(),
            );

            let urls = vec!["https://a.com.uy/p/1".to_string()];
            let batch = cache.get_batch(&urls).await.unwrap();

            // Lookup fell through to the crawl; the failing tier write was
            // logged, the persistent tier still populated
            assert_eq!(batch.contents.len(), 1);
            assert!(batch.crawl_triggered);
            assert_eq!(repo.count().await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_persistent_hit() {
        let page = CachedPage::new("https://a.com.uy/p/1", PageContent::new("from db"));
        let kv = Arc::new(MemoryKeyValueCache::new());
        let repo = Arc::new(MemoryPageRepository::new().with_page(page));
        let cache = ContentCache::new(
            kv,
            repo,
            Arc::new(MockCrawlService::new()),
            ContentCacheConfig::default(),
        );

        let urls = vec!["https://a.com.uy/p/1".to_string()];
        let batch = cache.get_batch(&urls).await.unwrap();
        assert!(!batch.crawl_triggered);
        assert_eq!(batch.contents["https://a.com.uy/p/1"].text, "from db");
        assert_eq!(cache.stats().persistent_hits, 1);
    }
}
