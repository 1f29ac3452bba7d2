//! Crawl port for the external render/crawl service.
//!
//! The pipeline asks for content in bulk (one call for all cache misses),
//! so the trait is batch-first with a single-URL convenience method.
//! Wrappers add outbound-URL validation and rate limiting.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{CrawlError, CrawlResult};
use crate::security::UrlGuard;
use crate::types::page::PageContent;

/// Options for a crawl request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOptions {
    /// Link-follow depth (1 = only the given URLs)
    pub max_depth: u32,

    /// Pages to fetch per seed URL
    pub max_pages: u32,

    /// Per-page timeout in milliseconds
    pub timeout_ms: u64,

    /// Concurrent page fetches on the service side
    pub max_concurrent: u32,

    /// Ask the service to return discovered links
    pub extract_links: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: 1,
            max_pages: 1,
            timeout_ms: 30_000,
            max_concurrent: 5,
            extract_links: false,
        }
    }
}

impl CrawlOptions {
    /// Options for bulk content retrieval (no link following).
    pub fn bulk() -> Self {
        Self::default()
    }

    /// Options for category expansion (links wanted).
    pub fn with_links() -> Self {
        Self {
            extract_links: true,
            ..Self::default()
        }
    }

    /// Set the per-page timeout.
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }
}

/// Crawl port.
#[async_trait]
pub trait CrawlService: Send + Sync {
    /// Crawl many URLs in one request; absent keys mean the page failed.
    async fn crawl_batch(
        &self,
        urls: &[String],
        options: &CrawlOptions,
    ) -> CrawlResult<HashMap<String, PageContent>>;

    /// Fetch a single URL.
    async fn fetch(&self, url: &str, options: &CrawlOptions) -> CrawlResult<PageContent> {
        let urls = vec![url.to_string()];
        let mut result = self.crawl_batch(&urls, options).await?;
        result.remove(url).ok_or_else(|| CrawlError::Service {
            reason: format!("no content returned for {}", url),
        })
    }
}

/// HTTP client for a remote render/crawl service.
///
/// Posts a bulk crawl request and maps the per-URL results. Pages the
/// service could not render are simply absent from the map.
pub struct HttpCrawlService {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CrawlRequestBody<'a> {
    urls: &'a [String],
    #[serde(rename = "maxDepth")]
    max_depth: u32,
    #[serde(rename = "maxPages")]
    max_pages: u32,
    timeout: u64,
    #[serde(rename = "maxConcurrentPages")]
    max_concurrent_pages: u32,
    #[serde(rename = "extractLinks")]
    extract_links: bool,
}

#[derive(Deserialize)]
struct CrawlResponseBody {
    success: bool,
    #[serde(default)]
    results: Vec<CrawlPageResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct CrawlPageResult {
    url: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    links: Vec<String>,
}

impl HttpCrawlService {
    /// Create a client against the crawl service base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CrawlService for HttpCrawlService {
    async fn crawl_batch(
        &self,
        urls: &[String],
        options: &CrawlOptions,
    ) -> CrawlResult<HashMap<String, PageContent>> {
        if urls.is_empty() {
            return Ok(HashMap::new());
        }

        let body = CrawlRequestBody {
            urls,
            max_depth: options.max_depth,
            max_pages: options.max_pages,
            timeout: options.timeout_ms,
            max_concurrent_pages: options.max_concurrent,
            extract_links: options.extract_links,
        };

        let url = format!("{}/crawl", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_millis(
                options.timeout_ms * urls.len().max(1) as u64,
            ))
            .send()
            .await
            .map_err(|e| CrawlError::Http(Box::new(e)))?;

        if !response.status().is_success() {
            return Err(CrawlError::Service {
                reason: format!("crawl service status {}", response.status()),
            });
        }

        let parsed: CrawlResponseBody = response
            .json()
            .await
            .map_err(|e| CrawlError::Http(Box::new(e)))?;

        if !parsed.success {
            return Err(CrawlError::Service {
                reason: parsed.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        let mut contents = HashMap::with_capacity(parsed.results.len());
        for result in parsed.results {
            let Some(text) = result.text.filter(|t| !t.is_empty()) else {
                warn!("No content found for {}", result.url);
                continue;
            };
            let mut content = PageContent::new(text).with_links(result.links);
            if let Some(title) = result.title {
                content = content.with_title(title);
            }
            contents.insert(result.url, content);
        }

        Ok(contents)
    }
}

/// A crawl service that validates every outbound URL first.
///
/// Blocked URLs are dropped from batches (with a warning) and rejected
/// outright on single fetches.
pub struct GuardedCrawlService<C: CrawlService> {
    inner: C,
    guard: UrlGuard,
}

impl<C: CrawlService> GuardedCrawlService<C> {
    /// Wrap a crawl service with the default guard.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            guard: UrlGuard::new(),
        }
    }

    /// Wrap with a custom guard.
    pub fn with_guard(inner: C, guard: UrlGuard) -> Self {
        Self { inner, guard }
    }
}

#[async_trait]
impl<C: CrawlService> CrawlService for GuardedCrawlService<C> {
    async fn crawl_batch(
        &self,
        urls: &[String],
        options: &CrawlOptions,
    ) -> CrawlResult<HashMap<String, PageContent>> {
        let mut allowed = Vec::with_capacity(urls.len());
        for url in urls {
            match self.guard.validate(url) {
                Ok(()) => allowed.push(url.clone()),
                Err(e) => warn!("Dropping blocked URL from crawl batch: {}", e),
            }
        }
        if allowed.is_empty() {
            return Ok(HashMap::new());
        }
        self.inner.crawl_batch(&allowed, options).await
    }

    async fn fetch(&self, url: &str, options: &CrawlOptions) -> CrawlResult<PageContent> {
        self.guard.validate(url)?;
        self.inner.fetch(url, options).await
    }
}

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A crawl service wrapper that rate-limits outgoing requests.
pub struct RateLimitedCrawlService<C: CrawlService> {
    inner: C,
    limiter: Arc<DirectRateLimiter>,
}

impl<C: CrawlService> RateLimitedCrawlService<C> {
    /// Limit to `requests_per_second` crawl requests.
    pub fn new(inner: C, requests_per_second: u32) -> Self {
        let per_second = std::num::NonZeroU32::new(requests_per_second)
            .unwrap_or(nonzero!(1u32));
        Self {
            inner,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        }
    }
}

#[async_trait]
impl<C: CrawlService> CrawlService for RateLimitedCrawlService<C> {
    async fn crawl_batch(
        &self,
        urls: &[String],
        options: &CrawlOptions,
    ) -> CrawlResult<HashMap<String, PageContent>> {
        self.limiter.until_ready().await;
        self.inner.crawl_batch(urls, options).await
    }

    async fn fetch(&self, url: &str, options: &CrawlOptions) -> CrawlResult<PageContent> {
        self.limiter.until_ready().await;
        self.inner.fetch(url, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCrawlService;

    #[tokio::test]
    async fn test_guarded_service_drops_blocked() {
        let inner = MockCrawlService::new()
            .with_content("https://ok.com.uy/p/1", PageContent::new("body"));
        let guarded = GuardedCrawlService::new(inner);

        let urls = vec![
            "https://ok.com.uy/p/1".to_string(),
            "http://127.0.0.1/secret".to_string(),
        ];
        let result = guarded
            .crawl_batch(&urls, &CrawlOptions::bulk())
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.contains_key("https://ok.com.uy/p/1"));
    }

    #[tokio::test]
    async fn test_guarded_fetch_rejects() {
        let guarded = GuardedCrawlService::new(MockCrawlService::new());
        let err = guarded
            .fetch("file:///etc/passwd", &CrawlOptions::bulk())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Blocked { .. }));
    }

    #[tokio::test]
    async fn test_rate_limited_passthrough() {
        let inner = MockCrawlService::new()
            .with_content("https://ok.com.uy/p/1", PageContent::new("body"));
        let limited = RateLimitedCrawlService::new(inner, 100);
        let page = limited
            .fetch("https://ok.com.uy/p/1", &CrawlOptions::bulk())
            .await
            .unwrap();
        assert_eq!(page.text, "body");
    }
}
