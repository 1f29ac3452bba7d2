//! Category-page expansion into further product candidates.
//!
//! Runs at most once per job: expanded URLs re-enter the cascade at the
//! dedup/rate-limit stage, never at the pattern stage, and are never
//! expanded again.

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::cache::ContentCache;
use crate::types::candidate::{StageTag, UrlCandidate};
use crate::urlnorm;

/// Configuration for category expansion.
#[derive(Debug, Clone)]
pub struct ExpanderConfig {
    /// Maximum product links taken per source domain
    pub per_domain_cap: usize,

    /// Maximum product links overall
    pub global_cap: usize,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            per_domain_cap: 8,
            global_cap: 50,
        }
    }
}

/// Expands confirmed category pages into product-candidate URLs.
pub struct CategoryExpander {
    config: ExpanderConfig,
}

impl CategoryExpander {
    /// Create an expander.
    pub fn new(config: ExpanderConfig) -> Self {
        Self { config }
    }

    /// Fetch category pages through the cache and harvest same-domain
    /// product links.
    pub async fn expand(
        &self,
        category_pages: &[UrlCandidate],
        cache: &ContentCache,
        query_terms: &[String],
    ) -> Vec<UrlCandidate> {
        if category_pages.is_empty() {
            return Vec::new();
        }

        let urls: Vec<String> = category_pages.iter().map(|c| c.url.clone()).collect();
        let batch = match cache.get_batch(&urls).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Category expansion fetch failed: {}", e);
                return Vec::new();
            }
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut expanded: Vec<UrlCandidate> = Vec::new();

        'pages: for page in category_pages {
            let Some(content) = batch.contents.get(&page.url) else {
                continue;
            };

            // Prefer links the renderer extracted; fall back to scraping
            // the content ourselves
            let links = if content.links.is_empty() {
                urlnorm::extract_links_from_html(&content.text, &page.url)
            } else {
                content.links.clone()
            };

            let mut taken_for_domain = expanded
                .iter()
                .filter(|c| c.domain == page.domain)
                .count();

            for link in links {
                if taken_for_domain >= self.config.per_domain_cap {
                    break;
                }
                let Some(clean) = urlnorm::sanitize_url(&link) else {
                    continue;
                };
                let clean = urlnorm::remove_duplicated_path_segments(&clean);
                if urlnorm::domain_of(&clean).as_deref() != Some(page.domain.as_str()) {
                    continue;
                }
                if !urlnorm::is_likely_product_url(&clean, Some(query_terms)) {
                    continue;
                }
                if !urlnorm::url_matches_query(&clean, Some(query_terms)) {
                    continue;
                }
                let Some(mut candidate) = UrlCandidate::from_url(clean, &page.source_query)
                else {
                    continue;
                };
                if !seen.insert(candidate.normalized.clone()) {
                    continue;
                }
                // Carry the category page title so the classifier has
                // something to work with
                candidate.title = content
                    .title
                    .clone()
                    .or_else(|| Some("Expanded from category".to_string()));
                candidate.pattern_priority = true;
                candidate.validation_method = page.validation_method;
                candidate.tag(StageTag::CategoryExpansion);
                expanded.push(candidate);
                taken_for_domain += 1;

                if expanded.len() >= self.config.global_cap {
                    debug!("Category expansion reached the global cap");
                    break 'pages;
                }
            }
        }

        info!(
            "Category expansion produced {} product candidates from {} pages",
            expanded.len(),
            category_pages.len()
        );
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ContentCache, ContentCacheConfig};
    use crate::stores::{MemoryKeyValueCache, MemoryPageRepository};
    use crate::testing::MockCrawlService;
    use crate::types::page::PageContent;
    use std::sync::Arc;

    fn cache(crawler: MockCrawlService) -> ContentCache {
        ContentCache::new(
            Arc::new(MemoryKeyValueCache::new()),
            Arc::new(MemoryPageRepository::new()),
            Arc::new(crawler),
            ContentCacheConfig::default(),
        )
    }

    fn category(url: &str) -> UrlCandidate {
        let mut c = UrlCandidate::from_url(url, "plancha vapor").unwrap();
        c.label = crate::types::candidate::PageLabel::Category;
        c
    }

    fn terms() -> Vec<String> {
        vec!["plancha".to_string(), "vapor".to_string()]
    }

    #[tokio::test]
    async fn test_expands_same_domain_product_links() {
        let html = r#"
            <a href="/producto/plancha-vapor-philips">Plancha</a>
            <a href="/producto/plancha-seca-atma">Otra</a>
            <a href="https://other.com.uy/producto/plancha">Foreign</a>
            <a href="/categoria/aspiradoras">Aspiradoras</a>
        "#;
        let crawler = MockCrawlService::new()
            .with_content("https://store.com.uy/planchas", PageContent::new(html));
        let cache = cache(crawler);
        let expander = CategoryExpander::new(ExpanderConfig::default());

        let out = expander
            .expand(&[category("https://store.com.uy/planchas")], &cache, &terms())
            .await;

        // Same-domain product URLs only; cross-domain and category links dropped
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.domain == "store.com.uy"));
        assert!(out.iter().all(|c| c.pattern_priority));
        assert!(out
            .iter()
            .all(|c| c.provenance.contains(&StageTag::CategoryExpansion)));
    }

    #[tokio::test]
    async fn test_uses_renderer_links_when_present() {
        let content = PageContent::new("ignored").with_links(vec![
            "https://store.com.uy/producto/plancha-a".to_string(),
            "https://store.com.uy/producto/plancha-b".to_string(),
        ]);
        let crawler =
            MockCrawlService::new().with_content("https://store.com.uy/planchas", content);
        let cache = cache(crawler);
        let expander = CategoryExpander::new(ExpanderConfig::default());

        let out = expander
            .expand(&[category("https://store.com.uy/planchas")], &cache, &terms())
            .await;
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_per_domain_cap_applies() {
        let links: Vec<String> = (0..20)
            .map(|i| format!("https://store.com.uy/producto/plancha-{}", i))
            .collect();
        let content = PageContent::new("x").with_links(links);
        let crawler =
            MockCrawlService::new().with_content("https://store.com.uy/planchas", content);
        let cache = cache(crawler);
        let expander = CategoryExpander::new(ExpanderConfig {
            per_domain_cap: 8,
            global_cap: 50,
        });

        let out = expander
            .expand(&[category("https://store.com.uy/planchas")], &cache, &terms())
            .await;
        assert_eq!(out.len(), 8);
    }

    #[tokio::test]
    async fn test_unfetchable_pages_skipped() {
        let crawler = MockCrawlService::new();
        let cache = cache(crawler);
        let expander = CategoryExpander::new(ExpanderConfig::default());
        let out = expander
            .expand(&[category("https://dead.com.uy/planchas")], &cache, &terms())
            .await;
        assert!(out.is_empty());
    }
}
