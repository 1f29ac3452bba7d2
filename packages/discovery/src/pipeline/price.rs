//! Price extraction from classified product pages.
//!
//! Content comes from the cache (bulk retrieval); extraction is a
//! zero-temperature structured JSON call per page. A page with no usable
//! price stays in the results as `price_unknown` — it is never dropped.

use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cache::ContentCache;
use crate::pipeline::prompts;
use crate::traits::ai::{GenerateRequest, LanguageModel};
use crate::types::candidate::{PageLabel, UrlCandidate, ValidationMethod};
use crate::types::product::{rank_by_price, Availability, PriceExtraction, ProductCandidate};

/// Configuration for price extraction.
#[derive(Debug, Clone)]
pub struct PriceConfig {
    /// Concurrent extraction calls
    pub concurrency: usize,

    /// Page text characters sent to the model
    pub content_limit: usize,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            content_limit: 6_000,
        }
    }
}

/// Result of a price-extraction pass.
#[derive(Debug)]
pub struct PriceOutcome {
    /// Ranked products (ascending price, `price_unknown` last)
    pub products: Vec<ProductCandidate>,

    /// Whether a live crawl was needed for content
    pub crawl_triggered: bool,

    /// URLs the crawl could not fetch (kept as `price_unknown`)
    pub unfetched: usize,
}

/// Extracts prices for product-labelled candidates.
pub struct PriceExtractor {
    model: Arc<dyn LanguageModel>,
    config: PriceConfig,
}

#[derive(Deserialize)]
struct PriceResponse {
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    availability: Option<String>,
    #[serde(default)]
    original_text: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

impl PriceExtractor {
    /// Create an extractor over a language model.
    pub fn new(model: Arc<dyn LanguageModel>, config: PriceConfig) -> Self {
        Self { model, config }
    }

    /// Extract and rank prices for the given product pages.
    pub async fn extract(
        &self,
        products: &[UrlCandidate],
        product_query: &str,
        cache: &ContentCache,
    ) -> PriceOutcome {
        if products.is_empty() {
            return PriceOutcome {
                products: Vec::new(),
                crawl_triggered: false,
                unfetched: 0,
            };
        }

        let urls: Vec<String> = products.iter().map(|c| c.url.clone()).collect();
        let batch = match cache.get_batch(&urls).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Content retrieval failed for price extraction: {}", e);
                let fallback: Vec<ProductCandidate> = products
                    .iter()
                    .map(|c| to_product(c, PriceExtraction::unknown()))
                    .collect();
                return PriceOutcome {
                    products: fallback,
                    crawl_triggered: false,
                    unfetched: products.len(),
                };
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let tasks = products.iter().map(|candidate| {
            let semaphore = semaphore.clone();
            let content = batch.contents.get(&candidate.url).cloned();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let price = match content {
                    Some(content) => {
                        self.extract_one(candidate, product_query, &content.text).await
                    }
                    None => {
                        debug!("No content for {}, marking price_unknown", candidate.url);
                        PriceExtraction::unknown()
                    }
                };
                to_product(candidate, price)
            }
        });

        let mut extracted: Vec<ProductCandidate> = join_all(tasks).await;
        rank_by_price(&mut extracted);

        let priced = extracted.iter().filter(|p| !p.price.is_price_unknown()).count();
        info!(
            "Price extraction: {}/{} pages priced, {} unfetched",
            priced,
            extracted.len(),
            batch.missing.len()
        );
        PriceOutcome {
            products: extracted,
            crawl_triggered: batch.crawl_triggered,
            unfetched: batch.missing.len(),
        }
    }

    async fn extract_one(
        &self,
        candidate: &UrlCandidate,
        product_query: &str,
        text: &str,
    ) -> PriceExtraction {
        let excerpt = truncate_chars(text, self.config.content_limit);
        let request = GenerateRequest::new(prompts::format_price_prompt(
            product_query,
            &candidate.url,
            excerpt,
        ))
        .with_temperature(0.0)
        .with_max_tokens(150);

        let value = match self.model.generate(&request).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Price extraction failed for {}: {}", candidate.url, e);
                return PriceExtraction::unknown();
            }
        };

        match serde_json::from_value::<PriceResponse>(value) {
            Ok(response) => {
                // A negative price is model noise, never a real listing
                let price = response.price.filter(|p| *p >= 0.0);
                if price.is_none() {
                    debug!("No price found on {}", candidate.url);
                }
                PriceExtraction {
                    price,
                    currency: response.currency.filter(|c| !c.is_empty()),
                    availability: match response.availability.as_deref() {
                        Some("in_stock") => Availability::InStock,
                        Some("out_of_stock") => Availability::OutOfStock,
                        _ => Availability::Unknown,
                    },
                    original_text: response.original_text,
                    confidence: response.confidence.map(|c| c.clamp(0.0, 1.0)),
                }
            }
            Err(e) => {
                warn!("Unparseable price response for {}: {}", candidate.url, e);
                PriceExtraction::unknown()
            }
        }
    }
}

fn to_product(candidate: &UrlCandidate, price: PriceExtraction) -> ProductCandidate {
    ProductCandidate {
        url: candidate.url.clone(),
        title: candidate.title.clone(),
        price,
        confidence: candidate.confidence,
        classification: PageLabel::Product,
        validation_method: candidate
            .validation_method
            .unwrap_or(ValidationMethod::Fallback),
        source_query: candidate.source_query.clone(),
    }
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ContentCache, ContentCacheConfig};
    use crate::stores::{MemoryKeyValueCache, MemoryPageRepository};
    use crate::testing::{MockCrawlService, MockLanguageModel};
    use crate::types::page::PageContent;
    use serde_json::json;

    fn cache(crawler: MockCrawlService) -> ContentCache {
        ContentCache::new(
            Arc::new(MemoryKeyValueCache::new()),
            Arc::new(MemoryPageRepository::new()),
            Arc::new(crawler),
            ContentCacheConfig::default(),
        )
    }

    fn product_candidate(url: &str) -> UrlCandidate {
        let mut c = UrlCandidate::from_url(url, "plancha").unwrap();
        c.label = PageLabel::Product;
        c.confidence = Some(0.9);
        c.validation_method = Some(ValidationMethod::DomainPattern);
        c
    }

    #[tokio::test]
    async fn test_extracts_and_ranks() {
        let model = MockLanguageModel::new()
            .with_response(
                "https://a.com.uy/p/1",
                json!({"price": 1990.0, "currency": "UYU", "availability": "in_stock"}),
            )
            .with_response(
                "https://b.com.uy/p/2",
                json!({"price": 890.0, "currency": "UYU", "availability": "in_stock"}),
            );
        let crawler = MockCrawlService::new()
            .with_content("https://a.com.uy/p/1", PageContent::new("page a"))
            .with_content("https://b.com.uy/p/2", PageContent::new("page b"));
        let cache = cache(crawler);
        let extractor = PriceExtractor::new(Arc::new(model), PriceConfig::default());

        let outcome = extractor
            .extract(
                &[
                    product_candidate("https://a.com.uy/p/1"),
                    product_candidate("https://b.com.uy/p/2"),
                ],
                "plancha",
                &cache,
            )
            .await;

        assert_eq!(outcome.products.len(), 2);
        assert_eq!(outcome.products[0].url, "https://b.com.uy/p/2");
        assert_eq!(outcome.products[0].price.price, Some(890.0));
        assert_eq!(outcome.products[0].price.availability, Availability::InStock);
        assert!(outcome.crawl_triggered);
    }

    #[tokio::test]
    async fn test_unfetched_page_kept_as_price_unknown() {
        let model = MockLanguageModel::new()
            .with_default(json!({"price": 500.0, "currency": "UYU"}));
        let crawler = MockCrawlService::new()
            .with_content("https://a.com.uy/p/1", PageContent::new("page a"))
            .fail_url("https://down.com.uy/p/9");
        let cache = cache(crawler);
        let extractor = PriceExtractor::new(Arc::new(model), PriceConfig::default());

        let outcome = extractor
            .extract(
                &[
                    product_candidate("https://a.com.uy/p/1"),
                    product_candidate("https://down.com.uy/p/9"),
                ],
                "plancha",
                &cache,
            )
            .await;

        assert_eq!(outcome.products.len(), 2);
        assert_eq!(outcome.unfetched, 1);
        // Priced page first, unknown last
        assert_eq!(outcome.products[0].price.price, Some(500.0));
        assert!(outcome.products[1].price.is_price_unknown());
    }

    #[tokio::test]
    async fn test_negative_price_rejected() {
        let model =
            MockLanguageModel::new().with_default(json!({"price": -10.0, "currency": "UYU"}));
        let crawler = MockCrawlService::new()
            .with_content("https://a.com.uy/p/1", PageContent::new("page"));
        let cache = cache(crawler);
        let extractor = PriceExtractor::new(Arc::new(model), PriceConfig::default());

        let outcome = extractor
            .extract(&[product_candidate("https://a.com.uy/p/1")], "plancha", &cache)
            .await;
        assert!(outcome.products[0].price.is_price_unknown());
    }

    #[tokio::test]
    async fn test_model_failure_is_price_unknown() {
        let crawler = MockCrawlService::new()
            .with_content("https://a.com.uy/p/1", PageContent::new("page"));
        let cache = cache(crawler);
        let extractor = PriceExtractor::new(
            Arc::new(MockLanguageModel::new().fail_all()),
            PriceConfig::default(),
        );

        let outcome = extractor
            .extract(&[product_candidate("https://a.com.uy/p/1")], "plancha", &cache)
            .await;
        assert_eq!(outcome.products.len(), 1);
        assert!(outcome.products[0].price.is_price_unknown());
    }
}
