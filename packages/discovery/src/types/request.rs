//! Inbound request/response types for the discovery endpoint.
//!
//! These are the wire shapes the HTTP layer (out of scope here) exposes;
//! the engine fills every count so callers can see how many candidates
//! survived each stage even under partial backend failure.

use serde::{Deserialize, Serialize};

use crate::error::Degradation;
use crate::types::product::ProductCandidate;

/// A single product discovery request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// Free-text product phrase, e.g. "wireless mouse"
    pub product: String,

    /// Country code or name; defaults to the default market
    #[serde(default = "default_country")]
    pub country: String,

    /// Optional city for tighter geographic scoping
    #[serde(default)]
    pub city: Option<String>,
}

fn default_country() -> String {
    "UY".to_string()
}

impl DiscoveryRequest {
    /// Create a request for the default market.
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            country: default_country(),
            city: None,
        }
    }

    /// Set the country.
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    /// Set the city.
    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }
}

/// One product-page entry in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductPageEntry {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Classification label (`product`, `category`, `unknown`, `rejected`)
    pub classification: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    /// `domain_pattern`, `llm_context`, or `fallback`
    pub validation_method: String,

    /// Extracted price; absent means `price_unknown`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl From<&ProductCandidate> for ProductPageEntry {
    fn from(c: &ProductCandidate) -> Self {
        Self {
            url: c.url.clone(),
            title: c.title.clone(),
            classification: c.classification.as_str().to_string(),
            confidence: c.confidence,
            validation_method: c.validation_method.as_str().to_string(),
            price: c.price.price,
            currency: c.price.currency.clone(),
        }
    }
}

/// Best-effort discovery result with per-stage counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub success: bool,

    /// Original product phrase
    pub query: String,

    /// Queries actually sent to the search backend
    pub generated_queries: Vec<String>,

    /// Raw hits across all queries before dedup
    pub search_results_count: usize,

    /// Unique candidates after normalized-URL dedup
    pub unique_urls_found: usize,

    /// Candidates confirmed geographically relevant
    pub geographic_validated_urls: usize,

    /// Geo refine-and-retry iterations consumed
    pub validation_retry_count: u32,

    /// Whether a live crawl was needed (any cache miss reached the crawler)
    pub crawl_triggered: bool,

    /// Final ranked candidates
    pub product_page_candidates: Vec<ProductPageEntry>,

    /// Wall-clock time for the run
    pub processing_time_ms: u64,

    /// Corners cut along the way, for observability
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<Degradation>,
}
