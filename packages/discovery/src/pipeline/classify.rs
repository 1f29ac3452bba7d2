//! Product-page classification from URL, title, and snippet.
//!
//! Deterministic marketplace overrides run first (no model call), then
//! the model labels each candidate with a confidence and a short
//! rationale. Sparse metadata or model failure yields `unknown` — the
//! candidate stays in the result set but is excluded from price
//! extraction.

use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::pipeline::prompts;
use crate::traits::ai::{GenerateRequest, LanguageModel, ModelRouting};
use crate::types::candidate::{PageLabel, StageTag, UrlCandidate};
use crate::types::market::Market;
use crate::urlnorm;

/// Configuration for the classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Candidates classified concurrently per batch
    pub batch_size: usize,

    /// Pause between batches
    pub batch_delay: Duration,

    /// Primary/fallback models
    pub routing: ModelRouting,

    /// Sampling temperature
    pub temperature: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay: Duration::from_millis(10),
            routing: ModelRouting::default(),
            temperature: 0.1,
        }
    }
}

/// Result of a classification pass.
#[derive(Debug)]
pub struct ClassificationOutcome {
    /// All candidates with labels set (including `unknown`)
    pub candidates: Vec<UrlCandidate>,

    /// How many ended up `unknown`
    pub unknown_count: usize,
}

/// Classifies candidates as product/category/rejected with confidence.
pub struct ProductPageClassifier {
    model: Arc<dyn LanguageModel>,
    config: ClassifierConfig,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    page_type: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    identified_product_name: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

impl ProductPageClassifier {
    /// Create a classifier over a language model.
    pub fn new(model: Arc<dyn LanguageModel>, config: ClassifierConfig) -> Self {
        Self { model, config }
    }

    /// Classify a candidate set in bounded concurrent batches.
    pub async fn classify(
        &self,
        candidates: Vec<UrlCandidate>,
        product: &str,
        market: &Market,
    ) -> ClassificationOutcome {
        let total = candidates.len();
        let mut classified: Vec<UrlCandidate> = Vec::with_capacity(total);

        let batches: Vec<Vec<UrlCandidate>> = candidates
            .chunks(self.config.batch_size)
            .map(|c| c.to_vec())
            .collect();
        let batch_count = batches.len();

        for (i, batch) in batches.into_iter().enumerate() {
            debug!("Classifying batch {}/{}", i + 1, batch_count);
            let tasks = batch
                .into_iter()
                .map(|candidate| self.classify_one(candidate, product, market));
            classified.extend(join_all(tasks).await);

            if i + 1 < batch_count {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }

        let unknown_count = classified
            .iter()
            .filter(|c| c.label == PageLabel::Unknown)
            .count();
        info!(
            "Classified {} candidates: {} product, {} category, {} rejected, {} unknown",
            total,
            classified.iter().filter(|c| c.label == PageLabel::Product).count(),
            classified.iter().filter(|c| c.label == PageLabel::Category).count(),
            classified.iter().filter(|c| c.label == PageLabel::Rejected).count(),
            unknown_count
        );
        ClassificationOutcome {
            candidates: classified,
            unknown_count,
        }
    }

    async fn classify_one(
        &self,
        mut candidate: UrlCandidate,
        product: &str,
        market: &Market,
    ) -> UrlCandidate {
        // Deterministic marketplace overrides, no prompt needed
        if urlnorm::is_marketplace_listing_url(&candidate.url) {
            candidate.label = PageLabel::Category;
            candidate.confidence = Some(1.0);
            candidate.rationale = Some("Marketplace listing URL pattern".to_string());
            candidate.tag(StageTag::Classified);
            return candidate;
        }
        if urlnorm::is_marketplace_product_url(&candidate.url) {
            candidate.label = PageLabel::Product;
            candidate.confidence = Some(1.0);
            candidate.rationale = Some("Marketplace product URL pattern".to_string());
            candidate.tag(StageTag::Classified);
            return candidate;
        }

        // Too little signal to classify: unknown, never a guess
        if candidate.is_metadata_sparse() {
            candidate.label = PageLabel::Unknown;
            candidate.rationale = Some("Insufficient metadata to classify".to_string());
            candidate.tag(StageTag::Classified);
            return candidate;
        }

        let value = match self.generate_with_fallback(&candidate, product, market).await {
            Some(value) => value,
            None => {
                candidate.label = PageLabel::Unknown;
                candidate.rationale = Some("Classifier unavailable".to_string());
                candidate.tag(StageTag::Classified);
                return candidate;
            }
        };

        match serde_json::from_value::<ClassifyResponse>(value) {
            Ok(response) => {
                let page_type = response.page_type.unwrap_or_default();
                candidate.label = match page_type.to_uppercase().as_str() {
                    "PRODUCT" => PageLabel::Product,
                    "CATEGORY" => PageLabel::Category,
                    "BLOG" | "OTHER" => PageLabel::Rejected,
                    s if s.starts_with("EXCLUDE") => PageLabel::Rejected,
                    _ => PageLabel::Unknown,
                };
                candidate.confidence = response.confidence.map(|c| c.clamp(0.0, 1.0));
                candidate.rationale = response.reasoning;
                if candidate.label == PageLabel::Product {
                    if let Some(name) = response.identified_product_name {
                        if !name.is_empty() {
                            candidate.title = Some(name);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Unusable classification for {}: {}", candidate.url, e);
                candidate.label = PageLabel::Unknown;
                candidate.rationale = Some("Unparseable classifier output".to_string());
            }
        }
        candidate.tag(StageTag::Classified);
        candidate
    }

    async fn generate_with_fallback(
        &self,
        candidate: &UrlCandidate,
        product: &str,
        market: &Market,
    ) -> Option<Value> {
        let build = |model: &str| {
            GenerateRequest::new(prompts::format_classify_user_prompt(candidate, product))
                .with_system(prompts::format_classify_system_prompt(market, product))
                .with_model(model)
                .with_temperature(self.config.temperature)
                .with_max_tokens(200)
        };

        match self.model.generate(&build(&self.config.routing.primary)).await {
            Ok(value) => Some(value),
            Err(e) => {
                let fallback = self.config.routing.fallback.as_deref()?;
                warn!(
                    "Primary classifier failed for {} ({}), retrying on {}",
                    candidate.url, e, fallback
                );
                self.model.generate(&build(fallback)).await.ok()
            }
        }
    }
}
