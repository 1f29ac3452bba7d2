//! The discovery pipeline and its sequential engine.
//!
//! Stage logic lives in the submodules; [`DiscoveryEngine`] wires them in
//! order for sequential execution, and the scheduler drives the same
//! stage methods from queue-connected workers — the business logic is
//! never duplicated between the two execution modes.

pub mod classify;
pub mod expand;
pub mod geo;
pub mod prefilter;
pub mod price;
pub mod prompts;
pub mod queries;
pub mod search;

pub use classify::{ClassificationOutcome, ClassifierConfig, ProductPageClassifier};
pub use expand::{CategoryExpander, ExpanderConfig};
pub use geo::{matches_market_patterns, GeoConfig, GeoOutcome, GeoValidator};
pub use prefilter::{CascadeOutcome, PrefilterConfig, UrlPrefilterCascade};
pub use price::{PriceConfig, PriceExtractor, PriceOutcome};
pub use queries::{QueryGenerator, TARGET_QUERY_COUNT};
pub use search::{AggregatedSearch, SearchAggregator};

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::cache::ContentCache;
use crate::error::{Degradation, Result};
use crate::traits::ai::LanguageModel;
use crate::traits::searcher::Searcher;
use crate::types::candidate::{PageLabel, SearchQuery, UrlCandidate};
use crate::types::market::Market;
use crate::types::product::ProductCandidate;
use crate::types::request::{DiscoveryRequest, DiscoveryResponse, ProductPageEntry};

/// Configuration for the whole engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub geo: GeoConfig,
    pub prefilter: PrefilterConfig,
    pub classifier: ClassifierConfig,
    pub expander: ExpanderConfig,
    pub price: PriceConfig,
}

/// Mutable state of one discovery run, handed from stage to stage.
#[derive(Debug)]
pub struct RunState {
    pub market: Market,
    pub product: String,
    pub generated_queries: Vec<String>,
    pub search_results_count: usize,
    pub unique_urls_found: usize,
    pub candidates: Vec<UrlCandidate>,
    pub validated_count: usize,
    pub retry_count: u32,
    pub unresolved: Vec<UrlCandidate>,
    pub products: Vec<ProductCandidate>,
    pub crawl_triggered: bool,
    pub degradations: Vec<Degradation>,
}

impl RunState {
    /// Validate the request and seed the run state.
    pub fn new(request: &DiscoveryRequest) -> Result<Self> {
        let market = Market::new(&request.country, request.city.as_deref())?;
        Ok(Self {
            market,
            product: request.product.trim().to_string(),
            generated_queries: Vec::new(),
            search_results_count: 0,
            unique_urls_found: 0,
            candidates: Vec::new(),
            validated_count: 0,
            retry_count: 0,
            unresolved: Vec::new(),
            products: Vec::new(),
            crawl_triggered: false,
            degradations: Vec::new(),
        })
    }

    /// Assemble the response, leaving the state empty (for callers that
    /// only hold a mutable borrow).
    pub fn take_response(&mut self, processing_time_ms: u64) -> DiscoveryResponse {
        let empty = Self {
            market: self.market.clone(),
            product: String::new(),
            generated_queries: Vec::new(),
            search_results_count: 0,
            unique_urls_found: 0,
            candidates: Vec::new(),
            validated_count: 0,
            retry_count: 0,
            unresolved: Vec::new(),
            products: Vec::new(),
            crawl_triggered: false,
            degradations: Vec::new(),
        };
        std::mem::replace(self, empty).into_response(processing_time_ms)
    }

    /// Assemble the response from the final state.
    pub fn into_response(self, processing_time_ms: u64) -> DiscoveryResponse {
        let mut entries: Vec<ProductPageEntry> =
            self.products.iter().map(ProductPageEntry::from).collect();
        // Unresolved candidates stay visible, marked as such
        entries.extend(self.unresolved.iter().map(|c| ProductPageEntry {
            url: c.url.clone(),
            title: c.title.clone(),
            classification: c.label.as_str().to_string(),
            confidence: c.confidence,
            validation_method: c
                .validation_method
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "fallback".to_string()),
            price: None,
            currency: None,
        }));

        DiscoveryResponse {
            success: true,
            query: self.product,
            generated_queries: self.generated_queries,
            search_results_count: self.search_results_count,
            unique_urls_found: self.unique_urls_found,
            geographic_validated_urls: self.validated_count,
            validation_retry_count: self.retry_count,
            crawl_triggered: self.crawl_triggered,
            product_page_candidates: entries,
            processing_time_ms,
            degradations: self.degradations,
        }
    }
}

/// Sequential discovery engine.
///
/// Stages run to completion in order; within a stage, sub-operations
/// (search fan-out, validation batches, crawl batches) run concurrently
/// with bounded limits. The same stage methods back the pipeline
/// scheduler's workers.
pub struct DiscoveryEngine {
    queries: QueryGenerator,
    aggregator: SearchAggregator,
    geo: GeoValidator,
    prefilter: UrlPrefilterCascade,
    classifier: ProductPageClassifier,
    expander: CategoryExpander,
    price: PriceExtractor,
    cache: Arc<ContentCache>,
}

impl DiscoveryEngine {
    /// Wire an engine from its ports.
    pub fn new(
        model: Arc<dyn LanguageModel>,
        searcher: Arc<dyn Searcher>,
        cache: Arc<ContentCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            queries: QueryGenerator::new(model.clone()),
            aggregator: SearchAggregator::new(searcher),
            geo: GeoValidator::new(model.clone(), config.geo),
            prefilter: UrlPrefilterCascade::new(model.clone(), config.prefilter),
            classifier: ProductPageClassifier::new(model.clone(), config.classifier),
            expander: CategoryExpander::new(config.expander),
            price: PriceExtractor::new(model, config.price),
            cache,
        }
    }

    /// Shared content cache (for stats endpoints).
    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Run the full pipeline sequentially.
    pub async fn run(&self, request: &DiscoveryRequest) -> Result<DiscoveryResponse> {
        let started = Instant::now();
        let mut state = RunState::new(request)?;
        info!(
            "Discovery run for '{}' in {}",
            state.product,
            state.market.location()
        );

        self.stage_search(&mut state).await?;
        self.stage_validate(&mut state).await?;
        self.stage_classify(&mut state).await?;
        self.stage_price(&mut state).await?;

        let elapsed = started.elapsed().as_millis() as u64;
        info!(
            "Discovery run complete in {}ms: {} products",
            elapsed,
            state.products.len()
        );
        Ok(state.into_response(elapsed))
    }

    /// Stage 1: query generation + search fan-out.
    ///
    /// Query-generation failure degrades to the raw product phrase; only
    /// total search unavailability aborts.
    pub async fn stage_search(&self, state: &mut RunState) -> Result<()> {
        let queries = match self.queries.generate(&state.product, &state.market).await {
            Ok(queries) => queries,
            Err(e) => {
                warn!(
                    "Query generation failed ({}), falling back to raw phrase",
                    e
                );
                state.degradations.push(Degradation::QueryFallback);
                vec![SearchQuery::new(state.product.clone(), state.market.clone())]
            }
        };
        state.generated_queries = queries.iter().map(|q| q.text.clone()).collect();

        let aggregated = self.aggregator.aggregate(&queries).await?;
        if aggregated.failed_queries > 0 {
            state.degradations.push(Degradation::SearchPartial {
                failed: aggregated.failed_queries,
            });
        }
        state.search_results_count = aggregated.raw_hits;
        state.unique_urls_found = aggregated.candidates.len();
        state.candidates = aggregated.candidates;
        Ok(())
    }

    /// Stage 2: geographic validation with bounded retry-and-refine.
    pub async fn stage_validate(&self, state: &mut RunState) -> Result<()> {
        let outcome = self
            .geo
            .run(
                &mut state.candidates,
                &state.product,
                &state.market,
                &self.queries,
                &self.aggregator,
            )
            .await;

        state.retry_count = outcome.iterations;
        state.validated_count = outcome.validated.len();
        if outcome.degraded_batches > 0 {
            state.degradations.push(Degradation::ValidationDegraded {
                batches: outcome.degraded_batches,
            });
        }

        // No model confirmation anywhere in a run where the model already
        // failed once means the whole validation is best-effort
        let llm_confirmed = outcome
            .validated
            .values()
            .any(|m| *m == crate::types::candidate::ValidationMethod::LlmContext);
        let model_degraded = outcome.degraded_batches > 0
            || state.degradations.contains(&Degradation::QueryFallback);
        if model_degraded && !llm_confirmed {
            for candidate in state.candidates.iter_mut() {
                if candidate.validation_method.is_some() {
                    candidate.validation_method =
                        Some(crate::types::candidate::ValidationMethod::Fallback);
                }
            }
        }

        // Refined searches may have grown the candidate pool
        state.unique_urls_found = state.unique_urls_found.max(state.candidates.len());
        state.candidates.retain(|c| c.validation_method.is_some());
        Ok(())
    }

    /// Stage 3: prefilter cascade, classification, one expansion round.
    pub async fn stage_classify(&self, state: &mut RunState) -> Result<()> {
        let cascade = self
            .prefilter
            .run(std::mem::take(&mut state.candidates), &state.product)
            .await;
        if cascade.llm_skipped {
            state.degradations.push(Degradation::PrefilterLlmSkipped);
        }

        let classified = self
            .classifier
            .classify(cascade.candidates, &state.product, &state.market)
            .await;
        let mut all = classified.candidates;

        // Expand category pages once, re-entering the cascade at stage 2
        let categories: Vec<UrlCandidate> = all
            .iter()
            .filter(|c| c.label == PageLabel::Category)
            .cloned()
            .collect();
        if !categories.is_empty() {
            let query_terms: Vec<String> = state
                .product
                .split_whitespace()
                .map(str::to_string)
                .collect();
            let crawl_before = self.cache.stats().crawl_requests;
            let expanded = self
                .expander
                .expand(&categories, &self.cache, &query_terms)
                .await;
            state.crawl_triggered |= self.cache.stats().crawl_requests > crawl_before;

            if !expanded.is_empty() {
                let deduped = self.prefilter.stage_dedup_and_cap(expanded);
                let (filtered, skipped) = self
                    .prefilter
                    .stage_bulk_llm(deduped, &state.product)
                    .await;
                if skipped {
                    state.degradations.push(Degradation::PrefilterLlmSkipped);
                }
                let expansion_classified = self
                    .classifier
                    .classify(filtered, &state.product, &state.market)
                    .await;
                all.extend(
                    expansion_classified
                        .candidates
                        .into_iter()
                        .filter(|c| c.label == PageLabel::Product),
                );
            }
        }

        let unknown_count = all.iter().filter(|c| c.label == PageLabel::Unknown).count();
        if unknown_count > 0 {
            state.degradations.push(Degradation::ClassificationUnknown {
                count: unknown_count,
            });
        }

        state.unresolved = all
            .iter()
            .filter(|c| c.label == PageLabel::Unknown)
            .cloned()
            .collect();
        state.candidates = all
            .into_iter()
            .filter(|c| c.label == PageLabel::Product)
            .collect();
        Ok(())
    }

    /// Stage 4: price extraction and final ranking.
    pub async fn stage_price(&self, state: &mut RunState) -> Result<()> {
        let outcome = self
            .price
            .extract(&state.candidates, &state.product, &self.cache)
            .await;
        state.crawl_triggered |= outcome.crawl_triggered;
        if outcome.unfetched > 0 {
            state.degradations.push(Degradation::CrawlPartial {
                missing: outcome.unfetched,
            });
        }
        state.products = outcome.products;
        Ok(())
    }
}
