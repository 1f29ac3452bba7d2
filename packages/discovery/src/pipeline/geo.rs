//! Geographic URL validation with bounded retry-and-refine.
//!
//! Validation combines deterministic domain/path pattern matching, local
//! retailer name recognition, and contextual LLM classification. When the
//! validated set stays under the target, the loop refines the query with
//! stronger geography hints and re-searches, merging new validations into
//! the accumulated set. The iteration counter and the accumulator make
//! the termination guarantee structural: the loop can never run more than
//! `max_iterations` times and the validated set never shrinks.

use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::GenerationError;
use crate::pipeline::prompts;
use crate::pipeline::queries::QueryGenerator;
use crate::pipeline::search::SearchAggregator;
use crate::traits::ai::{GenerateRequest, LanguageModel, ModelRouting};
use crate::types::candidate::{SearchQuery, StageTag, UrlCandidate, ValidationMethod};
use crate::types::market::Market;

/// Configuration for the geo validator.
#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Stop refining once this many URLs are validated
    pub target_count: usize,

    /// Hard cap on validate/refine iterations
    pub max_iterations: u32,

    /// URLs per LLM validation call
    pub batch_size: usize,

    /// Deadline per LLM batch before degrading to pattern-only
    pub batch_timeout: Duration,

    /// Primary/fallback models for contextual validation
    pub routing: ModelRouting,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            target_count: 20,
            max_iterations: 3,
            batch_size: 8,
            batch_timeout: Duration::from_secs(2),
            routing: ModelRouting::default(),
        }
    }
}

/// Accumulated validation state across iterations.
///
/// Invariants: `iterations` never exceeds the configured cap, and
/// `validated` only grows.
#[derive(Debug, Default)]
pub struct GeoValidationState {
    /// Normalized URL → how it was validated, insertion-ordered
    pub validated: IndexMap<String, ValidationMethod>,

    /// Iterations consumed so far
    pub iterations: u32,
}

/// Outcome of a full validation run.
#[derive(Debug)]
pub struct GeoOutcome {
    /// Normalized URL → validation method
    pub validated: IndexMap<String, ValidationMethod>,

    /// Iterations consumed (≤ max_iterations)
    pub iterations: u32,

    /// LLM batches that degraded to pattern-only
    pub degraded_batches: usize,

    /// Refined query texts issued by the retry loop
    pub refined_queries: Vec<String>,
}

struct PassStats {
    llm_attempted: usize,
    llm_succeeded: usize,
    degraded: usize,
}

/// Validates candidate URLs against the target market.
pub struct GeoValidator {
    model: Arc<dyn LanguageModel>,
    config: GeoConfig,
}

impl GeoValidator {
    /// Create a validator over a language model.
    pub fn new(model: Arc<dyn LanguageModel>, config: GeoConfig) -> Self {
        Self { model, config }
    }

    /// Run the bounded validate/refine loop over the candidate set.
    ///
    /// New candidates discovered by refined searches are appended to
    /// `candidates` (deduplicated by normalized URL); validated candidates
    /// get their validation method and stage tag set in place.
    pub async fn run(
        &self,
        candidates: &mut Vec<UrlCandidate>,
        product: &str,
        market: &Market,
        queries: &QueryGenerator,
        aggregator: &SearchAggregator,
    ) -> GeoOutcome {
        let mut state = GeoValidationState::default();
        let mut refined_queries = Vec::new();
        let mut total_llm_attempted = 0usize;
        let mut total_llm_succeeded = 0usize;
        let mut degraded_batches = 0usize;
        let mut current_query = product.to_string();

        loop {
            // Validating
            let pending: Vec<UrlCandidate> = candidates
                .iter()
                .filter(|c| !state.validated.contains_key(&c.normalized))
                .cloned()
                .collect();
            let stats = self
                .validate_pass(&pending, &current_query, market, &mut state)
                .await;
            total_llm_attempted += stats.llm_attempted;
            total_llm_succeeded += stats.llm_succeeded;
            degraded_batches += stats.degraded;

            state.iterations += 1;
            info!(
                "Geo validation iteration {}: {}/{} URLs validated for {}",
                state.iterations,
                state.validated.len(),
                candidates.len(),
                market.location()
            );

            // Done on target reached or iteration cap
            if state.validated.len() >= self.config.target_count
                || state.iterations >= self.config.max_iterations
            {
                break;
            }

            // InsufficientResults → Refining
            let refined = queries.refine(&current_query, market).await;
            if refined == current_query {
                // Refinement is a fixpoint; another search would return the
                // same results
                debug!("Query refinement converged, stopping early");
                break;
            }
            refined_queries.push(refined.clone());
            current_query = refined.clone();

            match aggregator
                .aggregate(&[SearchQuery::new(refined, market.clone())])
                .await
            {
                Ok(result) => {
                    let mut added = 0usize;
                    for candidate in result.candidates {
                        if candidates
                            .iter()
                            .all(|c| c.normalized != candidate.normalized)
                        {
                            candidates.push(candidate);
                            added += 1;
                        }
                    }
                    debug!("Refined search added {} new candidates", added);
                }
                Err(e) => {
                    warn!("Refined search failed, stopping retry loop: {}", e);
                    break;
                }
            }
        }

        // A run where every contextual batch failed is a fallback run: the
        // caller must see that no LLM confirmation backs these entries.
        if total_llm_attempted > 0 && total_llm_succeeded == 0 {
            for method in state.validated.values_mut() {
                *method = ValidationMethod::Fallback;
            }
        }

        for candidate in candidates.iter_mut() {
            if let Some(method) = state.validated.get(&candidate.normalized) {
                candidate.validation_method = Some(*method);
                candidate.tag(StageTag::GeoValidated);
            }
        }

        info!(
            "Geo validation complete: {} validated, {} iterations, {} degraded batches",
            state.validated.len(),
            state.iterations,
            degraded_batches
        );
        GeoOutcome {
            validated: state.validated,
            iterations: state.iterations,
            degraded_batches,
            refined_queries,
        }
    }

    /// One validation pass: pattern matching, then batched LLM context.
    async fn validate_pass(
        &self,
        pending: &[UrlCandidate],
        query: &str,
        market: &Market,
        state: &mut GeoValidationState,
    ) -> PassStats {
        let mut stats = PassStats {
            llm_attempted: 0,
            llm_succeeded: 0,
            degraded: 0,
        };
        if pending.is_empty() {
            return stats;
        }

        // Deterministic pass
        let mut remaining: Vec<&UrlCandidate> = Vec::new();
        for candidate in pending {
            if matches_market_patterns(&candidate.url, market) {
                state
                    .validated
                    .entry(candidate.normalized.clone())
                    .or_insert(ValidationMethod::DomainPattern);
                debug!("URL passed domain/path validation: {}", candidate.url);
            } else {
                remaining.push(candidate);
            }
        }

        if remaining.is_empty() {
            return stats;
        }
        info!("Performing LLM validation on {} remaining URLs", remaining.len());

        // Contextual pass in bounded batches
        for batch in remaining.chunks(self.config.batch_size) {
            stats.llm_attempted += 1;
            let urls: Vec<String> = batch.iter().map(|c| c.url.clone()).collect();
            match self.llm_validate_batch(&urls, query, market).await {
                Ok(valid_urls) => {
                    stats.llm_succeeded += 1;
                    for candidate in batch {
                        if valid_urls.iter().any(|u| u == &candidate.url) {
                            state
                                .validated
                                .entry(candidate.normalized.clone())
                                .or_insert(ValidationMethod::LlmContext);
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "LLM validation batch degraded to pattern-only: {}",
                        e
                    );
                    stats.degraded += 1;
                }
            }
        }
        stats
    }

    /// Validate one batch of URLs via the model, retrying once on the
    /// fallback model before giving up.
    async fn llm_validate_batch(
        &self,
        urls: &[String],
        query: &str,
        market: &Market,
    ) -> Result<Vec<String>, GenerationError> {
        match self
            .llm_validate_with_model(urls, query, market, &self.config.routing.primary)
            .await
        {
            Ok(valid) => Ok(valid),
            Err(e) => match &self.config.routing.fallback {
                Some(fallback) => {
                    warn!(
                        "Primary model failed ({}), retrying batch on {}",
                        e, fallback
                    );
                    self.llm_validate_with_model(urls, query, market, fallback)
                        .await
                }
                None => Err(e),
            },
        }
    }

    async fn llm_validate_with_model(
        &self,
        urls: &[String],
        query: &str,
        market: &Market,
        model: &str,
    ) -> Result<Vec<String>, GenerationError> {
        let request = GenerateRequest::new(prompts::format_geo_user_prompt(market, query, urls))
            .with_system(prompts::format_geo_system_prompt(market))
            .with_model(model)
            .with_temperature(0.0)
            .with_max_tokens(200);

        let value = tokio::time::timeout(self.config.batch_timeout, self.model.generate(&request))
            .await
            .map_err(|_| GenerationError::Timeout {
                ms: self.config.batch_timeout.as_millis() as u64,
            })??;

        let listed = parse_url_array(&value)?;

        // Only accept URLs that were actually in the batch
        let confirmed: Vec<String> = listed
            .into_iter()
            .filter(|u| urls.contains(u))
            .collect();

        // Safety net: drop foreign-country domains the model let through
        let accepted: Vec<String> = confirmed
            .into_iter()
            .filter(|u| {
                if has_foreign_tld(u, market) {
                    warn!("Filtering out foreign URL the model validated: {}", u);
                    false
                } else {
                    true
                }
            })
            .collect();

        info!(
            "LLM validated {}/{} URLs as {}-relevant",
            accepted.len(),
            urls.len(),
            market.country()
        );
        Ok(accepted)
    }
}

fn parse_url_array(value: &Value) -> Result<Vec<String>, GenerationError> {
    // Models occasionally answer {"error": "..."} instead of an array
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        warn!("Model returned error object: {}. Treating as empty result.", error);
        return Ok(Vec::new());
    }
    // Or wrap the array in an object key
    let array = value
        .as_array()
        .or_else(|| value.get("urls").and_then(Value::as_array))
        .ok_or_else(|| GenerationError::Unparseable {
            reason: "expected a JSON array of URLs".to_string(),
        })?;
    Ok(array
        .iter()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect())
}

/// Deterministic market check: country TLD, known local marketplace or
/// retailer name, domain indicator, or path/query indicator.
pub fn matches_market_patterns(url: &str, market: &Market) -> bool {
    let parsed = match Url::parse(url) {
        Ok(p) => p,
        Err(e) => {
            warn!("Error parsing URL {}: {}", url, e);
            return false;
        }
    };
    let domain = parsed.host_str().unwrap_or("").to_lowercase();

    if market.tlds().iter().any(|tld| domain.ends_with(tld)) {
        return true;
    }
    if market
        .known_marketplaces()
        .iter()
        .any(|site| domain == *site || domain.ends_with(&format!(".{}", site)))
    {
        return true;
    }
    // Local retailer brand embedded in an unrelated TLD
    if market
        .known_marketplaces()
        .iter()
        .filter_map(|site| site.split('.').next())
        .any(|brand| brand.len() > 3 && domain.contains(brand))
    {
        return true;
    }
    if market
        .domain_indicators()
        .iter()
        .any(|hint| domain.contains(hint))
    {
        return true;
    }

    let path_and_query = format!(
        "{}?{}",
        parsed.path().to_lowercase(),
        parsed.query().unwrap_or("").to_lowercase()
    );
    market
        .path_indicators()
        .iter()
        .any(|hint| path_and_query.contains(hint.as_str()))
}

/// Country TLD suffixes that can never belong to the target market.
fn has_foreign_tld(url: &str, market: &Market) -> bool {
    const FOREIGN: [&str; 11] = [
        ".mx", ".pe", ".ar", ".br", ".cl", ".co", ".cr", ".es", ".pt", ".uy", ".ec",
    ];
    let own = format!(".{}", market.country().to_lowercase());
    let lowered = url.to_lowercase();
    FOREIGN.iter().any(|tld| {
        *tld != own
            && (lowered.ends_with(tld) || lowered.contains(&format!("{}/", tld)))
    })
}
