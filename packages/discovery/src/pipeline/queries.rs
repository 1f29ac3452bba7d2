//! Purchase-intent query generation with geography-hinted refinement.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{GenerationError, GenerationResult};
use crate::pipeline::prompts;
use crate::traits::ai::{GenerateRequest, LanguageModel};
use crate::types::candidate::SearchQuery;
use crate::types::market::Market;

/// Number of queries requested from the model.
pub const TARGET_QUERY_COUNT: usize = 5;

/// Generates search queries embedding purchase intent and market-local
/// terminology. Deterministic: temperature 0, structured JSON output.
pub struct QueryGenerator {
    model: Arc<dyn LanguageModel>,
    model_name: Option<String>,
}

impl QueryGenerator {
    /// Create a generator over a language model.
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            model_name: None,
        }
    }

    /// Pin a model name for generation calls.
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    /// Generate purchase-intent queries for a product in a market.
    ///
    /// Fails with [`GenerationError`] when the model is unreachable or the
    /// output holds no usable queries; the caller falls back to the raw
    /// product phrase rather than aborting.
    pub async fn generate(
        &self,
        product: &str,
        market: &Market,
    ) -> GenerationResult<Vec<SearchQuery>> {
        info!("Generating queries for product: {}", product);

        let mut request = GenerateRequest::new(format!("Product: {}", product))
            .with_system(prompts::format_query_system_prompt(market))
            .with_temperature(0.0)
            .with_max_tokens(300);
        if let Some(name) = &self.model_name {
            request = request.with_model(name.clone());
        }

        let value = self.model.generate(&request).await?;
        let texts = parse_query_list(&value)?;

        let queries: Vec<SearchQuery> = texts
            .into_iter()
            .take(TARGET_QUERY_COUNT)
            .map(|text| SearchQuery::new(text, market.clone()))
            .collect();

        info!("Generated {} queries", queries.len());
        Ok(queries)
    }

    /// Refine a query with stronger geography hints (retry loop support).
    ///
    /// When the query already carries local terms it is returned as-is.
    /// Model failure degrades to a deterministic enhancement instead of
    /// erroring.
    pub async fn refine(&self, original: &str, market: &Market) -> String {
        if original.trim().is_empty() {
            warn!("Empty search query provided for refinement");
            return original.to_string();
        }

        let lowered = original.to_lowercase();
        if market
            .search_terms()
            .iter()
            .any(|term| lowered.contains(term.as_str()))
        {
            info!("Query already contains {} terms: {}", market.location(), original);
            return original.to_string();
        }

        let mut request = GenerateRequest::new(format!("Original Query: \"{}\"", original))
            .with_system(prompts::format_refine_system_prompt(market))
            .with_temperature(0.5)
            .with_max_tokens(150);
        if let Some(name) = &self.model_name {
            request = request.with_model(name.clone());
        }

        match self.model.generate(&request).await {
            Ok(value) => match parse_query_list(&value) {
                Ok(mut queries) if !queries.is_empty() => {
                    let enhanced = queries.remove(0);
                    info!("Enhanced query: '{}' -> '{}'", original, enhanced);
                    enhanced
                }
                _ => {
                    warn!("Model returned no usable refined query, using fallback");
                    fallback_enhance(original, market)
                }
            },
            Err(e) => {
                warn!("Query refinement failed: {}, using fallback", e);
                fallback_enhance(original, market)
            }
        }
    }
}

/// Deterministic geography enhancement used when the model fails.
fn fallback_enhance(original: &str, market: &Market) -> String {
    let term = market
        .search_terms()
        .into_iter()
        .next()
        .unwrap_or_else(|| market.country().to_lowercase());
    let enhanced = format!("{} {}", original, term);
    info!("Fallback enhanced query: '{}' -> '{}'", original, enhanced);
    enhanced
}

/// Accept either a raw JSON array or an object with `{"queries": [...]}`.
fn parse_query_list(value: &Value) -> GenerationResult<Vec<String>> {
    let items = if let Some(array) = value.as_array() {
        array
    } else if let Some(array) = value.get("queries").and_then(Value::as_array) {
        array
    } else {
        return Err(GenerationError::Unparseable {
            reason: "expected a JSON array or {\"queries\": [...]}".to_string(),
        });
    };

    let queries: Vec<String> = items
        .iter()
        .filter_map(Value::as_str)
        .map(|s| s.trim().replace('\n', " "))
        .filter(|s| !s.is_empty())
        .collect();

    if queries.is_empty() {
        return Err(GenerationError::Unparseable {
            reason: "no string queries in model output".to_string(),
        });
    }
    Ok(queries)
}
