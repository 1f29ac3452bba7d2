//! Three-stage URL reduction before expensive per-page classification.
//!
//! 1. Pattern stage: deny-list removal and allow-list priority marking,
//!    evaluated on the URL string alone. Idempotent; a rejection here is
//!    final for the job.
//! 2. Dedup/rate-limit stage: canonical dedup, then a per-domain ceiling
//!    so one marketplace cannot flood the candidate set.
//! 3. Bulk LLM stage: a keep/remove pass in large batches, only above a
//!    size threshold. Fail-open: any parse failure or model error skips
//!    the stage entirely.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::pipeline::prompts;
use crate::traits::ai::{GenerateRequest, LanguageModel};
use crate::types::candidate::{StageTag, UrlCandidate};
use crate::urlnorm;

/// Configuration for the cascade.
#[derive(Debug, Clone)]
pub struct PrefilterConfig {
    /// Maximum URLs per domain after stage 2
    pub domain_cap: usize,

    /// Candidate count above which the bulk LLM stage runs
    pub llm_threshold: usize,

    /// URLs per bulk LLM prompt
    pub llm_batch_size: usize,
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            domain_cap: 8,
            llm_threshold: 20,
            llm_batch_size: 12,
        }
    }
}

/// Outcome of a cascade run with per-stage survivor counts.
#[derive(Debug)]
pub struct CascadeOutcome {
    /// Surviving candidates, original discovery order
    pub candidates: Vec<UrlCandidate>,

    /// Count after the pattern stage
    pub after_pattern: usize,

    /// Count after dedup and the domain cap
    pub after_domain_cap: usize,

    /// Count after the bulk LLM stage
    pub after_llm: usize,

    /// True when the bulk LLM stage was skipped (fail-open or below
    /// threshold with a failure — never set by the threshold alone)
    pub llm_skipped: bool,
}

/// The cascade itself.
pub struct UrlPrefilterCascade {
    model: Arc<dyn LanguageModel>,
    config: PrefilterConfig,
}

impl UrlPrefilterCascade {
    /// Create a cascade over a language model.
    pub fn new(model: Arc<dyn LanguageModel>, config: PrefilterConfig) -> Self {
        Self { model, config }
    }

    /// Run all three stages in order.
    pub async fn run(&self, candidates: Vec<UrlCandidate>, product: &str) -> CascadeOutcome {
        let input = candidates.len();
        let after_pattern = self.stage_pattern(candidates);
        let pattern_count = after_pattern.len();

        let after_cap = self.stage_dedup_and_cap(after_pattern);
        let cap_count = after_cap.len();

        let (survivors, llm_skipped) = self.stage_bulk_llm(after_cap, product).await;

        info!(
            "Prefilter cascade: {} -> {} (pattern) -> {} (domain cap) -> {} (bulk LLM{})",
            input,
            pattern_count,
            cap_count,
            survivors.len(),
            if llm_skipped { ", skipped" } else { "" }
        );
        CascadeOutcome {
            after_pattern: pattern_count,
            after_domain_cap: cap_count,
            after_llm: survivors.len(),
            candidates: survivors,
            llm_skipped,
        }
    }

    /// Stage 1: deny-list removal, allow-list priority marking.
    pub fn stage_pattern(&self, candidates: Vec<UrlCandidate>) -> Vec<UrlCandidate> {
        candidates
            .into_iter()
            .filter_map(|mut candidate| {
                let lowered = candidate.url.to_lowercase();
                if urlnorm::DENY_TOKENS.iter().any(|t| lowered.contains(t)) {
                    debug!("Pattern stage rejected {}", candidate.url);
                    return None;
                }
                // Fragment URLs and static assets
                if lowered.contains('#')
                    || urlnorm::STATIC_EXTENSIONS
                        .iter()
                        .any(|ext| lowered.ends_with(ext))
                {
                    debug!("Pattern stage rejected {}", candidate.url);
                    return None;
                }
                candidate.pattern_priority = urlnorm::PRODUCT_TOKENS
                    .iter()
                    .any(|t| lowered.contains(t))
                    || lowered.trim_end_matches('/').ends_with("/p");
                candidate.tag(StageTag::PatternFilter);
                Some(candidate)
            })
            .collect()
    }

    /// Stage 2: canonical dedup, then the per-domain ceiling.
    ///
    /// Over the cap, allow-list-matched URLs win; discovery order breaks
    /// ties. Survivors keep their original relative order.
    pub fn stage_dedup_and_cap(&self, candidates: Vec<UrlCandidate>) -> Vec<UrlCandidate> {
        // Dedup by normalized form, first seen wins
        let mut seen: HashMap<String, ()> = HashMap::new();
        let deduped: Vec<UrlCandidate> = candidates
            .into_iter()
            .filter(|c| seen.insert(c.normalized.clone(), ()).is_none())
            .collect();

        // Indices per domain, discovery order
        let mut per_domain: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, candidate) in deduped.iter().enumerate() {
            per_domain
                .entry(candidate.domain.as_str())
                .or_default()
                .push(idx);
        }

        let mut keep = vec![true; deduped.len()];
        for (domain, indices) in &per_domain {
            if indices.len() <= self.config.domain_cap {
                continue;
            }
            // Priority URLs first; stable order preserves discovery order
            // within each priority class
            let mut ranked = indices.clone();
            ranked.sort_by_key(|&i| if deduped[i].pattern_priority { 0u8 } else { 1u8 });
            for &drop in &ranked[self.config.domain_cap..] {
                keep[drop] = false;
            }
            debug!(
                "Domain {} capped: {} -> {} URLs",
                domain,
                indices.len(),
                self.config.domain_cap
            );
        }

        deduped
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| keep[*idx])
            .map(|(_, mut candidate)| {
                candidate.tag(StageTag::DomainCap);
                candidate
            })
            .collect()
    }

    /// Stage 3: bulk keep/remove through the model, fail-open.
    ///
    /// Returns `(survivors, skipped)`. Any batch failure discards the LLM
    /// results and passes the stage-2 output through unfiltered — this is
    /// the cost-optimization stage, not a correctness stage.
    pub async fn stage_bulk_llm(
        &self,
        candidates: Vec<UrlCandidate>,
        product: &str,
    ) -> (Vec<UrlCandidate>, bool) {
        if candidates.len() <= self.config.llm_threshold {
            return (candidates, false);
        }

        let mut keep_flags = vec![true; candidates.len()];
        let batches: Vec<Vec<usize>> = (0..candidates.len())
            .collect::<Vec<_>>()
            .chunks(self.config.llm_batch_size)
            .map(|c| c.to_vec())
            .collect();

        for batch in batches {
            let refs: Vec<&UrlCandidate> = batch.iter().map(|&i| &candidates[i]).collect();
            let request = GenerateRequest::new(prompts::format_prefilter_prompt(product, &refs))
                .with_temperature(0.0)
                .with_max_tokens(200);

            let verdict = match self.model.generate(&request).await {
                Ok(value) => match serde_json::from_value::<KeepRemove>(value) {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        warn!("Bulk prefilter parse failed, skipping stage: {}", e);
                        return (candidates, true);
                    }
                },
                Err(e) => {
                    warn!("Bulk prefilter unavailable, skipping stage: {}", e);
                    return (candidates, true);
                }
            };

            match (&verdict.keep, &verdict.remove) {
                (Some(keep), _) => {
                    for (pos, &idx) in batch.iter().enumerate() {
                        keep_flags[idx] = keep.contains(&pos);
                    }
                }
                (None, Some(remove)) => {
                    for (pos, &idx) in batch.iter().enumerate() {
                        keep_flags[idx] = !remove.contains(&pos);
                    }
                }
                (None, None) => {
                    warn!("Bulk prefilter returned neither keep nor remove, skipping stage");
                    return (candidates, true);
                }
            }
        }

        let survivors: Vec<UrlCandidate> = candidates
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| keep_flags[*idx])
            .map(|(_, mut candidate)| {
                candidate.tag(StageTag::LlmPrefilter);
                candidate
            })
            .collect();
        (survivors, false)
    }
}

#[derive(Deserialize)]
struct KeepRemove {
    #[serde(default)]
    keep: Option<Vec<usize>>,
    #[serde(default)]
    remove: Option<Vec<usize>>,
}
