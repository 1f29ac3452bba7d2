//! Concurrent search fan-out with normalized-URL deduplication.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::{SearchError, SearchResult};
use crate::traits::searcher::Searcher;
use crate::types::candidate::{SearchQuery, UrlCandidate};
use crate::urlnorm;

/// Result of one aggregation pass.
#[derive(Debug, Default)]
pub struct AggregatedSearch {
    /// Deduplicated candidates, first-seen order
    pub candidates: Vec<UrlCandidate>,

    /// Raw hit count across all queries before dedup
    pub raw_hits: usize,

    /// Queries that failed (aggregation continued without them)
    pub failed_queries: usize,
}

/// Fans queries out to the search port and merges the results.
///
/// Partial failures are logged and skipped; the stage only errors when
/// every query fails, since it then has no data source left.
pub struct SearchAggregator {
    searcher: Arc<dyn Searcher>,
    concurrency: usize,
}

impl SearchAggregator {
    /// Create an aggregator with the default concurrency bound (5).
    pub fn new(searcher: Arc<dyn Searcher>) -> Self {
        Self {
            searcher,
            concurrency: 5,
        }
    }

    /// Set the number of in-flight search calls.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run all queries and merge their hits into unique candidates.
    pub async fn aggregate(&self, queries: &[SearchQuery]) -> SearchResult<AggregatedSearch> {
        if queries.is_empty() {
            return Ok(AggregatedSearch::default());
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let tasks = queries.iter().map(|query| {
            let searcher = self.searcher.clone();
            let semaphore = semaphore.clone();
            let text = query.text.clone();
            let country = query.market.country().to_string();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let result = searcher.search(&text, &country).await;
                (text, result)
            }
        });

        let mut aggregated = AggregatedSearch::default();
        let mut seen: HashSet<String> = HashSet::new();

        for (query_text, result) in join_all(tasks).await {
            match result {
                Ok(hits) => {
                    aggregated.raw_hits += hits.len();
                    for hit in hits {
                        let Some(clean) = urlnorm::sanitize_url(&hit.url) else {
                            continue;
                        };
                        let Some(mut candidate) = UrlCandidate::from_url(clean, &query_text)
                        else {
                            continue;
                        };
                        if !seen.insert(candidate.normalized.clone()) {
                            continue;
                        }
                        if let Some(snippet) = hit.best_snippet() {
                            candidate = candidate.with_snippet(snippet.to_string());
                        }
                        if let Some(title) = hit.title {
                            candidate = candidate.with_title(title);
                        }
                        aggregated.candidates.push(candidate);
                    }
                }
                Err(e) => {
                    warn!("Search query '{}' failed: {}", query_text, e);
                    aggregated.failed_queries += 1;
                }
            }
        }

        if aggregated.failed_queries == queries.len() {
            return Err(SearchError::AllQueriesFailed {
                attempted: queries.len(),
            });
        }

        info!(
            "Aggregated {} unique candidates from {} hits ({} queries, {} failed)",
            aggregated.candidates.len(),
            aggregated.raw_hits,
            queries.len(),
            aggregated.failed_queries
        );
        Ok(aggregated)
    }
}
