//! Typed errors for the discovery library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Stage-local degradations
//! (pattern-only validation, skipped prefilter, unknown classification)
//! are *not* errors; they are recorded as [`Degradation`] values on the
//! job so partial failures stay observable without aborting a run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during a discovery run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Language model unreachable or returned unusable output
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// Search backend failed
    #[error("search failed: {0}")]
    Search(#[from] SearchError),

    /// Crawl/render backend failed
    #[error("crawl failed: {0}")]
    Crawl(#[from] CrawlError),

    /// Storage tier operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Job was cancelled between stages
    #[error("job cancelled")]
    Cancelled,

    /// Request was rejected before any stage ran
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Pipeline queue is full and the submission timed out
    #[error("pipeline at capacity, submission rejected")]
    PipelineSaturated,

    /// Job exhausted its retry budget; the triggering error is recorded
    #[error("job failed after {retries} retries: {reason}")]
    JobFailed { retries: u32, reason: String },

    /// JSON (de)serialization error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Errors from the language-model port.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Transport-level failure reaching the model backend
    #[error("model backend unreachable: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Backend responded but the body was not the requested JSON shape
    #[error("unparseable model output: {reason}")]
    Unparseable { reason: String },

    /// Model returned an empty response
    #[error("empty model response")]
    Empty,

    /// Generation exceeded its deadline
    #[error("generation timed out after {ms}ms")]
    Timeout { ms: u64 },
}

/// Errors from the search port.
#[derive(Debug, Error)]
pub enum SearchError {
    /// HTTP-level failure for a single query
    #[error("search request failed: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Search API rejected the request
    #[error("search API error: status {status}")]
    Api { status: u16 },

    /// Every query in the fan-out failed; the stage has no data source left
    #[error("all {attempted} search queries failed")]
    AllQueriesFailed { attempted: usize },

    /// Credentials missing or invalid
    #[error("search credentials missing")]
    MissingCredentials,
}

/// Errors from the crawl port.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// URL failed security validation before the request was made
    #[error("blocked URL: {url}: {reason}")]
    Blocked { url: String, reason: String },

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Invalid URL format
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Fetch/render exceeded its deadline
    #[error("timeout crawling: {url}")]
    Timeout { url: String },

    /// Crawl service responded but reported failure
    #[error("crawl service error: {reason}")]
    Service { reason: String },
}

/// A recorded stage-local degradation.
///
/// These are data, not failures: the run continues on a cheaper path and
/// the caller sees which corners were cut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// Query generation fell back to the raw product phrase
    QueryFallback,

    /// Geo validation degraded to pattern-only for one or more batches
    ValidationDegraded { batches: usize },

    /// Bulk LLM prefilter stage was skipped (fail-open)
    PrefilterLlmSkipped,

    /// One or more candidates could not be classified
    ClassificationUnknown { count: usize },

    /// Some URLs in a crawl batch returned no content
    CrawlPartial { missing: usize },

    /// One or more search queries failed (aggregation continued)
    SearchPartial { failed: usize },
}

/// Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Result type alias for generation operations.
pub type GenerationResult<T> = std::result::Result<T, GenerationError>;

/// Result type alias for search operations.
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Result type alias for crawl operations.
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;
