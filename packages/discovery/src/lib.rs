//! Geographically-Scoped Product Discovery Pipeline
//!
//! Turns a free-text product query plus a target market (country,
//! optional city) into a ranked set of validated e-commerce product
//! pages with prices.
//!
//! # Design Philosophy
//!
//! - Capability ports, not concrete clients: any model/search/crawl
//!   backend satisfying the trait contracts is substitutable
//! - Degrade, don't abort: stage-local failures fall back to cheaper
//!   paths (pattern matching, skip-stage, mark-unknown) and are recorded
//!   on the job, never silently swallowed
//! - Bounded everything: the geo retry loop, the per-domain ceiling, the
//!   in-process cache, and the pipeline queues all have explicit caps
//!
//! # Usage
//!
//! ```rust,ignore
//! use discovery::{
//!     ContentCache, ContentCacheConfig, DiscoveryEngine, DiscoveryRequest, EngineConfig,
//! };
//!
//! let cache = Arc::new(ContentCache::new(kv, repo, crawler, ContentCacheConfig::default()));
//! let engine = DiscoveryEngine::new(model, searcher, cache, EngineConfig::default());
//!
//! // Sequential mode: one request, one ranked response
//! let response = engine.run(&DiscoveryRequest::new("wireless mouse")).await?;
//!
//! // Pipeline mode: concurrent stage workers behind bounded queues
//! let scheduler = PipelineScheduler::new(Arc::new(engine), SchedulerConfig::default());
//! scheduler.start().await;
//! let job = scheduler.submit(DiscoveryRequest::new("wireless mouse")).await?;
//! let outcome = scheduler.await_result(job, Duration::from_secs(120)).await;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Port abstractions (LanguageModel, Searcher, CrawlService, stores)
//! - [`types`] - Domain types (Market, candidates, products, request/response)
//! - [`pipeline`] - Stage logic and the sequential engine
//! - [`scheduler`] - Queue-connected concurrent execution
//! - [`cache`] - Three-tier read-through content cache
//! - [`stores`] - Storage implementations (memory, SQLite)
//! - [`security`] - Credential handling and outbound-URL protection
//! - [`testing`] - Mock ports for testing

pub mod cache;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod security;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;
pub mod urlnorm;

// Re-export core types at crate root
pub use error::{
    CrawlError, Degradation, DiscoveryError, GenerationError, Result, SearchError,
};
pub use traits::{
    ai::{GenerateRequest, LanguageModel, ModelRouting, OllamaGenerator},
    crawler::{
        CrawlOptions, CrawlService, GuardedCrawlService, HttpCrawlService,
        RateLimitedCrawlService,
    },
    searcher::{BraveSearcher, MockSearcher, SearchHit, Searcher},
    store::{KeyValueCache, PageRepository},
};
pub use types::{
    candidate::{PageLabel, SearchQuery, StageTag, UrlCandidate, ValidationMethod},
    market::Market,
    page::{CachedPage, PageContent},
    product::{rank_by_price, Availability, PriceExtraction, ProductCandidate},
    request::{DiscoveryRequest, DiscoveryResponse, ProductPageEntry},
};

// Re-export the pipeline engine and stage components
pub use pipeline::{
    CategoryExpander, ClassifierConfig, DiscoveryEngine, EngineConfig, ExpanderConfig,
    GeoConfig, GeoValidator, PrefilterConfig, PriceConfig, PriceExtractor,
    ProductPageClassifier, QueryGenerator, SearchAggregator, UrlPrefilterCascade,
};

// Re-export the scheduler
pub use scheduler::{
    JobOutcome, JobStage, JobStatus, PipelineScheduler, SchedulerConfig, SchedulerMetrics,
};

// Re-export the cache
pub use cache::{CacheStats, ContentCache, ContentCacheConfig, MemoryTier, RetrievedBatch};

// Re-export stores
pub use stores::{MemoryKeyValueCache, MemoryPageRepository};

#[cfg(feature = "sqlite")]
pub use stores::SqlitePageRepository;

// Re-export security primitives
pub use security::{SecretString, UrlGuard};
