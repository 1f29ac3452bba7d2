//! Core trait abstractions (ports) the pipeline depends on.

pub mod ai;
pub mod crawler;
pub mod searcher;
pub mod store;

pub use ai::{parse_model_json, GenerateRequest, LanguageModel, ModelRouting, OllamaGenerator};
pub use crawler::{
    CrawlOptions, CrawlService, GuardedCrawlService, HttpCrawlService, RateLimitedCrawlService,
};
pub use searcher::{BraveSearcher, MockSearcher, SearchHit, Searcher};
pub use store::{KeyValueCache, PageRepository};
