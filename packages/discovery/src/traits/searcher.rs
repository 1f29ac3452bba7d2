//! Search port for keyword web search.
//!
//! Abstracts over search providers (Brave, Tavily, SerpAPI, ...). The
//! aggregator fans queries out over this trait and merges the hits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SearchError, SearchResult as SearchResultT};
use crate::security::SecretString;

/// A single hit from the search backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Result URL
    pub url: String,

    /// Result title, if provided
    pub title: Option<String>,

    /// Description from the result listing
    pub description: Option<String>,

    /// Snippet of matching page text
    pub snippet: Option<String>,
}

impl SearchHit {
    /// Create a hit from a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
            snippet: None,
        }
    }

    /// Add a title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Add a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a snippet.
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    /// Best available short text for classification prompts.
    pub fn best_snippet(&self) -> Option<&str> {
        self.snippet.as_deref().or(self.description.as_deref())
    }
}

/// Keyword search port.
#[async_trait]
pub trait Searcher: Send + Sync {
    /// Search the web for the query, scoped to a country when supported.
    async fn search(&self, query: &str, country: &str) -> SearchResultT<Vec<SearchHit>>;
}

/// Mock searcher for testing.
#[derive(Default)]
pub struct MockSearcher {
    results: std::sync::RwLock<std::collections::HashMap<String, Vec<SearchHit>>>,
    fail_queries: std::sync::RwLock<std::collections::HashSet<String>>,
    fail_all: std::sync::atomic::AtomicBool,
}

impl MockSearcher {
    /// Create a new mock searcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add hits for a query.
    pub fn with_hits(self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.results.write().unwrap().insert(query.to_string(), hits);
        self
    }

    /// Add URL strings as hits for a query.
    pub fn with_urls(self, query: &str, urls: &[&str]) -> Self {
        let hits = urls.iter().map(|u| SearchHit::new(*u)).collect();
        self.with_hits(query, hits)
    }

    /// Mark one query as failing.
    pub fn fail_query(self, query: &str) -> Self {
        self.fail_queries.write().unwrap().insert(query.to_string());
        self
    }

    /// Make every query fail.
    pub fn fail_all(self) -> Self {
        self.fail_all.store(true, std::sync::atomic::Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl Searcher for MockSearcher {
    async fn search(&self, query: &str, _country: &str) -> SearchResultT<Vec<SearchHit>> {
        if self.fail_all.load(std::sync::atomic::Ordering::SeqCst)
            || self.fail_queries.read().unwrap().contains(query)
        {
            return Err(SearchError::Api { status: 503 });
        }
        Ok(self
            .results
            .read()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default())
    }
}

/// Brave-backed searcher.
///
/// Uses the Brave web search API with country scoping.
pub struct BraveSearcher {
    api_key: SecretString,
    client: reqwest::Client,
    /// Number of results to request per query.
    pub count: usize,
}

const BRAVE_API_URL: &str = "https://api.search.brave.com/res/v1/web/search";

impl BraveSearcher {
    /// Create a new Brave searcher.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key),
            client: reqwest::Client::new(),
            count: 20,
        }
    }

    /// Create from the `BRAVE_SEARCH_API_KEY` environment variable.
    pub fn from_env() -> SearchResultT<Self> {
        let key = std::env::var("BRAVE_SEARCH_API_KEY")
            .map_err(|_| SearchError::MissingCredentials)?;
        Ok(Self::new(key))
    }

    /// Set the per-query result count.
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }
}

#[async_trait]
impl Searcher for BraveSearcher {
    async fn search(&self, query: &str, country: &str) -> SearchResultT<Vec<SearchHit>> {
        #[derive(Deserialize)]
        struct Response {
            web: Option<WebResults>,
        }

        #[derive(Deserialize)]
        struct WebResults {
            results: Vec<BraveHit>,
        }

        #[derive(Deserialize)]
        struct BraveHit {
            url: Option<String>,
            title: Option<String>,
            description: Option<String>,
        }

        let count = self.count.to_string();
        let response = self
            .client
            .get(BRAVE_API_URL)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", self.api_key.expose())
            .query(&[
                ("q", query),
                ("count", count.as_str()),
                ("country", country),
            ])
            .send()
            .await
            .map_err(|e| SearchError::Http(Box::new(e)))?;

        if !response.status().is_success() {
            return Err(SearchError::Api {
                status: response.status().as_u16(),
            });
        }

        let parsed: Response = response
            .json()
            .await
            .map_err(|e| SearchError::Http(Box::new(e)))?;

        let hits = parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|hit| {
                let url = hit.url?;
                let mut out = SearchHit::new(url);
                if let Some(title) = hit.title {
                    out = out.with_title(title);
                }
                if let Some(description) = hit.description {
                    // Brave uses `description` for the snippet
                    out = out.with_description(description);
                }
                Some(out)
            })
            .collect();

        Ok(hits)
    }
}
