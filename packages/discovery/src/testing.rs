//! Testing utilities including mock ports.
//!
//! These make it possible to exercise the full pipeline without a model
//! backend, a search API, or a crawl service. Mocks are configured with
//! builders and record their calls for assertions.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{CrawlError, CrawlResult, GenerationError, GenerationResult};
use crate::traits::ai::{GenerateRequest, LanguageModel};
use crate::traits::crawler::{CrawlOptions, CrawlService};
use crate::types::page::PageContent;

/// A mock language model routed by prompt substring.
///
/// The first rule whose needle appears in the system+user prompt wins;
/// otherwise the default response (when set) is returned.
#[derive(Default)]
pub struct MockLanguageModel {
    rules: RwLock<Vec<(String, Value)>>,
    fail_needles: RwLock<Vec<String>>,
    default_response: RwLock<Option<Value>>,
    fail_all: AtomicBool,
    calls: RwLock<Vec<String>>,
}

impl MockLanguageModel {
    /// Create a mock with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `value` when `needle` appears in the prompt.
    pub fn with_response(self, needle: &str, value: Value) -> Self {
        self.rules
            .write()
            .unwrap()
            .push((needle.to_string(), value));
        self
    }

    /// Respond with `value` when no rule matches.
    pub fn with_default(self, value: Value) -> Self {
        *self.default_response.write().unwrap() = Some(value);
        self
    }

    /// Error on prompts containing `needle`.
    pub fn fail_when(self, needle: &str) -> Self {
        self.fail_needles.write().unwrap().push(needle.to_string());
        self
    }

    /// Error on every call.
    pub fn fail_all(self) -> Self {
        self.fail_all.store(true, Ordering::SeqCst);
        self
    }

    /// Prompts seen so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn generate(&self, request: &GenerateRequest) -> GenerationResult<Value> {
        let haystack = format!(
            "{}\n{}",
            request.system.as_deref().unwrap_or(""),
            request.prompt
        );
        self.calls.write().unwrap().push(haystack.clone());

        if self.fail_all.load(Ordering::SeqCst) {
            return Err(GenerationError::Backend(Box::new(std::io::Error::other(
                "mock model unavailable",
            ))));
        }
        if self
            .fail_needles
            .read()
            .unwrap()
            .iter()
            .any(|needle| haystack.contains(needle))
        {
            return Err(GenerationError::Backend(Box::new(std::io::Error::other(
                "mock model failure",
            ))));
        }

        if let Some((_, value)) = self
            .rules
            .read()
            .unwrap()
            .iter()
            .find(|(needle, _)| haystack.contains(needle))
        {
            return Ok(value.clone());
        }

        match self.default_response.read().unwrap().clone() {
            Some(value) => Ok(value),
            None => Err(GenerationError::Unparseable {
                reason: "no mock rule matched".to_string(),
            }),
        }
    }
}

/// A mock crawl service returning predefined content.
#[derive(Default)]
pub struct MockCrawlService {
    contents: RwLock<HashMap<String, PageContent>>,
    fail_urls: RwLock<HashSet<String>>,
    fail_all: AtomicBool,
    batch_calls: Arc<AtomicU64>,
}

impl MockCrawlService {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `content` for `url`.
    pub fn with_content(self, url: &str, content: PageContent) -> Self {
        self.contents
            .write()
            .unwrap()
            .insert(url.to_string(), content);
        self
    }

    /// Return no content for `url` (as a dead page behaves).
    pub fn fail_url(self, url: &str) -> Self {
        self.fail_urls.write().unwrap().insert(url.to_string());
        self
    }

    /// Error the whole batch call.
    pub fn fail_all(self) -> Self {
        self.fail_all.store(true, Ordering::SeqCst);
        self
    }

    /// Shared counter of `crawl_batch` invocations.
    pub fn call_count(&self) -> Arc<AtomicU64> {
        self.batch_calls.clone()
    }
}

#[async_trait]
impl CrawlService for MockCrawlService {
    async fn crawl_batch(
        &self,
        urls: &[String],
        _options: &CrawlOptions,
    ) -> CrawlResult<HashMap<String, PageContent>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(CrawlError::Service {
                reason: "mock crawl service down".to_string(),
            });
        }
        let contents = self.contents.read().unwrap();
        let fail_urls = self.fail_urls.read().unwrap();
        Ok(urls
            .iter()
            .filter(|u| !fail_urls.contains(*u))
            .filter_map(|u| contents.get(u).map(|c| (u.clone(), c.clone())))
            .collect())
    }
}
