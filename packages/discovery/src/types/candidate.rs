//! Candidate types flowing through the pipeline stages.

use serde::{Deserialize, Serialize};

use crate::types::market::Market;
use crate::urlnorm;

/// A search query with purchase intent, scoped to a market.
///
/// Immutable once generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Query text as sent to the search backend
    pub text: String,

    /// Target market the query was generated for
    pub market: Market,

    /// Language hint (ISO 639-1), when known
    pub language: Option<String>,
}

impl SearchQuery {
    /// Create a new query for a market.
    pub fn new(text: impl Into<String>, market: Market) -> Self {
        Self {
            text: text.into(),
            market,
            language: None,
        }
    }

    /// Set the language hint.
    pub fn with_language(mut self, lang: impl Into<String>) -> Self {
        self.language = Some(lang.into());
        self
    }
}

/// How a URL was confirmed geographically relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMethod {
    /// Deterministic TLD / known-marketplace / indicator match
    DomainPattern,

    /// Contextual classification by the language model
    LlmContext,

    /// Degraded path: pattern-only after model failure
    Fallback,
}

impl ValidationMethod {
    /// Wire name, matching the response schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DomainPattern => "domain_pattern",
            Self::LlmContext => "llm_context",
            Self::Fallback => "fallback",
        }
    }
}

/// Classification label for a candidate page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageLabel {
    /// Not yet classified, or signal too sparse to decide
    #[default]
    Unknown,

    /// Individual product page, purchasable
    Product,

    /// Category/listing page holding many products
    Category,

    /// Confirmed non-product (blog, recipe, directory, foreign market)
    Rejected,
}

impl PageLabel {
    /// Wire name, matching the response schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Product => "product",
            Self::Category => "category",
            Self::Rejected => "rejected",
        }
    }
}

/// Pipeline stage that passed a candidate (provenance tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageTag {
    Search,
    GeoValidated,
    PatternFilter,
    DomainCap,
    LlmPrefilter,
    CategoryExpansion,
    Classified,
}

/// A URL under consideration, mutated as it moves through the stages.
///
/// Owned by the pipeline run that created it until it reaches a terminal
/// label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlCandidate {
    /// Original (sanitized) URL
    pub url: String,

    /// Normalized form used for deduplication
    pub normalized: String,

    /// Lowercased domain
    pub domain: String,

    /// Title from the search hit, if any
    pub title: Option<String>,

    /// Snippet/description from the search hit, if any
    pub snippet: Option<String>,

    /// Query that surfaced this URL
    pub source_query: String,

    /// Stages that passed this candidate, in order
    pub provenance: Vec<StageTag>,

    /// Classifier confidence in [0, 1], once classified
    pub confidence: Option<f32>,

    /// Current classification label
    pub label: PageLabel,

    /// Short classifier rationale, once classified
    pub rationale: Option<String>,

    /// How geo validation confirmed this URL, once validated
    pub validation_method: Option<ValidationMethod>,

    /// Whether the pattern allow-list matched (used as cap priority)
    pub pattern_priority: bool,
}

impl UrlCandidate {
    /// Build a candidate from a sanitized URL; returns `None` when the URL
    /// cannot be normalized.
    pub fn from_url(url: impl Into<String>, source_query: impl Into<String>) -> Option<Self> {
        let url = url.into();
        let normalized = urlnorm::normalize_for_dedup(&url)?;
        let domain = urlnorm::domain_of(&url)?;
        Some(Self {
            url,
            normalized,
            domain,
            title: None,
            snippet: None,
            source_query: source_query.into(),
            provenance: vec![StageTag::Search],
            confidence: None,
            label: PageLabel::Unknown,
            rationale: None,
            validation_method: None,
            pattern_priority: false,
        })
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the snippet.
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    /// Record a stage pass.
    pub fn tag(&mut self, tag: StageTag) {
        if self.provenance.last() != Some(&tag) {
            self.provenance.push(tag);
        }
    }

    /// True when the hit carried neither title nor snippet.
    pub fn is_metadata_sparse(&self) -> bool {
        self.title.as_deref().map_or(true, str::is_empty)
            && self.snippet.as_deref().map_or(true, str::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_normalizes() {
        let c = UrlCandidate::from_url(
            "https://Store.com.uy/p/123/?utm_source=x",
            "comprar plancha uruguay",
        )
        .unwrap();
        assert_eq!(c.normalized, "https://store.com.uy/p/123");
        assert_eq!(c.domain, "store.com.uy");
        assert_eq!(c.provenance, vec![StageTag::Search]);
    }

    #[test]
    fn test_candidate_rejects_unparseable() {
        assert!(UrlCandidate::from_url("not a url", "q").is_none());
    }

    #[test]
    fn test_tag_dedupes_consecutive() {
        let mut c = UrlCandidate::from_url("https://a.com.uy/p/1", "q").unwrap();
        c.tag(StageTag::GeoValidated);
        c.tag(StageTag::GeoValidated);
        assert_eq!(
            c.provenance,
            vec![StageTag::Search, StageTag::GeoValidated]
        );
    }

    #[test]
    fn test_sparse_metadata() {
        let c = UrlCandidate::from_url("https://a.com.uy/p/1", "q").unwrap();
        assert!(c.is_metadata_sparse());
        let c = c.with_title("Plancha Philips");
        assert!(!c.is_metadata_sparse());
    }

    #[test]
    fn test_label_wire_names() {
        assert_eq!(PageLabel::Product.as_str(), "product");
        assert_eq!(ValidationMethod::Fallback.as_str(), "fallback");
    }
}
