//! Terminal product entities with extracted price data.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::candidate::{PageLabel, ValidationMethod};

/// Stock availability as stated on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    OutOfStock,
    #[default]
    Unknown,
}

/// Result of price extraction for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceExtraction {
    /// Extracted price; `None` means `price_unknown`
    pub price: Option<f64>,

    /// ISO currency code ("UYU", "USD", ...)
    pub currency: Option<String>,

    /// Availability as stated on the page
    pub availability: Availability,

    /// Original price text found on the page
    pub original_text: Option<String>,

    /// Extraction confidence in [0, 1]
    pub confidence: Option<f32>,
}

impl PriceExtraction {
    /// An extraction with no usable price.
    pub fn unknown() -> Self {
        Self {
            price: None,
            currency: None,
            availability: Availability::Unknown,
            original_text: None,
            confidence: None,
        }
    }

    /// True when no price was found.
    pub fn is_price_unknown(&self) -> bool {
        self.price.is_none()
    }
}

/// A validated product page with price data.
///
/// Created only after successful price extraction; immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCandidate {
    /// Product page URL
    pub url: String,

    /// Product title, from the page or the search hit
    pub title: Option<String>,

    /// Price information (may be `price_unknown`)
    pub price: PriceExtraction,

    /// Classifier confidence in [0, 1]
    pub confidence: Option<f32>,

    /// Final classification label
    pub classification: PageLabel,

    /// How geo validation confirmed the URL
    pub validation_method: ValidationMethod,

    /// Query that surfaced the URL
    pub source_query: String,
}

impl ProductCandidate {
    /// Sort key: ascending price, `price_unknown` after all priced entries.
    pub fn sort_price(&self) -> f64 {
        self.price.price.unwrap_or(f64::INFINITY)
    }
}

/// Order candidates by ascending price with `price_unknown` last.
pub fn rank_by_price(candidates: &mut [ProductCandidate]) {
    candidates.sort_by(|a, b| {
        a.sort_price()
            .partial_cmp(&b.sort_price())
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str, price: Option<f64>) -> ProductCandidate {
        ProductCandidate {
            url: url.to_string(),
            title: None,
            price: PriceExtraction {
                price,
                currency: price.map(|_| "UYU".to_string()),
                availability: Availability::Unknown,
                original_text: None,
                confidence: None,
            },
            confidence: Some(0.9),
            classification: PageLabel::Product,
            validation_method: ValidationMethod::DomainPattern,
            source_query: "q".to_string(),
        }
    }

    #[test]
    fn test_price_unknown_ranks_last() {
        let mut list = vec![
            candidate("a", None),
            candidate("b", Some(990.0)),
            candidate("c", Some(450.0)),
            candidate("d", None),
        ];
        rank_by_price(&mut list);
        assert_eq!(list[0].url, "c");
        assert_eq!(list[1].url, "b");
        assert!(list[2].price.is_price_unknown());
        assert!(list[3].price.is_price_unknown());
    }

    #[test]
    fn test_unknown_extraction() {
        let p = PriceExtraction::unknown();
        assert!(p.is_price_unknown());
        assert_eq!(p.availability, Availability::Unknown);
    }
}
