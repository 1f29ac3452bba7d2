//! Domain types for the discovery pipeline.

pub mod candidate;
pub mod market;
pub mod page;
pub mod product;
pub mod request;

pub use candidate::{PageLabel, SearchQuery, StageTag, UrlCandidate, ValidationMethod};
pub use market::Market;
pub use page::{CachedPage, PageContent};
pub use product::{rank_by_price, Availability, PriceExtraction, ProductCandidate};
pub use request::{DiscoveryRequest, DiscoveryResponse, ProductPageEntry};
