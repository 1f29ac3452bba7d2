//! LLM prompts for the discovery pipeline.
//!
//! Every prompt requests strict JSON. Classification and extraction run
//! at temperature 0; only query refinement uses a little creativity.

use crate::types::candidate::UrlCandidate;
use crate::types::market::Market;

/// System prompt for purchase-intent query generation.
pub fn format_query_system_prompt(market: &Market) -> String {
    let location = match market.city() {
        Some(city) => format!("{}, specifically {}", country_name(market.country()), city),
        None => country_name(market.country()).to_string(),
    };
    let intent = market
        .purchase_terms()
        .iter()
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(", ");
    let geo_terms = market.search_terms().join("\", \"");

    format!(
        r#"You are a web search query generator. Generate 5 optimized search queries for finding a specific product online, focusing on purchase intent in {location}.

Requirements:
1. Generate exactly 5 distinct queries.
2. Purchase intent: include intent keywords such as {intent}.
3. Product clarity: insert the provided product name verbatim.
4. Location: include one of "{geo_terms}" in at least 4 of the 5 queries.
5. Natural phrasing: emulate how local shoppers search; vary structure.
6. Prefer queries that return individual product pages, not category or listing pages.

Output ONLY a JSON array of 5 strings. No surrounding text or comments.
Each query must be a single line with no newline characters."#
    )
}

/// System prompt for geography-hinted query refinement.
pub fn format_refine_system_prompt(market: &Market) -> String {
    let location = location_context(market);
    format!(
        r#"You are a search query optimizer for e-commerce in {location}.

Task: Enhance the given search query to focus on retailers and the local market in {location}.

Guidelines:
1. Add location-specific terms for {location}
2. Include purchase-intent keywords appropriate for the region
3. Keep the original product intent clear
4. Make it natural and search-engine friendly
5. Generate 1-3 enhanced queries

Respond with ONLY a JSON array of enhanced queries, like: ["enhanced query 1", "enhanced query 2"]"#
    )
}

/// System prompt for strict geographic URL validation.
pub fn format_geo_system_prompt(market: &Market) -> String {
    let location = location_context(market);
    let code = market.country().to_lowercase();
    format!(
        r#"You are a STRICT URL classifier for {location} e-commerce validation.

TASK: Return ONLY URLs from {location} domains that serve local customers.

RESPONSE FORMAT: Valid JSON array only. No explanations, no markdown, no additional text.
- If URLs match criteria: ["url1", "url2"]
- If NO URLs match criteria: []
- NEVER return error messages or explanations

STRICT CRITERIA - INCLUDE ONLY if the domain meets ONE of these:
1. Ends with .{code} (like example.{code})
2. Ends with .com.{code} (like example.com.{code})
3. Contains "{code}" directly in the domain name (like {code}shop.com)

EXCLUDE ALL:
- .com domains WITHOUT {code} in the domain name
- Domains from other countries
- International sites (.com, .org, .net) unless the domain name contains "{code}"

Return ONLY the JSON array. If no URLs qualify, return []."#
    )
}

/// User prompt listing the URLs to geo-validate.
pub fn format_geo_user_prompt(market: &Market, query: &str, urls: &[String]) -> String {
    let location = location_context(market);
    let listing = urls
        .iter()
        .map(|u| format!("- {}", u))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Search Query: \"{query}\"\n\nURLs to classify for {location}:\n{listing}\n\nReturn only the JSON array of URLs that serve {location}:"
    )
}

/// System prompt for page-type classification.
pub fn format_classify_system_prompt(market: &Market, product: &str) -> String {
    let location = location_context(market);
    let code = market.country().to_lowercase();
    format!(
        r#"You analyze web page metadata (title, URL, snippet) to classify the page. The user is searching for: "{product}" in {location}.

Geographic requirements:
- Exclude any URL whose domain ends with a country code that is not .{code}
- If the domain is generic (.com, .net, .org), accept only when the URL carries a clear {location} indicator
- If the URL has no local indicator, return page_type "EXCLUDE_NON_LOCAL"

Classification rules:
- "PRODUCT": an individual product page FOR SALE with specific details and purchase options
- "CATEGORY": a listing of multiple products (/productos/, /categoria/, /collections/, listing hosts)
- "BLOG": editorial content about products
- "OTHER": recipes, news, directories, anything else
- Prefer URL patterns over snippet content when they disagree

Respond with a JSON object containing ONLY these fields:
- "page_type": one of "PRODUCT", "CATEGORY", "BLOG", "OTHER", "EXCLUDE_NON_LOCAL"
- "confidence": number from 0.0 to 1.0
- "identified_product_name": (string, OPTIONAL) product name when page_type is "PRODUCT"
- "category_name": (string, OPTIONAL) category name when page_type is "CATEGORY"
- "reasoning": (string, OPTIONAL) one short sentence

Do NOT include comments or any text outside the JSON object."#
    )
}

/// User prompt for classifying one candidate.
pub fn format_classify_user_prompt(candidate: &UrlCandidate, product: &str) -> String {
    format!(
        "Analyze this page for the query '{product}':\nURL: {}\nTitle: {}\nSnippet: {}\nReturn ONLY the JSON object.",
        candidate.url,
        candidate.title.as_deref().unwrap_or(""),
        candidate.snippet.as_deref().unwrap_or(""),
    )
}

/// Prompt for the bulk keep/remove prefilter.
pub fn format_prefilter_prompt(product: &str, urls: &[&UrlCandidate]) -> String {
    let listing = urls
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}: {}", i, c.url))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"The user is shopping for "{product}". Below is a numbered list of URLs.
Decide which URLs could lead to a purchasable product page for this query and which are clearly irrelevant (navigation, unrelated categories, editorial content).

{listing}

Respond with ONLY a JSON object of index lists, like: {{"keep": [0, 2], "remove": [1]}}.
Every index must appear in exactly one list. When unsure, keep the URL."#
    )
}

/// Prompt for price extraction from page content.
pub fn format_price_prompt(product: &str, url: &str, content: &str) -> String {
    format!(
        r#"Extract the price of the product sold on this page. The shopper searched for "{product}".

Page URL: {url}
Page content:
{content}

Respond with ONLY a JSON object:
- "price": number, the current selling price, or null when no price is shown
- "currency": ISO currency code like "UYU" or "USD", or null
- "availability": "in_stock", "out_of_stock", or "unknown"
- "original_text": the exact price text found, or null
- "confidence": number from 0.0 to 1.0

Use the discounted price when both are shown. Never invent a price."#
    )
}

fn location_context(market: &Market) -> String {
    match market.city() {
        Some(city) => format!("city {} in country {}", city, market.country()),
        None => format!("country {}", market.country()),
    }
}

fn country_name(code: &str) -> &'static str {
    match code {
        "UY" => "Uruguay",
        "AR" => "Argentina",
        "BR" => "Brazil",
        "CL" => "Chile",
        "CO" => "Colombia",
        "PE" => "Peru",
        "EC" => "Ecuador",
        "MX" => "Mexico",
        "US" => "the United States",
        "ES" => "Spain",
        _ => "the target market",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_prompt_mentions_market() {
        let market = Market::new("UY", Some("Montevideo")).unwrap();
        let prompt = format_query_system_prompt(&market);
        assert!(prompt.contains("Uruguay"));
        assert!(prompt.contains("Montevideo"));
        assert!(prompt.contains("comprar"));
    }

    #[test]
    fn test_geo_prompt_uses_country_code() {
        let market = Market::default_market();
        let prompt = format_geo_system_prompt(&market);
        assert!(prompt.contains(".com.uy"));
        assert!(prompt.contains("JSON array"));
    }

    #[test]
    fn test_geo_user_prompt_lists_urls() {
        let market = Market::default_market();
        let urls = vec![
            "https://a.com.uy/p/1".to_string(),
            "https://b.com/p/2".to_string(),
        ];
        let prompt = format_geo_user_prompt(&market, "plancha", &urls);
        assert!(prompt.contains("- https://a.com.uy/p/1"));
        assert!(prompt.contains("plancha"));
    }

    #[test]
    fn test_prefilter_prompt_is_indexed() {
        let a = UrlCandidate::from_url("https://a.com.uy/p/1", "q").unwrap();
        let b = UrlCandidate::from_url("https://b.com.uy/p/2", "q").unwrap();
        let prompt = format_prefilter_prompt("plancha", &[&a, &b]);
        assert!(prompt.contains("0: https://a.com.uy/p/1"));
        assert!(prompt.contains("1: https://b.com.uy/p/2"));
        assert!(prompt.contains("\"keep\""));
    }
}
