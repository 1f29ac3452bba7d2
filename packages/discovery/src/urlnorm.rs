//! URL sanitation and normalization for e-commerce candidates.
//!
//! Search snippets produce malformed URLs (breadcrumb glyphs, concatenated
//! protocols, garbage suffixes after a valid TLD), and marketplaces hide
//! the same page behind tracking parameters and case variants. Everything
//! downstream keys on the normalized form produced here.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Characters that indicate a malformed/concatenated URL (from breadcrumbs
/// in search result snippets).
const BREADCRUMB_CHARS: [char; 6] = ['›', '‹', '»', '«', '\u{203a}', '\u{2039}'];

/// Query parameters that never change page identity.
const TRACKING_PARAMS: [&str; 10] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
    "msclkid",
    "ref",
    "mc_cid",
];

static TRAILING_GARBAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\-._~:/?#\[\]@!$&'()*+,;=%]+$").unwrap());

static MALFORMED_TLD: Lazy<Regex> = Lazy::new(|| {
    // Catches garbage appended after a valid TLD, e.g. "tata.com.uy.Visit"
    Regex::new(r"(\.(?:com\.[a-z]{2}|gub\.uy|gob\.[a-z]{2}|org\.[a-z]{2}|edu\.[a-z]{2}|net\.[a-z]{2}|[a-z]{2,3}))(\.[A-Z][a-zA-Z]+)(?:/|$)").unwrap()
});

static NUMERIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d{6,}").unwrap());

static HREF_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)href=["']([^"']+)["']"#).unwrap());
static DATA_HREF_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)data-(?:href|url)=["']([^"']+)["']"#).unwrap());
static JS_LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:window\.location|location\.href)\s*=\s*["']([^"']+)["']"#).unwrap()
});

/// Sanitize a raw URL harvested from search results or page markup.
///
/// Handles breadcrumb glyphs, duplicated protocol segments, trailing
/// garbage, trailing dots, and malformed TLD suffixes. Returns `None`
/// when nothing URL-shaped survives.
pub fn sanitize_url(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }

    let mut url = raw.to_string();

    // Take only the part before any breadcrumb character
    if url.contains(BREADCRUMB_CHARS) {
        debug!("URL contains breadcrumb chars, sanitizing: {}", &url[..url.len().min(100)]);
        for ch in BREADCRUMB_CHARS {
            if let Some(idx) = url.find(ch) {
                url.truncate(idx);
            }
        }
    }
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return None;
    }

    // Concatenated URLs: keep the first protocol segment
    let ascii_lower = url.to_ascii_lowercase();
    let http = ascii_lower[1..].find("http://");
    let https = ascii_lower[1..].find("https://");
    let second = match (http, https) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    if let Some(idx) = second {
        url.truncate(idx + 1);
    }

    // Trailing garbage and trailing dots
    url = TRAILING_GARBAGE.replace(&url, "").to_string();
    url = url.trim_end_matches('.').to_string();

    // Garbage appended after a valid TLD, e.g. "tata.com.uy.Visit"
    if let Some(caps) = MALFORMED_TLD.captures(&url) {
        let garbage = caps.get(2).unwrap().as_str().to_string();
        url = url.replacen(&garbage, "", 1);
        debug!("Removed malformed TLD extension: {}", garbage);
    }

    let parsed = Url::parse(&url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    if !host.contains('.') || host.ends_with('.') || host.contains("..") {
        return None;
    }

    // TLDs are short and alphabetic; tolerate second-level country domains
    let parts: Vec<&str> = host.split('.').collect();
    let last = parts.last().unwrap();
    if last.len() > 10 || !last.chars().all(|c| c.is_ascii_alphabetic()) {
        if parts.len() < 2 || parts[parts.len() - 2].len() > 10 {
            return None;
        }
    }

    Some(url)
}

/// Normalize a URL for deduplication.
///
/// Lowercases scheme and host, strips tracking parameters and fragments,
/// and removes the trailing slash (except for the root path). Two URLs
/// with the same normalized form are the same candidate.
pub fn normalize_for_dedup(raw: &str) -> Option<String> {
    let mut parsed = Url::parse(raw).ok()?;
    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        parsed.set_query(Some(&query));
    }

    let host = parsed.host_str()?.to_lowercase();
    parsed.set_host(Some(&host)).ok()?;

    let mut out = parsed.to_string();
    // Url always keeps "/" for the root; only strip deeper trailing slashes
    if out.ends_with('/') && parsed.path() != "/" {
        out.pop();
    }
    Some(out)
}

/// Extract the lowercased domain of a URL, if parseable.
pub fn domain_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Detect and remove duplicated path segments.
///
/// `…/electrodomesticos/orden-y-limpieza/electrodomesticos/orden-y-limpieza/planchas`
/// becomes `…/electrodomesticos/orden-y-limpieza/planchas`. Crawlers hit
/// these loops on misconfigured storefront routers.
pub fn remove_duplicated_path_segments(raw: &str) -> String {
    let parsed = match Url::parse(raw) {
        Ok(p) => p,
        Err(_) => return raw.to_string(),
    };
    let path = parsed.path();
    if path.is_empty() || path == "/" {
        return raw.to_string();
    }

    let mut segments: Vec<String> = path.split('/').filter(|s| !s.is_empty()).map(String::from).collect();
    if segments.len() < 2 {
        return raw.to_string();
    }
    let original = segments.clone();

    // Pass 1: repeating multi-segment patterns (lengths 2..=4)
    'patterns: for pattern_len in 2..=(segments.len() / 2).min(4) {
        let mut rebuilt: Vec<String> = Vec::with_capacity(segments.len());
        let mut i = 0;
        let mut found = false;
        while i < segments.len() {
            if rebuilt.len() >= pattern_len && i + pattern_len <= segments.len() {
                let prev = &rebuilt[rebuilt.len() - pattern_len..];
                let cur = &segments[i..i + pattern_len];
                if prev == cur {
                    i += pattern_len;
                    found = true;
                    continue;
                }
            }
            rebuilt.push(segments[i].clone());
            i += 1;
        }
        if found {
            segments = rebuilt;
            break 'patterns;
        }
    }

    // Pass 2: single segments repeating anywhere (/a/b/a -> /a/b)
    let mut seen: HashSet<String> = HashSet::new();
    let mut deduped: Vec<String> = Vec::with_capacity(segments.len());
    for seg in segments {
        if seen.contains(&seg) {
            debug!("Removing duplicate path segment: {}", seg);
            continue;
        }
        seen.insert(seg.clone());
        deduped.push(seg);
    }

    if deduped == original {
        return raw.to_string();
    }

    let mut new_path = format!("/{}", deduped.join("/"));
    if path.ends_with('/') {
        new_path.push('/');
    }
    let mut out = parsed.clone();
    out.set_path(&new_path);
    let out = out.to_string();
    debug!("Removed duplicated path segments: {} -> {}", raw, out);
    out
}

/// Tokens that mark a URL as navigation, search, auth, legal, social, or
/// cart — never an individual product page.
pub const DENY_TOKENS: &[&str] = &[
    "/search",
    "/busca",
    "/resultados",
    "/results",
    "/category/",
    "/categories/",
    "/collections/",
    "/collection/",
    "/list/",
    "/filtros",
    "/filters",
    "/ordenar",
    "/sort",
    "javascript:",
    "mailto:",
    "/account",
    "/login",
    "/register",
    "/contact",
    "/about",
    "/politica",
    "/terminos",
    "/help",
    "/ayuda",
    "/cart",
    "/checkout",
    "/wishlist",
    "wikipedia.org",
    "/blog/",
    "/noticias/",
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "youtube.com",
    "pinterest.",
];

/// File extensions that can never be a product page.
pub const STATIC_EXTENSIONS: &[&str] = &[
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".zip", ".doc", ".docx", ".xml", ".css",
    ".js",
];

/// Strong product-URL indicators, platform-agnostic.
pub const PRODUCT_TOKENS: &[&str] = &[
    "/p/",
    "/product/",
    "/producto/",
    "/products/",
    "/item/",
    "/sku/",
    "/prod/",
    "/articulo/",
    "/art/",
    "/dp/",
    "/gp/product/",
    "/i/",
    ".producto",
];

/// Query-string tokens that indicate pagination or on-site search.
const PAGINATION_TOKENS: [&str; 7] = [
    "?page=", "&page=", "?q=", "&q=", "?search=", "?sort=", "&sort=",
];

/// Determine if a URL is likely an individual product page from its shape.
pub fn is_likely_product_url(url: &str, query_terms: Option<&[String]>) -> bool {
    let u = url.to_lowercase();

    if DENY_TOKENS.iter().any(|bad| u.contains(bad)) {
        return false;
    }
    if u.contains('#') {
        return false;
    }
    if PAGINATION_TOKENS.iter().any(|t| u.contains(t)) {
        return false;
    }

    if PRODUCT_TOKENS.iter().any(|t| u.contains(t)) {
        return true;
    }
    // VTEX-style product URLs end with '/p'
    if u.trim_end_matches('/').ends_with("/p") {
        return true;
    }
    // 6+ digit numbers usually identify a product
    if NUMERIC_ID.is_match(&u) {
        return true;
    }

    // Query-relevant URL with deep structure
    if let Some(terms) = query_terms {
        let lowered: Vec<String> = terms
            .iter()
            .filter(|t| t.len() > 2)
            .map(|t| t.to_lowercase())
            .collect();
        if lowered.iter().any(|t| u.contains(t.as_str())) && u.split('/').count() >= 4 {
            return true;
        }
    }

    // Deep paths with meaningful segments often lead to specific items
    if u.split('/').count() >= 5 {
        let meaningful = u
            .split('/')
            .skip(3)
            .filter(|s| s.len() > 2 && !s.chars().all(|c| c.is_ascii_digit()))
            .count();
        if meaningful >= 2 {
            return true;
        }
    }

    false
}

/// Check whether a URL is relevant to the search query.
///
/// Filters sibling category links that share the domain but not the
/// product (searching "plancha vapor" should not keep "/aspiradoras").
pub fn url_matches_query(url: &str, query_terms: Option<&[String]>) -> bool {
    let terms = match query_terms {
        Some(t) => t,
        None => return true,
    };
    let url_lower = url.to_lowercase();
    let normalized: Vec<String> = terms
        .iter()
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect();
    if normalized.is_empty() {
        return true;
    }

    if normalized.iter().any(|t| url_lower.contains(t.as_str())) {
        return true;
    }

    // Stem-ish matching: "plancha" matches "planchas", and vice versa
    let segments: Vec<&str> = url_lower.split('/').filter(|s| s.len() > 2).collect();
    for term in &normalized {
        for segment in &segments {
            if segment.starts_with(term.as_str()) {
                return true;
            }
            if segment.len() >= 4 && term.starts_with(segment) {
                return true;
            }
        }
    }

    debug!("Filtered out URL not matching query terms {:?}: {}", normalized, url);
    false
}

/// Extract links from raw HTML, including JS-heavy patterns crawlers miss.
///
/// Picks up `href`, `data-href`/`data-url`, and `location.href` targets;
/// relative links are resolved against `base_url`.
pub fn extract_links_from_html(html: &str, base_url: &str) -> Vec<String> {
    if html.is_empty() {
        return Vec::new();
    }
    let base = Url::parse(base_url).ok();

    let mut links = Vec::new();
    let matches = HREF_ATTR
        .captures_iter(html)
        .chain(DATA_HREF_ATTR.captures_iter(html))
        .chain(JS_LOCATION.captures_iter(html));

    for caps in matches {
        let target = &caps[1];
        if target.starts_with('#') || target.starts_with("javascript:") {
            continue;
        }
        if target.starts_with("http") {
            links.push(target.to_string());
        } else if let Some(base) = &base {
            if let Ok(joined) = base.join(target) {
                links.push(joined.to_string());
            }
        }
    }

    debug!("Extracted {} links from HTML content", links.len());
    links
}

/// Return true for MercadoLibre listing/search/category pages.
pub fn is_marketplace_listing_url(url: &str) -> bool {
    let parsed = match Url::parse(&url.to_lowercase()) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let host = parsed.host_str().unwrap_or("");
    if host.starts_with("listado.mercadolibre.") {
        return true;
    }
    if host == "www.mercadolibre.com.uy" || host == "mercadolibre.com.uy" {
        let path = parsed.path();
        if path.starts_with("/listado") || path.contains("/listado/") || path.contains("/c/") {
            return true;
        }
    }
    false
}

/// Return true for MercadoLibre single-product pages.
pub fn is_marketplace_product_url(url: &str) -> bool {
    let lowered = url.to_lowercase();
    let parsed = match Url::parse(&lowered) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let host = parsed.host_str().unwrap_or("");
    if host.ends_with("mercadolibre.com.uy") && parsed.path().contains("/p/") && parsed.path().contains("mlu") {
        return true;
    }
    if host.starts_with("articulo.mercadolibre.") && parsed.path().starts_with("/mlu-") {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_breadcrumb_chars() {
        let cleaned = sanitize_url("https://store.com.uy/product › category").unwrap();
        assert_eq!(cleaned, "https://store.com.uy/product");
    }

    #[test]
    fn test_sanitize_duplicate_protocol() {
        let cleaned =
            sanitize_url("https://a.com.uy/xhttps://b.com.uy/y").unwrap();
        assert_eq!(cleaned, "https://a.com.uy/x");
    }

    #[test]
    fn test_sanitize_malformed_tld() {
        let cleaned = sanitize_url("https://tata.com.uy.Visit/ofertas").unwrap();
        assert_eq!(cleaned, "https://tata.com.uy/ofertas");
    }

    #[test]
    fn test_sanitize_rejects_garbage() {
        assert!(sanitize_url("not a url").is_none());
        assert!(sanitize_url("ftp://store.com.uy/x").is_none());
        assert!(sanitize_url("").is_none());
    }

    #[test]
    fn test_normalize_strips_tracking_and_fragment() {
        let n = normalize_for_dedup(
            "HTTPS://Store.COM.UY/p/123?utm_source=news&color=red#top",
        )
        .unwrap();
        assert_eq!(n, "https://store.com.uy/p/123?color=red");
    }

    #[test]
    fn test_normalize_trailing_slash() {
        let a = normalize_for_dedup("https://store.com.uy/p/123/").unwrap();
        let b = normalize_for_dedup("https://store.com.uy/p/123").unwrap();
        assert_eq!(a, b);
        // Root slash survives
        let root = normalize_for_dedup("https://store.com.uy/").unwrap();
        assert!(root.ends_with('/'));
    }

    #[test]
    fn test_remove_duplicated_segments_pattern() {
        let out = remove_duplicated_path_segments(
            "https://loi.com.uy/electrodomesticos/orden-y-limpieza/electrodomesticos/orden-y-limpieza/planchas",
        );
        assert_eq!(
            out,
            "https://loi.com.uy/electrodomesticos/orden-y-limpieza/planchas"
        );
    }

    #[test]
    fn test_remove_duplicated_single_segment() {
        let out = remove_duplicated_path_segments(
            "https://loi.com.uy/electrodomesticos/orden-y-limpieza/electrodomesticos",
        );
        assert_eq!(out, "https://loi.com.uy/electrodomesticos/orden-y-limpieza");
    }

    #[test]
    fn test_likely_product_url() {
        assert!(is_likely_product_url("https://store.com.uy/producto/123", None));
        assert!(is_likely_product_url("https://store.com.uy/plancha-philips/p", None));
        assert!(is_likely_product_url("https://store.com.uy/item/9876543", None));
        assert!(!is_likely_product_url("https://store.com.uy/category/shoes", None));
        assert!(!is_likely_product_url("https://store.com.uy/busca?q=plancha", None));
        assert!(!is_likely_product_url("https://store.com.uy/cart", None));
    }

    #[test]
    fn test_url_matches_query_stems() {
        let terms = vec!["plancha".to_string(), "vapor".to_string()];
        assert!(url_matches_query("https://store.com/planchas/vapor", Some(&terms)));
        assert!(!url_matches_query("https://store.com/aspiradoras", Some(&terms)));
        assert!(url_matches_query("https://store.com/anything", None));
    }

    #[test]
    fn test_extract_links() {
        let html = r##"
            <a href="/p/123">one</a>
            <div data-href="https://other.com.uy/p/9">two</div>
            <script>window.location = "/promo/x";</script>
            <a href="#section">skip</a>
        "##;
        let links = extract_links_from_html(html, "https://store.com.uy/cat");
        assert!(links.contains(&"https://store.com.uy/p/123".to_string()));
        assert!(links.contains(&"https://other.com.uy/p/9".to_string()));
        assert!(links.contains(&"https://store.com.uy/promo/x".to_string()));
        assert_eq!(links.len(), 3);
    }

    #[test]
    fn test_marketplace_overrides() {
        assert!(is_marketplace_listing_url(
            "https://listado.mercadolibre.com.uy/plancha-vapor"
        ));
        assert!(is_marketplace_product_url(
            "https://articulo.mercadolibre.com.uy/MLU-123456789-plancha"
        ));
        assert!(is_marketplace_product_url(
            "https://www.mercadolibre.com.uy/plancha/p/MLU19582"
        ));
        assert!(!is_marketplace_product_url(
            "https://listado.mercadolibre.com.uy/planchas"
        ));
    }
}
