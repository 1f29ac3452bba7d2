//! In-process cache tier: bounded LRU with a short TTL.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::page::PageContent;

struct TierEntry {
    content: PageContent,
    inserted: Instant,
}

/// Bounded LRU + TTL tier in front of the distributed cache.
///
/// Eviction is tier-local; a full cache drops the least-recently-used
/// entry on insert, and expired entries are dropped on read.
pub struct MemoryTier {
    entries: Mutex<LruCache<String, TierEntry>>,
    ttl: Duration,
}

impl MemoryTier {
    /// Create a tier with an entry bound and TTL.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            ttl,
        }
    }

    /// Default sizing: 500 entries, 5 minutes.
    pub fn with_defaults() -> Self {
        Self::new(500, Duration::from_secs(300))
    }

    /// Get content for a URL, refreshing its recency.
    pub fn get(&self, url: &str) -> Option<PageContent> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(url) {
            Some(entry) if entry.inserted.elapsed() <= self.ttl => Some(entry.content.clone()),
            Some(_) => {
                entries.pop(url);
                None
            }
            None => None,
        }
    }

    /// Insert content for a URL, evicting the LRU entry when full.
    pub fn put(&self, url: &str, content: PageContent) {
        self.entries.lock().unwrap().put(
            url.to_string(),
            TierEntry {
                content,
                inserted: Instant::now(),
            },
        );
    }

    /// Live entry count (expired entries may still be counted until read).
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the tier is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything (for tests or cleanup).
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let tier = MemoryTier::new(10, Duration::from_secs(60));
        tier.put("https://a.com.uy/p/1", PageContent::new("body"));
        assert_eq!(tier.get("https://a.com.uy/p/1").unwrap().text, "body");
        assert!(tier.get("https://a.com.uy/p/2").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let tier = MemoryTier::new(10, Duration::from_millis(0));
        tier.put("u", PageContent::new("body"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(tier.get("u").is_none());
        // Expired entry was removed on read
        assert!(tier.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let tier = MemoryTier::new(2, Duration::from_secs(60));
        tier.put("a", PageContent::new("1"));
        tier.put("b", PageContent::new("2"));
        // Touch "a" so "b" becomes least recently used
        tier.get("a");
        tier.put("c", PageContent::new("3"));

        assert!(tier.get("a").is_some());
        assert!(tier.get("b").is_none());
        assert!(tier.get("c").is_some());
        assert_eq!(tier.len(), 2);
    }
}
