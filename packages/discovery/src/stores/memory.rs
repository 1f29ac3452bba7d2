//! In-memory storage implementations for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::{DiscoveryError, Result};
use crate::traits::store::{KeyValueCache, PageRepository};
use crate::types::page::CachedPage;

/// In-memory key-value cache with TTL.
///
/// Stands in for the distributed cache in tests and single-node
/// deployments. Not suitable for production sharing across processes.
#[derive(Default)]
pub struct MemoryKeyValueCache {
    entries: RwLock<HashMap<String, (String, Instant, Duration)>>,
    unhealthy: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryKeyValueCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend (for tests).
    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    /// Simulate write failures (for tests).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .unwrap()
            .values()
            .filter(|(_, inserted, ttl)| now.duration_since(*inserted) <= *ttl)
            .count()
    }

    /// Whether the cache holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueCache for MemoryKeyValueCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Storage("key-value backend unreachable".into()));
        }
        let mut entries = self.entries.write().unwrap();
        match entries.get(key) {
            Some((value, inserted, ttl)) => {
                if inserted.elapsed() > *ttl {
                    entries.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(value.clone()))
                }
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        if self.unhealthy.load(Ordering::SeqCst) || self.fail_writes.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Storage("key-value backend unreachable".into()));
        }
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), Instant::now(), ttl));
        Ok(())
    }

    async fn health_check(&self) -> bool {
        !self.unhealthy.load(Ordering::SeqCst)
    }
}

/// In-memory page repository.
#[derive(Default)]
pub struct MemoryPageRepository {
    pages: RwLock<HashMap<String, CachedPage>>,
}

impl MemoryPageRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load a page (for tests).
    pub fn with_page(self, page: CachedPage) -> Self {
        self.pages.write().unwrap().insert(page.url.clone(), page);
        self
    }
}

#[async_trait]
impl PageRepository for MemoryPageRepository {
    async fn get_by_url(&self, url: &str) -> Result<Option<CachedPage>> {
        Ok(self.pages.read().unwrap().get(url).cloned())
    }

    async fn upsert(&self, page: &CachedPage) -> Result<()> {
        self.pages
            .write()
            .unwrap()
            .insert(page.url.clone(), page.clone());
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.pages.read().unwrap().len())
    }
}
