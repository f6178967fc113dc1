//! In-memory TTL cache of resolution outcomes.
//!
//! Keyed by the normalized query. Both successes and failures are stored and
//! every `put` overwrites whatever was there. Expired entries are treated as
//! absent and evicted lazily on lookup, or in bulk by
//! [`evict_expired`](CoverCache::evict_expired).
//!
//! Timestamps use `tokio::time::Instant` so paused-clock tests can advance
//! past the TTL without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::{CoverResult, ProviderName};

/// Default time-to-live for cache entries: 5 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug)]
struct CacheEntry {
    result: CoverResult,
    /// Winning provider, present only on success.
    source: Option<ProviderName>,
    recorded_at: Instant,
}

/// A live cache hit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedCover {
    pub result: CoverResult,
    pub source: Option<ProviderName>,
    pub age: Duration,
}

pub struct CoverCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for CoverCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl CoverCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `query`. Returns `None` if absent or older than the TTL.
    pub fn get(&self, query: &str) -> Option<CachedCover> {
        // Clone out so the shard guard is released before any removal.
        let entry = self.entries.get(query).map(|e| e.value().clone());

        let Some(entry) = entry else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let age = entry.recorded_at.elapsed();
        if age > self.ttl {
            self.entries
                .remove_if(query, |_, e| e.recorded_at.elapsed() > self.ttl);
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(query = %query, age_secs = age.as_secs(), "cache entry expired");
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(CachedCover {
            result: entry.result,
            source: entry.source,
            age,
        })
    }

    /// Record the outcome for `query`, replacing any previous entry.
    ///
    /// `source` is dropped for failures.
    pub fn put(&self, query: &str, result: CoverResult, source: Option<ProviderName>) {
        let source = if result.is_success() { source } else { None };
        self.entries.insert(
            query.to_string(),
            CacheEntry {
                result,
                source,
                recorded_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.recorded_at.elapsed() <= self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cache misses (including expired entries) since creation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CoverCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FailureKind, Miss};

    const QUERY: &str = "窗边的小豆豆 黑柳彻子";

    fn found() -> CoverResult {
        CoverResult::success("http://img3.douban.com/x.jpg")
    }

    #[test]
    fn miss_on_empty() {
        let cache = CoverCache::default();
        assert!(cache.get(QUERY).is_none());
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hit_within_ttl() {
        let cache = CoverCache::default();
        cache.put(QUERY, found(), Some(ProviderName::Douban));

        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        let hit = cache.get(QUERY).unwrap();
        assert_eq!(hit.result, found());
        assert_eq!(hit.source, Some(ProviderName::Douban));
        assert_eq!(hit.age, Duration::from_secs(4 * 60));
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_absent_and_evicted() {
        let cache = CoverCache::default();
        cache.put(QUERY, found(), Some(ProviderName::Douban));

        tokio::time::advance(DEFAULT_TTL).await;
        // exactly at the TTL still counts as fresh
        assert!(cache.get(QUERY).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(QUERY).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn put_overwrites_and_drops_failure_source() {
        let cache = CoverCache::default();
        cache.put(QUERY, found(), Some(ProviderName::Jd));

        let failure = CoverResult::failure(FailureKind::Timeout, "openlibrary request failed");
        cache.put(QUERY, failure.clone(), Some(ProviderName::OpenLibrary));

        let hit = cache.get(QUERY).unwrap();
        assert_eq!(hit.result, failure);
        assert_eq!(hit.source, None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_expired_keeps_fresh_entries() {
        let cache = CoverCache::new(Duration::from_secs(60));
        cache.put("old", CoverResult::not_found(Miss::NoBook), None);
        tokio::time::advance(Duration::from_secs(45)).await;
        cache.put("new", found(), Some(ProviderName::Dangdang));
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.get("new").is_some());
        assert!(cache.get("old").is_none());
    }
}
