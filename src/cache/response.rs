//! Bounded LRU + TTL cache for successful profile responses.
//!
//! [`ResponseCache`] sits in front of the network path of the
//! [`DataClient`](crate::DataClient). A hit bypasses deduplication, the
//! circuit breaker, authentication and retry entirely.
//!
//! # Semantics
//!
//! - Capacity is bounded; inserting past it evicts the least recently
//!   *accessed* entry (moka with the LRU eviction policy).
//! - TTL is per entry. [`ResponseCache::set`] takes an optional override,
//!   otherwise the configured default applies. Expired entries read as
//!   absent and are dropped on lookup.
//! - Hit/miss counters are exact and kept alongside the `metrics` counters,
//!   so [`CacheMetrics::hit_rate`] is available without a recorder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use moka::policy::EvictionPolicy;

use crate::telemetry;

/// Configuration for the response cache.
///
/// ```rust
/// # use tillit::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(1_000)
///     .ttl(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 500.
    pub max_entries: u64,
    /// Default time-to-live for cached entries. Default: 5 minutes.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            ttl: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the default time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A stored value with its insertion time and lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }
}

/// Exact hit/miss counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0.0 before any lookup.
    pub hit_rate: f64,
    pub entries: u64,
}

/// Per-entry expiry: each entry lives for its own `ttl`, reset on overwrite.
struct EntryExpiry;

impl<V> Expiry<String, CacheEntry<V>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory LRU + TTL response cache.
pub struct ResponseCache<V> {
    cache: Cache<String, CacheEntry<V>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new response cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryExpiry)
            .build();
        Self {
            cache,
            default_ttl: config.ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a value. Returns `None` on miss or expiry.
    pub async fn get(&self, key: &str) -> Option<V> {
        let found = match self.cache.get(key).await {
            Some(entry) if entry.is_expired(Instant::now()) => {
                self.cache.invalidate(key).await;
                None
            }
            Some(entry) => Some(entry.value),
            None => None,
        };
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        }
        found
    }

    /// Insert (or overwrite) a value. `ttl` overrides the configured default.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        self.cache.insert(key.to_owned(), entry).await;
        // Apply pending reads/writes so the capacity bound holds on return.
        self.cache.run_pending_tasks().await;
    }

    /// Remove a single entry.
    pub async fn delete(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Remove every entry. Hit/miss counters are kept.
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Whether `key` holds a live entry. Does not touch hit/miss counters.
    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Number of live entries.
    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Exact hit/miss counts and hit rate.
    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheMetrics {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            entries: self.cache.entry_count(),
        }
    }

    /// The TTL applied when `set` receives no override.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hit_rate_is_zero_without_lookups() {
        let cache: ResponseCache<u32> = ResponseCache::new(&CacheConfig::default());
        let m = cache.metrics();
        assert_eq!(m.hits, 0);
        assert_eq!(m.misses, 0);
        assert_eq!(m.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn counts_hits_and_misses() {
        let cache = ResponseCache::new(&CacheConfig::default());
        cache.set("a", 1u32, None).await;
        assert_eq!(cache.get("a").await, Some(1));
        assert_eq!(cache.get("b").await, None);
        assert_eq!(cache.get("a").await, Some(1));
        let m = cache.metrics();
        assert_eq!(m.hits, 2);
        assert_eq!(m.misses, 1);
        assert!((m.hit_rate - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn entry_expiry_is_inclusive_of_ttl() {
        let stored_at = Instant::now();
        let entry = CacheEntry {
            value: (),
            stored_at,
            ttl: Duration::from_secs(1),
        };
        assert!(!entry.is_expired(stored_at));
        assert!(entry.is_expired(stored_at + Duration::from_secs(1)));
    }
}
