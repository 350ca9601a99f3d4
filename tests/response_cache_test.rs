//! Tests for [`ResponseCache`]: LRU + per-entry TTL store for profile responses.

use std::time::Duration;

use tillit::cache::{CacheConfig, CacheKey, ResponseCache};

// =========================================================================
// CacheConfig
// =========================================================================

#[test]
fn cache_config_defaults() {
    let config = CacheConfig::default();
    assert_eq!(config.max_entries, 500);
    assert_eq!(config.ttl, Duration::from_secs(300));
}

#[test]
fn cache_config_builder() {
    let config = CacheConfig::new()
        .max_entries(50)
        .ttl(Duration::from_secs(60));
    assert_eq!(config.max_entries, 50);
    assert_eq!(config.ttl, Duration::from_secs(60));
}

// =========================================================================
// Get / set
// =========================================================================

#[tokio::test]
async fn miss_then_hit() {
    let cache = ResponseCache::new(&CacheConfig::default());

    assert!(cache.get("k").await.is_none());
    cache.set("k", "value".to_string(), None).await;
    assert_eq!(cache.get("k").await.as_deref(), Some("value"));

    let m = cache.metrics();
    assert_eq!(m.hits, 1);
    assert_eq!(m.misses, 1);
    assert_eq!(m.hit_rate, 0.5);
}

#[tokio::test]
async fn overwrite_replaces_value() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.set("k", 1u32, None).await;
    cache.set("k", 2u32, None).await;
    assert_eq!(cache.get("k").await, Some(2));
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn keys_from_reordered_params_share_an_entry() {
    let cache = ResponseCache::new(&CacheConfig::default());
    let a = CacheKey::from_params([("phoneHash", "abc"), ("orderId", "1001")]);
    let b = CacheKey::from_params([("orderId", "1001"), ("phoneHash", "abc")]);

    cache.set(a.as_str(), 7u32, None).await;
    assert_eq!(cache.get(b.as_str()).await, Some(7));
}

// =========================================================================
// Expiry
// =========================================================================

#[tokio::test]
async fn entry_expires_after_default_ttl() {
    let cache = ResponseCache::new(&CacheConfig::new().ttl(Duration::from_millis(50)));
    cache.set("k", 1u32, None).await;
    assert_eq!(cache.get("k").await, Some(1));

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(cache.get("k").await.is_none());
}

#[tokio::test]
async fn per_entry_ttl_overrides_default() {
    let cache = ResponseCache::new(&CacheConfig::new().ttl(Duration::from_secs(300)));
    cache.set("short", 1u32, Some(Duration::from_millis(50))).await;
    cache.set("long", 2u32, None).await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(cache.get("short").await.is_none());
    assert_eq!(cache.get("long").await, Some(2));
}

#[tokio::test]
async fn overwrite_resets_ttl() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.set("k", 1u32, Some(Duration::from_millis(50))).await;
    cache.set("k", 2u32, Some(Duration::from_secs(60))).await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(cache.get("k").await, Some(2));
}

// =========================================================================
// Capacity
// =========================================================================

#[tokio::test]
async fn capacity_is_bounded() {
    let cache = ResponseCache::new(&CacheConfig::new().max_entries(3));
    for i in 0..10u32 {
        cache.set(&format!("k{i}"), i, None).await;
    }
    assert!(cache.len().await <= 3);
}

#[tokio::test]
async fn least_recently_accessed_entry_is_evicted() {
    let cache = ResponseCache::new(&CacheConfig::new().max_entries(2));
    cache.set("a", 1u32, None).await;
    cache.set("b", 2u32, None).await;

    // Touch "a" so "b" becomes the eviction candidate.
    assert_eq!(cache.get("a").await, Some(1));
    cache.set("c", 3u32, None).await;

    assert_eq!(cache.get("a").await, Some(1));
    assert_eq!(cache.get("c").await, Some(3));
    assert!(cache.get("b").await.is_none());
}

// =========================================================================
// Delete / clear
// =========================================================================

#[tokio::test]
async fn delete_removes_single_entry() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.set("a", 1u32, None).await;
    cache.set("b", 2u32, None).await;

    cache.delete("a").await;
    assert!(cache.get("a").await.is_none());
    assert_eq!(cache.get("b").await, Some(2));
}

#[tokio::test]
async fn clear_removes_everything_but_keeps_counters() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.set("a", 1u32, None).await;
    cache.set("b", 2u32, None).await;
    assert_eq!(cache.get("a").await, Some(1));

    cache.clear().await;
    assert!(cache.is_empty().await);
    assert!(!cache.contains("a"));
    assert_eq!(cache.metrics().hits, 1);
}
