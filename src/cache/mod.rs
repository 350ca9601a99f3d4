//! Caching subsystem.
//!
//! - [`key::CacheKey`]: order-independent key derived from lookup
//!   parameters, shared by the cache and the request deduplicator.
//!
//! - [`response::ResponseCache`]: bounded LRU + TTL store for successful
//!   profile responses, with exact hit/miss accounting.

pub mod key;
pub mod response;

pub use key::CacheKey;
pub use response::{CacheConfig, CacheEntry, CacheMetrics, ResponseCache};
