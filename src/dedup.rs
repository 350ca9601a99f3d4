//! In-flight request deduplication.
//!
//! [`RequestDeduplicator`] collapses concurrent calls that share a key into
//! one execution of the underlying future. The first caller's factory runs;
//! every later caller with the same key awaits a clone of the same
//! [`Shared`] future and receives an identical result.
//!
//! Entries are removed once the future settles (success or failure alike)
//! or panics. Entries whose awaiters all went away never settle, so each
//! call also sweeps anything older than the safety TTL, and
//! [`RequestDeduplicator::clear`] drops everything on cancellation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::telemetry;

/// Default lifetime of an in-flight entry before the safety sweep drops it.
pub const DEFAULT_INFLIGHT_TTL: Duration = Duration::from_secs(300);

struct InFlight<T> {
    id: u64,
    future: Shared<BoxFuture<'static, T>>,
    created_at: Instant,
}

/// Table of in-flight requests keyed by cache key.
pub struct RequestDeduplicator<T> {
    inflight: Mutex<HashMap<String, InFlight<T>>>,
    ttl: Duration,
    next_id: AtomicU64,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a deduplicator with the default safety TTL (5 minutes).
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_INFLIGHT_TTL)
    }

    /// Create a deduplicator with a custom safety TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            ttl,
            next_id: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, InFlight<T>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `factory` for `key` unless an identical request is already in flight.
    ///
    /// The lookup and insert happen under one lock acquisition with no await
    /// in between, so two callers can never both start the factory.
    pub async fn dedupe<F, Fut>(&self, key: &str, factory: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (id, future) = {
            let mut inflight = self.lock();
            let now = Instant::now();
            self.sweep_locked(&mut inflight, now);

            match inflight.get(key) {
                Some(entry) => {
                    metrics::counter!(telemetry::DEDUP_JOINS_TOTAL).increment(1);
                    debug!(key, "joining in-flight request");
                    (entry.id, entry.future.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = factory().boxed().shared();
                    inflight.insert(
                        key.to_owned(),
                        InFlight {
                            id,
                            future: future.clone(),
                            created_at: now,
                        },
                    );
                    (id, future)
                }
            }
        };

        let _unwind = RemoveOnPanic {
            table: self,
            key,
            id,
        };
        let output = future.await;
        self.remove_if_current(key, id);
        output
    }

    // Only remove the entry we awaited; a newer request may own the key now.
    fn remove_if_current(&self, key: &str, id: u64) {
        let mut inflight = self.lock();
        if inflight.get(key).is_some_and(|entry| entry.id == id) {
            inflight.remove(key);
        }
    }

    fn sweep_locked(&self, inflight: &mut HashMap<String, InFlight<T>>, now: Instant) -> usize {
        let before = inflight.len();
        inflight.retain(|key, entry| {
            let keep = now.saturating_duration_since(entry.created_at) < self.ttl;
            if !keep {
                warn!(key = key.as_str(), "dropping stale in-flight request");
            }
            keep
        });
        before - inflight.len()
    }

    /// Drop entries older than the safety TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut inflight = self.lock();
        self.sweep_locked(&mut inflight, Instant::now())
    }

    /// Drop every entry. Returns how many were removed.
    ///
    /// Callers already awaiting a dropped entry keep their future; new
    /// callers start fresh.
    pub fn clear(&self) -> usize {
        let mut inflight = self.lock();
        let n = inflight.len();
        inflight.clear();
        n
    }

    /// Whether a request for `key` is currently in flight.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of live in-flight entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A panicking request must not stay in the table: every later joiner would
// re-panic on the poisoned `Shared` until the sweep caught up.
struct RemoveOnPanic<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    table: &'a RequestDeduplicator<T>,
    key: &'a str,
    id: u64,
}

impl<T> Drop for RemoveOnPanic<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(key = self.key, "in-flight request panicked, dropping entry");
            self.table.remove_if_current(self.key, self.id);
        }
    }
}

impl<T> Default for RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
