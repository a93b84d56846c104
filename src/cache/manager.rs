// Response cache - stale-while-revalidate over the TTL store
// Author: kelexine (https://github.com/kelexine)

use crate::cache::models::{
    CacheConfig, CacheLookup, CacheStats, ErrorCallback, FetchOptions, SweepReport,
};
use crate::cache::ttl::TtlCache;
use crate::error::Result;
use crate::utils::clock::{Clock, SystemClock};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Response cache with stale-while-revalidate refresh and a periodic sweep.
///
/// Values are stored as `Arc<T>`, so repeated hits hand out the same
/// allocation. The cache owns two kinds of background work: the sweep task
/// started by [`ApiCache::new`] and detached refreshes started by stale hits.
/// [`ApiCache::dispose`] (or dropping the cache) stops both.
pub struct ApiCache<T> {
    shared: Arc<Shared<T>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<T> {
    store: Mutex<TtlCache<String, Arc<T>>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    revalidations: AtomicU64,
    evictions: AtomicU64,
    /// Keys with a background refresh in flight.
    refreshing: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

impl<T> ApiCache<T>
where
    T: Send + Sync + 'static,
{
    /// Create a cache and start its sweep task. Must be called inside a Tokio runtime.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let store = TtlCache::with_clock(config.default_ttl(), clock);
        let shared = Arc::new(Shared {
            store: Mutex::new(store),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            revalidations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            refreshing: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        });

        let sweeper = spawn_sweeper(Arc::downgrade(&shared), shared.shutdown.clone());

        Self {
            shared,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Return the cached value for `key`, calling `fetcher` on a miss.
    ///
    /// - Fresh hit: the cached value, no fetch.
    /// - Stale hit: the cached value; a detached refresh replaces the entry
    ///   later. Its failure only reaches `options.on_error`.
    /// - Miss: `fetcher` runs in the caller's task and its error propagates.
    pub async fn fetch_with_cache<F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: FetchOptions,
    ) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !options.force_refresh {
            match self.lookup(key) {
                CacheLookup::Fresh(value) => return Ok(value),
                CacheLookup::Stale(value) => {
                    let revalidate = options
                        .stale_while_revalidate
                        .unwrap_or(self.shared.config.stale_while_revalidate);
                    if revalidate {
                        self.revalidate(key, fetcher, options.ttl, options.on_error);
                    }
                    return Ok(value);
                }
                CacheLookup::Absent => {}
            }
        }

        debug!("Fetching {} from origin", key);
        let value = fetcher().await?;
        Ok(self.shared.insert(key, value, options.ttl))
    }

    /// Look up `key`, counting a hit or a miss. Expired entries are removed.
    pub fn lookup(&self, key: &str) -> CacheLookup<T> {
        let result = {
            let mut store = self.shared.store.lock();
            let now = store.now_ms();
            let stale = store
                .peek(key)
                .map(|entry| entry.is_stale_at(now, self.shared.config.stale_ratio));
            match (store.get(key).cloned(), stale) {
                (Some(value), Some(true)) => CacheLookup::Stale(value),
                (Some(value), _) => CacheLookup::Fresh(value),
                (None, Some(_)) => {
                    crate::metrics::record_cache_operation("expired");
                    CacheLookup::Absent
                }
                (None, None) => CacheLookup::Absent,
            }
        };

        match &result {
            CacheLookup::Fresh(_) => {
                self.shared.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_operation("hit");
                debug!("Cache hit: {}", key);
            }
            CacheLookup::Stale(_) => {
                self.shared.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_operation("stale_hit");
                debug!("Stale cache hit: {}", key);
            }
            CacheLookup::Absent => {
                self.shared.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_operation("miss");
                debug!("Cache miss: {}", key);
            }
        }
        result
    }

    /// Store a value directly, returning the shared handle now held by the cache.
    pub fn set(&self, key: &str, value: T, ttl: Option<Duration>) -> Arc<T> {
        self.shared.insert(key, value, ttl)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.shared.store.lock().delete(key);
        if removed {
            debug!("Invalidated cache key {}", key);
        }
        removed
    }

    /// Drop every key starting with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let removed = self
            .shared
            .store
            .lock()
            .delete_where(|key| key.starts_with(prefix));
        debug!("Invalidated {} cache keys under {}", removed, prefix);
        removed
    }

    pub fn clear(&self) {
        self.shared.store.lock().clear();
        debug!("Cache cleared");
    }

    /// Run one sweep pass now: drop expired entries, then trim to `max_entries`.
    pub fn sweep(&self) -> SweepReport {
        self.shared.sweep()
    }

    pub fn len(&self) -> usize {
        self.shared.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.shared.hits.load(Ordering::Relaxed);
        let misses = self.shared.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            size: self.len(),
            hit_rate: CacheStats::compute_hit_rate(hits, misses),
            revalidations: self.shared.revalidations.load(Ordering::Relaxed),
            evictions: self.shared.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Stop the sweep task and cancel any in-flight background refresh.
    pub fn dispose(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        info!("Response cache disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    fn revalidate<F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Option<Duration>,
        on_error: Option<ErrorCallback>,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if self.is_disposed() {
            debug!("Cache disposed, skipping refresh of {}", key);
            return;
        }
        if !self.shared.refreshing.lock().insert(key.to_string()) {
            debug!("Refresh already running for {}", key);
            return;
        }

        self.shared.revalidations.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_operation("revalidate");
        let origin = self.shared.store.lock().peek(key).map(|entry| entry.seq);

        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = shared.shutdown.cancelled() => None,
                result = fetcher() => Some(result),
            };
            shared.refreshing.lock().remove(&key);

            match outcome {
                Some(Ok(value)) => {
                    if shared.insert_refreshed(&key, value, ttl, origin) {
                        debug!("Background refresh replaced {}", key);
                    } else {
                        debug!("Dropped refresh of {}, entry changed meanwhile", key);
                    }
                }
                Some(Err(e)) => {
                    warn!("Background refresh of {} failed: {}", key, e);
                    crate::metrics::record_cache_operation("revalidate_error");
                    if let Some(callback) = on_error {
                        callback(&key, &e);
                    }
                }
                None => debug!("Background refresh of {} cancelled", key),
            }
        });
    }
}

impl<T> Shared<T> {
    fn insert(&self, key: &str, value: T, ttl: Option<Duration>) -> Arc<T> {
        let value = Arc::new(value);
        let size = {
            let mut store = self.store.lock();
            store.set(key.to_string(), Arc::clone(&value), ttl);
            store.len()
        };
        crate::metrics::update_cache_entries(size);
        value
    }

    /// Store a refresh result only if the entry it started from (by
    /// insertion sequence) is still the one held. An invalidate, clear,
    /// eviction or newer `set` in the meantime wins over the refresh.
    fn insert_refreshed(
        &self,
        key: &str,
        value: T,
        ttl: Option<Duration>,
        origin: Option<u64>,
    ) -> bool {
        let size = {
            let mut store = self.store.lock();
            let current = store.peek(key).map(|entry| entry.seq);
            if origin.is_none() || current != origin {
                return false;
            }
            store.set(key.to_string(), Arc::new(value), ttl);
            store.len()
        };
        crate::metrics::update_cache_entries(size);
        true
    }

    fn sweep(&self) -> SweepReport {
        let (report, size) = {
            let mut store = self.store.lock();
            let expired = store.cleanup();
            let evicted = store.evict_oldest(self.config.max_entries);
            (SweepReport { expired, evicted }, store.len())
        };

        self.evictions
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        crate::metrics::record_cache_evictions(report.evicted);
        crate::metrics::update_cache_entries(size);

        if report.expired + report.evicted > 0 {
            info!(
                "Cache sweep: removed {} expired and {} excess entries",
                report.expired, report.evicted
            );
        } else {
            debug!("Cache sweep: nothing to remove");
        }
        report
    }
}

impl<T> Drop for ApiCache<T> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Spawns the periodic sweep. The task holds only a weak reference so a
/// dropped cache is never kept alive by its own sweeper.
fn spawn_sweeper<T>(shared: Weak<Shared<T>>, shutdown: CancellationToken) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
{
    let period = match shared.upgrade() {
        Some(shared) => shared.config.cleanup_interval(),
        None => Duration::from_secs(60),
    };

    tokio::spawn(async move {
        debug!("Starting cache sweep every {}ms", period.as_millis());
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(shared) = shared.upgrade() else { break };
                    shared.sweep();
                }
            }
        }
        debug!("Cache sweep stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::utils::clock::ManualClock;

    fn config() -> CacheConfig {
        CacheConfig {
            default_ttl_ms: 1_000,
            max_entries: 3,
            cleanup_interval_ms: 60_000,
            stale_ratio: 0.3,
            stale_while_revalidate: true,
        }
    }

    #[tokio::test]
    async fn test_lookup_reports_fresh_stale_absent() {
        let clock = ManualClock::new(0);
        let cache: ApiCache<u32> = ApiCache::with_clock(config(), Arc::new(clock.clone()));
        cache.set("estates", 7, None);

        assert!(matches!(cache.lookup("estates"), CacheLookup::Fresh(_)));
        clock.set(650);
        assert!(cache.lookup("estates").is_stale());
        clock.set(1_001);
        assert!(cache.lookup("estates").is_absent());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_trims_to_max_entries() {
        let clock = ManualClock::new(0);
        let cache: ApiCache<usize> = ApiCache::with_clock(config(), Arc::new(clock.clone()));
        for i in 0..5 {
            cache.set(&format!("k{}", i), i, None);
            clock.advance(Duration::from_millis(1));
        }

        let report = cache.sweep();
        assert_eq!(report.evicted, 2);
        assert_eq!(cache.len(), 3);
        assert!(cache.lookup("k0").is_absent());
        assert!(cache.lookup("k4").value().is_some());
        assert_eq!(cache.stats().evictions, 2);
    }

    #[tokio::test]
    async fn test_miss_error_propagates_and_stores_nothing() {
        let cache: ApiCache<u32> = ApiCache::new(config());
        let result = cache
            .fetch_with_cache(
                "plots:e1",
                || async { Err(ApiError::Network("unreachable".into())) },
                FetchOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(ApiError::Network(_))));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let cache: ApiCache<u32> = ApiCache::new(config());
        cache.dispose();
        cache.dispose();
        assert!(cache.is_disposed());
    }
}
