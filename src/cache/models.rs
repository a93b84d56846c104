//! Cache configuration, entry and statistics models.

// Author: kelexine (https://github.com/kelexine)

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a fetch does not specify one, in milliseconds.
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// Entry count the sweep trims the cache back down to.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Interval between sweeps, in milliseconds.
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    /// Fraction of an entry's TTL after which it is served stale and refreshed.
    #[serde(default = "default_stale_ratio")]
    pub stale_ratio: f64,
    /// Whether stale hits trigger a background refresh.
    #[serde(default = "default_true")]
    pub stale_while_revalidate: bool,
}

impl Default for CacheConfig {
    /// Provides default values for cache configuration.
    ///
    /// - `default_ttl_ms`: 300000 (5 minutes)
    /// - `max_entries`: 100
    /// - `cleanup_interval_ms`: 60000
    /// - `stale_ratio`: 0.3
    /// - `stale_while_revalidate`: true
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl_ms(),
            max_entries: default_max_entries(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            stale_ratio: default_stale_ratio(),
            stale_while_revalidate: true,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms.max(1))
    }
}

fn default_ttl_ms() -> u64 {
    300_000
}

fn default_max_entries() -> usize {
    100
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

fn default_stale_ratio() -> f64 {
    0.3
}

fn default_true() -> bool {
    true
}

/// A stored value with its insertion and expiry instants (Unix ms).
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: u64,
    pub expiry: u64,
    /// Insertion order within the owning store; breaks ties between equal timestamps.
    pub seq: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, now_ms: u64, ttl: Duration) -> Self {
        Self {
            data,
            timestamp: now_ms,
            expiry: now_ms.saturating_add(duration_ms(ttl)),
            seq: 0,
        }
    }

    /// An entry stays readable up to and including its expiry instant.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms > self.expiry
    }

    /// Whether the entry has outlived `stale_ratio` of its TTL.
    pub fn is_stale_at(&self, now_ms: u64, stale_ratio: f64) -> bool {
        let ttl = self.expiry.saturating_sub(self.timestamp) as f64;
        let age = now_ms.saturating_sub(self.timestamp) as f64;
        age > ttl * stale_ratio
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.expiry.saturating_sub(self.timestamp))
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum CacheLookup<T> {
    Fresh(Arc<T>),
    /// Still readable, but old enough to warrant a refresh.
    Stale(Arc<T>),
    Absent,
}

impl<T> CacheLookup<T> {
    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            CacheLookup::Fresh(value) | CacheLookup::Stale(value) => Some(value),
            CacheLookup::Absent => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, CacheLookup::Stale(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, CacheLookup::Absent)
    }
}

/// Statistics for cache operations.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups that returned a value (fresh or stale).
    pub hits: u64,
    /// Lookups that found nothing readable.
    pub misses: u64,
    /// Entries currently held.
    pub size: usize,
    /// `hits / (hits + misses)`, 0 before the first lookup.
    pub hit_rate: f64,
    /// Background refreshes started.
    pub revalidations: u64,
    /// Entries removed by the sweep to honor `max_entries`.
    pub evictions: u64,
}

impl CacheStats {
    pub fn compute_hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
}

/// Callback receiving background refresh failures: `(key, error)`.
pub type ErrorCallback = Arc<dyn Fn(&str, &ApiError) + Send + Sync>;

/// Per-call options for `ApiCache::fetch_with_cache`.
#[derive(Clone, Default)]
pub struct FetchOptions {
    /// TTL for the stored result; falls back to the cache default.
    pub ttl: Option<Duration>,
    /// Overrides the configured stale-while-revalidate switch.
    pub stale_while_revalidate: Option<bool>,
    /// Skip the lookup and always call the fetcher.
    pub force_refresh: bool,
    /// Receives errors from background refreshes.
    pub on_error: Option<ErrorCallback>,
}

impl FetchOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = Some(enabled);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &ApiError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("ttl", &self.ttl)
            .field("stale_while_revalidate", &self.stale_while_revalidate)
            .field("force_refresh", &self.force_refresh)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
