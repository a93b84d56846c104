//! Generic key/value store with per-entry expiry.
//!
//! Expired entries are dropped lazily on read and in bulk by [`TtlCache::cleanup`].
//! Size bounding is left to the caller through [`TtlCache::evict_oldest`].

// Author: kelexine (https://github.com/kelexine)

use crate::cache::models::CacheEntry;
use crate::utils::clock::{Clock, SystemClock};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    next_seq: u64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
            clock,
            next_seq: 0,
        }
    }

    /// Stores `value` under `key`, replacing any previous entry and its expiry.
    pub fn set(&mut self, key: K, value: V, ttl: Option<Duration>) {
        let mut entry =
            CacheEntry::new(value, self.clock.now_ms(), ttl.unwrap_or(self.default_ttl));
        entry.seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(key, entry);
    }

    /// Returns the value if it has not expired. An expired entry is removed.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now_ms();
        if self.entries.get(key)?.is_expired_at(now) {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| &entry.data)
    }

    /// Entry with metadata, without expiring it.
    pub fn peek<Q>(&self, key: &Q) -> Option<&CacheEntry<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn has<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    pub fn delete<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).is_some()
    }

    /// Removes every entry whose key matches `predicate`. Returns how many were removed.
    pub fn delete_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|key, _| !predicate(key));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before - self.entries.len()
    }

    /// Removes the oldest-inserted entries until at most `max_entries` remain.
    pub fn evict_oldest(&mut self, max_entries: usize) -> usize {
        if self.entries.len() <= max_entries {
            return 0;
        }

        let mut by_age: Vec<(u64, u64, K)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.timestamp, entry.seq, key.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(timestamp, seq, _)| (*timestamp, *seq));

        let excess = self.entries.len() - max_entries;
        for (_, _, key) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        excess
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}
