use dashmap::DashMap;
use serde_json::Value;
use std::time::{Duration, Instant};

/// In-memory response cache with per-read TTL enforcement.
///
/// Entries carry only their insertion instant; the freshness window is
/// supplied by each caller at lookup time, so consumers with different
/// polling intervals can share one stored fetch. Expiry is lazy: a stale
/// entry is removed when a lookup finds it, never by a background sweep.
///
/// Owned by the composition root and handed to handlers behind an `Arc`;
/// tests construct isolated instances.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
}

struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    /// Derive a cache key from a logical resource prefix and its parameters:
    /// `"<prefix>:<json-serialized-params>"`.
    ///
    /// `serde_json` serializes object keys in sorted order, so structurally
    /// equal parameter maps produce identical keys regardless of how they
    /// were built. The substring convention in [`invalidate`](Self::invalidate)
    /// relies on prefixes being chosen carefully (e.g. `"logs"`, `"metrics"`).
    pub fn cache_key(prefix: &str, params: &Value) -> String {
        format!("{prefix}:{params}")
    }

    /// Return the value stored under `key` if it is younger than `ttl`.
    /// A stale hit is evicted on the spot and reported as a miss.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<Value> {
        if let Some(entry) = self.entries.get(key) {
            if entry.stored_at.elapsed() <= ttl {
                return Some(entry.value.clone());
            }
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    /// Insert or overwrite the entry for `key`, stamping the current instant.
    ///
    /// When inserting a new key at capacity, the entry with the oldest
    /// `stored_at` is evicted first so the cache never exceeds `max_entries`.
    pub fn insert(&self, key: String, value: Value) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// With `None`, clear the entire cache (sign-out, explicit refresh).
    /// With `Some(pattern)`, remove every entry whose key contains `pattern`
    /// as a substring — coarse by design, so `invalidate(Some("logs"))`
    /// drops all `logs:*` keys without an index per prefix.
    pub fn invalidate(&self, pattern: Option<&str>) {
        match pattern {
            None => self.entries.clear(),
            Some(p) => self.entries.retain(|key, _| !key.contains(p)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.stored_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
