//! Shared request cache with LRU eviction and TTL semantics.
//!
//! Keyed by request fingerprint and shared across every destination of a
//! tap, so destinations resolving to the same parameters reuse one result.
//! Entries carry their own TTL; `get` returns expired entries as well - the
//! request runner decides whether an expired hit is served or revalidated,
//! the cache only reports freshness.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::time::{Clock, Millis};

/// Cache sizing policy.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Maximum number of entries before LRU eviction (default: 256).
    ///
    /// A limit of zero disables storage entirely.
    pub max_entries: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self { max_entries: 256 }
    }
}

impl CachePolicy {
    /// Sets the maximum entry count.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

/// A cached result as returned to the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<T> {
    /// The cached fetch result.
    pub result: T,
    /// When the result was stored.
    pub stored_at: Millis,
    /// Time-to-live; zero expires immediately.
    pub ttl_ms: Millis,
}

impl<T> CacheEntry<T> {
    /// Returns the absolute expiry time.
    pub fn expires_at(&self) -> Millis {
        self.stored_at.saturating_add(self.ttl_ms)
    }

    /// Returns true if the entry is within its TTL at `now`.
    pub fn is_fresh(&self, now: Millis) -> bool {
        now < self.expires_at()
    }

    /// Returns true if the entry is fresh with `margin_ms` to spare.
    ///
    /// An entry inside the margin still holds servable data but is due for
    /// revalidation, the same window the TTL refresh scheduler targets.
    pub fn is_fresh_within(&self, now: Millis, margin_ms: Millis) -> bool {
        now < self.expires_at().saturating_sub(margin_ms)
    }
}

/// Cache statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups that found an entry.
    pub hits: u64,
    /// Number of lookups that found nothing.
    pub misses: u64,
    /// Number of entries inserted.
    pub inserts: u64,
    /// Number of entries evicted to make room.
    pub evictions: u64,
}

struct StoredEntry<T> {
    result: T,
    stored_at: Millis,
    ttl_ms: Millis,
    /// Monotonic access stamp for LRU ordering.
    last_access: u64,
}

struct CacheInner<T> {
    entries: HashMap<String, StoredEntry<T>>,
    access_counter: u64,
    stats: CacheStats,
}

/// Shared LRU+TTL cache keyed by request fingerprint.
///
/// May be per-tap or process-global; any instance respecting the
/// `get`/`set`/`delete` contract suffices for the runner.
pub struct RequestCache<T> {
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner<T>>,
}

impl<T: Clone + Send> RequestCache<T> {
    /// Creates a new cache with the given policy and clock.
    pub fn new(policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                access_counter: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Looks up an entry, updating its LRU position on hit.
    ///
    /// Expired entries are returned too; callers check freshness with
    /// [`CacheEntry::is_fresh`].
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        let mut inner = self.inner.lock().unwrap();
        inner.access_counter += 1;
        let stamp = inner.access_counter;

        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = stamp;
                let found = CacheEntry {
                    result: entry.result.clone(),
                    stored_at: entry.stored_at,
                    ttl_ms: entry.ttl_ms,
                };
                inner.stats.hits += 1;
                Some(found)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Stores a result under the given request key.
    ///
    /// Replacing an existing key never triggers eviction; inserting a new
    /// key evicts expired entries first, then least-recently-used ones.
    pub fn set(&self, key: &str, result: T, ttl_ms: Millis) {
        if self.policy.max_entries == 0 {
            return;
        }

        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().unwrap();
        inner.access_counter += 1;
        let stamp = inner.access_counter;

        let new_key = !inner.entries.contains_key(key);
        if new_key && inner.entries.len() >= self.policy.max_entries {
            Self::evict_one(&mut inner, now);
        }

        inner.entries.insert(
            key.to_string(),
            StoredEntry {
                result,
                stored_at: now,
                ttl_ms,
                last_access: stamp,
            },
        );
        inner.stats.inserts += 1;
    }

    /// Removes an entry, if present.
    pub fn delete(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.remove(key);
    }

    /// Removes all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of the cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats.clone()
    }

    /// Evicts a single entry: the oldest expired one if any, otherwise the
    /// least recently used.
    fn evict_one(inner: &mut CacheInner<T>, now: Millis) {
        let victim = inner
            .entries
            .iter()
            .min_by_key(|(_, e)| {
                let expired = now >= e.stored_at.saturating_add(e.ttl_ms);
                (!expired, e.last_access)
            })
            .map(|(k, _)| k.clone());

        if let Some(key) = victim {
            tracing::debug!(key = %key, "request cache evicting entry");
            inner.entries.remove(&key);
            inner.stats.evictions += 1;
        }
    }
}

impl<T> std::fmt::Debug for RequestCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
