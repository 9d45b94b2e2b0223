//! In-memory TTL cache.
//!
//! Expiry is checked on read; nothing sweeps in the background. An optional
//! entry bound evicts least-recently-used entries once reached.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

// Clamp for TTLs that would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    last_used: u64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    tick: u64,
}

#[derive(Debug)]
pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    max_entries: Option<usize>,
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TtlCache<V> {
    /// Unbounded cache: memory grows with the number of distinct keys ever written.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
            max_entries: None,
        }
    }

    /// Bounded cache. `max_entries == 0` is treated as unbounded.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries: (max_entries > 0).then_some(max_entries),
            ..Self::new()
        }
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(max) = self.max_entries {
            if !inner.entries.contains_key(&key) && inner.entries.len() >= max {
                inner.entries.retain(|_, e| e.expires_at > now);
                if inner.entries.len() >= max {
                    let lru = inner
                        .entries
                        .iter()
                        .min_by_key(|(_, e)| e.last_used)
                        .map(|(k, _)| k.clone());
                    if let Some(k) = lru {
                        inner.entries.remove(&k);
                    }
                }
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now.checked_add(ttl).unwrap_or(now + FAR_FUTURE),
                last_used: tick,
            },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Number of stored entries, stale ones included until they are read.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let fresh = now < inner.entries.get(key)?.expires_at;
        if !fresh {
            inner.entries.remove(key);
            return None;
        }
        let entry = inner.entries.get_mut(key)?;
        entry.last_used = tick;
        Some(entry.value.clone())
    }
}
