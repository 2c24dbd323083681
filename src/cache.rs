use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::time::Instant;

pub const DEFAULT_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

struct Slots<V> {
    entries: HashMap<String, CacheEntry<V>>,
    // Keys in insertion order; re-setting a key keeps its original slot.
    order: VecDeque<String>,
}

impl<V> Slots<V> {
    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    fn sweep(&mut self, now: Instant) {
        let entries = &mut self.entries;
        entries.retain(|_, entry| now < entry.expires_at);
        self.order.retain(|key| entries.contains_key(key));
    }
}

/// Bounded TTL cache for idempotent responses.
///
/// When full, the entry inserted first is evicted regardless of how recently
/// it was read.
pub struct RequestCache<V> {
    slots: Mutex<Slots<V>>,
    capacity: usize,
    default_ttl: Duration,
}

impl<V: Clone> RequestCache<V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    /// Returns the cached value if it has not expired yet.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut slots = self.slots.lock();
        let expired = match slots.entries.get(key) {
            None => return None,
            Some(entry) => Instant::now() >= entry.expires_at,
        };
        if expired {
            slots.remove(key);
            return None;
        }
        slots.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Stores `value` under `key` for `ttl` (or the cache default).
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let now = Instant::now();
        let expires_at = now + ttl.unwrap_or(self.default_ttl);

        let mut slots = self.slots.lock();
        slots.sweep(now);

        if let Some(entry) = slots.entries.get_mut(&key) {
            *entry = CacheEntry { value, expires_at };
            return;
        }

        if slots.entries.len() >= self.capacity {
            if let Some(oldest) = slots.order.pop_front() {
                slots.entries.remove(&oldest);
                tracing::debug!(key = %oldest, "evicted oldest cache entry");
            }
        }

        slots.order.push_back(key.clone());
        slots.entries.insert(key, CacheEntry { value, expires_at });
    }

    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.entries.clear();
        slots.order.clear();
    }

    /// Number of stored entries, expired ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for RequestCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }
}
