use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Mutex;

use tracing::debug;

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: usize,
    /// Lookups that had to go to disk
    pub misses: usize,
    /// Values inserted or overwritten
    pub inserts: usize,
    /// Explicit removals
    pub invalidations: usize,
    /// Values dropped to make room
    pub evictions: usize,
}

struct CacheState<K, V> {
    values: HashMap<K, V>,
    lru_queue: VecDeque<K>,
    stats: CacheStats,
}

/// Bounded cache-aside store with least-recently-used eviction.
///
/// Values may disappear at any time once capacity is reached; callers must
/// always be able to regenerate them from disk.
pub struct MetadataCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    max_entries: usize,
}

impl<K, V> MetadataCache<K, V>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
{
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            state: Mutex::new(CacheState {
                values: HashMap::with_capacity(max_entries.min(1024)),
                lru_queue: VecDeque::with_capacity(max_entries.min(1024)),
                stats: CacheStats::default(),
            }),
            max_entries,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.lock();
        match state.values.get(key).cloned() {
            Some(value) => {
                state.stats.hits += 1;
                touch(&mut state.lru_queue, key);
                debug!("Metadata cache hit for {:?}", key);
                Some(value)
            }
            None => {
                state.stats.misses += 1;
                debug!("Metadata cache miss for {:?}", key);
                None
            }
        }
    }

    /// Inserts or overwrites the value for `key`
    pub fn insert(&self, key: K, value: V) {
        let mut state = self.lock();

        if !state.values.contains_key(&key) && state.values.len() >= self.max_entries {
            // Free 10% of the capacity at once
            let count = (self.max_entries / 10).max(1);
            for _ in 0..count {
                match state.lru_queue.pop_front() {
                    Some(oldest) => {
                        state.values.remove(&oldest);
                        state.stats.evictions += 1;
                    }
                    None => break,
                }
            }
            debug!("Evicted up to {} metadata cache entries", count);
        }

        state.values.insert(key.clone(), value);
        state.stats.inserts += 1;
        touch(&mut state.lru_queue, &key);
    }

    pub fn invalidate(&self, key: &K) {
        let mut state = self.lock();
        if state.values.remove(key).is_some() {
            state.stats.invalidations += 1;
        }
        if let Some(pos) = state.lru_queue.iter().position(|k| k == key) {
            state.lru_queue.remove(pos);
        }
    }

    /// Drops every value, as if all were evicted
    pub fn clear(&self) {
        let mut state = self.lock();
        let count = state.values.len();
        state.values.clear();
        state.lru_queue.clear();
        state.stats.evictions += count;
        debug!("Cleared {} metadata cache entries", count);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState<K, V>> {
        // State is consistent after every critical section
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn touch<K: PartialEq + Clone>(lru_queue: &mut VecDeque<K>, key: &K) {
    if let Some(pos) = lru_queue.iter().position(|k| k == key) {
        lru_queue.remove(pos);
    }
    lru_queue.push_back(key.clone());
}
