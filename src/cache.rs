//! Shared caches for decoded postings.
//!
//! Every cache maps a key to an `Arc`'d value so concurrent readers can hold
//! the same decoded postings; a value lives as long as its longest user.
//! Three policies are available:
//!
//! - [`NoEvictCache`]: striped `RwLock` shards, never evicts.
//! - [`DblruCache`]: double-buffered LRU. Inserts land in a primary map;
//!   when it fills it becomes the secondary map and a fresh primary starts.
//!   Hits in the secondary are promoted back into the primary.
//! - [`NullCache`]: stores nothing.

use crate::error::Result;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// Default number of entries a cache holds.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Shard count of [`NoEvictCache`].
const NUM_SHARDS: usize = 16;

/// A thread-safe cache of shared values.
pub trait Cache<K, V>: Send + Sync {
    fn find(&self, key: &K) -> Option<Arc<V>>;

    fn insert(&self, key: K, value: Arc<V>);

    /// Remove every entry.
    fn clear(&self);

    /// Number of entries held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Look `key` up, computing and caching the value on a miss.
pub fn get_or_load<K, V, F>(cache: &dyn Cache<K, V>, key: K, load: F) -> Result<Arc<V>>
where
    K: Clone,
    F: FnOnce() -> Result<V>,
{
    if let Some(hit) = cache.find(&key) {
        return Ok(hit);
    }
    let value = Arc::new(load()?);
    cache.insert(key, Arc::clone(&value));
    Ok(value)
}

/// Cache policy, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheType {
    NoEvict,
    #[default]
    Dblru,
    None,
}

/// Build a cache of the given policy.
pub fn make_cache<K, V>(kind: CacheType, capacity: usize) -> Box<dyn Cache<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    match kind {
        CacheType::NoEvict => Box::new(NoEvictCache::new()),
        CacheType::Dblru => Box::new(DblruCache::new(capacity)),
        CacheType::None => Box::new(NullCache),
    }
}

/// Unbounded cache split into independently locked shards.
pub struct NoEvictCache<K, V> {
    shards: Vec<RwLock<HashMap<K, Arc<V>>>>,
    hasher: RandomState,
}

impl<K: Hash + Eq, V> NoEvictCache<K, V> {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, Arc<V>>> {
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }
}

impl<K: Hash + Eq, V> Default for NoEvictCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Cache<K, V> for NoEvictCache<K, V>
where
    K: Hash + Eq + Send + Sync,
    V: Send + Sync,
{
    fn find(&self, key: &K) -> Option<Arc<V>> {
        self.shard(key).read().get(key).cloned()
    }

    fn insert(&self, key: K, value: Arc<V>) {
        self.shard(&key).write().insert(key, value);
    }

    fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }
}

struct Generations<K, V> {
    primary: HashMap<K, Arc<V>>,
    secondary: HashMap<K, Arc<V>>,
}

/// Double-buffered approximate LRU holding at most `2 * capacity` entries.
pub struct DblruCache<K, V> {
    capacity: usize,
    maps: Mutex<Generations<K, V>>,
}

impl<K: Hash + Eq, V> DblruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            maps: Mutex::new(Generations {
                primary: HashMap::new(),
                secondary: HashMap::new(),
            }),
        }
    }

    fn insert_primary(&self, maps: &mut Generations<K, V>, key: K, value: Arc<V>) {
        maps.primary.insert(key, value);
        if maps.primary.len() >= self.capacity {
            maps.secondary = std::mem::take(&mut maps.primary);
        }
    }
}

impl<K, V> Cache<K, V> for DblruCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    fn find(&self, key: &K) -> Option<Arc<V>> {
        let mut maps = self.maps.lock();
        if let Some(hit) = maps.primary.get(key) {
            return Some(Arc::clone(hit));
        }
        let hit = maps.secondary.remove(key)?;
        self.insert_primary(&mut maps, key.clone(), Arc::clone(&hit));
        Some(hit)
    }

    fn insert(&self, key: K, value: Arc<V>) {
        let mut maps = self.maps.lock();
        maps.secondary.remove(&key);
        self.insert_primary(&mut maps, key, value);
    }

    fn clear(&self) {
        let mut maps = self.maps.lock();
        maps.primary.clear();
        maps.secondary.clear();
    }

    fn len(&self) -> usize {
        let maps = self.maps.lock();
        maps.primary.len() + maps.secondary.len()
    }
}

/// A cache that never holds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl<K, V> Cache<K, V> for NullCache {
    fn find(&self, _key: &K) -> Option<Arc<V>> {
        None
    }

    fn insert(&self, _key: K, _value: Arc<V>) {}

    fn clear(&self) {}

    fn len(&self) -> usize {
        0
    }
}
