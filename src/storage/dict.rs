//! Sharded Concurrent Dictionary
//!
//! The keyspace maps (data, TTL, versions) all sit on the same structure: a
//! fixed array of `2^k` shards, each an independent `RwLock<HashMap>`. A key
//! is routed to its shard by FNV-1a, so unrelated keys contend only when
//! they collide on a shard.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   ShardedDict<V>                     │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐    │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │  ...2^k │    │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │    │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │         │    │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Isolation contract
//!
//! Every operation locks exactly one shard. `for_each` snapshots one shard
//! at a time and releases it before visiting the next, so readers observe a
//! consistent view *per shard* but not across shards. Multi-key commands
//! that need more get it from the key lock table, not from here.

use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::RwLock;

/// Smallest allowed shard count.
const MIN_SHARDS: usize = 16;

/// 32-bit FNV-1a over the UTF-8 bytes of a key.
pub(crate) fn fnv32(key: &str) -> u32 {
    const OFFSET_BASIS: u32 = 2_166_136_261;
    const PRIME: u32 = 16_777_619;

    let mut hash = OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Rounds `n` up to a power of two, with a floor of [`MIN_SHARDS`].
pub(crate) fn shard_capacity(n: usize) -> usize {
    n.next_power_of_two().max(MIN_SHARDS)
}

#[derive(Debug)]
struct Shard<V> {
    map: RwLock<HashMap<String, V>>,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

/// A concurrent string-keyed map sharded over `2^k` RwLocks.
#[derive(Debug)]
pub struct ShardedDict<V> {
    // The outer lock exists only so `clear` can swap in a fresh table;
    // regular operations take it shared, which is uncontended.
    table: RwLock<Vec<Shard<V>>>,
    count: AtomicI32,
    shard_count: usize,
}

impl<V: Clone> ShardedDict<V> {
    /// Creates a dictionary with at least `shards` shards, rounded up to a
    /// power of two (minimum 16).
    pub fn new(shards: usize) -> Self {
        let shard_count = shard_capacity(shards);
        let table = (0..shard_count).map(|_| Shard::new()).collect();
        Self {
            table: RwLock::new(table),
            count: AtomicI32::new(0),
            shard_count,
        }
    }

    #[inline]
    fn shard_index(&self, key: &str) -> usize {
        // shard_count is a power of two, so masking == modulo
        (fnv32(key) as usize) & (self.shard_count - 1)
    }

    /// Returns a clone of the value for `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        let table = self.table.read().unwrap();
        let map = table[self.shard_index(key)].map.read().unwrap();
        map.get(key).cloned()
    }

    /// Runs `f` on the value for `key` under the shard read lock.
    pub fn with_value<R>(&self, key: &str, f: impl FnOnce(&V) -> R) -> Option<R> {
        let table = self.table.read().unwrap();
        let map = table[self.shard_index(key)].map.read().unwrap();
        map.get(key).map(f)
    }

    /// Runs `f` on the value for `key` under the shard write lock, allowing
    /// in-place mutation.
    pub fn with_value_mut<R>(&self, key: &str, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let table = self.table.read().unwrap();
        let mut map = table[self.shard_index(key)].map.write().unwrap();
        map.get_mut(key).map(f)
    }

    /// Inserts `value` under `key`.
    ///
    /// Returns 1 if the key is new, 0 if an existing value was replaced.
    pub fn put(&self, key: String, value: V) -> u32 {
        let table = self.table.read().unwrap();
        let mut map = table[self.shard_index(&key)].map.write().unwrap();
        match map.insert(key, value) {
            Some(_) => 0,
            None => {
                self.count.fetch_add(1, Ordering::Relaxed);
                1
            }
        }
    }

    /// Inserts only when `key` is absent. Returns 1 on insert, 0 otherwise.
    pub fn put_if_absent(&self, key: String, value: V) -> u32 {
        let table = self.table.read().unwrap();
        let mut map = table[self.shard_index(&key)].map.write().unwrap();
        if map.contains_key(&key) {
            return 0;
        }
        map.insert(key, value);
        self.count.fetch_add(1, Ordering::Relaxed);
        1
    }

    /// Replaces only when `key` is present. Returns 1 on replace, 0 otherwise.
    pub fn put_if_exists(&self, key: String, value: V) -> u32 {
        let table = self.table.read().unwrap();
        let mut map = table[self.shard_index(&key)].map.write().unwrap();
        match map.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                1
            }
            None => 0,
        }
    }

    /// Removes `key`. Returns 1 if it existed, 0 otherwise.
    pub fn remove(&self, key: &str) -> u32 {
        let table = self.table.read().unwrap();
        let mut map = table[self.shard_index(key)].map.write().unwrap();
        match map.remove(key) {
            Some(_) => {
                self.count.fetch_sub(1, Ordering::Relaxed);
                1
            }
            None => 0,
        }
    }

    /// Total key count across all shards, O(1).
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every entry. One shard is snapshotted at a time and its lock
    /// released before the callback runs, so `f` may safely re-enter this
    /// dictionary. Returning `false` stops the traversal.
    pub fn for_each(&self, mut f: impl FnMut(&str, &V) -> bool) {
        let shard_count = self.shard_count;
        for i in 0..shard_count {
            let entries: Vec<(String, V)> = {
                let table = self.table.read().unwrap();
                let map = table[i].map.read().unwrap();
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            };
            for (key, value) in &entries {
                if !f(key, value) {
                    return;
                }
            }
        }
    }

    /// All keys, in shard order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| {
            keys.push(key.to_string());
            true
        });
        keys
    }

    /// Drops every entry by swapping in a fresh table of the same shape.
    ///
    /// Concurrent operations observe either the old or the new table, never
    /// a partially cleared one.
    pub fn clear(&self) {
        let fresh: Vec<Shard<V>> = (0..self.shard_count).map(|_| Shard::new()).collect();
        let mut table = self.table.write().unwrap();
        *table = fresh;
        self.count.store(0, Ordering::Relaxed);
    }

    /// Samples `n` keys with replacement.
    pub fn random_keys(&self, n: usize) -> Vec<String> {
        let keys = self.keys();
        if keys.is_empty() {
            return Vec::new();
        }
        let mut rng = rand::thread_rng();
        (0..n)
            .map(|_| keys.choose(&mut rng).cloned().unwrap_or_default())
            .collect()
    }

    /// Samples up to `n` distinct keys.
    pub fn random_distinct_keys(&self, n: usize) -> Vec<String> {
        let keys = self.keys();
        let mut rng = rand::thread_rng();
        keys.choose_multiple(&mut rng, n).cloned().collect()
    }
}
