//! Multi-Key Lock Table
//!
//! Commands that touch several keys at once (`RPOPLPUSH`, `SINTERSTORE`,
//! ...) need to hold locks on all of them without deadlocking against other
//! callers doing the same in a different key order. The table holds `2^k`
//! RwLocks indexed by FNV-1a of the key; acquisition always happens in
//! ascending index order, which imposes a global total order on locks and
//! therefore rules out cycles.
//!
//! An index reached by both a read key and a write key is taken exclusive.
//! Duplicate keys, and distinct keys colliding on one index, are acquired
//! once. Release happens in reverse acquisition order when the returned
//! guard drops.

use crate::storage::dict::{fnv32, shard_capacity};
use std::collections::{BTreeSet, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A table of key-granular read-write locks.
#[derive(Debug)]
pub struct LockTable {
    table: Vec<RwLock<()>>,
}

enum Guard<'a> {
    Read(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

/// RAII set of acquired locks; dropping releases them in reverse order.
pub struct KeyLockGuard<'a> {
    guards: Vec<Guard<'a>>,
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

impl LockTable {
    /// Creates a table with at least `size` locks, rounded up to a power of
    /// two (minimum 16).
    pub fn new(size: usize) -> Self {
        let size = shard_capacity(size);
        let table = (0..size).map(|_| RwLock::new(())).collect();
        Self { table }
    }

    #[inline]
    fn index(&self, key: &str) -> usize {
        (fnv32(key) as usize) & (self.table.len() - 1)
    }

    /// Distinct lock indices for `keys`, in ascending order.
    pub fn lock_indices<'k>(&self, keys: impl IntoIterator<Item = &'k str>) -> Vec<usize> {
        let set: BTreeSet<usize> = keys.into_iter().map(|k| self.index(k)).collect();
        set.into_iter().collect()
    }

    /// Acquires the lock set for a command: exclusive on every index covered
    /// by a write key, shared on indices reached only by read keys.
    pub fn rw_locks<'a>(&'a self, write_keys: &[String], read_keys: &[String]) -> KeyLockGuard<'a> {
        let all = self.lock_indices(
            write_keys
                .iter()
                .chain(read_keys.iter())
                .map(String::as_str),
        );
        let write_set: HashSet<usize> = write_keys.iter().map(|k| self.index(k)).collect();

        let mut guards = Vec::with_capacity(all.len());
        for index in all {
            let lock = &self.table[index];
            if write_set.contains(&index) {
                guards.push(Guard::Write(lock.write().unwrap()));
            } else {
                guards.push(Guard::Read(lock.read().unwrap()));
            }
        }
        KeyLockGuard { guards }
    }

    /// Exclusive locks on every given key.
    pub fn locks<'a>(&'a self, keys: &[String]) -> KeyLockGuard<'a> {
        self.rw_locks(keys, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn indices_are_strictly_increasing_and_deduplicated() {
        let table = LockTable::new(1024);
        let keys = vec![
            "alpha".to_string(),
            "beta".to_string(),
            "gamma".to_string(),
            "alpha".to_string(),
            "delta".to_string(),
        ];
        let indices = table.lock_indices(keys.iter().map(String::as_str));
        for pair in indices.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn overlapping_read_write_key_is_exclusive() {
        let table = LockTable::new(16);
        let key = vec!["k".to_string()];
        // "k" appears in both sets; the guard must hold it exclusively, so a
        // second shared acquisition from another thread has to wait.
        let guard = table.rw_locks(&key, &key);

        let table = &table;
        std::thread::scope(|s| {
            let handle = s.spawn(|| {
                let _g = table.rw_locks(&[], &["k".to_string()]);
            });
            std::thread::sleep(Duration::from_millis(50));
            assert!(!handle.is_finished());
            drop(guard);
            handle.join().unwrap();
        });
    }

    #[test]
    fn readers_share_an_index() {
        let table = LockTable::new(16);
        let keys = vec!["shared".to_string()];
        let _a = table.rw_locks(&[], &keys);
        let _b = table.rw_locks(&[], &keys);
    }

    #[test]
    fn opposite_key_orders_do_not_deadlock() {
        let table = Arc::new(LockTable::new(16));
        let forward = vec!["a".to_string(), "b".to_string()];
        let backward = vec!["b".to_string(), "a".to_string()];

        let mut handles = Vec::new();
        for _ in 0..4 {
            for keys in [forward.clone(), backward.clone()] {
                let table = Arc::clone(&table);
                handles.push(std::thread::spawn(move || {
                    for _ in 0..200 {
                        let _g = table.rw_locks(&keys, &[]);
                    }
                }));
            }
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
