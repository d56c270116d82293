//! Consistent-hash ring for peer selection.
//!
//! Each physical node contributes `replicas` virtual nodes placed at
//! `hash(node + i)` on a ring of `u32` hash values (CRC32-IEEE by
//! default). A key is served by the first virtual node at or after the
//! hash of its partition key, wrapping to the start of the ring.
//!
//! Keys may carry a **hash tag**: for `a{user1}b`, only `user1` is hashed,
//! which pins related keys to the same node on purpose.

use std::collections::HashMap;

/// Hash function over raw bytes; defaults to CRC32-IEEE.
pub type HashFn = fn(&[u8]) -> u32;

/// A fixed ring of virtual nodes, sorted for binary search.
pub struct HashRing {
    replicas: usize,
    hash_fn: HashFn,
    keys: Vec<u32>,
    nodes: HashMap<u32, String>,
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        Self::with_hash(replicas, crc32fast::hash)
    }

    pub fn with_hash(replicas: usize, hash_fn: HashFn) -> Self {
        Self {
            replicas: replicas.max(1),
            hash_fn,
            keys: Vec::new(),
            nodes: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Places `replicas` virtual nodes for every given physical node.
    pub fn add_nodes(&mut self, nodes: &[String]) {
        for node in nodes {
            if node.is_empty() {
                continue;
            }
            for i in 0..self.replicas {
                let virtual_id = format!("{}{}", node, i);
                let hash = (self.hash_fn)(virtual_id.as_bytes());
                self.keys.push(hash);
                self.nodes.insert(hash, node.clone());
            }
        }
        self.keys.sort_unstable();
        self.keys.dedup();
    }

    /// The node responsible for `key`, or `None` on an empty ring.
    pub fn pick_node(&self, key: &str) -> Option<&str> {
        if self.is_empty() || key.is_empty() {
            return None;
        }
        let hash = (self.hash_fn)(partition_key(key).as_bytes());
        let index = self.keys.partition_point(|&k| k < hash);
        let index = if index == self.keys.len() { 0 } else { index };
        self.nodes.get(&self.keys[index]).map(String::as_str)
    }
}

/// The hashed portion of a key: the bytes strictly between the first `{`
/// and the following `}` when that span is non-empty, otherwise the whole
/// key.
fn partition_key(key: &str) -> &str {
    if let Some(open) = key.find('{') {
        let rest = &key[open + 1..];
        if let Some(close) = rest.find('}') {
            if close > 0 {
                return &rest[..close];
            }
        }
    }
    key
}
