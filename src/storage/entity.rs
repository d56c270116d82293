//! Stored value variants.
//!
//! Every key maps to a [`DataEntity`], a tagged union of the supported
//! value kinds. Command handlers match on the tag and reply `WRONGTYPE`
//! when an existing key holds a different kind than the command expects.

use bytes::Bytes;
use std::collections::{HashSet, VecDeque};

/// A value stored in the keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEntity {
    /// A binary-safe string.
    Bytes(Bytes),
    /// A list; `VecDeque` gives O(1) push/pop at both ends.
    List(VecDeque<Bytes>),
    /// An unordered set of string members.
    Set(HashSet<String>),
}

impl DataEntity {
    /// The type name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            DataEntity::Bytes(_) => "string",
            DataEntity::List(_) => "list",
            DataEntity::Set(_) => "set",
        }
    }

    /// Number of elements for collections, byte length for strings.
    pub fn len(&self) -> usize {
        match self {
            DataEntity::Bytes(b) => b.len(),
            DataEntity::List(l) => l.len(),
            DataEntity::Set(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names() {
        assert_eq!(DataEntity::Bytes(Bytes::from("x")).type_name(), "string");
        assert_eq!(DataEntity::List(VecDeque::new()).type_name(), "list");
        assert_eq!(DataEntity::Set(HashSet::new()).type_name(), "set");
    }

    #[test]
    fn len_per_variant() {
        assert_eq!(DataEntity::Bytes(Bytes::from("abc")).len(), 3);
        let list = DataEntity::List(VecDeque::from([Bytes::from("a"), Bytes::from("b")]));
        assert_eq!(list.len(), 2);
        let set = DataEntity::Set(HashSet::from(["m".to_string()]));
        assert_eq!(set.len(), 1);
        assert!(!set.is_empty());
    }
}
