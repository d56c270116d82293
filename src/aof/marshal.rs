//! Entity → command encoders for the AOF rewrite.
//!
//! The rewrite shrinks history to one reconstruction command per key (plus
//! a `PEXPIREAT` when a deadline exists). The encoders are pure functions
//! from a snapshot of the value to a command line.

use crate::protocol::{cmd_line, CmdLine};
use crate::storage::DataEntity;
use bytes::Bytes;

/// The minimal command that rebuilds `entity` under `key`.
pub fn entity_to_cmd(key: &str, entity: &DataEntity) -> CmdLine {
    match entity {
        DataEntity::Bytes(value) => vec![
            Bytes::from_static(b"SET"),
            Bytes::copy_from_slice(key.as_bytes()),
            value.clone(),
        ],
        DataEntity::List(list) => {
            let mut line = Vec::with_capacity(list.len() + 2);
            line.push(Bytes::from_static(b"RPUSH"));
            line.push(Bytes::copy_from_slice(key.as_bytes()));
            line.extend(list.iter().cloned());
            line
        }
        DataEntity::Set(set) => {
            let mut line = Vec::with_capacity(set.len() + 2);
            line.push(Bytes::from_static(b"SADD"));
            line.push(Bytes::copy_from_slice(key.as_bytes()));
            line.extend(set.iter().map(|m| Bytes::copy_from_slice(m.as_bytes())));
            line
        }
    }
}

/// `PEXPIREAT key <ms>` restoring an expiry deadline.
pub fn expire_cmd(key: &str, at_ms: u64) -> CmdLine {
    cmd_line(&["PEXPIREAT", key, &at_ms.to_string()])
}

/// `SELECT <index>`, the stream separator between databases.
pub(crate) fn select_cmd(index: usize) -> CmdLine {
    cmd_line(&["SELECT", &index.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};

    #[test]
    fn string_entity_encodes_to_set() {
        let entity = DataEntity::Bytes(Bytes::from("bar"));
        assert_eq!(entity_to_cmd("foo", &entity), cmd_line(&["SET", "foo", "bar"]));
    }

    #[test]
    fn list_entity_encodes_in_order() {
        let entity = DataEntity::List(VecDeque::from([
            Bytes::from("a"),
            Bytes::from("b"),
            Bytes::from("c"),
        ]));
        assert_eq!(
            entity_to_cmd("q", &entity),
            cmd_line(&["RPUSH", "q", "a", "b", "c"])
        );
    }

    #[test]
    fn set_entity_encodes_all_members() {
        let entity = DataEntity::Set(HashSet::from(["x".to_string(), "y".to_string()]));
        let line = entity_to_cmd("s", &entity);
        assert_eq!(line[0], Bytes::from("SADD"));
        assert_eq!(line[1], Bytes::from("s"));
        let mut members: Vec<&[u8]> = line[2..].iter().map(|b| b.as_ref()).collect();
        members.sort();
        assert_eq!(members, vec![b"x".as_ref(), b"y".as_ref()]);
    }

    #[test]
    fn expire_cmd_uses_epoch_millis() {
        assert_eq!(
            expire_cmd("k", 1_700_000_000_123),
            cmd_line(&["PEXPIREAT", "k", "1700000000123"])
        );
    }

    #[test]
    fn select_cmd_shape() {
        assert_eq!(select_cmd(3), cmd_line(&["SELECT", "3"]));
    }
}
