//! Set commands.
//!
//! Members are strings stored in a `HashSet`. Like lists, a set never
//! exists empty: draining removals delete the key. The algebra commands
//! (`SINTER`, `SUNION`, `SDIFF` and their `STORE` forms) read every source
//! under the pipeline's shared key locks; the store forms write the
//! destination under its exclusive lock.

use crate::database::core::Db;
use crate::database::router::CommandTable;
use crate::database::tx::{
    prepare_set_store, read_all_keys, read_first_key, rollback_first_key, rollback_set_members,
    write_first_key,
};
use crate::database::{aof_line, arg_str};
use crate::protocol::{CmdLine, RespFrame};
use crate::storage::DataEntity;
use bytes::Bytes;
use rand::seq::SliceRandom;
use std::collections::HashSet;

/// Clones the set at `key`; `Ok(None)` when missing, `Err` on `WRONGTYPE`.
pub(crate) fn load_set(db: &Db, key: &str) -> Result<Option<HashSet<String>>, RespFrame> {
    match db.get_entity(key) {
        None => Ok(None),
        Some(DataEntity::Set(set)) => Ok(Some(set)),
        Some(_) => Err(RespFrame::wrong_type()),
    }
}

fn update_set<R>(
    db: &Db,
    key: &str,
    f: impl FnOnce(&mut HashSet<String>) -> R,
) -> Result<Option<R>, RespFrame> {
    match db.with_entity_mut(key, |entity| match entity {
        DataEntity::Set(set) => Ok(f(set)),
        _ => Err(RespFrame::wrong_type()),
    }) {
        None => Ok(None),
        Some(Ok(result)) => Ok(Some(result)),
        Some(Err(reply)) => Err(reply),
    }
}

fn members_reply(set: &HashSet<String>) -> RespFrame {
    RespFrame::bulk_array(
        set.iter()
            .map(|m| Bytes::copy_from_slice(m.as_bytes()))
            .collect::<Vec<_>>(),
    )
}

/// Samples `n` members with replacement.
fn random_members(set: &HashSet<String>, n: usize) -> Vec<String> {
    let pool: Vec<&String> = set.iter().collect();
    if pool.is_empty() {
        return Vec::new();
    }
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| (*pool.choose(&mut rng).unwrap()).clone())
        .collect()
}

/// Samples up to `n` distinct members.
fn random_distinct_members(set: &HashSet<String>, n: usize) -> Vec<String> {
    let pool: Vec<&String> = set.iter().collect();
    let mut rng = rand::thread_rng();
    pool.choose_multiple(&mut rng, n)
        .map(|m| (*m).clone())
        .collect()
}

fn exec_sadd(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    let members: Vec<String> = args[1..].iter().map(arg_str).collect();

    let added = update_set(db, &key, |set| {
        members.iter().filter(|m| set.insert((*m).clone())).count()
    });
    let added = match added {
        Err(reply) => return reply,
        Ok(Some(count)) => count,
        Ok(None) => {
            let set: HashSet<String> = members.iter().cloned().collect();
            let count = set.len();
            db.put_entity(key, DataEntity::Set(set));
            count
        }
    };

    db.add_aof(aof_line("SADD", args));
    RespFrame::Integer(added as i64)
}

fn exec_srem(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    let members: Vec<String> = args[1..].iter().map(arg_str).collect();

    let removed = update_set(db, &key, |set| {
        let count = members.iter().filter(|m| set.remove(*m)).count();
        (count, set.is_empty())
    });
    match removed {
        Err(reply) => reply,
        Ok(None) => RespFrame::Integer(0),
        Ok(Some((count, emptied))) => {
            if emptied {
                db.remove(&key);
            }
            if count > 0 {
                db.add_aof(aof_line("SREM", args));
            }
            RespFrame::Integer(count as i64)
        }
    }
}

fn exec_sismember(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    let member = arg_str(&args[1]);
    match load_set(db, &key) {
        Err(reply) => reply,
        Ok(None) => RespFrame::Integer(0),
        Ok(Some(set)) => RespFrame::Integer(i64::from(set.contains(&member))),
    }
}

fn exec_scard(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    match load_set(db, &key) {
        Err(reply) => reply,
        Ok(None) => RespFrame::Integer(0),
        Ok(Some(set)) => RespFrame::Integer(set.len() as i64),
    }
}

fn exec_smembers(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    match load_set(db, &key) {
        Err(reply) => reply,
        Ok(None) => RespFrame::Array(vec![]),
        Ok(Some(set)) => members_reply(&set),
    }
}

fn exec_spop(db: &Db, args: &[Bytes]) -> RespFrame {
    if args.len() > 2 {
        return RespFrame::arg_num_error("spop");
    }
    let key = arg_str(&args[0]);

    let count = if args.len() == 2 {
        match std::str::from_utf8(&args[1]).ok().and_then(|s| s.parse::<i64>().ok()) {
            Some(n) if n > 0 => n as usize,
            _ => {
                return RespFrame::error("ERR value is out of range, must be positive");
            }
        }
    } else {
        1
    };

    let popped = update_set(db, &key, |set| {
        let victims = random_distinct_members(set, count.min(set.len()));
        for member in &victims {
            set.remove(member);
        }
        (victims, set.is_empty())
    });
    match popped {
        Err(reply) => reply,
        Ok(None) => RespFrame::Null,
        Ok(Some((victims, emptied))) => {
            if emptied {
                db.remove(&key);
            }
            db.add_aof(aof_line("SPOP", args));
            RespFrame::bulk_array(
                victims
                    .into_iter()
                    .map(|m| Bytes::copy_from_slice(m.as_bytes()))
                    .collect::<Vec<_>>(),
            )
        }
    }
}

fn exec_srandmember(db: &Db, args: &[Bytes]) -> RespFrame {
    if args.len() > 2 {
        return RespFrame::arg_num_error("srandmember");
    }
    let key = arg_str(&args[0]);

    let set = match load_set(db, &key) {
        Err(reply) => return reply,
        Ok(None) => {
            return RespFrame::Null;
        }
        Ok(Some(set)) => set,
    };

    if args.len() == 1 {
        let member = random_members(&set, 1);
        return match member.into_iter().next() {
            Some(m) => RespFrame::bulk(Bytes::copy_from_slice(m.as_bytes())),
            None => RespFrame::Null,
        };
    }

    let count = match std::str::from_utf8(&args[1]).ok().and_then(|s| s.parse::<i64>().ok()) {
        Some(n) => n,
        None => return RespFrame::not_an_integer(),
    };
    let members = match count {
        0 => return RespFrame::Array(vec![]),
        // negative count samples with replacement
        n if n < 0 => random_members(&set, n.unsigned_abs() as usize),
        n => random_distinct_members(&set, n as usize),
    };
    RespFrame::bulk_array(
        members
            .into_iter()
            .map(|m| Bytes::copy_from_slice(m.as_bytes()))
            .collect::<Vec<_>>(),
    )
}

// ----------------------------------------------------------------------
// Set algebra
// ----------------------------------------------------------------------

enum Algebra {
    Inter,
    Union,
    Diff,
}

/// Folds the sets named by `keys`. `Ok(None)` means the result is provably
/// empty (e.g. an absent operand of an intersection).
fn fold_sets(db: &Db, keys: &[Bytes], op: Algebra) -> Result<Option<HashSet<String>>, RespFrame> {
    let mut result: Option<HashSet<String>> = None;
    for (i, key_arg) in keys.iter().enumerate() {
        let key = arg_str(key_arg);
        let set = load_set(db, &key)?;
        match op {
            Algebra::Inter => {
                let set = match set {
                    Some(set) => set,
                    None => return Ok(None),
                };
                result = Some(match result {
                    None => set,
                    Some(acc) => acc.intersection(&set).cloned().collect(),
                });
                if result.as_ref().is_some_and(HashSet::is_empty) {
                    return Ok(None);
                }
            }
            Algebra::Union => {
                if let Some(set) = set {
                    result = Some(match result {
                        None => set,
                        Some(mut acc) => {
                            acc.extend(set);
                            acc
                        }
                    });
                }
            }
            Algebra::Diff => {
                if i == 0 {
                    match set {
                        Some(set) => result = Some(set),
                        None => return Ok(None),
                    }
                } else if let Some(set) = set {
                    if let Some(acc) = result.take() {
                        let next: HashSet<String> = acc.difference(&set).cloned().collect();
                        if next.is_empty() {
                            return Ok(None);
                        }
                        result = Some(next);
                    }
                }
            }
        }
    }
    Ok(result.filter(|set| !set.is_empty()))
}

fn exec_algebra(db: &Db, args: &[Bytes], op: Algebra) -> RespFrame {
    match fold_sets(db, args, op) {
        Err(reply) => reply,
        Ok(None) => RespFrame::Array(vec![]),
        Ok(Some(result)) => members_reply(&result),
    }
}

fn exec_sinter(db: &Db, args: &[Bytes]) -> RespFrame {
    exec_algebra(db, args, Algebra::Inter)
}

fn exec_sunion(db: &Db, args: &[Bytes]) -> RespFrame {
    exec_algebra(db, args, Algebra::Union)
}

fn exec_sdiff(db: &Db, args: &[Bytes]) -> RespFrame {
    exec_algebra(db, args, Algebra::Diff)
}

/// Store variant: an empty result deletes the destination and replies 0.
/// The command itself is always appended to the AOF — replay recomputes
/// the same result from the same sources, including the deletion.
fn exec_algebra_store(db: &Db, args: &[Bytes], name: &str, op: Algebra) -> RespFrame {
    let dest = arg_str(&args[0]);
    let result = match fold_sets(db, &args[1..], op) {
        Err(reply) => return reply,
        Ok(result) => result,
    };

    let len = match result {
        None => {
            db.remove(&dest);
            0
        }
        Some(set) => {
            let len = set.len();
            db.put_entity(dest, DataEntity::Set(set));
            len
        }
    };
    db.add_aof(aof_line(name, args));
    RespFrame::Integer(len as i64)
}

fn exec_sinterstore(db: &Db, args: &[Bytes]) -> RespFrame {
    exec_algebra_store(db, args, "SINTERSTORE", Algebra::Inter)
}

fn exec_sunionstore(db: &Db, args: &[Bytes]) -> RespFrame {
    exec_algebra_store(db, args, "SUNIONSTORE", Algebra::Union)
}

fn exec_sdiffstore(db: &Db, args: &[Bytes]) -> RespFrame {
    exec_algebra_store(db, args, "SDIFFSTORE", Algebra::Diff)
}

/// Undo for `SADD`/`SREM`/`SPOP`: restore membership per member.
fn undo_set_change(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let key = arg_str(&args[0]);
    let members: Vec<String> = args[1..].iter().map(arg_str).collect();
    rollback_set_members(db, &key, &members)
}

pub(crate) fn register(table: &mut CommandTable) {
    use super::router::register;
    register(table, "sadd", exec_sadd, write_first_key, Some(undo_set_change), -3);
    register(table, "sismember", exec_sismember, read_first_key, None, 3);
    register(table, "srem", exec_srem, write_first_key, Some(undo_set_change), -3);
    register(table, "spop", exec_spop, write_first_key, Some(rollback_first_key), -2);
    register(table, "scard", exec_scard, read_first_key, None, 2);
    register(table, "smembers", exec_smembers, read_first_key, None, 2);
    register(table, "srandmember", exec_srandmember, read_first_key, None, -2);
    register(table, "sinter", exec_sinter, read_all_keys, None, -2);
    register(
        table,
        "sinterstore",
        exec_sinterstore,
        prepare_set_store,
        Some(rollback_first_key),
        -3,
    );
    register(table, "sunion", exec_sunion, read_all_keys, None, -2);
    register(
        table,
        "sunionstore",
        exec_sunionstore,
        prepare_set_store,
        Some(rollback_first_key),
        -3,
    );
    register(table, "sdiff", exec_sdiff, read_all_keys, None, -2);
    register(
        table,
        "sdiffstore",
        exec_sdiffstore,
        prepare_set_store,
        Some(rollback_first_key),
        -3,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cmd_line;

    fn sorted_members(reply: RespFrame) -> Vec<String> {
        match reply {
            RespFrame::Array(frames) => {
                let mut members: Vec<String> = frames
                    .into_iter()
                    .map(|f| match f {
                        RespFrame::Bulk(b) => String::from_utf8_lossy(&b).into_owned(),
                        other => panic!("non-bulk member {:?}", other),
                    })
                    .collect();
                members.sort();
                members
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn sadd_counts_new_members_only() {
        let db = Db::new_basic(0);
        assert_eq!(
            db.exec(&cmd_line(&["SADD", "s", "x", "y", "z"])),
            RespFrame::Integer(3)
        );
        assert_eq!(db.exec(&cmd_line(&["SADD", "s", "x"])), RespFrame::Integer(0));
        assert_eq!(
            db.exec(&cmd_line(&["SISMEMBER", "s", "y"])),
            RespFrame::Integer(1)
        );
        assert_eq!(
            db.exec(&cmd_line(&["SISMEMBER", "s", "q"])),
            RespFrame::Integer(0)
        );
        assert_eq!(db.exec(&cmd_line(&["SCARD", "s"])), RespFrame::Integer(3));
    }

    #[test]
    fn srem_drains_and_deletes() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SADD", "s", "a", "b"]));
        assert_eq!(
            db.exec(&cmd_line(&["SREM", "s", "a", "ghost"])),
            RespFrame::Integer(1)
        );
        assert_eq!(db.exec(&cmd_line(&["SREM", "s", "b"])), RespFrame::Integer(1));
        assert_eq!(db.exec(&cmd_line(&["EXISTS", "s"])), RespFrame::Integer(0));
        assert_eq!(db.exec(&cmd_line(&["SREM", "s", "a"])), RespFrame::Integer(0));
    }

    #[test]
    fn smembers_lists_everything() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SADD", "s", "a", "b", "c"]));
        assert_eq!(
            sorted_members(db.exec(&cmd_line(&["SMEMBERS", "s"]))),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            db.exec(&cmd_line(&["SMEMBERS", "ghost"])),
            RespFrame::Array(vec![])
        );
    }

    #[test]
    fn spop_removes_distinct_members() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SADD", "s", "a", "b", "c"]));
        let popped = sorted_members(db.exec(&cmd_line(&["SPOP", "s", "2"])));
        assert_eq!(popped.len(), 2);
        assert_eq!(db.exec(&cmd_line(&["SCARD", "s"])), RespFrame::Integer(1));
        for member in popped {
            assert_eq!(
                db.exec(&cmd_line(&["SISMEMBER", "s", &member])),
                RespFrame::Integer(0)
            );
        }
    }

    #[test]
    fn spop_clamps_to_cardinality_and_deletes_empty() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SADD", "s", "a", "b"]));
        let popped = sorted_members(db.exec(&cmd_line(&["SPOP", "s", "10"])));
        assert_eq!(popped, vec!["a", "b"]);
        assert_eq!(db.exec(&cmd_line(&["EXISTS", "s"])), RespFrame::Integer(0));
        assert_eq!(db.exec(&cmd_line(&["SPOP", "s"])), RespFrame::Null);
    }

    #[test]
    fn spop_rejects_non_positive_counts() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SADD", "s", "a"]));
        assert_eq!(
            db.exec(&cmd_line(&["SPOP", "s", "0"])),
            RespFrame::error("ERR value is out of range, must be positive")
        );
        assert_eq!(
            db.exec(&cmd_line(&["SPOP", "s", "-1"])),
            RespFrame::error("ERR value is out of range, must be positive")
        );
    }

    #[test]
    fn srandmember_sampling_modes() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SADD", "s", "a", "b", "c"]));

        match db.exec(&cmd_line(&["SRANDMEMBER", "s"])) {
            RespFrame::Bulk(_) => {}
            other => panic!("expected bulk, got {:?}", other),
        }
        assert_eq!(
            db.exec(&cmd_line(&["SRANDMEMBER", "s", "0"])),
            RespFrame::Array(vec![])
        );

        // positive: distinct, clamped
        let distinct = sorted_members(db.exec(&cmd_line(&["SRANDMEMBER", "s", "10"])));
        assert_eq!(distinct, vec!["a", "b", "c"]);

        // negative: with replacement, exact length
        match db.exec(&cmd_line(&["SRANDMEMBER", "s", "-7"])) {
            RespFrame::Array(frames) => assert_eq!(frames.len(), 7),
            other => panic!("expected array, got {:?}", other),
        }

        // sampling never mutates
        assert_eq!(db.exec(&cmd_line(&["SCARD", "s"])), RespFrame::Integer(3));
        assert_eq!(db.exec(&cmd_line(&["SRANDMEMBER", "ghost"])), RespFrame::Null);
    }

    #[test]
    fn sinter_and_sinterstore() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SADD", "a", "1", "2", "3"]));
        db.exec(&cmd_line(&["SADD", "b", "2", "3", "4"]));

        assert_eq!(
            sorted_members(db.exec(&cmd_line(&["SINTER", "a", "b"]))),
            vec!["2", "3"]
        );
        assert_eq!(
            db.exec(&cmd_line(&["SINTERSTORE", "c", "a", "b"])),
            RespFrame::Integer(2)
        );
        assert_eq!(
            sorted_members(db.exec(&cmd_line(&["SMEMBERS", "c"]))),
            vec!["2", "3"]
        );
    }

    #[test]
    fn empty_store_result_deletes_destination() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SADD", "a", "1"]));
        db.exec(&cmd_line(&["SADD", "b", "2"]));
        db.exec(&cmd_line(&["SET", "dest", "stale"]));

        assert_eq!(
            db.exec(&cmd_line(&["SINTERSTORE", "dest", "a", "b"])),
            RespFrame::Integer(0)
        );
        assert_eq!(db.exec(&cmd_line(&["EXISTS", "dest"])), RespFrame::Integer(0));

        // missing operand of an intersection also empties the result
        db.exec(&cmd_line(&["SET", "dest", "stale"]));
        assert_eq!(
            db.exec(&cmd_line(&["SINTERSTORE", "dest", "a", "ghost"])),
            RespFrame::Integer(0)
        );
        assert_eq!(db.exec(&cmd_line(&["EXISTS", "dest"])), RespFrame::Integer(0));
    }

    #[test]
    fn sunion_and_sdiff() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SADD", "a", "1", "2"]));
        db.exec(&cmd_line(&["SADD", "b", "2", "3"]));

        assert_eq!(
            sorted_members(db.exec(&cmd_line(&["SUNION", "a", "b"]))),
            vec!["1", "2", "3"]
        );
        assert_eq!(
            sorted_members(db.exec(&cmd_line(&["SDIFF", "a", "b"]))),
            vec!["1"]
        );
        assert_eq!(
            db.exec(&cmd_line(&["SDIFF", "ghost", "a"])),
            RespFrame::Array(vec![])
        );
        assert_eq!(
            db.exec(&cmd_line(&["SUNIONSTORE", "u", "a", "b"])),
            RespFrame::Integer(3)
        );
        assert_eq!(
            db.exec(&cmd_line(&["SDIFFSTORE", "d", "a", "b"])),
            RespFrame::Integer(1)
        );
        assert_eq!(sorted_members(db.exec(&cmd_line(&["SMEMBERS", "d"]))), vec!["1"]);
    }

    #[test]
    fn set_command_on_string_key_is_wrongtype() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "s", "v"]));
        assert_eq!(db.exec(&cmd_line(&["SADD", "s", "a"])), RespFrame::wrong_type());
        assert_eq!(db.exec(&cmd_line(&["SMEMBERS", "s"])), RespFrame::wrong_type());
        assert_eq!(
            db.exec(&cmd_line(&["SINTER", "s", "s"])),
            RespFrame::wrong_type()
        );
    }

    #[test]
    fn undo_sadd_and_srem_restore_membership() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SADD", "s", "keep", "drop"]));

        let mutation = cmd_line(&["SADD", "s", "new", "keep"]);
        let undo = db.undo_logs(&mutation);
        db.exec(&mutation);
        for line in &undo {
            db.exec(line);
        }
        assert_eq!(
            sorted_members(db.exec(&cmd_line(&["SMEMBERS", "s"]))),
            vec!["drop", "keep"]
        );

        let mutation = cmd_line(&["SREM", "s", "drop"]);
        let undo = db.undo_logs(&mutation);
        db.exec(&mutation);
        for line in &undo {
            db.exec(line);
        }
        assert_eq!(
            sorted_members(db.exec(&cmd_line(&["SMEMBERS", "s"]))),
            vec!["drop", "keep"]
        );
    }
}
