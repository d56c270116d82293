//! List commands.
//!
//! Lists are `VecDeque<Bytes>` entities. A list never exists empty: any
//! removal that drains the last element deletes the key under the same key
//! lock, so `LPUSHX`/`RPUSHX` and the pop family can treat "missing" and
//! "empty" as one case.

use crate::database::core::Db;
use crate::database::router::CommandTable;
use crate::database::tx::{
    read_first_key, rollback_first_key, write_first_key, write_first_two_keys,
};
use crate::database::{aof_line, arg_str};
use crate::protocol::{cmd_line, CmdLine, RespFrame};
use crate::storage::DataEntity;
use bytes::Bytes;
use std::collections::VecDeque;

/// Runs `f` on the list at `key` under the shard read lock.
///
/// `Ok(None)` means the key does not exist; `Err` carries the `WRONGTYPE`
/// reply.
fn read_list<R>(
    db: &Db,
    key: &str,
    f: impl FnOnce(&VecDeque<Bytes>) -> R,
) -> Result<Option<R>, RespFrame> {
    match db.with_entity(key, |entity| match entity {
        DataEntity::List(list) => Ok(f(list)),
        _ => Err(RespFrame::wrong_type()),
    }) {
        None => Ok(None),
        Some(Ok(result)) => Ok(Some(result)),
        Some(Err(reply)) => Err(reply),
    }
}

/// Like [`read_list`] but with in-place mutation under the shard write
/// lock. Whole-command atomicity is provided by the pipeline's key locks.
fn update_list<R>(
    db: &Db,
    key: &str,
    f: impl FnOnce(&mut VecDeque<Bytes>) -> R,
) -> Result<Option<R>, RespFrame> {
    match db.with_entity_mut(key, |entity| match entity {
        DataEntity::List(list) => Ok(f(list)),
        _ => Err(RespFrame::wrong_type()),
    }) {
        None => Ok(None),
        Some(Ok(result)) => Ok(Some(result)),
        Some(Err(reply)) => Err(reply),
    }
}

fn parse_index(arg: &Bytes) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

fn exec_lindex(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    let index = match parse_index(&args[1]) {
        Some(n) => n,
        None => return RespFrame::not_an_integer(),
    };

    let looked_up = read_list(db, &key, |list| {
        let size = list.len() as i64;
        let index = if index < 0 { size + index } else { index };
        if index < 0 || index >= size {
            None
        } else {
            list.get(index as usize).cloned()
        }
    });
    match looked_up {
        Err(reply) => reply,
        Ok(None) | Ok(Some(None)) => RespFrame::Null,
        Ok(Some(Some(value))) => RespFrame::Bulk(value),
    }
}

fn exec_llen(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    match read_list(db, &key, VecDeque::len) {
        Err(reply) => reply,
        Ok(None) => RespFrame::Integer(0),
        Ok(Some(len)) => RespFrame::Integer(len as i64),
    }
}

fn exec_lpop(db: &Db, args: &[Bytes]) -> RespFrame {
    pop(db, args, "LPOP", VecDeque::pop_front)
}

fn exec_rpop(db: &Db, args: &[Bytes]) -> RespFrame {
    pop(db, args, "RPOP", VecDeque::pop_back)
}

fn pop(
    db: &Db,
    args: &[Bytes],
    name: &str,
    take: fn(&mut VecDeque<Bytes>) -> Option<Bytes>,
) -> RespFrame {
    let key = arg_str(&args[0]);
    let popped = update_list(db, &key, |list| (take(list), list.is_empty()));
    match popped {
        Err(reply) => reply,
        Ok(None) | Ok(Some((None, _))) => RespFrame::Null,
        Ok(Some((Some(value), emptied))) => {
            if emptied {
                db.remove(&key);
            }
            db.add_aof(aof_line(name, args));
            RespFrame::Bulk(value)
        }
    }
}

fn push(
    db: &Db,
    args: &[Bytes],
    name: &str,
    require_existing: bool,
    front: bool,
) -> RespFrame {
    let key = arg_str(&args[0]);
    let values = &args[1..];

    let add = |list: &mut VecDeque<Bytes>| {
        for value in values {
            if front {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
        }
        list.len()
    };

    let len = match update_list(db, &key, add) {
        Err(reply) => return reply,
        Ok(Some(len)) => len,
        Ok(None) => {
            if require_existing {
                return RespFrame::Integer(0);
            }
            let mut list = VecDeque::with_capacity(values.len());
            add(&mut list);
            let len = list.len();
            db.put_entity(key, DataEntity::List(list));
            len
        }
    };

    db.add_aof(aof_line(name, args));
    RespFrame::Integer(len as i64)
}

fn exec_lpush(db: &Db, args: &[Bytes]) -> RespFrame {
    push(db, args, "LPUSH", false, true)
}

fn exec_lpushx(db: &Db, args: &[Bytes]) -> RespFrame {
    push(db, args, "LPUSHX", true, true)
}

fn exec_rpush(db: &Db, args: &[Bytes]) -> RespFrame {
    push(db, args, "RPUSH", false, false)
}

fn exec_rpushx(db: &Db, args: &[Bytes]) -> RespFrame {
    push(db, args, "RPUSHX", true, false)
}

fn exec_lrange(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    let (start, stop) = match (parse_index(&args[1]), parse_index(&args[2])) {
        (Some(start), Some(stop)) => (start, stop),
        _ => return RespFrame::not_an_integer(),
    };

    let ranged = read_list(db, &key, |list| {
        let size = list.len() as i64;
        if size == 0 {
            return Vec::new();
        }

        // inclusive stop with negative-from-tail indices, normalized to a
        // half-open [start, stop) window
        let start = if start < -size {
            0
        } else if start < 0 {
            size + start
        } else if start >= size {
            return Vec::new();
        } else {
            start
        };
        let stop = if stop < -size {
            0
        } else if stop < 0 {
            size + stop + 1
        } else if stop < size {
            stop + 1
        } else {
            size
        };
        let stop = stop.max(start);

        list.iter()
            .skip(start as usize)
            .take((stop - start) as usize)
            .cloned()
            .collect::<Vec<_>>()
    });

    match ranged {
        Err(reply) => reply,
        Ok(None) => RespFrame::Array(vec![]),
        Ok(Some(values)) => RespFrame::bulk_array(values),
    }
}

fn exec_lrem(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    let count = match parse_index(&args[1]) {
        Some(n) => n,
        None => return RespFrame::not_an_integer(),
    };
    let value = args[2].clone();

    let removed = update_list(db, &key, |list| {
        (remove_occurrences(list, &value, count), list.is_empty())
    });
    match removed {
        Err(reply) => reply,
        Ok(None) => RespFrame::Integer(0),
        Ok(Some((removed, emptied))) => {
            if emptied {
                db.remove(&key);
            }
            if removed > 0 {
                db.add_aof(aof_line("LREM", args));
            }
            RespFrame::Integer(removed as i64)
        }
    }
}

/// `count == 0` removes every occurrence; `count > 0` removes up to `count`
/// scanning from the head; `count < 0` removes up to `-count` from the
/// tail.
fn remove_occurrences(list: &mut VecDeque<Bytes>, value: &Bytes, count: i64) -> usize {
    if count == 0 {
        let before = list.len();
        list.retain(|v| v != value);
        return before - list.len();
    }

    let limit = count.unsigned_abs() as usize;
    let mut removed = 0;
    if count > 0 {
        let mut kept = VecDeque::with_capacity(list.len());
        for v in list.drain(..) {
            if removed < limit && &v == value {
                removed += 1;
            } else {
                kept.push_back(v);
            }
        }
        *list = kept;
    } else {
        let mut kept = Vec::with_capacity(list.len());
        for v in list.drain(..).rev() {
            if removed < limit && &v == value {
                removed += 1;
            } else {
                kept.push(v);
            }
        }
        kept.reverse();
        *list = kept.into();
    }
    removed
}

fn exec_lset(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    let index = match parse_index(&args[1]) {
        Some(n) => n,
        None => return RespFrame::not_an_integer(),
    };
    let value = args[2].clone();

    let updated = update_list(db, &key, |list| {
        let size = list.len() as i64;
        let index = if index < 0 { size + index } else { index };
        if index < 0 || index >= size {
            return Err(());
        }
        list[index as usize] = value.clone();
        Ok(())
    });
    match updated {
        Err(reply) => reply,
        Ok(None) => RespFrame::error("ERR no such key"),
        Ok(Some(Err(()))) => RespFrame::error("ERR index out of range"),
        Ok(Some(Ok(()))) => {
            db.add_aof(aof_line("LSET", args));
            RespFrame::ok()
        }
    }
}

fn exec_rpoplpush(db: &Db, args: &[Bytes]) -> RespFrame {
    let source = arg_str(&args[0]);
    let dest = arg_str(&args[1]);

    // source must exist as a list
    match read_list(db, &source, |_| ()) {
        Err(reply) => return reply,
        Ok(None) => return RespFrame::Null,
        Ok(Some(())) => {}
    }
    // destination must be a list; auto-created when missing
    match db.get_entity(&dest) {
        Some(DataEntity::List(_)) => {}
        Some(_) => return RespFrame::wrong_type(),
        None => {
            db.put_entity(dest.clone(), DataEntity::List(VecDeque::new()));
        }
    }

    let popped = update_list(db, &source, |list| (list.pop_back(), list.is_empty()));
    let (value, emptied) = match popped {
        Ok(Some((Some(value), emptied))) => (value, emptied),
        _ => return RespFrame::Null,
    };
    let _ = update_list(db, &dest, |list| list.push_front(value.clone()));
    if emptied {
        db.remove(&source);
    }

    db.add_aof(aof_line("RPOPLPUSH", args));
    RespFrame::Bulk(value)
}

// ----------------------------------------------------------------------
// Undo generators
// ----------------------------------------------------------------------

fn undo_lpop(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let key = arg_str(&args[0]);
    match read_list(db, &key, |list| list.front().cloned()) {
        Ok(Some(Some(head))) => vec![aof_line("LPUSH", &[args[0].clone(), head])],
        _ => Vec::new(),
    }
}

fn undo_rpop(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let key = arg_str(&args[0]);
    match read_list(db, &key, |list| list.back().cloned()) {
        Ok(Some(Some(tail))) => vec![aof_line("RPUSH", &[args[0].clone(), tail])],
        _ => Vec::new(),
    }
}

/// Undo for `LPUSH`/`LPUSHX`: pop as many heads as were pushed.
fn undo_lpush(_db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let key = arg_str(&args[0]);
    (1..args.len()).map(|_| cmd_line(&["LPOP", &key])).collect()
}

/// Undo for `RPUSH`/`RPUSHX`: pop as many tails as were pushed.
fn undo_rpush(_db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let key = arg_str(&args[0]);
    (1..args.len()).map(|_| cmd_line(&["RPOP", &key])).collect()
}

fn undo_lset(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let key = arg_str(&args[0]);
    let index = match parse_index(&args[1]) {
        Some(n) => n,
        None => return Vec::new(),
    };
    let previous = read_list(db, &key, |list| {
        let size = list.len() as i64;
        let index = if index < 0 { size + index } else { index };
        if index < 0 || index >= size {
            None
        } else {
            list.get(index as usize).cloned()
        }
    });
    match previous {
        Ok(Some(Some(value))) => {
            vec![aof_line("LSET", &[args[0].clone(), args[1].clone(), value])]
        }
        _ => Vec::new(),
    }
}

fn undo_rpoplpush(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let source = arg_str(&args[0]);
    let dest = arg_str(&args[1]);
    let tail = match read_list(db, &source, |list| list.back().cloned()) {
        Ok(Some(Some(tail))) => tail,
        _ => return Vec::new(),
    };
    vec![
        aof_line("RPUSH", &[args[0].clone(), tail]),
        cmd_line(&["LPOP", &dest]),
    ]
}

pub(crate) fn register(table: &mut CommandTable) {
    use super::router::register;
    register(table, "lindex", exec_lindex, read_first_key, None, 3);
    register(table, "llen", exec_llen, read_first_key, None, 2);
    register(table, "lpop", exec_lpop, write_first_key, Some(undo_lpop), 2);
    register(table, "lpush", exec_lpush, write_first_key, Some(undo_lpush), -3);
    register(table, "lpushx", exec_lpushx, write_first_key, Some(undo_lpush), -3);
    register(table, "lrange", exec_lrange, read_first_key, None, 4);
    register(table, "lrem", exec_lrem, write_first_key, Some(rollback_first_key), 4);
    register(table, "lset", exec_lset, write_first_key, Some(undo_lset), 4);
    register(table, "rpop", exec_rpop, write_first_key, Some(undo_rpop), 2);
    register(
        table,
        "rpoplpush",
        exec_rpoplpush,
        write_first_two_keys,
        Some(undo_rpoplpush),
        3,
    );
    register(table, "rpush", exec_rpush, write_first_key, Some(undo_rpush), -3);
    register(table, "rpushx", exec_rpushx, write_first_key, Some(undo_rpush), -3);
}
