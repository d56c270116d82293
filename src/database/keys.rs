//! Generic key-space commands: `DEL`, `EXISTS`, the expiry family,
//! `PERSIST`, `TYPE`, and `KEYS`.
//!
//! All expiry variants normalize to a single AOF form, `PEXPIREAT key ms`,
//! so the replay loader restores deadlines from one command regardless of
//! how they were set.

use crate::database::core::Db;
use crate::database::router::CommandTable;
use crate::database::tx::{
    read_all_keys, read_first_key, rollback_given_keys, ttl_cmd, write_all_keys, write_first_key,
};
use crate::database::{aof_line, arg_str, now_ms};
use crate::protocol::{cmd_line, CmdLine, RespFrame};
use bytes::Bytes;

fn parse_i64(arg: &Bytes) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

fn exec_del(db: &Db, args: &[Bytes]) -> RespFrame {
    let keys: Vec<String> = args.iter().map(arg_str).collect();
    let deleted = db.removes(&keys);
    if deleted > 0 {
        db.add_aof(aof_line("DEL", args));
    }
    RespFrame::Integer(deleted as i64)
}

fn undo_del(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let keys: Vec<String> = args.iter().map(arg_str).collect();
    rollback_given_keys(db, &keys)
}

fn exec_exists(db: &Db, args: &[Bytes]) -> RespFrame {
    let count = args
        .iter()
        .filter(|arg| db.get_entity(&arg_str(arg)).is_some())
        .count();
    RespFrame::Integer(count as i64)
}

/// Shared tail of the expiry family once the deadline is absolute.
fn expire_at(db: &Db, key: &str, at_ms: u64) -> RespFrame {
    if db.get_entity(key).is_none() {
        return RespFrame::Integer(0);
    }
    db.expire(key, at_ms);
    db.add_aof(cmd_line(&["PEXPIREAT", key, &at_ms.to_string()]));
    RespFrame::Integer(1)
}

fn exec_expire(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    let secs = match parse_i64(&args[1]) {
        Some(n) => n,
        None => return RespFrame::not_an_integer(),
    };
    expire_at(db, &key, now_ms().saturating_add_signed(secs.saturating_mul(1000)))
}

fn exec_pexpire(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    let ms = match parse_i64(&args[1]) {
        Some(n) => n,
        None => return RespFrame::not_an_integer(),
    };
    expire_at(db, &key, now_ms().saturating_add_signed(ms))
}

fn exec_expireat(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    let secs = match parse_i64(&args[1]) {
        Some(n) if n >= 0 => n,
        _ => return RespFrame::not_an_integer(),
    };
    expire_at(db, &key, (secs as u64).saturating_mul(1000))
}

fn exec_pexpireat(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    let ms = match parse_i64(&args[1]) {
        Some(n) if n >= 0 => n,
        _ => return RespFrame::not_an_integer(),
    };
    expire_at(db, &key, ms as u64)
}

fn undo_expire(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let key = arg_str(&args[0]);
    if db.get_entity(&key).is_none() {
        return Vec::new();
    }
    vec![ttl_cmd(db, &key)]
}

fn exec_ttl(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    if db.get_entity(&key).is_none() {
        return RespFrame::Integer(-2);
    }
    match db.expire_time(&key) {
        None => RespFrame::Integer(-1),
        Some(at) => {
            let remaining = at.saturating_sub(now_ms());
            // round up so a deadline 1ms away still reports 1 second
            RespFrame::Integer(((remaining + 999) / 1000) as i64)
        }
    }
}

fn exec_pttl(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    if db.get_entity(&key).is_none() {
        return RespFrame::Integer(-2);
    }
    match db.expire_time(&key) {
        None => RespFrame::Integer(-1),
        Some(at) => RespFrame::Integer(at.saturating_sub(now_ms()) as i64),
    }
}

fn exec_persist(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    if db.get_entity(&key).is_none() || db.expire_time(&key).is_none() {
        return RespFrame::Integer(0);
    }
    db.persist(&key);
    db.add_aof(aof_line("PERSIST", args));
    RespFrame::Integer(1)
}

fn exec_type(db: &Db, args: &[Bytes]) -> RespFrame {
    let key = arg_str(&args[0]);
    match db.get_entity(&key) {
        Some(entity) => RespFrame::status(entity.type_name()),
        None => RespFrame::status("none"),
    }
}

fn exec_keys(db: &Db, args: &[Bytes]) -> RespFrame {
    let pattern = arg_str(&args[0]);
    let mut matched = Vec::new();
    db.for_each(|key, _, expiry| {
        let live = match expiry {
            Some(at) => now_ms() < at,
            None => true,
        };
        if live && glob_match(pattern.as_bytes(), key.as_bytes()) {
            matched.push(Bytes::copy_from_slice(key.as_bytes()));
        }
        true
    });
    RespFrame::bulk_array(matched)
}

/// Glob matcher for `KEYS`: `*`, `?`, and `[...]` character classes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    if pattern.is_empty() {
        return text.is_empty();
    }
    match pattern[0] {
        b'*' => {
            for i in 0..=text.len() {
                if glob_match(&pattern[1..], &text[i..]) {
                    return true;
                }
            }
            false
        }
        b'?' => !text.is_empty() && glob_match(&pattern[1..], &text[1..]),
        b'[' => {
            let close = match pattern.iter().position(|&b| b == b']') {
                Some(pos) => pos,
                None => return false,
            };
            if text.is_empty() {
                return false;
            }
            let class = &pattern[1..close];
            class.contains(&text[0]) && glob_match(&pattern[close + 1..], &text[1..])
        }
        literal => !text.is_empty() && text[0] == literal && glob_match(&pattern[1..], &text[1..]),
    }
}

pub(crate) fn register(table: &mut CommandTable) {
    use super::router::register;
    register(table, "del", exec_del, write_all_keys, Some(undo_del), -2);
    register(table, "exists", exec_exists, read_all_keys, None, -2);
    register(
        table,
        "expire",
        exec_expire,
        write_first_key,
        Some(undo_expire),
        3,
    );
    register(
        table,
        "pexpire",
        exec_pexpire,
        write_first_key,
        Some(undo_expire),
        3,
    );
    register(
        table,
        "expireat",
        exec_expireat,
        write_first_key,
        Some(undo_expire),
        3,
    );
    register(
        table,
        "pexpireat",
        exec_pexpireat,
        write_first_key,
        Some(undo_expire),
        3,
    );
    register(table, "ttl", exec_ttl, read_first_key, None, 2);
    register(table, "pttl", exec_pttl, read_first_key, None, 2);
    register(
        table,
        "persist",
        exec_persist,
        write_first_key,
        Some(undo_expire),
        2,
    );
    register(table, "type", exec_type, read_first_key, None, 2);
    register(table, "keys", exec_keys, super::tx::no_keys, None, 2);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cmd_line;

    #[test]
    fn del_counts_existing_keys_only() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "a", "1"]));
        db.exec(&cmd_line(&["SET", "b", "2"]));
        assert_eq!(
            db.exec(&cmd_line(&["DEL", "a", "ghost", "b"])),
            RespFrame::Integer(2)
        );
        assert_eq!(db.exec(&cmd_line(&["EXISTS", "a", "b"])), RespFrame::Integer(0));
    }

    #[test]
    fn exists_counts_per_key() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "a", "1"]));
        assert_eq!(
            db.exec(&cmd_line(&["EXISTS", "a", "a", "ghost"])),
            RespFrame::Integer(2)
        );
    }

    #[test]
    fn ttl_reports_missing_and_persistent_keys() {
        let db = Db::new_basic(0);
        assert_eq!(db.exec(&cmd_line(&["TTL", "ghost"])), RespFrame::Integer(-2));
        db.exec(&cmd_line(&["SET", "k", "v"]));
        assert_eq!(db.exec(&cmd_line(&["TTL", "k"])), RespFrame::Integer(-1));
        assert_eq!(db.exec(&cmd_line(&["PTTL", "k"])), RespFrame::Integer(-1));
    }

    #[test]
    fn expire_sets_a_deadline_and_persist_clears_it() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "k", "v"]));
        assert_eq!(
            db.exec(&cmd_line(&["EXPIRE", "k", "100"])),
            RespFrame::Integer(1)
        );
        match db.exec(&cmd_line(&["TTL", "k"])) {
            RespFrame::Integer(secs) => assert!((1..=100).contains(&secs)),
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(db.exec(&cmd_line(&["PERSIST", "k"])), RespFrame::Integer(1));
        assert_eq!(db.exec(&cmd_line(&["TTL", "k"])), RespFrame::Integer(-1));
        assert_eq!(db.exec(&cmd_line(&["PERSIST", "k"])), RespFrame::Integer(0));
    }

    #[test]
    fn expire_on_missing_key_is_zero() {
        let db = Db::new_basic(0);
        assert_eq!(
            db.exec(&cmd_line(&["EXPIRE", "ghost", "10"])),
            RespFrame::Integer(0)
        );
    }

    #[test]
    fn pexpireat_in_the_past_makes_key_invisible() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "k", "v"]));
        let past = now_ms().saturating_sub(1000);
        db.exec(&cmd_line(&["PEXPIREAT", "k", &past.to_string()]));
        assert_eq!(db.exec(&cmd_line(&["GET", "k"])), RespFrame::Null);
        assert_eq!(db.exec(&cmd_line(&["EXISTS", "k"])), RespFrame::Integer(0));
    }

    #[test]
    fn type_reports_entity_kind() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "s", "v"]));
        db.exec(&cmd_line(&["RPUSH", "l", "v"]));
        db.exec(&cmd_line(&["SADD", "st", "v"]));
        assert_eq!(db.exec(&cmd_line(&["TYPE", "s"])), RespFrame::status("string"));
        assert_eq!(db.exec(&cmd_line(&["TYPE", "l"])), RespFrame::status("list"));
        assert_eq!(db.exec(&cmd_line(&["TYPE", "st"])), RespFrame::status("set"));
        assert_eq!(
            db.exec(&cmd_line(&["TYPE", "ghost"])),
            RespFrame::status("none")
        );
    }

    #[test]
    fn keys_pattern_matching() {
        let db = Db::new_basic(0);
        for key in ["hello", "hallo", "hxllo", "world"] {
            db.exec(&cmd_line(&["SET", key, "v"]));
        }

        let reply = db.exec(&cmd_line(&["KEYS", "h?llo"]));
        match reply {
            RespFrame::Array(frames) => assert_eq!(frames.len(), 3),
            other => panic!("unexpected reply {:?}", other),
        }

        let reply = db.exec(&cmd_line(&["KEYS", "h[ae]llo"]));
        match reply {
            RespFrame::Array(frames) => assert_eq!(frames.len(), 2),
            other => panic!("unexpected reply {:?}", other),
        }

        let reply = db.exec(&cmd_line(&["KEYS", "*"]));
        match reply {
            RespFrame::Array(frames) => assert_eq!(frames.len(), 4),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn glob_edge_cases() {
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"a*c", b"abbbc"));
        assert!(!glob_match(b"a?c", b"ac"));
        assert!(!glob_match(b"[ab", b"a"));
    }

    #[test]
    fn expire_undo_restores_deadline() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "k", "v"]));
        let at = now_ms() + 50_000;
        db.exec(&cmd_line(&["PEXPIREAT", "k", &at.to_string()]));

        // undo of PERSIST should re-arm the original deadline
        let undo = db.undo_logs(&cmd_line(&["PERSIST", "k"]));
        assert_eq!(undo, vec![cmd_line(&["PEXPIREAT", "k", &at.to_string()])]);

        db.exec(&cmd_line(&["PERSIST", "k"]));
        for line in &undo {
            db.exec(line);
        }
        assert_eq!(db.expire_time("k"), Some(at));
    }
}
