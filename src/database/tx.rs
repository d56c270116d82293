//! Shared `prepare` and rollback helpers.
//!
//! `prepare` functions split a command's arguments into write and read key
//! sets for version bumping and lock acquisition. The rollback helpers
//! build undo logs: command sequences that restore the pre-image of the
//! affected keys, the substrate a transaction coordinator would replay on
//! abort.

use crate::aof::marshal::entity_to_cmd;
use crate::database::core::Db;
use crate::database::{arg_str, set};
use crate::protocol::{cmd_line, CmdLine};
use bytes::Bytes;

pub(crate) fn no_keys(_args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (Vec::new(), Vec::new())
}

pub(crate) fn read_first_key(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    match args.first() {
        Some(key) => (Vec::new(), vec![arg_str(key)]),
        None => (Vec::new(), Vec::new()),
    }
}

pub(crate) fn write_first_key(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    match args.first() {
        Some(key) => (vec![arg_str(key)], Vec::new()),
        None => (Vec::new(), Vec::new()),
    }
}

pub(crate) fn write_all_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (args.iter().map(arg_str).collect(), Vec::new())
}

pub(crate) fn read_all_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (Vec::new(), args.iter().map(arg_str).collect())
}

/// `RPOPLPUSH source destination`: both keys are written.
pub(crate) fn write_first_two_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    let keys = args.iter().take(2).map(arg_str).collect();
    (keys, Vec::new())
}

/// Set-algebra store commands: destination is written, sources are read.
pub(crate) fn prepare_set_store(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    match args.split_first() {
        Some((dest, sources)) => (vec![arg_str(dest)], sources.iter().map(arg_str).collect()),
        None => (Vec::new(), Vec::new()),
    }
}

/// A command line that restores the current TTL state of `key`.
pub(crate) fn ttl_cmd(db: &Db, key: &str) -> CmdLine {
    match db.expire_time(key) {
        Some(at) => cmd_line(&["PEXPIREAT", key, &at.to_string()]),
        None => cmd_line(&["PERSIST", key]),
    }
}

/// Full pre-image restoration for the given keys: delete, rebuild the
/// entity, then reapply the TTL. Keys with no pre-image produce `DEL key`.
pub(crate) fn rollback_given_keys(db: &Db, keys: &[String]) -> Vec<CmdLine> {
    let mut undo = Vec::new();
    for key in keys {
        match db.get_entity(key) {
            None => undo.push(cmd_line(&["DEL", key])),
            Some(entity) => {
                undo.push(cmd_line(&["DEL", key]));
                undo.push(entity_to_cmd(key, &entity));
                undo.push(ttl_cmd(db, key));
            }
        }
    }
    undo
}

pub(crate) fn rollback_first_key(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    match args.first() {
        Some(key) => rollback_given_keys(db, &[arg_str(key)]),
        None => Vec::new(),
    }
}

/// Membership-precise rollback for `SADD` / `SREM`: re-add what was
/// present, re-remove what was not.
pub(crate) fn rollback_set_members(db: &Db, key: &str, members: &[String]) -> Vec<CmdLine> {
    let present = match set::load_set(db, key) {
        Err(_) => return Vec::new(),
        Ok(None) => return vec![cmd_line(&["DEL", key])],
        Ok(Some(set)) => set,
    };

    members
        .iter()
        .map(|member| {
            if present.contains(member) {
                cmd_line(&["SADD", key, member])
            } else {
                cmd_line(&["SREM", key, member])
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cmd_line;

    #[test]
    fn prepare_splits() {
        let args = cmd_line(&["k1", "k2", "k3"]);

        let (w, r) = read_first_key(&args);
        assert!(w.is_empty());
        assert_eq!(r, vec!["k1"]);

        let (w, r) = write_first_key(&args);
        assert_eq!(w, vec!["k1"]);
        assert!(r.is_empty());

        let (w, r) = write_all_keys(&args);
        assert_eq!(w, vec!["k1", "k2", "k3"]);
        assert!(r.is_empty());

        let (w, r) = write_first_two_keys(&args);
        assert_eq!(w, vec!["k1", "k2"]);
        assert!(r.is_empty());

        let (w, r) = prepare_set_store(&args);
        assert_eq!(w, vec!["k1"]);
        assert_eq!(r, vec!["k2", "k3"]);
    }

    #[test]
    fn empty_args_produce_no_keys() {
        let (w, r) = write_first_key(&[]);
        assert!(w.is_empty() && r.is_empty());
        let (w, r) = prepare_set_store(&[]);
        assert!(w.is_empty() && r.is_empty());
    }

    #[test]
    fn rollback_missing_key_is_del() {
        let db = Db::new_basic(0);
        let undo = rollback_given_keys(&db, &["ghost".to_string()]);
        assert_eq!(undo, vec![cmd_line(&["DEL", "ghost"])]);
    }

    #[test]
    fn rollback_existing_key_rebuilds_value_and_ttl() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "k", "v"]));
        let at = crate::database::now_ms() + 60_000;
        db.expire("k", at);

        let undo = rollback_given_keys(&db, &["k".to_string()]);
        assert_eq!(
            undo,
            vec![
                cmd_line(&["DEL", "k"]),
                cmd_line(&["SET", "k", "v"]),
                cmd_line(&["PEXPIREAT", "k", &at.to_string()]),
            ]
        );
    }
}
