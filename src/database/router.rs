//! Command registration table.
//!
//! Every command is a record of `{executor, prepare, undo, arity}` keyed by
//! its lower-cased name. `arity >= 0` demands exactly that many tokens on
//! the command line (name included); `arity < 0` demands at least `-arity`.

use crate::database::core::Db;
use crate::protocol::{CmdLine, RespFrame};
use bytes::Bytes;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Executes a command against one database; `args` excludes the name.
pub type ExecFn = fn(&Db, &[Bytes]) -> RespFrame;

/// Splits a command line into `(write_keys, read_keys)` before execution.
pub type PrepareFn = fn(&[Bytes]) -> (Vec<String>, Vec<String>);

/// Produces command lines that, replayed head to tail, restore the
/// pre-image of the keys a mutating command touches.
pub type UndoFn = fn(&Db, &[Bytes]) -> Vec<CmdLine>;

/// One registered command.
pub struct Command {
    pub executor: ExecFn,
    pub prepare: PrepareFn,
    pub undo: Option<UndoFn>,
    pub arity: i32,
}

pub(crate) type CommandTable = HashMap<&'static str, Command>;

static CMD_TABLE: Lazy<CommandTable> = Lazy::new(|| {
    let mut table = CommandTable::new();
    super::strings::register(&mut table);
    super::keys::register(&mut table);
    super::list::register(&mut table);
    super::set::register(&mut table);
    super::sys::register(&mut table);
    table
});

pub(crate) fn register(
    table: &mut CommandTable,
    name: &'static str,
    executor: ExecFn,
    prepare: PrepareFn,
    undo: Option<UndoFn>,
    arity: i32,
) {
    debug_assert_eq!(name, name.to_ascii_lowercase());
    table.insert(
        name,
        Command {
            executor,
            prepare,
            undo,
            arity,
        },
    );
}

/// Looks up a command by its lower-cased name.
pub fn lookup(name: &str) -> Option<&'static Command> {
    CMD_TABLE.get(name)
}

/// Checks a full command line (name included) against an arity rule.
pub fn validate_arity(arity: i32, cmd_line: &[Bytes]) -> bool {
    let argc = cmd_line.len() as i32;
    if arity >= 0 {
        argc == arity
    } else {
        argc >= -arity
    }
}
