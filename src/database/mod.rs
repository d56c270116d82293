//! Database Layer
//!
//! The command execution core of the server:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        MultiDb                               │
//! │   AUTH / SELECT / FLUSHDB / FLUSHALL / *REWRITEAOF           │
//! │   + panic barrier                                            │
//! │      │                                                       │
//! │      ▼  session.db_index                                     │
//! │  ┌───────┐ ┌───────┐ ┌───────┐          ┌───────┐           │
//! │  │ Db 0  │ │ Db 1  │ │ Db 2  │   ...    │ Db N-1│           │
//! │  └───┬───┘ └───────┘ └───────┘          └───────┘           │
//! │      │ lookup → arity → prepare → version bump               │
//! │      │ → ordered key locks → executor → AOF append           │
//! └──────┴───────────────────────────────────────────────────────┘
//! ```
//!
//! Each [`Db`] is an isolated keyspace: a data dict, a TTL dict, a version
//! dict, and a key lock table. Commands are registered in a table mapping
//! the lower-cased name to `{executor, prepare, undo, arity}`; `prepare`
//! names the write/read keys so the pipeline can bump versions and take the
//! multi-key lock set before the executor runs.

pub mod core;
pub mod keys;
pub mod list;
pub mod router;
pub mod server;
pub mod set;
pub mod strings;
pub mod sys;
pub mod tx;

pub use self::core::Db;
pub use router::{lookup, validate_arity, Command};
pub use server::MultiDb;

use crate::protocol::CmdLine;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Decodes a command argument into a key / member string.
pub(crate) fn arg_str(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

/// Builds the canonical AOF record for a command: upper-case name followed
/// by the original arguments.
pub(crate) fn aof_line(name: &str, args: &[Bytes]) -> CmdLine {
    let mut line = Vec::with_capacity(args.len() + 1);
    line.push(Bytes::copy_from_slice(name.as_bytes()));
    line.extend(args.iter().cloned());
    line
}
