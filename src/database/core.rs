//! Single logical database.
//!
//! A [`Db`] owns three identically-keyed sharded maps — data, TTL, and
//! per-key versions — plus the key lock table that serializes multi-key
//! commands. The execution pipeline for a command line is:
//!
//! 1. table lookup by lower-cased name (→ `unknown command`)
//! 2. arity validation (→ `wrong number of arguments`)
//! 3. `prepare` → write keys + read keys
//! 4. version bump on every write key
//! 5. ordered acquisition of the key lock set
//! 6. executor; locks release when the guard drops on any exit path
//!
//! Mutating executors append their canonical command line to the AOF sink,
//! a closure installed by the owning [`MultiDb`](super::MultiDb) after the
//! AOF handler exists — the back-reference stays a function value, not an
//! ownership cycle.
//!
//! ## Expiry
//!
//! `expire` stores the deadline in the TTL map and schedules a time-wheel
//! callback that re-checks the deadline under the key lock before removing
//! the key, which tolerates an intervening `PERSIST` or a fresh `EXPIRE`.
//! Every read goes through the same lazy check, so the wheel is purely a
//! memory-reclamation aid.

use crate::protocol::{CmdLine, RespFrame};
use crate::storage::{DataEntity, KeyLockGuard, LockTable, ShardedDict, TimeWheel};
use bytes::Bytes;
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, UNIX_EPOCH};
use tracing::debug;

use super::{now_ms, router};

const DATA_SHARDS: usize = 1 << 10;
const TTL_SHARDS: usize = 1 << 6;
const LOCKER_SIZE: usize = 1 << 10;

// Replay targets for the AOF rewrite are short-lived; keep them small.
const BASIC_SHARDS: usize = 1 << 4;

/// Sink for AOF records, installed by the multi-DB owner.
pub type AofSink = Box<dyn Fn(CmdLine) + Send + Sync>;

/// One keyspace.
pub struct Db {
    index: usize,
    data: ShardedDict<DataEntity>,
    ttl: ShardedDict<u64>,
    versions: ShardedDict<u32>,
    locker: LockTable,
    add_aof: RwLock<AofSink>,
    wheel: Option<Arc<TimeWheel>>,
    self_ref: Weak<Db>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("index", &self.index)
            .field("keys", &self.data.len())
            .finish()
    }
}

impl Db {
    /// A full database wired to the shared time wheel.
    pub fn new(index: usize, wheel: Arc<TimeWheel>) -> Arc<Self> {
        Self::build(index, DATA_SHARDS, TTL_SHARDS, Some(wheel))
    }

    /// A lightweight database with no time wheel, used as the isolated
    /// replay target during AOF rewrite and in tests.
    pub fn new_basic(index: usize) -> Arc<Self> {
        Self::build(index, BASIC_SHARDS, BASIC_SHARDS, None)
    }

    fn build(
        index: usize,
        data_shards: usize,
        ttl_shards: usize,
        wheel: Option<Arc<TimeWheel>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            index,
            data: ShardedDict::new(data_shards),
            ttl: ShardedDict::new(ttl_shards),
            versions: ShardedDict::new(data_shards),
            locker: LockTable::new(LOCKER_SIZE),
            add_aof: RwLock::new(Box::new(|_| {})),
            wheel,
            self_ref: self_ref.clone(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Installs the AOF sink; the default sink discards records.
    pub fn set_add_aof(&self, sink: AofSink) {
        *self.add_aof.write().unwrap() = sink;
    }

    pub(crate) fn add_aof(&self, line: CmdLine) {
        (self.add_aof.read().unwrap())(line)
    }

    // ------------------------------------------------------------------
    // Command execution
    // ------------------------------------------------------------------

    /// Runs one command line through the execution pipeline.
    pub fn exec(&self, cmd_line: &[Bytes]) -> RespFrame {
        if cmd_line.is_empty() {
            return RespFrame::error("ERR empty command");
        }
        let name = String::from_utf8_lossy(&cmd_line[0]).to_ascii_lowercase();
        let cmd = match router::lookup(&name) {
            Some(cmd) => cmd,
            None => return RespFrame::error(format!("ERR unknown command '{}'", name)),
        };
        if !router::validate_arity(cmd.arity, cmd_line) {
            return RespFrame::arg_num_error(&name);
        }

        let (write_keys, read_keys) = (cmd.prepare)(&cmd_line[1..]);
        self.add_version(&write_keys);
        let _guard = self.locker.rw_locks(&write_keys, &read_keys);
        (cmd.executor)(self, &cmd_line[1..])
    }

    /// Undo log for a command line against the current state; empty when
    /// the command is unknown, malformed, or has no undo generator.
    pub fn undo_logs(&self, cmd_line: &[Bytes]) -> Vec<CmdLine> {
        if cmd_line.is_empty() {
            return Vec::new();
        }
        let name = String::from_utf8_lossy(&cmd_line[0]).to_ascii_lowercase();
        let cmd = match router::lookup(&name) {
            Some(cmd) => cmd,
            None => return Vec::new(),
        };
        if !router::validate_arity(cmd.arity, cmd_line) {
            return Vec::new();
        }
        match cmd.undo {
            Some(undo) => undo(self, &cmd_line[1..]),
            None => Vec::new(),
        }
    }

    pub fn rw_locks<'a>(
        &'a self,
        write_keys: &[String],
        read_keys: &[String],
    ) -> KeyLockGuard<'a> {
        self.locker.rw_locks(write_keys, read_keys)
    }

    // ------------------------------------------------------------------
    // Versions
    // ------------------------------------------------------------------

    pub(crate) fn add_version(&self, keys: &[String]) {
        for key in keys {
            let next = self.version(key).wrapping_add(1);
            self.versions.put(key.clone(), next);
        }
    }

    /// Monotonically non-decreasing modification counter for `key`.
    pub fn version(&self, key: &str) -> u32 {
        self.versions.get(key).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Data access
    // ------------------------------------------------------------------

    pub fn put_entity(&self, key: String, entity: DataEntity) -> u32 {
        self.data.put(key, entity)
    }

    pub fn put_if_absent(&self, key: String, entity: DataEntity) -> u32 {
        self.data.put_if_absent(key, entity)
    }

    pub fn put_if_exists(&self, key: String, entity: DataEntity) -> u32 {
        self.data.put_if_exists(key, entity)
    }

    /// Clone of the entity for `key`, applying lazy expiry.
    pub fn get_entity(&self, key: &str) -> Option<DataEntity> {
        if self.is_expired(key) {
            return None;
        }
        self.data.get(key)
    }

    /// Read access to the entity under the shard lock, with lazy expiry.
    pub fn with_entity<R>(&self, key: &str, f: impl FnOnce(&DataEntity) -> R) -> Option<R> {
        if self.is_expired(key) {
            return None;
        }
        self.data.with_value(key, f)
    }

    /// In-place mutation of the entity under the shard lock, with lazy
    /// expiry. Whole-command atomicity comes from the key lock set held by
    /// the execution pipeline, not from this shard lock.
    pub fn with_entity_mut<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut DataEntity) -> R,
    ) -> Option<R> {
        if self.is_expired(key) {
            return None;
        }
        self.data.with_value_mut(key, f)
    }

    /// Removes `key` from the data and TTL maps.
    pub fn remove(&self, key: &str) {
        self.data.remove(key);
        self.ttl.remove(key);
    }

    /// Removes the given keys, returning how many existed.
    pub fn removes(&self, keys: &[String]) -> usize {
        let mut deleted = 0;
        for key in keys {
            if self.data.remove(key) == 1 {
                self.ttl.remove(key);
                deleted += 1;
            }
        }
        deleted
    }

    /// Number of live keys (expired-but-unreaped keys included).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drops every key and TTL.
    pub fn flush(&self) {
        self.data.clear();
        self.ttl.clear();
    }

    // ------------------------------------------------------------------
    // TTL
    // ------------------------------------------------------------------

    fn expire_task_key(&self, key: &str) -> String {
        format!("expire:{}:{}", self.index, key)
    }

    /// Sets the expiry deadline (ms since epoch) and schedules the cleanup
    /// callback.
    pub fn expire(&self, key: &str, at_ms: u64) {
        self.ttl.put(key.to_string(), at_ms);

        let (wheel, db) = match (self.wheel.as_ref(), self.self_ref.upgrade()) {
            (Some(wheel), Some(db)) => (wheel, db),
            _ => return,
        };
        let task_key = self.expire_task_key(key);
        let key = key.to_string();
        let at = UNIX_EPOCH + Duration::from_millis(at_ms);
        wheel.schedule_at(
            at,
            task_key,
            Box::new(move || {
                let keys = [key.clone()];
                let _guard = db.locker.rw_locks(&keys, &[]);
                // re-check under the lock: PERSIST or a later EXPIRE may
                // have superseded this task
                if let Some(deadline) = db.ttl.get(&key) {
                    if now_ms() >= deadline {
                        debug!(key = %key, "time wheel removed expired key");
                        db.remove(&key);
                    }
                }
            }),
        );
    }

    /// Clears the expiry for `key` and cancels its wheel task.
    pub fn persist(&self, key: &str) {
        self.ttl.remove(key);
        if let Some(wheel) = &self.wheel {
            wheel.cancel(&self.expire_task_key(key));
        }
    }

    /// Lazy expiry check: removes and reports `true` when the deadline has
    /// passed, regardless of whether the wheel has run.
    pub fn is_expired(&self, key: &str) -> bool {
        let deadline = match self.ttl.get(key) {
            Some(at) => at,
            None => return false,
        };
        let expired = now_ms() >= deadline;
        if expired {
            self.remove(key);
        }
        expired
    }

    /// The raw expiry deadline, if one is set.
    pub fn expire_time(&self, key: &str) -> Option<u64> {
        self.ttl.get(key)
    }

    /// Visits every key with its entity and optional expiry deadline.
    pub fn for_each(&self, mut f: impl FnMut(&str, &DataEntity, Option<u64>) -> bool) {
        self.data.for_each(|key, entity| {
            let expiry = self.ttl.get(key);
            f(key, entity, expiry)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cmd_line;

    #[test]
    fn unknown_command_and_arity_errors() {
        let db = Db::new_basic(0);
        assert_eq!(
            db.exec(&cmd_line(&["NOPE", "x"])),
            RespFrame::error("ERR unknown command 'nope'")
        );
        assert_eq!(
            db.exec(&cmd_line(&["GET"])),
            RespFrame::arg_num_error("get")
        );
        assert_eq!(
            db.exec(&cmd_line(&["GET", "a", "b"])),
            RespFrame::arg_num_error("get")
        );
    }

    #[test]
    fn version_bumps_before_every_write() {
        let db = Db::new_basic(0);
        assert_eq!(db.version("k"), 0);
        db.exec(&cmd_line(&["SET", "k", "v1"]));
        let v1 = db.version("k");
        assert!(v1 > 0);
        db.exec(&cmd_line(&["SET", "k", "v2"]));
        assert!(db.version("k") > v1);
        // reads do not bump
        db.exec(&cmd_line(&["GET", "k"]));
        assert_eq!(db.version("k"), v1 + 1);
    }

    #[test]
    fn lazy_expiry_hides_and_reaps_keys() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "gone", "v"]));
        db.expire("gone", now_ms().saturating_sub(10));

        assert!(db.get_entity("gone").is_none());
        // the reap removed both maps
        assert_eq!(db.len(), 0);
        assert!(db.expire_time("gone").is_none());
    }

    #[test]
    fn future_expiry_keeps_key_visible() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "here", "v"]));
        db.expire("here", now_ms() + 60_000);
        assert!(db.get_entity("here").is_some());
        assert!(db.expire_time("here").is_some());

        db.persist("here");
        assert!(db.expire_time("here").is_none());
    }

    #[test]
    fn flush_clears_data_and_ttl() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "a", "1"]));
        db.expire("a", now_ms() + 60_000);
        db.flush();
        assert_eq!(db.len(), 0);
        assert!(db.expire_time("a").is_none());
    }

    #[test]
    fn conditional_puts_respect_presence() {
        let db = Db::new_basic(0);
        let v = DataEntity::Bytes(Bytes::from("v"));
        let w = DataEntity::Bytes(Bytes::from("w"));
        assert_eq!(db.put_if_exists("k".into(), v.clone()), 0);
        assert_eq!(db.put_if_absent("k".into(), v.clone()), 1);
        assert_eq!(db.put_if_absent("k".into(), w.clone()), 0);
        assert_eq!(db.get_entity("k"), Some(v));
        assert_eq!(db.put_if_exists("k".into(), w.clone()), 1);
        assert_eq!(db.get_entity("k"), Some(w));
    }

    #[test]
    fn rw_locks_allow_concurrent_readers() {
        let db = Db::new_basic(0);
        let keys = vec!["k".to_string()];
        let write_guard = db.rw_locks(&keys, &[]);
        drop(write_guard);
        // two shared holders at once
        let _a = db.rw_locks(&[], &keys);
        let _b = db.rw_locks(&[], &keys);
    }

    #[test]
    fn removes_counts_only_existing() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "a", "1"]));
        db.exec(&cmd_line(&["SET", "b", "2"]));
        let keys = vec!["a".to_string(), "ghost".to_string(), "b".to_string()];
        assert_eq!(db.removes(&keys), 2);
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn undo_logs_for_unknown_or_readonly_commands_are_empty() {
        let db = Db::new_basic(0);
        assert!(db.undo_logs(&cmd_line(&["NOPE", "k"])).is_empty());
        assert!(db.undo_logs(&cmd_line(&["GET", "k"])).is_empty());
        // malformed arity
        assert!(db.undo_logs(&cmd_line(&["SET"])).is_empty());
    }

    #[test]
    fn for_each_reports_expiry() {
        let db = Db::new_basic(0);
        db.exec(&cmd_line(&["SET", "plain", "1"]));
        db.exec(&cmd_line(&["SET", "timed", "2"]));
        let at = now_ms() + 60_000;
        db.expire("timed", at);

        let mut seen = Vec::new();
        db.for_each(|key, _, expiry| {
            seen.push((key.to_string(), expiry));
            true
        });
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("plain".to_string(), None),
                ("timed".to_string(), Some(at))
            ]
        );
    }
}
