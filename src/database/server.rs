//! Multi-database server.
//!
//! [`MultiDb`] owns N independent keyspaces (default 16) plus the AOF
//! handler and the shared time wheel. `SELECT` only moves the session's
//! index; the keyspaces themselves are created at startup and never
//! destroyed.
//!
//! Server-level commands (`AUTH`, `SELECT`, `FLUSHDB`, `FLUSHALL`,
//! `BGREWRITEAOF`, `REWRITEAOF`) are dispatched here; everything else is
//! routed to `dbs[session.db_index]`. A `catch_unwind` barrier converts any
//! executor panic into a generic `-ERR unknown` reply so one bad command
//! cannot take the server down.

use crate::aof::AofHandler;
use crate::config::ServerConfig;
use crate::connection::Session;
use crate::database::core::Db;
use crate::database::sys;
use crate::protocol::{cmd_line, CmdLine, RespFrame};
use crate::storage::{timewheel, DataEntity, TimeWheel};
use bytes::Bytes;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info};

/// The N-keyspace standalone engine.
pub struct MultiDb {
    dbs: Vec<Arc<Db>>,
    aof: Option<Arc<AofHandler>>,
    wheel: Option<Arc<TimeWheel>>,
    config: Arc<ServerConfig>,
}

impl MultiDb {
    /// Builds the full engine: keyspaces wired to a fresh time wheel, AOF
    /// replayed and re-armed when `appendOnly` is on.
    ///
    /// Must run inside a tokio runtime (the wheel operator is a task).
    pub fn new(config: Arc<ServerConfig>) -> io::Result<Self> {
        let wheel = TimeWheel::start(timewheel::TICK, timewheel::SLOTS);
        let dbs: Vec<Arc<Db>> = (0..config.databases)
            .map(|i| Db::new(i, Arc::clone(&wheel)))
            .collect();

        let mut mdb = MultiDb {
            dbs,
            aof: None,
            wheel: Some(wheel),
            config: Arc::clone(&config),
        };

        if config.append_only {
            let tmp_config = Arc::clone(&config);
            let handler = AofHandler::new(
                Arc::clone(&config),
                &mdb,
                Box::new(move || MultiDb::new_basic(Arc::clone(&tmp_config))),
            )?;
            for db in &mdb.dbs {
                let handler = Arc::clone(&handler);
                let index = db.index();
                db.set_add_aof(Box::new(move |line: CmdLine| handler.add(index, line)));
            }
            mdb.aof = Some(handler);
            info!(file = %config.append_filename, "append-only file enabled");
        }

        Ok(mdb)
    }

    /// A bare engine with no AOF and no time wheel: the isolated replay
    /// target for the online rewrite, also convenient in tests.
    pub fn new_basic(config: Arc<ServerConfig>) -> Self {
        let dbs = (0..config.databases).map(Db::new_basic).collect();
        MultiDb {
            dbs,
            aof: None,
            wheel: None,
            config,
        }
    }

    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    /// Executes one command line for `session`, with the panic barrier.
    pub fn exec(&self, session: &Session, cmd_line: &[Bytes]) -> RespFrame {
        let result = catch_unwind(AssertUnwindSafe(|| self.exec_inner(session, cmd_line)));
        match result {
            Ok(reply) => reply,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(panic = %message, "executor panicked");
                RespFrame::error("ERR unknown")
            }
        }
    }

    fn exec_inner(&self, session: &Session, cmd_line: &[Bytes]) -> RespFrame {
        if cmd_line.is_empty() {
            return RespFrame::error("ERR empty command");
        }
        let name = String::from_utf8_lossy(&cmd_line[0]).to_ascii_lowercase();

        if name == "auth" {
            return sys::auth(&self.config, session, &cmd_line[1..]);
        }
        if !sys::is_authenticated(&self.config, session) {
            return RespFrame::error("NOAUTH Authentication required");
        }

        match name.as_str() {
            "select" => self.exec_select(session, cmd_line),
            "flushdb" => self.flush_db(session.db_index()),
            "flushall" => self.flush_all(),
            "bgrewriteaof" => self.bg_rewrite_aof(),
            "rewriteaof" => self.rewrite_aof(),
            _ => {
                let index = session.db_index();
                match self.dbs.get(index) {
                    Some(db) => db.exec(cmd_line),
                    None => RespFrame::error("ERR DB index is out of range"),
                }
            }
        }
    }

    /// `SELECT n`: moves the session, touches no data, writes no AOF
    /// record — the writer injects `SELECT` frames of its own whenever the
    /// stream switches databases.
    fn exec_select(&self, session: &Session, cmd_line: &[Bytes]) -> RespFrame {
        if cmd_line.len() != 2 {
            return RespFrame::arg_num_error("select");
        }
        let index: usize = match std::str::from_utf8(&cmd_line[1])
            .ok()
            .and_then(|s| s.parse().ok())
        {
            Some(n) => n,
            None => return RespFrame::error("ERR DB index is invalid"),
        };
        if index >= self.dbs.len() {
            return RespFrame::error("ERR DB index is out of range");
        }
        session.select_db(index);
        RespFrame::ok()
    }

    fn flush_db(&self, index: usize) -> RespFrame {
        let db = match self.dbs.get(index) {
            Some(db) => db,
            None => return RespFrame::error("ERR DB index is out of range"),
        };
        db.flush();
        if let Some(aof) = &self.aof {
            aof.add(index, cmd_line(&["FLUSHDB"]));
        }
        RespFrame::ok()
    }

    fn flush_all(&self) -> RespFrame {
        for db in &self.dbs {
            db.flush();
        }
        if let Some(aof) = &self.aof {
            aof.add(0, cmd_line(&["FLUSHALL"]));
        }
        RespFrame::ok()
    }

    fn bg_rewrite_aof(&self) -> RespFrame {
        let handler = match &self.aof {
            Some(handler) => Arc::clone(handler),
            None => return RespFrame::error("ERR aof is not enabled"),
        };
        std::thread::spawn(move || {
            if let Err(e) = handler.rewrite() {
                error!(error = %e, "background AOF rewrite failed");
            }
        });
        RespFrame::status("Background append only file rewriting started")
    }

    fn rewrite_aof(&self) -> RespFrame {
        let handler = match &self.aof {
            Some(handler) => handler,
            None => return RespFrame::error("ERR aof is not enabled"),
        };
        match handler.rewrite() {
            Ok(()) => RespFrame::ok(),
            Err(e) => RespFrame::error(format!("ERR {}", e)),
        }
    }

    /// Visits every key of one keyspace (used by the AOF rewrite).
    pub fn for_each(
        &self,
        db_index: usize,
        f: impl FnMut(&str, &DataEntity, Option<u64>) -> bool,
    ) {
        if let Some(db) = self.dbs.get(db_index) {
            db.for_each(f);
        }
    }

    /// Undo log for a command against one keyspace.
    pub fn get_undo_logs(&self, db_index: usize, cmd_line: &[Bytes]) -> Vec<CmdLine> {
        match self.dbs.get(db_index) {
            Some(db) => db.undo_logs(cmd_line),
            None => Vec::new(),
        }
    }

    /// Drains and closes the AOF writer and stops the time wheel.
    pub fn close(&self) {
        for db in &self.dbs {
            db.set_add_aof(Box::new(|_| {}));
        }
        if let Some(aof) = &self.aof {
            aof.close();
        }
        if let Some(wheel) = &self.wheel {
            wheel.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cmd_line;

    fn basic() -> MultiDb {
        MultiDb::new_basic(Arc::new(ServerConfig {
            append_only: false,
            ..ServerConfig::default()
        }))
    }

    #[test]
    fn select_isolates_keyspaces() {
        let mdb = basic();
        let session = Session::new();

        assert_eq!(
            mdb.exec(&session, &cmd_line(&["SELECT", "1"])),
            RespFrame::ok()
        );
        mdb.exec(&session, &cmd_line(&["SET", "x", "1"]));

        assert_eq!(
            mdb.exec(&session, &cmd_line(&["SELECT", "0"])),
            RespFrame::ok()
        );
        assert_eq!(
            mdb.exec(&session, &cmd_line(&["GET", "x"])),
            RespFrame::Null
        );

        mdb.exec(&session, &cmd_line(&["SELECT", "1"]));
        assert_eq!(
            mdb.exec(&session, &cmd_line(&["GET", "x"])),
            RespFrame::bulk(Bytes::from("1"))
        );
    }

    #[test]
    fn select_validates_index() {
        let mdb = basic();
        let session = Session::new();
        assert_eq!(
            mdb.exec(&session, &cmd_line(&["SELECT", "16"])),
            RespFrame::error("ERR DB index is out of range")
        );
        assert_eq!(
            mdb.exec(&session, &cmd_line(&["SELECT", "-1"])),
            RespFrame::error("ERR DB index is invalid")
        );
        assert_eq!(
            mdb.exec(&session, &cmd_line(&["SELECT", "abc"])),
            RespFrame::error("ERR DB index is invalid")
        );
        assert_eq!(
            mdb.exec(&session, &cmd_line(&["SELECT"])),
            RespFrame::arg_num_error("select")
        );
    }

    #[test]
    fn flushdb_clears_only_current_database() {
        let mdb = basic();
        let session = Session::new();
        mdb.exec(&session, &cmd_line(&["SET", "a", "1"]));
        mdb.exec(&session, &cmd_line(&["SELECT", "1"]));
        mdb.exec(&session, &cmd_line(&["SET", "b", "2"]));

        assert_eq!(mdb.exec(&session, &cmd_line(&["FLUSHDB"])), RespFrame::ok());
        assert_eq!(mdb.exec(&session, &cmd_line(&["GET", "b"])), RespFrame::Null);

        mdb.exec(&session, &cmd_line(&["SELECT", "0"]));
        assert_eq!(
            mdb.exec(&session, &cmd_line(&["GET", "a"])),
            RespFrame::bulk(Bytes::from("1"))
        );

        assert_eq!(mdb.exec(&session, &cmd_line(&["FLUSHALL"])), RespFrame::ok());
        assert_eq!(mdb.exec(&session, &cmd_line(&["GET", "a"])), RespFrame::Null);
    }

    #[test]
    fn rewrite_without_aof_is_an_error() {
        let mdb = basic();
        let session = Session::new();
        assert_eq!(
            mdb.exec(&session, &cmd_line(&["REWRITEAOF"])),
            RespFrame::error("ERR aof is not enabled")
        );
        assert_eq!(
            mdb.exec(&session, &cmd_line(&["BGREWRITEAOF"])),
            RespFrame::error("ERR aof is not enabled")
        );
    }

    #[test]
    fn auth_gates_every_command_but_auth() {
        let mdb = MultiDb::new_basic(Arc::new(ServerConfig {
            append_only: false,
            require_pass: "secret".to_string(),
            ..ServerConfig::default()
        }));
        let session = Session::new();

        assert_eq!(
            mdb.exec(&session, &cmd_line(&["GET", "x"])),
            RespFrame::error("NOAUTH Authentication required")
        );
        assert_eq!(
            mdb.exec(&session, &cmd_line(&["AUTH", "wrong"])),
            RespFrame::error("ERR invalid password")
        );
        assert_eq!(
            mdb.exec(&session, &cmd_line(&["AUTH", "secret"])),
            RespFrame::ok()
        );
        assert_eq!(mdb.exec(&session, &cmd_line(&["GET", "x"])), RespFrame::Null);
    }

    #[test]
    fn undo_logs_route_to_the_right_database() {
        let mdb = basic();
        let session = Session::new();
        mdb.exec(&session, &cmd_line(&["SELECT", "2"]));
        mdb.exec(&session, &cmd_line(&["SET", "k", "old"]));

        let undo = mdb.get_undo_logs(2, &cmd_line(&["SET", "k", "new"]));
        assert!(!undo.is_empty());
        // db 0 has no such key, so its undo is a bare DEL
        assert_eq!(
            mdb.get_undo_logs(0, &cmd_line(&["SET", "k", "new"])),
            vec![cmd_line(&["DEL", "k"])]
        );
        // out-of-range index yields nothing
        assert!(mdb.get_undo_logs(99, &cmd_line(&["SET", "k", "new"])).is_empty());
    }

    #[test]
    fn unknown_command_error_passes_through() {
        let mdb = basic();
        let session = Session::new();
        assert_eq!(
            mdb.exec(&session, &cmd_line(&["FROB", "x"])),
            RespFrame::error("ERR unknown command 'frob'")
        );
    }
}
