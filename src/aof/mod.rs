//! Append-Only File persistence.
//!
//! Every mutating command is appended to a log of RESP multi-bulk frames;
//! replaying the file against an empty engine reproduces the live state.
//! `SELECT n` frames partition the stream by database index, and
//! `PEXPIREAT` frames restore expiry deadlines.
//!
//! ## Writer
//!
//! Executors hand `(db_index, cmd_line)` payloads to a bounded channel
//! (2^16 entries; a full queue blocks the producer, which is the
//! backpressure story). A dedicated writer thread drains the channel and
//! owns all file appends, prepending a `SELECT` frame whenever the
//! payload's database differs from the stream's current one. Because the
//! writer is single-threaded, a `SELECT` and the command it introduces can
//! never interleave with another database's records.
//!
//! ## Pausing
//!
//! The file handle and the stream's `current_db` live behind a `RwLock`.
//! The writer holds it *shared* for each payload; the rewrite takes it
//! *exclusive* at its start and finish steps to pause the stream around
//! the snapshot and the file swap (see `rewrite`).
//!
//! ## Load
//!
//! On startup the file is replayed through the normal executors using a
//! session that carries only a database index. Parse errors are logged and
//! skipped; write-backs are impossible because the AOF sinks are installed
//! only after the load finishes.

pub mod marshal;
pub mod rewrite;

pub use marshal::{entity_to_cmd, expire_cmd};

use crate::config::ServerConfig;
use crate::connection::Session;
use crate::database::MultiDb;
use crate::protocol::{encode_cmd_line, CmdLine, RespParser};
use marshal::select_cmd;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Capacity of the payload channel between executors and the writer.
const AOF_QUEUE_SIZE: usize = 1 << 16;

/// Builds the isolated replay target used by the rewrite.
pub type TmpDbMaker = Box<dyn Fn() -> MultiDb + Send + Sync>;

struct Payload {
    db_index: usize,
    cmd_line: CmdLine,
}

pub(crate) struct AofState {
    pub(crate) file: File,
    pub(crate) current_db: AtomicUsize,
}

/// Owner of the AOF file, its writer thread, and the rewrite procedure.
pub struct AofHandler {
    filename: PathBuf,
    config: Arc<ServerConfig>,
    /// The pausing lock: writer shared, rewriter exclusive.
    pub(crate) state: RwLock<AofState>,
    sender: Mutex<Option<SyncSender<Payload>>>,
    finished: Mutex<Option<Receiver<()>>>,
    pub(crate) tmp_db_maker: TmpDbMaker,
}

impl AofHandler {
    /// Replays any existing log into `db`, then opens the file for append
    /// and starts the writer thread.
    pub fn new(
        config: Arc<ServerConfig>,
        db: &MultiDb,
        tmp_db_maker: TmpDbMaker,
    ) -> io::Result<Arc<Self>> {
        let filename = PathBuf::from(&config.append_filename);

        // replay before the writer owns the file; the DB sinks are not
        // installed yet, so replayed commands cannot echo into the log
        load_file(&filename, db, None, &config);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&filename)?;

        let (sender, receiver) = mpsc::sync_channel(AOF_QUEUE_SIZE);
        let (done_tx, done_rx) = mpsc::channel();

        let handler = Arc::new(Self {
            filename,
            config,
            state: RwLock::new(AofState {
                file,
                current_db: AtomicUsize::new(0),
            }),
            sender: Mutex::new(Some(sender)),
            finished: Mutex::new(Some(done_rx)),
            tmp_db_maker,
        });

        let writer = Arc::clone(&handler);
        std::thread::Builder::new()
            .name("aof-writer".to_string())
            .spawn(move || {
                writer.write_loop(receiver);
                let _ = done_tx.send(());
            })?;

        Ok(handler)
    }

    /// Enqueues one command for the writer. Blocks while the queue is full.
    pub fn add(&self, db_index: usize, cmd_line: CmdLine) {
        if !self.config.append_only {
            return;
        }
        let sender = self.sender.lock().unwrap();
        if let Some(tx) = sender.as_ref() {
            let _ = tx.send(Payload { db_index, cmd_line });
        }
    }

    fn write_loop(&self, receiver: Receiver<Payload>) {
        for payload in receiver {
            let state = self.state.read().unwrap();
            let mut file = &state.file;

            if state.current_db.load(Ordering::Relaxed) != payload.db_index {
                let select = encode_cmd_line(&select_cmd(payload.db_index));
                if let Err(e) = file.write_all(&select) {
                    // skip this payload; the writer itself survives
                    error!(error = %e, "AOF SELECT write failed");
                    continue;
                }
                state.current_db.store(payload.db_index, Ordering::Relaxed);
            }

            let record = encode_cmd_line(&payload.cmd_line);
            if let Err(e) = file.write_all(&record) {
                error!(error = %e, "AOF append failed");
            }
        }
        debug!("AOF writer drained");
    }

    /// Replays the log into `db`, optionally only the first `max_bytes`.
    pub fn load(&self, db: &MultiDb, max_bytes: Option<u64>) {
        load_file(&self.filename, db, max_bytes, &self.config);
    }

    /// Stops accepting payloads, waits for the writer to drain, and syncs
    /// the file.
    pub fn close(&self) {
        let sender = self.sender.lock().unwrap().take();
        drop(sender);
        if let Some(done) = self.finished.lock().unwrap().take() {
            let _ = done.recv();
        }
        let state = self.state.read().unwrap();
        if let Err(e) = state.file.sync_all() {
            error!(error = %e, "AOF final sync failed");
        }
        info!("AOF writer closed");
    }
}

/// Parses `path` as a RESP stream and feeds every multi-bulk frame through
/// the executors. Frame-level problems are logged and skipped; only a
/// missing file is silent.
fn load_file(path: &PathBuf, db: &MultiDb, max_bytes: Option<u64>, config: &ServerConfig) {
    let mut contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            error!(error = %e, "AOF open failed");
            return;
        }
    };
    if let Some(limit) = max_bytes {
        contents.truncate(limit as usize);
    }

    // carries only the selected database index; replies go nowhere
    let session = Session::authenticated(&config.require_pass);
    let mut parser = RespParser::new();
    let mut offset = 0;

    while offset < contents.len() {
        let (frame, used) = match parser.parse(&contents[offset..]) {
            Ok(Some(hit)) => hit,
            Ok(None) => {
                warn!("AOF ends mid-frame, truncated tail ignored");
                break;
            }
            Err(e) => {
                warn!(error = %e, "AOF parse error, skipping line");
                match contents[offset + 1..]
                    .windows(2)
                    .position(|w| w == b"\r\n")
                {
                    Some(pos) => {
                        offset += pos + 3;
                        continue;
                    }
                    None => break,
                }
            }
        };
        offset += used;

        let cmd_line = match frame.into_cmd_line() {
            Some(line) => line,
            None => {
                debug!("non-command frame in AOF, skipped");
                continue;
            }
        };
        let reply = db.exec(&session, &cmd_line);
        if reply.is_error() {
            warn!(reply = %reply, "AOF replay command failed");
        }
    }
}
