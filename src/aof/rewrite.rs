//! Online AOF rewrite.
//!
//! Shrinks the log to one reconstruction command per live key without
//! stopping the writer for the duration. Three phases:
//!
//! 1. **Start** (writer paused): fsync the file, snapshot its size and the
//!    stream's current database, create the temp file.
//! 2. **Build** (writer running): replay the first `file_size` bytes into a
//!    fresh, isolated engine, then dump it — per database, a `SELECT`
//!    frame followed by the minimal command for each key and a
//!    `PEXPIREAT` for each deadline.
//! 3. **Finish** (writer paused): append the live file's tail past
//!    `file_size` (the commands accepted while phase 2 ran) behind a
//!    `SELECT` that realigns the replay cursor, atomically rename the temp
//!    file over the log, reopen it, and emit one more `SELECT` so the
//!    stream matches the writer's notion of the current database.
//!
//! At any crash point the log on disk replays to the live state: the
//! pre-rewrite prefix was fsynced, the tail is exactly the delta, and the
//! `SELECT` frames prevent records landing in the wrong database.

use crate::aof::marshal::{entity_to_cmd, expire_cmd, select_cmd};
use crate::aof::AofHandler;
use crate::protocol::encode_cmd_line;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::atomic::Ordering;
use tempfile::NamedTempFile;
use tracing::info;

pub(crate) struct RewriteCtx {
    tmp_file: NamedTempFile,
    file_size: u64,
    /// Selected database of the stream when the rewrite started.
    db_index: usize,
}

impl AofHandler {
    /// Runs the full rewrite synchronously.
    pub fn rewrite(&self) -> io::Result<()> {
        let mut ctx = self.start_rewrite()?;
        self.do_rewrite(&mut ctx)?;
        self.finish_rewrite(ctx)?;
        info!("AOF rewrite finished");
        Ok(())
    }

    fn start_rewrite(&self) -> io::Result<RewriteCtx> {
        let state = self.state.write().unwrap();
        state.file.sync_all()?;

        let file_size = std::fs::metadata(&self.filename)?.len();
        let tmp_file = tempfile::Builder::new().suffix(".aof").tempfile()?;

        Ok(RewriteCtx {
            tmp_file,
            file_size,
            db_index: state.current_db.load(Ordering::Relaxed),
        })
    }

    /// Runs concurrently with live writes, which keep landing in the old
    /// file past the snapshot size.
    fn do_rewrite(&self, ctx: &mut RewriteCtx) -> io::Result<()> {
        let snapshot = (self.tmp_db_maker)();
        self.load(&snapshot, Some(ctx.file_size));

        let out = ctx.tmp_file.as_file_mut();
        for index in 0..snapshot.db_count() {
            out.write_all(&encode_cmd_line(&select_cmd(index)))?;

            let mut write_result = Ok(());
            snapshot.for_each(index, |key, entity, expiry| {
                let record = encode_cmd_line(&entity_to_cmd(key, entity));
                if let Err(e) = out.write_all(&record) {
                    write_result = Err(e);
                    return false;
                }
                if let Some(at) = expiry {
                    let record = encode_cmd_line(&expire_cmd(key, at));
                    if let Err(e) = out.write_all(&record) {
                        write_result = Err(e);
                        return false;
                    }
                }
                true
            });
            write_result?;
        }
        Ok(())
    }

    fn finish_rewrite(&self, mut ctx: RewriteCtx) -> io::Result<()> {
        let mut state = self.state.write().unwrap();

        // realign the replay cursor, then append the delta accepted while
        // the build phase ran
        let mut src = File::open(&self.filename)?;
        src.seek(SeekFrom::Start(ctx.file_size))?;
        let out = ctx.tmp_file.as_file_mut();
        out.write_all(&encode_cmd_line(&select_cmd(ctx.db_index)))?;
        io::copy(&mut src, out)?;

        // swap the rewritten file into place and reopen for appending
        ctx.tmp_file
            .persist(&self.filename)
            .map_err(|e| e.error)?;
        state.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.filename)?;

        // resync the reopened stream with the writer's current database
        let current = state.current_db.load(Ordering::Relaxed);
        let select = encode_cmd_line(&select_cmd(current));
        let mut file = &state.file;
        file.write_all(&select)?;
        Ok(())
    }
}
