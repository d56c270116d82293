//! Per-Connection State
//!
//! Each client connection carries a [`Session`]: the database index selected
//! with `SELECT` and the password last submitted with `AUTH`. The socket
//! itself is owned exclusively by the connection task in `server`, so reply
//! writes need no extra synchronization; the session is the only state the
//! command layer sees.
//!
//! The AOF loader replays history through the same executors using a fresh
//! `Session` with no socket behind it — the "fake connection" is just a
//! session whose replies go nowhere.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Connection-scoped command execution state.
#[derive(Debug, Default)]
pub struct Session {
    /// Database selected with `SELECT`; 0 is the default.
    db_index: AtomicUsize,
    /// Password last submitted with `AUTH`, empty if none.
    password: Mutex<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session pre-authenticated with `password`, used by the AOF loader
    /// and by tests.
    pub fn authenticated(password: &str) -> Self {
        let session = Self::new();
        session.set_password(password);
        session
    }

    pub fn db_index(&self) -> usize {
        self.db_index.load(Ordering::Relaxed)
    }

    pub fn select_db(&self, index: usize) {
        self.db_index.store(index, Ordering::Relaxed);
    }

    pub fn password(&self) -> String {
        self.password.lock().unwrap().clone()
    }

    pub fn set_password(&self, password: &str) {
        *self.password.lock().unwrap() = password.to_string();
    }
}

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Currently active connections.
    pub active_connections: AtomicU64,
    /// Total commands processed.
    pub commands_processed: AtomicU64,
    /// Total bytes read from clients.
    pub bytes_read: AtomicU64,
    /// Total bytes written to clients.
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_defaults_to_db_zero() {
        let session = Session::new();
        assert_eq!(session.db_index(), 0);
        assert_eq!(session.password(), "");
    }

    #[test]
    fn select_and_auth_state() {
        let session = Session::new();
        session.select_db(7);
        session.set_password("hunter2");
        assert_eq!(session.db_index(), 7);
        assert_eq!(session.password(), "hunter2");
    }

    #[test]
    fn stats_track_connection_lifecycle() {
        let stats = ConnectionStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 2);
        assert_eq!(stats.active(), 1);
    }
}
