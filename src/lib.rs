//! # EmberKV - An In-Memory Key-Value Server
//!
//! EmberKV is a Redis-compatible, in-memory key/value database written in
//! Rust. It speaks the RESP wire protocol, keeps multiple logical
//! databases selected per connection, persists every write through an
//! append-only command log with online rewrite, and can shard keys across
//! peer nodes via consistent hashing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              EmberKV                                │
//! │                                                                     │
//! │  ┌────────────┐   ┌────────────┐   ┌─────────────────────────────┐  │
//! │  │ TCP Server │──>│ RESP       │──>│ Engine                      │  │
//! │  │ (accept)   │   │ parser     │   │  standalone: MultiDb        │  │
//! │  └────────────┘   └────────────┘   │  cluster: ring + relay      │  │
//! │                                    └──────┬──────────────┬───────┘  │
//! │                                           │              │          │
//! │                                           ▼              ▼          │
//! │  ┌───────────────────────────────────┐  ┌──────────────────────┐    │
//! │  │ Db × N                            │  │ AOF writer thread    │    │
//! │  │  sharded dicts (data/ttl/version) │  │  SELECT-interleaved  │    │
//! │  │  key lock table · time wheel      │  │  log + online rewrite│    │
//! │  └───────────────────────────────────┘  └──────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP frames, serialization, incremental parsing
//! - [`storage`]: sharded dictionary, key lock table, value variants,
//!   time wheel
//! - [`database`]: command table, single-DB executor, multi-DB server
//! - [`aof`]: append-only-file writer, loader, and online rewrite
//! - [`cluster`]: consistent-hash ring, peer clients, cluster facade
//! - [`connection`]: per-connection session state and counters
//! - [`server`]: TCP accept loop and graceful shutdown
//! - [`config`]: configuration file parsing

pub mod aof;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod database;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{ServerConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use connection::{ConnectionStats, Session};
pub use database::{Db, MultiDb};
pub use protocol::{ProtocolError, RespFrame, RespParser};
pub use server::{serve, Engine};

/// Version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
