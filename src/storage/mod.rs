//! Storage Primitives
//!
//! The building blocks underneath the database layer:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Db (database)                        │
//! │                                                              │
//! │   data: ShardedDict<DataEntity>   ttl: ShardedDict<u64>      │
//! │   versions: ShardedDict<u32>      locker: LockTable          │
//! └───────────────┬──────────────────────────────┬───────────────┘
//!                 │                              │
//!                 ▼                              ▼
//!       ┌──────────────────┐           ┌──────────────────┐
//!       │   ShardedDict    │           │    TimeWheel     │
//!       │ 2^k RwLock shards│           │ (expiry cleanup) │
//!       └──────────────────┘           └──────────────────┘
//! ```
//!
//! - `dict`: the sharded concurrent map used for data, TTL and version maps
//! - `lock`: key-granular RW locks with ordered multi-key acquisition
//! - `entity`: the tagged value variant stored under each key
//! - `timewheel`: scheduled callbacks for active TTL expiry

pub mod dict;
pub mod entity;
pub mod lock;
pub mod timewheel;

// Re-export commonly used types
pub use dict::ShardedDict;
pub use entity::DataEntity;
pub use lock::{KeyLockGuard, LockTable};
pub use timewheel::TimeWheel;
