//! TTL KV - expiring cache entries over a flat key-value store
//!
//! Each logical entry is stored as two rows, `cache_<key>` holding the value
//! and `timestamp_<key>` holding its expiry instant, in any
//! [`StorageBackend`].

pub mod cache;
pub mod config;
pub mod error;
pub mod storage;
pub mod tasks;

pub use cache::{CacheEvent, CacheManager, CacheStats};
pub use config::Config;
pub use error::{CacheError, Result};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
pub use tasks::spawn_sweep_task;
