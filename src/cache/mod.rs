//! Cache Module
//!
//! Expiring cache entries layered over a flat, non-expiring key-value store.

mod entry;
mod events;
mod locks;
mod manager;
mod stats;


// Re-export public types
pub use entry::{current_timestamp_ms, is_live, logical_key, parse_expiry, EntryKeys};
pub use events::CacheEvent;
pub use manager::CacheManager;
pub use stats::CacheStats;

// == Public Constants ==
/// Default entry lifetime: one hour, in milliseconds
pub const DEFAULT_CACHE_TIME_MS: u64 = 60 * 60 * 1000;

/// Prefix of the physical row holding an entry's payload
pub const CACHE_PREFIX: &str = "cache_";

/// Prefix of the physical row holding an entry's expiry instant
pub const TIMESTAMP_PREFIX: &str = "timestamp_";
