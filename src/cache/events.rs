//! Housekeeping events emitted by the cache manager.

/// Something the cache did on its own, outside the caller's request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A read found the entry expired or absent and dispatched a
    /// background deletion of its rows.
    ExpiredOnRead { key: String },
    /// A background or sweep deletion finished. `removed` is false when
    /// the entry was refreshed before the deletion ran, or the deletion
    /// failed.
    EvictionSettled { key: String, removed: bool },
}

impl CacheEvent {
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::ExpiredOnRead { key } | CacheEvent::EvictionSettled { key, .. } => key,
        }
    }
}
