//! Cache Manager Module
//!
//! TTL cache built from two rows per entry in a non-expiring store: the
//! payload under `cache_<key>` and the expiry instant under `timestamp_<key>`.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::entry::{
    current_timestamp_ms, expiry_from, is_live, logical_key, parse_expiry, ttl_remaining_ms,
    EntryKeys,
};
use crate::cache::locks::KeyLocks;
use crate::cache::stats::StatsCounters;
use crate::cache::{CacheEvent, CacheStats, DEFAULT_CACHE_TIME_MS, TIMESTAMP_PREFIX};
use crate::error::{CacheError, Result};
use crate::storage::StorageBackend;

const EVENT_CAPACITY: usize = 256;

/// The empty key would map onto the bare `cache_`/`timestamp_` rows.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("Key cannot be empty".to_string()));
    }
    Ok(())
}

// == Cache Manager ==
/// Expiring cache over a [`StorageBackend`].
///
/// Cloning is cheap; clones share storage, locks, counters and the event
/// channel.
pub struct CacheManager<S: StorageBackend> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    storage: Arc<S>,
    default_ttl_ms: u64,
    locks: KeyLocks,
    stats: StatsCounters,
    events: broadcast::Sender<CacheEvent>,
}

impl<S: StorageBackend> Clone for CacheManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StorageBackend> CacheManager<S> {
    // == Constructor ==
    /// Creates a manager with the one-hour default TTL.
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_default_ttl(storage, DEFAULT_CACHE_TIME_MS)
    }

    /// Creates a manager whose `set` falls back to `default_ttl_ms`.
    ///
    /// A zero default is replaced by the one-hour constant.
    pub fn with_default_ttl(storage: Arc<S>, default_ttl_ms: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let default_ttl_ms = if default_ttl_ms == 0 {
            DEFAULT_CACHE_TIME_MS
        } else {
            default_ttl_ms
        };

        Self {
            inner: Arc::new(Inner {
                storage,
                default_ttl_ms,
                locks: KeyLocks::default(),
                stats: StatsCounters::default(),
                events,
            }),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.inner.storage
    }

    pub fn default_ttl_ms(&self) -> u64 {
        self.inner.default_ttl_ms
    }

    /// Subscribes to housekeeping events (delete-on-read and its outcome).
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    // == Set ==
    /// Stores `value` under `key` for `ttl_ms` milliseconds.
    ///
    /// `None` or `Some(0)` uses the default TTL. The value row is written
    /// first; the expiry row is written only once that succeeded, so a
    /// failed write never leaves an expiry without a payload. Returns the
    /// stored value.
    pub async fn set(&self, key: &str, value: Value, ttl_ms: Option<u64>) -> Result<Value> {
        validate_key(key)?;

        let keys = EntryKeys::new(key);
        let ttl_ms = ttl_ms
            .filter(|ttl| *ttl > 0)
            .unwrap_or(self.inner.default_ttl_ms);
        let expires_at = expiry_from(current_timestamp_ms(), ttl_ms);

        let _guard = self.inner.locks.lock(key).await;
        self.inner.storage.set(&keys.value, value.clone()).await?;
        self.inner
            .storage
            .set(&keys.timestamp, Value::from(expires_at))
            .await?;

        debug!(key, ttl_ms, expires_at, "cache entry set");
        Ok(value)
    }

    /// Serializes `value` and stores it like [`CacheManager::set`].
    pub async fn set_as<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_ms: Option<u64>,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value, ttl_ms).await.map(|_| ())
    }

    // == Get ==
    /// Returns the live value for `key`, or `default` (`null` if none).
    ///
    /// Never fails: storage errors degrade to the default. Reading an
    /// expired or absent entry dispatches a background deletion of both rows.
    pub async fn get(&self, key: &str, default: Option<Value>) -> Value {
        self.lookup(key)
            .await
            .unwrap_or_else(|| default.unwrap_or(Value::Null))
    }

    /// Returns the live value for `key` deserialized as `T`.
    ///
    /// `None` when the entry is not live or does not deserialize.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.lookup(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(err) => {
                debug!(key, error = %err, "cached value has unexpected shape");
                None
            }
        }
    }

    // == Has ==
    /// True iff `key` holds a live entry, including a cached `null`.
    pub async fn has(&self, key: &str) -> bool {
        self.lookup(key).await.is_some()
    }

    // == TTL ==
    /// Remaining lifetime of a live entry in milliseconds.
    ///
    /// Reads only the expiry row and never triggers deletion.
    pub async fn ttl(&self, key: &str) -> Option<u64> {
        validate_key(key).ok()?;
        let keys = EntryKeys::new(key);
        let raw = self.inner.storage.get(&keys.timestamp, None).await.ok()?;
        let expires_at = parse_expiry(&raw)?;
        let now = current_timestamp_ms();
        is_live(Some(expires_at), now).then(|| ttl_remaining_ms(expires_at, now))
    }

    /// Two-phase read shared by `get`, `get_as` and `has`.
    ///
    /// `None` means absent, so a cached `null` stays distinguishable from a
    /// miss. The empty key is always absent and never touches storage.
    async fn lookup(&self, key: &str) -> Option<Value> {
        if validate_key(key).is_err() {
            self.inner.stats.record_miss();
            return None;
        }

        let keys = EntryKeys::new(key);
        let now = current_timestamp_ms();

        // An absent expiry row reads as "0", already expired
        let raw_expiry = match self.inner.storage.get(&keys.timestamp, Some(json!("0"))).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key, error = %err, "expiry read failed, using default");
                self.inner.stats.record_miss();
                return None;
            }
        };

        if !is_live(parse_expiry(&raw_expiry), now) {
            self.inner.stats.record_miss();
            self.spawn_expired_eviction(key);
            return None;
        }

        match self.inner.storage.get(&keys.value, None).await {
            Ok(value) => {
                self.inner.stats.record_hit();
                Some(value)
            }
            Err(err) => {
                if err.is_not_found() {
                    debug!(key, "expiry row without value row");
                } else {
                    warn!(key, error = %err, "value read failed, using default");
                }
                self.inner.stats.record_miss();
                None
            }
        }
    }

    // == Delete ==
    /// Removes both rows of `key`.
    ///
    /// The two deletions run concurrently and this returns once both have
    /// settled. Succeeds if at least one row deletion succeeded; removing
    /// absent rows is not an error. The empty key is rejected.
    pub async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let _guard = self.inner.locks.lock(key).await;
        self.delete_rows(key).await
    }

    async fn delete_rows(&self, key: &str) -> Result<()> {
        let keys = EntryKeys::new(key);
        let storage = &self.inner.storage;

        let (value_result, timestamp_result) =
            tokio::join!(storage.delete(&keys.value), storage.delete(&keys.timestamp));

        match (value_result, timestamp_result) {
            (Err(err), Err(_)) => Err(err),
            (Err(err), Ok(())) | (Ok(()), Err(err)) => {
                warn!(key, error = %err, "partial cache entry delete");
                Ok(())
            }
            (Ok(()), Ok(())) => {
                debug!(key, "cache entry deleted");
                Ok(())
            }
        }
    }

    // == Expired Eviction ==
    fn spawn_expired_eviction(&self, key: &str) {
        self.inner.stats.record_expired_on_read();
        let _ = self.inner.events.send(CacheEvent::ExpiredOnRead {
            key: key.to_string(),
        });

        let manager = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            manager.evict_if_expired(&key).await;
        });
    }

    /// Deletes `key` unless a concurrent `set` refreshed it first.
    ///
    /// Returns whether the entry was removed.
    async fn evict_if_expired(&self, key: &str) -> bool {
        let removed = {
            let _guard = self.inner.locks.lock(key).await;
            let keys = EntryKeys::new(key);

            match self.inner.storage.get(&keys.timestamp, None).await {
                Ok(raw) if is_live(parse_expiry(&raw), current_timestamp_ms()) => {
                    debug!(key, "entry refreshed before eviction");
                    false
                }
                Err(err) if !err.is_not_found() => {
                    warn!(key, error = %err, "expiry re-check failed, skipping eviction");
                    false
                }
                _ => match self.delete_rows(key).await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(key, error = %err, "expired entry eviction failed");
                        false
                    }
                },
            }
        };

        let _ = self.inner.events.send(CacheEvent::EvictionSettled {
            key: key.to_string(),
            removed,
        });
        removed
    }

    // == Clear Expired ==
    /// Removes every entry whose expiry instant is at or before now.
    ///
    /// Only expiry rows holding a parseable integer are considered. All
    /// evictions run concurrently; returns the number of logical keys
    /// removed once every one has settled. Fails only if the initial
    /// full-mapping read fails.
    pub async fn clear_expired(&self) -> Result<usize> {
        self.clear_expired_at(current_timestamp_ms()).await
    }

    /// Sweep with an explicit cut-off; rows expiring exactly at `now` count
    /// as expired.
    pub(crate) async fn clear_expired_at(&self, now: i64) -> Result<usize> {
        let all = self.inner.storage.get_all().await?;

        let expired: Vec<String> = all
            .iter()
            .filter_map(|(physical, raw)| {
                let key = physical.strip_prefix(TIMESTAMP_PREFIX)?;
                let expires_at = parse_expiry(raw)?;
                (expires_at <= now).then(|| key.to_string())
            })
            .collect();

        if expired.is_empty() {
            debug!("no expired cache entries");
            return Ok(0);
        }

        let queued = expired.len();
        let mut tasks = JoinSet::new();
        for key in expired {
            let manager = self.clone();
            tasks.spawn(async move { manager.evict_if_expired(&key).await });
        }

        let mut removed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => warn!(error = %err, "eviction task failed"),
            }
        }

        self.inner.stats.record_swept(removed);
        info!(queued, removed, "expired cache entries cleared");
        Ok(removed)
    }

    // == Clear All ==
    /// Removes every row in the cache namespace, live or expired.
    ///
    /// Row deletions run concurrently and individual failures are tolerated;
    /// returns once all have settled. Fails only if the initial
    /// full-mapping read fails.
    pub async fn clear_all(&self) -> Result<()> {
        let all = self.inner.storage.get_all().await?;

        let rows: Vec<String> = all
            .keys()
            .filter(|physical| logical_key(physical).is_some())
            .cloned()
            .collect();

        if rows.is_empty() {
            debug!("cache namespace already empty");
            return Ok(());
        }

        let total = rows.len();
        let mut tasks = JoinSet::new();
        for row in rows {
            let manager = self.clone();
            tasks.spawn(async move {
                let key = logical_key(&row).unwrap_or_default().to_string();
                let _guard = manager.inner.locks.lock(&key).await;
                manager.inner.storage.delete(&row).await.map_err(|err| (row, err))
            });
        }

        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err((row, err))) => {
                    failed += 1;
                    warn!(row, error = %err, "cache row delete failed");
                }
                Err(err) => {
                    failed += 1;
                    warn!(error = %err, "row delete task failed");
                }
            }
        }

        info!(rows = total, failed, "cache cleared");
        Ok(())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::time::Duration;

    fn create_manager() -> CacheManager<MemoryStorage> {
        CacheManager::new(Arc::new(MemoryStorage::new()))
    }

    /// Wraps `MemoryStorage`, failing operations on rows with chosen prefixes.
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_set: Option<&'static str>,
        fail_delete: Option<&'static str>,
        fail_get: Option<&'static str>,
        fail_get_all: bool,
    }

    fn refused(filter: Option<&'static str>, key: &str) -> bool {
        filter.is_some_and(|prefix| key.starts_with(prefix))
    }

    #[async_trait]
    impl StorageBackend for FlakyStorage {
        async fn get(&self, key: &str, default: Option<Value>) -> Result<Value> {
            let refuse = if key.is_empty() {
                self.fail_get_all
            } else {
                refused(self.fail_get, key)
            };
            if refuse {
                return Err(CacheError::Storage(format!("read refused: {key}")));
            }
            self.inner.get(key, default).await
        }

        async fn set(&self, key: &str, value: Value) -> Result<()> {
            if refused(self.fail_set, key) {
                return Err(CacheError::Storage(format!("write refused: {key}")));
            }
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            if refused(self.fail_delete, key) {
                return Err(CacheError::Storage(format!("delete refused: {key}")));
            }
            self.inner.delete(key).await
        }
    }

    async fn force_expired<S: StorageBackend>(manager: &CacheManager<S>, key: &str) {
        let keys = EntryKeys::new(key);
        manager
            .storage()
            .set(&keys.timestamp, json!(current_timestamp_ms() - 1_000))
            .await
            .unwrap();
    }

    async fn next_settled(rx: &mut broadcast::Receiver<CacheEvent>) -> CacheEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for cache event")
                .unwrap();
            if matches!(event, CacheEvent::EvictionSettled { .. }) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = create_manager();

        let echoed = cache.set("b", json!({"x": 1}), None).await.unwrap();
        assert_eq!(echoed, json!({"x": 1}));
        assert_eq!(cache.get("b", None).await, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_set_writes_both_rows() {
        let cache = create_manager();
        let before = current_timestamp_ms();
        cache.set("k", json!("v"), Some(5_000)).await.unwrap();

        let all = cache.storage().get_all().await.unwrap();
        assert_eq!(all["cache_k"], json!("v"));
        let expires_at = parse_expiry(&all["timestamp_k"]).unwrap();
        assert!(expires_at >= before + 5_000);
        assert!(expires_at <= current_timestamp_ms() + 5_000);
    }

    #[tokio::test]
    async fn test_zero_ttl_uses_default() {
        let cache = create_manager();
        let before = current_timestamp_ms();
        cache.set("k", json!(1), Some(0)).await.unwrap();

        let raw = cache.storage().get("timestamp_k", None).await.unwrap();
        assert!(parse_expiry(&raw).unwrap() >= before + DEFAULT_CACHE_TIME_MS as i64);
    }

    #[tokio::test]
    async fn test_configured_default_ttl() {
        let cache = CacheManager::with_default_ttl(Arc::new(MemoryStorage::new()), 50);
        cache.set("k", json!(1), None).await.unwrap();
        assert!(cache.has("k").await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!cache.has("k").await);
    }

    #[tokio::test]
    async fn test_set_empty_key_rejected() {
        let cache = create_manager();
        let result = cache.set("", json!(1), None).await;
        assert!(matches!(result, Err(CacheError::InvalidKey(_))));
        assert!(cache.storage().is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_key_rejected_everywhere() {
        let cache = create_manager();
        let storage = cache.storage();
        storage.set("cache_", json!("legacy")).await.unwrap();
        storage
            .set("timestamp_", json!(current_timestamp_ms() + 60_000))
            .await
            .unwrap();

        assert_eq!(cache.get("", Some(json!("d"))).await, json!("d"));
        assert!(!cache.has("").await);
        assert!(cache.ttl("").await.is_none());
        assert!(matches!(cache.delete("").await, Err(CacheError::InvalidKey(_))));
        assert_eq!(storage.len().await, 2, "bare-prefix rows left untouched");
    }

    #[tokio::test]
    async fn test_set_value_failure_writes_no_timestamp() {
        let storage = Arc::new(FlakyStorage {
            fail_set: Some("cache_"),
            ..Default::default()
        });
        let cache = CacheManager::new(storage.clone());

        let result = cache.set("k", json!(1), None).await;
        assert!(matches!(result, Err(CacheError::Storage(_))));
        assert!(storage.inner.is_empty().await, "no orphan expiry row");
    }

    #[tokio::test]
    async fn test_orphaned_value_reads_as_absent() {
        let storage = Arc::new(FlakyStorage {
            fail_set: Some("timestamp_"),
            ..Default::default()
        });
        let cache = CacheManager::new(storage.clone());

        assert!(cache.set("k", json!(1), None).await.is_err());
        assert_eq!(storage.inner.len().await, 1);
        assert_eq!(cache.get("k", Some(json!("dflt"))).await, json!("dflt"));
    }

    #[tokio::test]
    async fn test_get_missing_returns_default() {
        let cache = create_manager();

        assert_eq!(cache.get("missing", None).await, Value::Null);
        assert_eq!(cache.get("missing", Some(json!("fallback"))).await, json!("fallback"));
        // Falsy defaults are returned as given
        assert_eq!(cache.get("missing", Some(json!(0))).await, json!(0));
    }

    #[tokio::test]
    async fn test_get_expired_returns_default_and_evicts() {
        let cache = create_manager();
        let mut events = cache.subscribe();

        cache.set("a", json!(42), Some(5_000)).await.unwrap();
        force_expired(&cache, "a").await;

        assert_eq!(cache.get("a", None).await, Value::Null);
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::ExpiredOnRead { key: "a".to_string() }
        );
        assert_eq!(
            next_settled(&mut events).await,
            CacheEvent::EvictionSettled {
                key: "a".to_string(),
                removed: true
            }
        );
        assert!(cache.storage().is_empty().await);
        assert_eq!(cache.stats().expired_on_read, 1);
    }

    #[tokio::test]
    async fn test_expiry_is_exclusive_of_now() {
        let cache = create_manager();
        let storage = cache.storage();
        storage.set("cache_k", json!("v")).await.unwrap();
        storage
            .set("timestamp_k", json!(current_timestamp_ms()))
            .await
            .unwrap();

        assert!(!cache.has("k").await);
    }

    #[tokio::test]
    async fn test_malformed_timestamp_is_expired() {
        let cache = create_manager();
        let storage = cache.storage();
        storage.set("cache_k", json!("v")).await.unwrap();
        storage.set("timestamp_k", json!("not-a-number")).await.unwrap();

        assert_eq!(cache.get("k", Some(json!("d"))).await, json!("d"));
    }

    #[tokio::test]
    async fn test_string_timestamp_accepted() {
        let cache = create_manager();
        let storage = cache.storage();
        let future = (current_timestamp_ms() + 60_000).to_string();
        storage.set("cache_k", json!([1, 2])).await.unwrap();
        storage.set("timestamp_k", json!(future)).await.unwrap();

        assert_eq!(cache.get("k", None).await, json!([1, 2]));
    }

    #[tokio::test]
    async fn test_live_timestamp_without_value_returns_default() {
        let cache = create_manager();
        cache
            .storage()
            .set("timestamp_k", json!(current_timestamp_ms() + 60_000))
            .await
            .unwrap();

        assert_eq!(cache.get("k", Some(json!("d"))).await, json!("d"));
        assert!(!cache.has("k").await);
    }

    #[tokio::test]
    async fn test_read_failure_degrades_to_default() {
        let storage = Arc::new(FlakyStorage {
            fail_get: Some("timestamp_"),
            ..Default::default()
        });
        let cache = CacheManager::new(storage);
        cache.set("k", json!(1), None).await.unwrap();

        assert_eq!(cache.get("k", Some(json!("d"))).await, json!("d"));
        assert!(!cache.has("k").await);
    }

    #[tokio::test]
    async fn test_value_read_failure_degrades_to_default() {
        let storage = Arc::new(FlakyStorage {
            fail_get: Some("cache_"),
            ..Default::default()
        });
        let cache = CacheManager::new(storage);
        cache.set("k", json!(1), None).await.unwrap();

        assert_eq!(cache.get("k", None).await, Value::Null);
    }

    #[tokio::test]
    async fn test_has_cached_null() {
        let cache = create_manager();
        cache.set("n", Value::Null, None).await.unwrap();

        assert!(cache.has("n").await);
        assert!(!cache.has("other").await);
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = create_manager();
        cache.set("c", json!(1), Some(5_000)).await.unwrap();

        cache.delete("c").await.unwrap();
        assert_eq!(cache.get("c", Some(json!("fallback"))).await, json!("fallback"));
        assert!(cache.storage().is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_twice_is_ok() {
        let cache = create_manager();
        cache.set("c", json!(1), None).await.unwrap();

        cache.delete("c").await.unwrap();
        cache.delete("c").await.unwrap();
        cache.delete("never_set").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_succeeds_if_one_row_deleted() {
        let storage = Arc::new(FlakyStorage {
            fail_delete: Some("timestamp_"),
            ..Default::default()
        });
        let cache = CacheManager::new(storage.clone());
        cache.set("k", json!(1), None).await.unwrap();

        cache.delete("k").await.unwrap();
        let all = storage.inner.get_all().await.unwrap();
        assert!(!all.contains_key("cache_k"));
        assert!(all.contains_key("timestamp_k"));
    }

    #[tokio::test]
    async fn test_delete_fails_if_both_rows_fail() {
        let storage = Arc::new(FlakyStorage {
            fail_delete: Some(""),
            ..Default::default()
        });
        let cache = CacheManager::new(storage);
        cache.set("k", json!(1), None).await.unwrap();

        assert!(matches!(cache.delete("k").await, Err(CacheError::Storage(_))));
    }

    #[tokio::test]
    async fn test_clear_expired_none_expired() {
        let cache = create_manager();
        cache.set("d", json!(1), Some(5_000)).await.unwrap();
        cache.set("e", json!(2), Some(5_000)).await.unwrap();

        assert_eq!(cache.clear_expired().await.unwrap(), 0);
        assert!(cache.has("d").await);
        assert!(cache.has("e").await);
    }

    #[tokio::test]
    async fn test_clear_expired_removes_only_expired() {
        let cache = create_manager();
        cache.set("d", json!(1), Some(5_000)).await.unwrap();
        cache.set("e", json!(2), Some(5_000)).await.unwrap();
        force_expired(&cache, "e").await;

        assert_eq!(cache.clear_expired().await.unwrap(), 1);
        assert!(!cache.has("e").await);
        assert!(cache.has("d").await);
        assert_eq!(cache.stats().swept, 1);
    }

    #[tokio::test]
    async fn test_clear_expired_boundary_is_inclusive() {
        let cache = create_manager();
        let now = current_timestamp_ms();
        let storage = cache.storage();
        storage.set("cache_at_now", json!(1)).await.unwrap();
        storage.set("timestamp_at_now", json!(now)).await.unwrap();
        storage.set("cache_later", json!(2)).await.unwrap();
        storage.set("timestamp_later", json!(now + 1)).await.unwrap();

        assert_eq!(cache.clear_expired_at(now - 1).await.unwrap(), 0);
        assert_eq!(cache.clear_expired_at(now).await.unwrap(), 1);

        let all = storage.get_all().await.unwrap();
        assert!(!all.contains_key("timestamp_at_now"));
        assert!(!all.contains_key("cache_at_now"));
        assert!(all.contains_key("timestamp_later"));
    }

    #[tokio::test]
    async fn test_clear_expired_removes_entry_expiring_now() {
        let cache = create_manager();
        cache.set("k", json!(1), Some(5_000)).await.unwrap();
        cache
            .storage()
            .set("timestamp_k", json!(current_timestamp_ms()))
            .await
            .unwrap();

        assert_eq!(cache.clear_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exponent_timestamp_is_not_live() {
        let cache = create_manager();
        let storage = cache.storage();
        storage.set("cache_k", json!("v")).await.unwrap();
        storage.set("timestamp_k", json!("9e15")).await.unwrap();

        assert_eq!(cache.clear_expired().await.unwrap(), 1);
        assert!(!cache.has("k").await);
    }

    #[tokio::test]
    async fn test_clear_expired_ignores_foreign_and_malformed_rows() {
        let cache = create_manager();
        let storage = cache.storage();
        storage.set("settings", json!(0)).await.unwrap();
        storage.set("timestamp_bad", json!("later")).await.unwrap();

        assert_eq!(cache.clear_expired().await.unwrap(), 0);
        assert_eq!(storage.len().await, 2);
    }

    #[tokio::test]
    async fn test_clear_expired_empty_store() {
        let cache = create_manager();
        assert_eq!(cache.clear_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_expired_read_failure_propagates() {
        let cache = CacheManager::new(Arc::new(FlakyStorage {
            fail_get_all: true,
            ..Default::default()
        }));
        assert!(cache.clear_expired().await.is_err());
        assert!(cache.clear_all().await.is_err());
    }

    #[tokio::test]
    async fn test_clear_expired_tolerates_delete_failures() {
        let storage = Arc::new(FlakyStorage {
            fail_delete: Some(""),
            ..Default::default()
        });
        let cache = CacheManager::new(storage);
        cache.set("x", json!(1), Some(5_000)).await.unwrap();
        force_expired(&cache, "x").await;

        assert_eq!(cache.clear_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let cache = create_manager();
        cache.storage().set("settings", json!({"theme": "dark"})).await.unwrap();
        cache.set("live", json!(1), Some(60_000)).await.unwrap();
        cache.set("old", json!(2), Some(60_000)).await.unwrap();
        force_expired(&cache, "old").await;

        cache.clear_all().await.unwrap();

        let all = cache.storage().get_all().await.unwrap();
        assert_eq!(all.len(), 1, "foreign rows must survive");
        assert!(all.contains_key("settings"));
        assert_eq!(cache.get("live", None).await, Value::Null);
    }

    #[tokio::test]
    async fn test_clear_all_tolerates_delete_failures() {
        let storage = Arc::new(FlakyStorage {
            fail_delete: Some("timestamp_"),
            ..Default::default()
        });
        let cache = CacheManager::new(storage.clone());
        cache.set("k", json!(1), None).await.unwrap();

        cache.clear_all().await.unwrap();
        assert_eq!(storage.inner.len().await, 1);
    }

    #[tokio::test]
    async fn test_eviction_skips_refreshed_entry() {
        let cache = create_manager();
        cache.set("k", json!("old"), Some(5_000)).await.unwrap();
        force_expired(&cache, "k").await;

        // Hold the key so the background eviction queues behind the refresh
        let guard = cache.inner.locks.lock("k").await;
        let mut events = cache.subscribe();
        assert_eq!(cache.get("k", None).await, Value::Null);

        let keys = EntryKeys::new("k");
        let storage = cache.storage();
        storage.set(&keys.value, json!("new")).await.unwrap();
        storage
            .set(&keys.timestamp, json!(current_timestamp_ms() + 60_000))
            .await
            .unwrap();
        drop(guard);

        assert_eq!(
            next_settled(&mut events).await,
            CacheEvent::EvictionSettled {
                key: "k".to_string(),
                removed: false
            }
        );
        assert_eq!(cache.get("k", None).await, json!("new"));
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Profile {
            name: String,
            age: u32,
        }

        let cache = create_manager();
        let profile = Profile {
            name: "ada".to_string(),
            age: 36,
        };
        cache.set_as("p", &profile, None).await.unwrap();

        assert_eq!(cache.get_as::<Profile>("p").await, Some(profile));
        assert_eq!(cache.get_as::<Vec<u8>>("p").await, None);
        assert_eq!(cache.get_as::<Profile>("missing").await, None);
    }

    #[tokio::test]
    async fn test_ttl_remaining() {
        let cache = create_manager();
        cache.set("k", json!(1), Some(10_000)).await.unwrap();

        let remaining = cache.ttl("k").await.unwrap();
        assert!(remaining <= 10_000);
        assert!(remaining >= 9_000);
        assert!(cache.ttl("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_stats_track_reads() {
        let cache = create_manager();
        cache.set("k", json!(1), None).await.unwrap();
        cache.get("k", None).await;
        cache.get("missing", None).await;

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_concurrent_sets_on_same_key_keep_rows_paired() {
        let cache = create_manager();

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.set("shared", json!(i), Some(60_000)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let value = cache.get("shared", None).await;
        assert!(value.as_i64().is_some_and(|v| (0..16).contains(&v)));
        assert_eq!(cache.storage().len().await, 2);
    }
}
