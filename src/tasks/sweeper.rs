//! Expiry Sweep Task
//!
//! Background task that periodically removes expired cache entries.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::storage::StorageBackend;

/// Shortest interval a sweep loop may run at.
pub const MIN_SWEEP_INTERVAL_SECS: u64 = 1;

fn sweep_interval(secs: u64) -> Duration {
    Duration::from_secs(secs.max(MIN_SWEEP_INTERVAL_SECS))
}

/// Spawns a background task that periodically calls
/// [`CacheManager::clear_expired`].
///
/// The task runs in an infinite loop, sleeping for the specified interval
/// between sweeps. Intervals below [`MIN_SWEEP_INTERVAL_SECS`] are raised to
/// it. A failed sweep is logged and retried on the next tick.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = CacheManager::new(Arc::new(MemoryStorage::new()));
/// let sweep_handle = spawn_sweep_task(cache.clone(), 60);
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task<S: StorageBackend>(
    cache: CacheManager<S>,
    sweep_interval_secs: u64,
) -> JoinHandle<()> {
    spawn_sweep_task_every(cache, sweep_interval(sweep_interval_secs))
}

pub(crate) fn spawn_sweep_task_every<S: StorageBackend>(
    cache: CacheManager<S>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "starting expiry sweep task");

        loop {
            tokio::time::sleep(interval).await;

            match cache.clear_expired().await {
                Ok(0) => debug!("expiry sweep: no expired entries found"),
                Ok(removed) => info!(removed, "expiry sweep: removed expired entries"),
                Err(err) => warn!(error = %err, "expiry sweep failed"),
            }
        }
    })
}
