//! TTL KV - expiry sweeper for a file-backed cache
//!
//! Opens the persisted store, clears entries that expired while the process
//! was down, then sweeps periodically until shutdown.

use std::sync::Arc;

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ttl_kv::{spawn_sweep_task, CacheManager, Config, FileStorage};

/// Main entry point for the cache sweeper.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the file-backed store and build the cache manager
/// 4. Clear entries that expired while stopped
/// 5. Start the background expiry sweep
/// 6. Stop on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ttl_kv=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting TTL KV cache sweeper");

    let config = Config::from_env();
    info!(
        "Configuration loaded: storage_path={}, default_ttl={}ms, sweep_interval={}s",
        config.storage_path.display(),
        config.default_ttl_ms,
        config.sweep_interval
    );

    let storage = Arc::new(FileStorage::new(&config.storage_path));
    let cache = CacheManager::with_default_ttl(storage, config.default_ttl_ms);

    let removed = cache.clear_expired().await?;
    info!("Startup sweep removed {} expired entries", removed);

    let sweep_handle = spawn_sweep_task(cache.clone(), config.sweep_interval);

    shutdown_signal().await?;

    sweep_handle.abort();
    warn!("Sweep task aborted");

    let stats = cache.stats();
    info!(
        "Shutdown complete: swept={}, expired_on_read={}",
        stats.swept, stats.expired_on_read
    );
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    Ok(())
}
