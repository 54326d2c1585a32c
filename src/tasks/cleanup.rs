//! TTL Cleanup Task
//!
//! Background task that periodically removes expired local entries, so memory
//! held by keys nobody reads again is returned without waiting for eviction.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheEngine;

/// Spawns a background task that purges expired local entries every
/// `cleanup_interval_secs` seconds.
///
/// The remote tier expires keys on its own and is not touched. Abort the
/// returned handle on shutdown.
///
/// # Example
/// ```ignore
/// let engine = CacheEngine::from_config(&config).await?;
/// let cleanup_handle = spawn_cleanup_task(engine.clone(), 1);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(engine: CacheEngine, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting TTL cleanup task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = engine.purge_expired();

            if removed > 0 {
                info!("TTL cleanup: removed {} expired entries", removed);
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    })
}
