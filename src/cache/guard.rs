//! Stampede Guard Module
//!
//! Per-key single-flight: concurrent misses on one key share a single
//! computation and all observe its outcome.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::CacheValue;
use crate::error::{CacheError, Result};

type FlightFuture = BoxFuture<'static, Result<CacheValue>>;

/// In-flight markers. Entries hold weak handles so that a computation
/// abandoned by every waiter is dropped instead of parked in the table.
#[derive(Default)]
struct FlightTable {
    next_id: u64,
    flights: HashMap<String, (u64, WeakShared<FlightFuture>)>,
}

// == Flight Release ==
/// Removes the in-flight marker when the computation finishes or is dropped.
struct FlightRelease {
    table: Arc<Mutex<FlightTable>>,
    key: String,
    id: u64,
}

impl Drop for FlightRelease {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        // A newer flight may already own the key
        if matches!(table.flights.get(&self.key), Some((id, _)) if *id == self.id) {
            table.flights.remove(&self.key);
        }
    }
}

// == Stampede Guard ==
/// Single-flight coordinator.
///
/// The first caller for a key (the leader) installs a shared future in the
/// in-flight table; later callers (followers) await a clone of it. The shared
/// future is driven by whichever waiter polls it, so a cancelled leader does
/// not strand its followers, and the marker is released on every exit path:
/// success, failure, panic, or abandonment by all waiters.
#[derive(Default)]
pub struct StampedeGuard {
    table: Arc<Mutex<FlightTable>>,
}

impl StampedeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    // == Run ==
    /// Runs `fetch` at most once per key per miss window.
    ///
    /// `fetch` is only invoked by the leader, on the first poll, outside the
    /// table lock. A panic inside it is reported to every waiter as
    /// [`CacheError::Fetch`].
    pub async fn run<F, Fut>(&self, key: &str, fetch: F) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CacheValue>> + Send + 'static,
    {
        let (flight, leader) = {
            let mut table = self.table.lock();
            let existing = table
                .flights
                .get(key)
                .and_then(|(_, weak)| weak.upgrade());

            match existing {
                Some(flight) => (flight, false),
                None => {
                    table.next_id += 1;
                    let id = table.next_id;
                    let flight = self.launch(key, id, fetch);
                    if let Some(weak) = flight.downgrade() {
                        table.flights.insert(key.to_string(), (id, weak));
                    }
                    (flight, true)
                }
            }
        };

        if leader {
            debug!(key = %key, "leading fetch");
        } else {
            debug!(key = %key, "joining in-flight fetch");
        }
        flight.await
    }

    fn launch<F, Fut>(&self, key: &str, id: u64, fetch: F) -> Shared<FlightFuture>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CacheValue>> + Send + 'static,
    {
        let release = FlightRelease {
            table: Arc::clone(&self.table),
            key: key.to_string(),
            id,
        };
        async move {
            let outcome = AssertUnwindSafe(async move { fetch().await })
                .catch_unwind()
                .await;
            let outcome = outcome.unwrap_or_else(|_| {
                warn!(key = %release.key, "fetch panicked");
                Err(CacheError::Fetch("fetch panicked".to_string()))
            });
            drop(release);
            outcome
        }
        .boxed()
        .shared()
    }

    /// Number of keys with a computation in progress.
    pub fn in_flight(&self) -> usize {
        self.table.lock().flights.len()
    }
}
