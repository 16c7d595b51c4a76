//! Per-key coalescing of concurrent cache misses

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of in-flight computations keyed by physical cache key.
///
/// A key's lock exists only while at least one task holds or waits for it.
#[derive(Debug, Default)]
pub(crate) struct FlightMap {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FlightMap {
    /// Wait until no other task is computing `key`, then claim it.
    pub(crate) async fn claim(self: &Arc<Self>, key: &str) -> FlightGuard {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let (guard, waited) = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => (guard, false),
            Err(_) => (lock.lock_owned().await, true),
        };

        FlightGuard {
            map: Arc::clone(self),
            key: key.to_string(),
            guard: Some(guard),
            waited,
        }
    }

    /// Keys with a computation in progress or queued.
    pub(crate) fn in_flight(&self) -> usize {
        self.locks.len()
    }
}

/// Held for the duration of one computation.
#[derive(Debug)]
pub(crate) struct FlightGuard {
    map: Arc<FlightMap>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    waited: bool,
}

impl FlightGuard {
    /// Whether another task held the key when this one arrived.
    pub(crate) const fn waited(&self) -> bool {
        self.waited
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // Release first so the strong count only reflects waiters.
        drop(self.guard.take());
        self.map
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
