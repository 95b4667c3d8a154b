//! Keyed async locks for per-conversation serialization.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Per-key async mutex with periodic stale-entry cleanup.
///
/// Events for the same (channel, user) pair must be applied strictly in
/// arrival order, while unrelated pairs run fully in parallel. Each key gets
/// its own mutex; the map tracks last access so keys that went quiet can be
/// dropped by a background sweep.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, (Arc<Mutex<()>>, Instant)>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for a key, refreshing its last-access time.
    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        let now = Instant::now();
        self.locks
            .entry(key.to_string())
            .and_modify(|(_, last_access)| *last_access = now)
            .or_insert_with(|| (Arc::new(Mutex::new(())), now))
            .0
            .clone()
    }

    /// Drop lock entries idle for longer than `max_age`.
    ///
    /// An entry is only removed when nothing else holds a reference to its
    /// mutex, so a waiter can never lose its lock. Returns the number of
    /// entries removed.
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<_> = self
            .locks
            .iter()
            .filter(|entry| {
                let (lock, last_access) = entry.value();
                Arc::strong_count(lock) == 1 && now.duration_since(*last_access) > max_age
            })
            .map(|entry| entry.key().clone())
            .collect();

        let removed = stale.len();
        for key in stale {
            self.locks.remove(&key);
        }
        removed
    }

    /// Spawn a background task sweeping stale entries every `interval`.
    pub fn spawn_cleanup_task(self, interval: Duration, max_age: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = self.cleanup_stale(max_age);
                if removed > 0 {
                    debug!(removed, remaining = self.len(), "swept idle session locks");
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
