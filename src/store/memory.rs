//! In-process TTL key-value store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::KvStore;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Volatile store backed by a concurrent map.
///
/// Expired entries are treated as absent on read. They are dropped when the
/// same key is touched again or by the sweeper started with
/// [`spawn_sweeper`](Self::spawn_sweeper). Expiry follows tokio's clock, so
/// paused-time tests can advance past a TTL.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|_, e| {
            let live = e.is_live(now);
            if !live {
                purged += 1;
            }
            live
        });
        purged
    }

    /// Purge expired entries every `period` until `shutdown` is cancelled.
    pub fn spawn_sweeper(&self, period: Duration, shutdown: CancellationToken) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            debug!(name: "store.purged", purged, remaining = store.stored(), "Expired entries dropped");
                        }
                    }
                }
            }
            debug!(name: "store.sweeper_stopped", "Store sweeper stopped");
        });
    }

    /// Number of stored entries, expired ones included.
    pub fn stored(&self) -> usize {
        self.entries.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> anyhow::Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn take(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, e)| e)
            .filter(|e| e.is_live(now))
            .map(|e| e.value))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
