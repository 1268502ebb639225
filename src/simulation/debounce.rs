//! Keyed trailing-edge debounce.
//!
//! Each key holds at most one pending timer. Scheduling again for the same
//! key cancels the previous timer, so only the last request in a burst runs.
//! Once a timer fires, its work runs to completion and cannot be cancelled.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct PendingTimer {
    owner: Uuid,
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct DebounceScheduler {
    delay: Duration,
    pending: Arc<DashMap<String, PendingTimer>>,
    generation: Arc<AtomicU64>,
}

impl DebounceScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arm a timer for `key`, replacing any timer already pending for it.
    ///
    /// `owner` identifies the connection that armed the timer so a stale
    /// connection cannot cancel a successor's timer.
    pub fn schedule<F>(&self, key: &str, owner: Uuid, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let previous = self.pending.insert(
            key.to_string(),
            PendingTimer {
                owner,
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        let pending = Arc::clone(&self.pending);
        let delay = self.delay;
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(name: "debounce.superseded", key = %key, generation, "Timer cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
            pending.remove_if(&key, |_, t| t.generation == generation);
            debug!(name: "debounce.fired", key = %key, generation, "Timer fired");
            work.await;
        });
    }

    /// Cancel the pending timer for `key` if `owner` armed it.
    pub fn cancel(&self, key: &str, owner: Uuid) -> bool {
        match self.pending.remove_if(key, |_, t| t.owner == owner) {
            Some((_, timer)) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer.
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut cancelled = 0;
        for key in keys {
            if let Some((_, timer)) = self.pending.remove(&key) {
                timer.token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Number of timers armed and not yet fired.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
