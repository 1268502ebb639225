//! Shared volatile state.
//!
//! The [`KvStore`] trait is the narrow surface the simulation needs from a
//! shared cache: per-key get, set with expiry, atomic get-and-delete and
//! delete. [`StateStore`] layers the per-user `SessionState` document on top.

mod memory;

pub use memory::MemoryKvStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::simulation::model::SessionState;

/// Minimal key-value contract. Each operation is atomic per key.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Store `value`, replacing any previous value and expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> anyhow::Result<()>;

    /// Atomically read and delete. A value is returned to at most one caller.
    async fn take(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Per-user `SessionState` documents, stored as JSON with a TTL that is
/// refreshed on every write.
#[derive(Debug, Clone)]
pub struct StateStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn key(user_id: &str) -> String {
        format!("sim:state:{user_id}")
    }

    /// Load the current document. An undecodable document is treated as
    /// absent.
    pub async fn load(&self, user_id: &str) -> anyhow::Result<Option<SessionState>> {
        let Some(raw) = self.kv.get(&Self::key(user_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(user_id, error = %e, "Discarding undecodable session state");
                Ok(None)
            }
        }
    }

    pub async fn save(&self, user_id: &str, state: &SessionState) -> anyhow::Result<()> {
        let raw = serde_json::to_string(state)?;
        self.kv.set(&Self::key(user_id), raw, Some(self.ttl)).await
    }
}
