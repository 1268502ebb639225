//! Durable simulation records.
//!
//! Only touched on cold-start hydration and explicit save, never on the
//! per-edit path.

use anyhow::Result;
use async_trait::async_trait;

use crate::simulation::model::SimulationRecord;

pub mod providers;

pub use providers::memory::MemoryRepository;
pub use providers::postgres::PostgresProvider;

#[async_trait]
pub trait SimulationRepository: Send + Sync + std::fmt::Debug {
    /// Most recently updated record for `user_id`.
    async fn find_latest_for_user(&self, user_id: &str) -> Result<Option<SimulationRecord>>;

    /// Insert or update by `simulation_id`. Returns the stored record, whose
    /// `created_at` is the original creation time on update.
    async fn save(&self, record: &SimulationRecord) -> Result<SimulationRecord>;
}
