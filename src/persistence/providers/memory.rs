use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::persistence::SimulationRepository;
use crate::simulation::model::SimulationRecord;

/// Process-local repository for development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    records: Arc<DashMap<Uuid, SimulationRecord>>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SimulationRepository for MemoryRepository {
    async fn find_latest_for_user(&self, user_id: &str) -> Result<Option<SimulationRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .max_by_key(|r| r.updated_at)
            .map(|r| r.value().clone()))
    }

    async fn save(&self, record: &SimulationRecord) -> Result<SimulationRecord> {
        let now = Utc::now();
        let mut stored = record.clone();
        stored.updated_at = now;
        if let Some(existing) = self.records.get(&record.simulation_id) {
            stored.created_at = existing.created_at;
        }
        self.records.insert(stored.simulation_id, stored.clone());
        Ok(stored)
    }
}
