//! In-memory transfer store

use super::{TransferStats, TransferStore};
use crate::contracts::LockId;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::transfer::{TransferRecord, TransferState};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// Transfer store backed by concurrent maps; contents are lost on restart
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<Uuid, TransferRecord>,
    by_lock_id: DashMap<LockId, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransferStore for MemoryStore {
    async fn save(&self, record: &TransferRecord) -> OrchestratorResult<()> {
        if let Some(lock_id) = record.lock_id {
            let owner = *self.by_lock_id.entry(lock_id).or_insert(record.id);
            if owner != record.id {
                return Err(OrchestratorError::Storage(format!(
                    "lock id {} already belongs to transfer {}",
                    lock_id, owner
                )));
            }
        }

        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> OrchestratorResult<Option<TransferRecord>> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn get_by_lock_id(&self, lock_id: &LockId) -> OrchestratorResult<Option<TransferRecord>> {
        let id = match self.by_lock_id.get(lock_id) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.get(id).await
    }

    async fn list_by_state(&self, state: TransferState) -> OrchestratorResult<Vec<TransferRecord>> {
        let mut records: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|r| r.state == state)
            .map(|r| r.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn stats(&self) -> OrchestratorResult<TransferStats> {
        let mut stats = TransferStats::default();
        for record in self.records.iter() {
            stats.add(record.state, 1);
        }
        Ok(stats)
    }
}
