//! Transfer record persistence
//!
//! Handles:
//! - Durable transfer records keyed by id with a unique lock id index
//! - Lookup of STUCK, LOCK_PENDING and stale LOCKED records for the reconciler
//! - Per-state statistics for the API

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::contracts::LockId;
use crate::error::OrchestratorResult;
use crate::transfer::{TransferRecord, TransferState};

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

/// Storage for transfer records
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert or replace a record by id
    async fn save(&self, record: &TransferRecord) -> OrchestratorResult<()>;

    async fn get(&self, id: Uuid) -> OrchestratorResult<Option<TransferRecord>>;

    async fn get_by_lock_id(&self, lock_id: &LockId) -> OrchestratorResult<Option<TransferRecord>>;

    /// Records in `state`, oldest first
    async fn list_by_state(&self, state: TransferState) -> OrchestratorResult<Vec<TransferRecord>>;

    async fn stats(&self) -> OrchestratorResult<TransferStats>;

    async fn health_check(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

/// Transfer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub initiated: u64,
    pub lock_pending: u64,
    pub locked: u64,
    pub minted: u64,
    pub stuck: u64,
    pub resolved: u64,
    pub failed: u64,
}

impl TransferStats {
    pub fn add(&mut self, state: TransferState, count: u64) {
        let slot = match state {
            TransferState::Initiated => &mut self.initiated,
            TransferState::LockPending => &mut self.lock_pending,
            TransferState::Locked => &mut self.locked,
            TransferState::Minted => &mut self.minted,
            TransferState::Stuck => &mut self.stuck,
            TransferState::Resolved => &mut self.resolved,
            TransferState::Failed => &mut self.failed,
        };
        *slot += count;
    }
}
