//! Background reconciliation of transfers left between lock and mint

use super::orchestrator::TransferOrchestrator;
use super::record::{TransferRecord, TransferState};
use crate::error::{OrchestratorError, OrchestratorResult, Phase};
use crate::state::TransferStore;

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub scanned: usize,
    pub minted: usize,
    pub still_stuck: usize,
    /// Skipped because a mint was already in flight
    pub in_flight: usize,
    /// Past the automated retry cap; needs an operator
    pub exhausted: usize,
    /// Lock receipt still unavailable
    pub lock_pending: usize,
    /// Lock turned out to have reverted
    pub failed: usize,
}

/// Periodically settles pending locks and retries outstanding mints
pub struct Reconciler {
    transfers: Arc<TransferOrchestrator>,
    store: Arc<dyn TransferStore>,
    interval: Duration,
    max_mint_attempts: u32,
    /// LOCKED records untouched for this long are treated as abandoned
    stale_after: Duration,
    /// Shutdown flag
    shutdown: Arc<RwLock<bool>>,
}

impl Reconciler {
    pub fn new(
        transfers: Arc<TransferOrchestrator>,
        store: Arc<dyn TransferStore>,
        interval: Duration,
        max_mint_attempts: u32,
        stale_after: Duration,
    ) -> Self {
        Self {
            transfers,
            store,
            interval,
            max_mint_attempts,
            stale_after,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Main reconciliation loop
    pub async fn run(&self) -> OrchestratorResult<()> {
        let mut ticker = interval(self.interval);

        info!("Reconciler started (interval {:?})", self.interval);

        loop {
            ticker.tick().await;

            if *self.shutdown.read().await {
                break;
            }

            match self.reconcile_once().await {
                Ok(summary) if summary.scanned > 0 => {
                    info!(
                        "Reconciled {} transfers: {} minted, {} still stuck, {} exhausted, {} lock pending, {} failed",
                        summary.scanned,
                        summary.minted,
                        summary.still_stuck,
                        summary.exhausted,
                        summary.lock_pending,
                        summary.failed
                    );
                }
                Ok(_) => debug!("No transfers to reconcile"),
                Err(e) => error!("Reconciliation pass failed: {}", e),
            }
        }

        info!("Reconciler stopped");
        Ok(())
    }

    /// One pass over LOCK_PENDING, stale LOCKED and STUCK records
    ///
    /// Pending locks get their receipt re-checked; locked records get one
    /// mint attempt while under the attempt cap.
    pub async fn reconcile_once(&self) -> OrchestratorResult<ReconcileSummary> {
        let mut candidates = self.store.list_by_state(TransferState::LockPending).await?;
        candidates.extend(
            self.store
                .list_by_state(TransferState::Locked)
                .await?
                .into_iter()
                .filter(|record| self.is_stale(record)),
        );
        candidates.extend(self.store.list_by_state(TransferState::Stuck).await?);

        let mut summary = ReconcileSummary {
            scanned: candidates.len(),
            ..Default::default()
        };

        for record in candidates {
            let Some(lock_id) = record.lock_id else {
                warn!("Transfer {} in state {} has no lock id", record.id, record.state);
                summary.still_stuck += 1;
                continue;
            };

            if record.state != TransferState::LockPending
                && record.mint_attempts >= self.max_mint_attempts
            {
                error!(
                    "Transfer {} ({}) exhausted {} mint attempts; operator action required",
                    record.id, lock_id, record.mint_attempts
                );
                crate::metrics::record_reconcile_exhausted();
                summary.exhausted += 1;
                continue;
            }

            match self.transfers.retry_mint(lock_id).await {
                Ok(record) if record.is_success() => summary.minted += 1,
                Ok(record) => {
                    debug!("Transfer {} left in state {}", record.id, record.state);
                    summary.still_stuck += 1;
                }
                Err(OrchestratorError::MintInFlight { .. }) => summary.in_flight += 1,
                Err(OrchestratorError::ReconciliationRequired { record })
                    if record.state == TransferState::LockPending =>
                {
                    debug!("Lock for {} still unconfirmed", lock_id);
                    summary.lock_pending += 1;
                }
                Err(e @ OrchestratorError::PhaseFailure { phase: Phase::Lock, .. }) => {
                    warn!("Transfer {} failed on re-check: {}", lock_id, e);
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!("Mint retry for {} failed: {}", lock_id, e);
                    summary.still_stuck += 1;
                }
            }
        }

        Ok(summary)
    }

    fn is_stale(&self, record: &TransferRecord) -> bool {
        (Utc::now() - record.updated_at)
            .to_std()
            .map(|age| age >= self.stale_after)
            .unwrap_or(false)
    }

    /// Signal shutdown
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}
