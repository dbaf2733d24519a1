//! Two-phase lock/mint transfer protocol

use super::record::{TransferIntent, TransferRecord, TransferState};
use crate::chain::TxStatus;
use crate::context::{OperationContext, OrchestratorContext};
use crate::contracts::{LockCall, LockId, MintCall, TxRequest};
use crate::error::{OrchestratorError, OrchestratorResult, Phase};
use crate::state::{TransferStats, TransferStore};

use dashmap::DashSet;
use ethers::types::{H256, U256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Removes the lock id from the in-flight set when dropped
struct MintGuard<'a> {
    in_flight: &'a DashSet<LockId>,
    lock_id: LockId,
}

impl Drop for MintGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.lock_id);
    }
}

/// Moves value between chains with a lock on the source and a mint on the destination
pub struct TransferOrchestrator {
    ctx: Arc<OrchestratorContext>,
    store: Arc<dyn TransferStore>,
    /// Lock ids with a mint currently being submitted
    in_flight: DashSet<LockId>,
}

impl TransferOrchestrator {
    pub fn new(ctx: Arc<OrchestratorContext>, store: Arc<dyn TransferStore>) -> Self {
        Self {
            ctx,
            store,
            in_flight: DashSet::new(),
        }
    }

    pub fn context(&self) -> &Arc<OrchestratorContext> {
        &self.ctx
    }

    /// Lock on `from_chain`, then mint on `to_chain` once the lock is confirmed
    ///
    /// Returns a MINTED record carrying both transaction references. A rejected
    /// or reverted lock leaves the record FAILED and reports `PhaseFailure{Lock}`.
    /// A lock whose confirmation is unknown stays LOCK_PENDING, and any failure
    /// after a confirmed lock leaves the record STUCK; both are returned as
    /// `ReconciliationRequired` for the reconciler.
    pub async fn cross_chain_transfer(
        &self,
        intent: TransferIntent,
        op: &OperationContext,
    ) -> OrchestratorResult<TransferRecord> {
        op.checkpoint(Phase::Lock)?;

        let mut record = TransferRecord::new(&intent);
        self.store.save(&record).await?;
        crate::metrics::record_transfer_state(record.state);
        info!(
            "Transfer {} started: {} from chain {} to chain {}",
            record.id, intent.amount, intent.from_chain, intent.to_chain
        );

        let lock_tx = match self.submit_lock(&intent).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                warn!("Transfer {} lock rejected: {}", record.id, e);
                return Err(self.fail_lock(&mut record, e.to_string()).await?);
            }
        };
        // Held from before the pending record is visible until the mint settles
        let _guard = self.acquire(LockId::derive(intent.from_chain, lock_tx))?;
        if let Err(e) = self.apply(&mut record, |r| r.mark_lock_submitted(lock_tx)).await {
            error!(
                "Transfer {} lock {:?} broadcast on chain {} but not recorded: {}",
                record.id, lock_tx, intent.from_chain, e
            );
            return Err(e);
        }

        let lock_id = self.confirm_lock(&mut record).await?;
        info!("Transfer {} locked with id {}", record.id, lock_id);

        if let Err(e) = op.checkpoint(Phase::Mint) {
            warn!("Transfer {} stopped after lock: {}", record.id, e);
            self.apply(&mut record, |r| r.mark_stuck(&e)).await?;
            return Err(e);
        }

        self.mint_and_record(record).await
    }

    /// Retry the mint for a locked transfer
    ///
    /// No-op when the record is already MINTED. A LOCK_PENDING record has its
    /// lock receipt re-checked first. Concurrent callers for the same lock id
    /// get `MintInFlight` instead of a second mint request.
    pub async fn retry_mint(&self, lock_id: LockId) -> OrchestratorResult<TransferRecord> {
        let _guard = self.acquire(lock_id)?;

        let mut record = self.load(&lock_id).await?;
        match record.state {
            TransferState::Minted => {
                debug!("Transfer {} already minted", record.id);
                return Ok(record);
            }
            TransferState::LockPending => {
                info!("Re-checking lock receipt for {}", lock_id);
                self.confirm_lock(&mut record).await?;
            }
            TransferState::Locked | TransferState::Stuck => {}
            other => {
                return Err(OrchestratorError::InvalidStateTransition {
                    from: other.to_string(),
                    to: TransferState::Minted.to_string(),
                })
            }
        }

        info!(
            "Retrying mint for {} (attempt {})",
            lock_id,
            record.mint_attempts + 1
        );
        crate::metrics::record_mint_retry();
        self.mint_and_record(record).await
    }

    /// Operator closes a STUCK transfer without minting
    pub async fn resolve_manually(
        &self,
        lock_id: LockId,
        note: &str,
    ) -> OrchestratorResult<TransferRecord> {
        let _guard = self.acquire(lock_id)?;

        let mut record = self.load(&lock_id).await?;
        self.apply(&mut record, |r| r.resolve(note)).await?;
        warn!("Transfer {} resolved manually: {}", record.id, note);
        Ok(record)
    }

    pub async fn get_transfer(&self, lock_id: &LockId) -> OrchestratorResult<Option<TransferRecord>> {
        self.store.get_by_lock_id(lock_id).await
    }

    pub async fn stuck_transfers(&self) -> OrchestratorResult<Vec<TransferRecord>> {
        self.store.list_by_state(TransferState::Stuck).await
    }

    pub async fn stats(&self) -> OrchestratorResult<TransferStats> {
        self.store.stats().await
    }

    async fn mint_and_record(&self, mut record: TransferRecord) -> OrchestratorResult<TransferRecord> {
        match self.mint(&record).await {
            Ok(mint_tx) => {
                self.apply(&mut record, |r| r.mark_minted(mint_tx)).await?;
                info!("Transfer {} minted: {:?}", record.id, mint_tx);
                Ok(record)
            }
            Err(e) => {
                error!(
                    "Transfer {} mint on chain {} failed: {}",
                    record.id, record.to_chain, e
                );
                self.apply(&mut record, |r| r.record_mint_failure(&e))
                    .await?;
                Err(OrchestratorError::ReconciliationRequired {
                    record: Box::new(record),
                })
            }
        }
    }

    /// Sign and broadcast the bridge lock with the amount attached as value
    async fn submit_lock(&self, intent: &TransferIntent) -> OrchestratorResult<H256> {
        let endpoint = self.ctx.registry.get(intent.from_chain)?;
        let signer = self.ctx.wallet.signer_for(intent.from_chain).await?;
        let amount = endpoint.to_base_units(intent.amount)?;

        let call = LockCall {
            destination_chain_id: U256::from(intent.to_chain),
            recipient: intent.recipient,
            amount,
        };
        signer
            .submit(TxRequest::call_with_value(endpoint.bridge_address, call, amount))
            .await
    }

    /// Wait for the receipt of a LOCK_PENDING record's lock transaction
    ///
    /// Success moves the record to LOCKED; a revert moves it to FAILED. When
    /// the outcome stays unknown the record is kept LOCK_PENDING.
    async fn confirm_lock(&self, record: &mut TransferRecord) -> OrchestratorResult<LockId> {
        let (Some(lock_tx), Some(lock_id)) = (record.lock_tx, record.lock_id) else {
            return Err(OrchestratorError::Internal(format!(
                "transfer {} has no lock transaction",
                record.id
            )));
        };

        let receipt = match self.ctx.wallet.signer_for(record.from_chain).await {
            Ok(signer) => signer.confirm(lock_tx).await,
            Err(e) => Err(e),
        };

        match receipt {
            Ok(receipt) if receipt.status == TxStatus::Success => {
                self.apply(record, |r| r.mark_locked(lock_tx)).await?;
                Ok(lock_id)
            }
            Ok(_) => {
                warn!("Transfer {} lock {:?} reverted", record.id, lock_tx);
                Err(self
                    .fail_lock(record, format!("lock transaction {:?} reverted", lock_tx))
                    .await?)
            }
            Err(e) => {
                warn!(
                    "Transfer {} lock {:?} unconfirmed: {}",
                    record.id, lock_tx, e
                );
                self.apply(record, |r| r.record_lock_unconfirmed(&e))
                    .await?;
                Err(OrchestratorError::ReconciliationRequired {
                    record: Box::new(record.clone()),
                })
            }
        }
    }

    /// Mark the record FAILED and build the lock phase error
    async fn fail_lock(
        &self,
        record: &mut TransferRecord,
        cause: String,
    ) -> OrchestratorResult<OrchestratorError> {
        let err = OrchestratorError::PhaseFailure {
            phase: Phase::Lock,
            chain_id: record.from_chain,
            cause,
        };
        self.apply(record, |r| r.mark_failed(&err)).await?;
        Ok(err)
    }

    async fn mint(&self, record: &TransferRecord) -> OrchestratorResult<H256> {
        let lock_id = record
            .lock_id
            .ok_or_else(|| OrchestratorError::Internal(format!("transfer {} has no lock id", record.id)))?;
        let endpoint = self.ctx.registry.get(record.to_chain)?;
        let signer = self.ctx.wallet.signer_for(record.to_chain).await?;

        let call = MintCall {
            lock_id: *lock_id.as_bytes(),
            recipient: record.recipient,
            amount: endpoint.to_base_units(record.amount)?,
        };
        let receipt = signer
            .send_and_confirm(TxRequest::call(endpoint.bridge_address, call))
            .await?;
        Ok(receipt.tx_hash)
    }

    async fn load(&self, lock_id: &LockId) -> OrchestratorResult<TransferRecord> {
        self.store
            .get_by_lock_id(lock_id)
            .await?
            .ok_or_else(|| OrchestratorError::TransferNotFound(lock_id.to_string()))
    }

    /// Apply a state change and save it; the metric counts only changed states
    async fn apply<F>(&self, record: &mut TransferRecord, change: F) -> OrchestratorResult<bool>
    where
        F: FnOnce(&mut TransferRecord) -> OrchestratorResult<()>,
    {
        let previous = record.state;
        change(record)?;
        self.store.save(record).await?;

        let changed = record.state != previous;
        if changed {
            crate::metrics::record_transfer_state(record.state);
        }
        Ok(changed)
    }

    fn acquire(&self, lock_id: LockId) -> OrchestratorResult<MintGuard<'_>> {
        if !self.in_flight.insert(lock_id) {
            return Err(OrchestratorError::MintInFlight { lock_id });
        }
        Ok(MintGuard {
            in_flight: &self.in_flight,
            lock_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ContractCall;
    use crate::state::MemoryStore;
    use crate::testing::FakeNetwork;
    use ethers::types::Address;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn recipient() -> Address {
        Address::repeat_byte(0x77)
    }

    fn setup(chains: &[u64]) -> (Arc<FakeNetwork>, Arc<MemoryStore>, Arc<TransferOrchestrator>) {
        let network = FakeNetwork::new(chains);
        let store = Arc::new(MemoryStore::new());
        let ctx = network.context();
        let orchestrator = Arc::new(TransferOrchestrator::new(ctx, store.clone()));
        (network, store, orchestrator)
    }

    async fn intent(orchestrator: &TransferOrchestrator, amount: Decimal) -> TransferIntent {
        orchestrator.context().connect().await.unwrap();
        TransferIntent::new(&orchestrator.context().registry, 20, 21, amount, recipient()).unwrap()
    }

    async fn stuck_transfer(
        network: &FakeNetwork,
        orchestrator: &TransferOrchestrator,
    ) -> TransferRecord {
        network.chain(21).fail_calls("mint", 1);
        let intent = intent(orchestrator, dec!(1)).await;
        match orchestrator
            .cross_chain_transfer(intent, &OperationContext::new())
            .await
        {
            Err(OrchestratorError::ReconciliationRequired { record }) => *record,
            other => panic!("expected reconciliation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transfer_locks_then_mints() {
        let (network, store, orchestrator) = setup(&[20, 21]);
        let intent = intent(&orchestrator, dec!(1.5)).await;

        let record = orchestrator
            .cross_chain_transfer(intent, &OperationContext::new())
            .await
            .unwrap();

        assert!(record.is_success());
        let amount = U256::from(1_500_000_000_000_000_000u128);
        assert_eq!(
            network.chain(20).calls(),
            vec![ContractCall::Lock(LockCall {
                destination_chain_id: U256::from(21u64),
                recipient: recipient(),
                amount,
            })]
        );
        assert_eq!(
            network.chain(21).calls(),
            vec![ContractCall::Mint(MintCall {
                lock_id: *record.lock_id.unwrap().as_bytes(),
                recipient: recipient(),
                amount,
            })]
        );

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, TransferState::Minted);
        assert_eq!(stored.lock_id, Some(LockId::derive(20, record.lock_tx.unwrap())));
    }

    #[tokio::test]
    async fn test_lock_failure_marks_failed() {
        let (network, store, orchestrator) = setup(&[20, 21]);
        network.chain(20).fail_calls("lock", 1);
        let intent = intent(&orchestrator, dec!(1)).await;

        let err = orchestrator
            .cross_chain_transfer(intent, &OperationContext::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::PhaseFailure { phase: Phase::Lock, chain_id: 20, .. }
        ));
        assert_eq!(err.phase(), Some(Phase::Lock));
        assert_eq!(network.chain(21).tx_count(), 0);
        let failed = store.list_by_state(TransferState::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].lock_tx.is_none());
    }

    #[tokio::test]
    async fn test_reverted_lock_marks_failed() {
        let (network, store, orchestrator) = setup(&[20, 21]);
        network.chain(20).revert_calls("lock", 1);
        let intent = intent(&orchestrator, dec!(1)).await;

        let err = orchestrator
            .cross_chain_transfer(intent, &OperationContext::new())
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Lock));
        assert_eq!(network.chain(21).tx_count(), 0);
        let failed = store.list_by_state(TransferState::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].lock_tx.is_some());
    }

    #[tokio::test]
    async fn test_unconfirmed_lock_stays_pending_until_retried() {
        let (network, store, orchestrator) = setup(&[20, 21]);
        network.chain(20).time_out_receipts(1);
        let intent = intent(&orchestrator, dec!(1)).await;

        let err = orchestrator
            .cross_chain_transfer(intent, &OperationContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Lock));
        let record = match err {
            OrchestratorError::ReconciliationRequired { record } => *record,
            other => panic!("expected pending lock, got {:?}", other),
        };

        assert_eq!(record.state, TransferState::LockPending);
        assert!(record.lock_tx.is_some());
        assert_eq!(network.chain(20).calls_named("lock").len(), 1);
        assert_eq!(network.chain(21).tx_count(), 0);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.lock_pending, 1);

        let minted = orchestrator
            .retry_mint(record.lock_id.unwrap())
            .await
            .unwrap();
        assert!(minted.is_success());
        assert_eq!(minted.lock_tx, record.lock_tx);
        assert_eq!(network.chain(20).calls_named("lock").len(), 1);
        assert_eq!(network.chain(21).calls_named("mint").len(), 1);
    }

    #[tokio::test]
    async fn test_retry_waits_for_live_lock_confirmation() {
        let (network, store, orchestrator) = setup(&[20, 21]);
        network.chain(20).set_receipt_delay(Duration::from_millis(100));
        let intent = intent(&orchestrator, dec!(1)).await;

        let live = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .cross_chain_transfer(intent, &OperationContext::new())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        let pending = store.list_by_state(TransferState::LockPending).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(matches!(
            orchestrator.retry_mint(pending[0].lock_id.unwrap()).await,
            Err(OrchestratorError::MintInFlight { .. })
        ));

        let record = live.await.unwrap().unwrap();
        assert!(record.is_success());
        assert_eq!(network.chain(21).calls_named("mint").len(), 1);
    }

    #[tokio::test]
    async fn test_state_changes_are_counted_once() {
        let (network, _store, orchestrator) = setup(&[20, 21]);
        let mut record = stuck_transfer(&network, &orchestrator).await;
        let err = OrchestratorError::Internal("rpc down".to_string());

        let changed = orchestrator
            .apply(&mut record, |r| r.record_mint_failure(&err))
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(record.mint_attempts, 2);

        let changed = orchestrator
            .apply(&mut record, |r| r.mark_minted(H256::repeat_byte(0x0b)))
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn test_mint_failure_leaves_stuck_record() {
        let (network, store, orchestrator) = setup(&[20, 21]);
        let record = stuck_transfer(&network, &orchestrator).await;

        assert_eq!(record.state, TransferState::Stuck);
        assert!(record.lock_tx.is_some());
        assert!(record.mint_tx.is_none());
        assert!(!record.is_success());
        assert_eq!(record.mint_attempts, 1);
        assert_eq!(orchestrator.stuck_transfers().await.unwrap().len(), 1);
        assert_eq!(store.stats().await.unwrap().stuck, 1);
    }

    #[tokio::test]
    async fn test_retry_mint_twice_mints_once() {
        let (network, _store, orchestrator) = setup(&[20, 21]);
        let lock_id = stuck_transfer(&network, &orchestrator).await.lock_id.unwrap();

        let first = orchestrator.retry_mint(lock_id).await.unwrap();
        let second = orchestrator.retry_mint(lock_id).await.unwrap();

        assert!(first.is_success());
        assert_eq!(first.mint_tx, second.mint_tx);
        assert_eq!(network.chain(21).calls_named("mint").len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_retries_are_deduplicated() {
        let (network, _store, orchestrator) = setup(&[20, 21]);
        let lock_id = stuck_transfer(&network, &orchestrator).await.lock_id.unwrap();

        let (a, b) = tokio::join!(
            orchestrator.retry_mint(lock_id),
            orchestrator.retry_mint(lock_id)
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(OrchestratorError::MintInFlight { .. }))));
        assert_eq!(network.chain(21).calls_named("mint").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_retry_stays_stuck() {
        let (network, _store, orchestrator) = setup(&[20, 21]);
        let lock_id = stuck_transfer(&network, &orchestrator).await.lock_id.unwrap();

        network.chain(21).revert_calls("mint", 1);
        match orchestrator.retry_mint(lock_id).await {
            Err(OrchestratorError::ReconciliationRequired { record }) => {
                assert_eq!(record.state, TransferState::Stuck);
                assert_eq!(record.mint_attempts, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deadline_after_lock_leaves_stuck() {
        let (network, store, orchestrator) = setup(&[20, 21]);
        network.chain(20).set_receipt_delay(Duration::from_millis(50));
        let intent = intent(&orchestrator, dec!(1)).await;

        let op = OperationContext::with_timeout(Duration::from_millis(10));
        let err = orchestrator.cross_chain_transfer(intent, &op).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Timeout { .. }));
        assert_eq!(network.chain(21).tx_count(), 0);
        let stuck = store.list_by_state(TransferState::Stuck).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].mint_attempts, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_lock() {
        let (network, store, orchestrator) = setup(&[20, 21]);
        let intent = intent(&orchestrator, dec!(1)).await;
        let op = OperationContext::new();
        op.cancel();

        assert!(matches!(
            orchestrator.cross_chain_transfer(intent, &op).await,
            Err(OrchestratorError::Cancelled { before_phase: Phase::Lock })
        ));
        assert_eq!(network.total_tx_count(), 0);
        assert_eq!(store.stats().await.unwrap(), TransferStats::default());
    }

    #[tokio::test]
    async fn test_resolve_manually() {
        let (network, _store, orchestrator) = setup(&[20, 21]);
        let lock_id = stuck_transfer(&network, &orchestrator).await.lock_id.unwrap();

        let record = orchestrator
            .resolve_manually(lock_id, "refunded on source chain")
            .await
            .unwrap();
        assert_eq!(record.state, TransferState::Resolved);

        assert!(matches!(
            orchestrator.retry_mint(lock_id).await,
            Err(OrchestratorError::InvalidStateTransition { .. })
        ));
        assert_eq!(network.chain(21).calls_named("mint").len(), 0);
    }

    #[tokio::test]
    async fn test_retry_unknown_lock() {
        let (_network, _store, orchestrator) = setup(&[20, 21]);
        let lock_id = LockId::derive(20, H256::repeat_byte(0x99));

        assert!(matches!(
            orchestrator.retry_mint(lock_id).await,
            Err(OrchestratorError::TransferNotFound(_))
        ));
    }
}
