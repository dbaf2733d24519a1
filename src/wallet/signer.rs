//! Per-chain signer with serialized submission
//!
//! Handles:
//! - Local nonce tracking so concurrent callers never collide
//! - Re-sync with the chain after a failed broadcast
//! - Waiting for confirmation outside the submission lock, separately from submission

use super::provider::WalletProvider;
use crate::chain::{ChainEndpoint, ChainRpc, TxReceipt, TxStatus};
use crate::config::GasPriceStrategy;
use crate::contracts::TxRequest;
use crate::error::{OrchestratorError, OrchestratorResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Eip1559TransactionRequest, TransactionRequest, H256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Nonce state guarded by the submission lock
#[derive(Debug, Default)]
struct NonceState {
    /// Next nonce to use, `None` until synced with the chain
    next: Option<u64>,
    /// Transactions broadcast through this signer
    submitted: u64,
}

/// Signing capability for one chain, bound to the session identity
pub struct ChainSigner {
    endpoint: Arc<ChainEndpoint>,
    address: Address,
    rpc: Arc<dyn ChainRpc>,
    wallet: Arc<dyn WalletProvider>,
    state: Mutex<NonceState>,
}

impl ChainSigner {
    pub fn new(
        endpoint: Arc<ChainEndpoint>,
        address: Address,
        rpc: Arc<dyn ChainRpc>,
        wallet: Arc<dyn WalletProvider>,
    ) -> Self {
        Self {
            endpoint,
            address,
            rpc,
            wallet,
            state: Mutex::new(NonceState::default()),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.endpoint.id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn endpoint(&self) -> &Arc<ChainEndpoint> {
        &self.endpoint
    }

    /// Sign and broadcast a transaction; submissions on this chain are serialized
    pub async fn submit(&self, request: TxRequest) -> OrchestratorResult<H256> {
        let chain_id = self.endpoint.id;
        let mut state = self.state.lock().await;

        let nonce = match state.next {
            Some(nonce) => nonce,
            None => {
                let nonce = self.rpc.transaction_count(self.address).await?;
                debug!("Synced nonce for chain {}: {}", chain_id, nonce);
                nonce
            }
        };

        let mut tx = self.build_tx(request, nonce);
        self.rpc.fill_transaction(&mut tx, self.address).await?;
        let raw = self.wallet.sign_transaction(chain_id, &tx).await?;

        match self.rpc.send_raw_transaction(raw).await {
            Ok(tx_hash) => {
                state.next = Some(nonce + 1);
                state.submitted += 1;
                crate::metrics::record_tx_submitted(chain_id);
                info!(
                    "Transaction sent on chain {}: {:?} (nonce {})",
                    chain_id, tx_hash, nonce
                );
                Ok(tx_hash)
            }
            Err(e) => {
                // The chain may have seen a different nonce; re-sync on next use
                warn!("Broadcast failed on chain {} with nonce {}: {}", chain_id, nonce, e);
                state.next = None;
                Err(e)
            }
        }
    }

    /// Wait for the endpoint's confirmation depth; the receipt may report a revert
    pub async fn confirm(&self, tx_hash: H256) -> OrchestratorResult<TxReceipt> {
        self.rpc
            .wait_for_receipt(tx_hash, self.endpoint.confirmations)
            .await
    }

    /// Submit and wait for the endpoint's confirmation depth; reverts are errors
    pub async fn send_and_confirm(&self, request: TxRequest) -> OrchestratorResult<TxReceipt> {
        let tx_hash = self.submit(request).await?;
        let receipt = self.confirm(tx_hash).await?;

        if receipt.status == TxStatus::Reverted {
            return Err(OrchestratorError::Transaction {
                chain_id: self.endpoint.id,
                message: format!("transaction {:?} reverted", tx_hash),
            });
        }

        Ok(receipt)
    }

    /// Number of transactions broadcast through this signer
    pub async fn submitted_count(&self) -> u64 {
        self.state.lock().await.submitted
    }

    fn build_tx(&self, request: TxRequest, nonce: u64) -> TypedTransaction {
        match self.endpoint.gas_price_strategy {
            GasPriceStrategy::Eip1559 => {
                let mut tx = Eip1559TransactionRequest::new()
                    .from(self.address)
                    .value(request.value)
                    .data(request.data)
                    .nonce(nonce)
                    .chain_id(self.endpoint.id);
                if let Some(to) = request.to {
                    tx = tx.to(to);
                }
                TypedTransaction::Eip1559(tx)
            }
            GasPriceStrategy::Legacy => {
                let mut tx = TransactionRequest::new()
                    .from(self.address)
                    .value(request.value)
                    .data(request.data)
                    .nonce(nonce)
                    .chain_id(self.endpoint.id);
                if let Some(to) = request.to {
                    tx = tx.to(to);
                }
                TypedTransaction::Legacy(tx)
            }
        }
    }
}
