//! RPC contract every chain connection satisfies

use super::registry::ChainEndpoint;
use crate::error::OrchestratorResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;

/// Outcome of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Reverted,
}

/// Confirmed transaction receipt
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
    pub gas_used: U256,
    pub status: TxStatus,
    /// Set for contract creations
    pub contract_address: Option<Address>,
}

/// Per-chain RPC client
#[async_trait]
pub trait ChainRpc: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn block_number(&self) -> OrchestratorResult<u64>;

    async fn get_balance(&self, address: Address) -> OrchestratorResult<U256>;

    /// Next nonce for `address` as seen by the chain
    async fn transaction_count(&self, address: Address) -> OrchestratorResult<u64>;

    /// Fill gas limit and fee fields the caller left empty
    async fn fill_transaction(
        &self,
        tx: &mut TypedTransaction,
        from: Address,
    ) -> OrchestratorResult<()>;

    async fn send_raw_transaction(&self, raw: Bytes) -> OrchestratorResult<H256>;

    /// Wait until `tx_hash` is mined with at least `confirmations` blocks on top
    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        confirmations: u64,
    ) -> OrchestratorResult<TxReceipt>;

    async fn health_check(&self) -> bool {
        self.block_number().await.is_ok()
    }
}

/// Creates connection handles for registry endpoints
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &ChainEndpoint) -> OrchestratorResult<Arc<dyn ChainRpc>>;
}
