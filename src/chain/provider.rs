//! Chain provider with multi-RPC support and automatic failover

use super::gas::GasPolicy;
use super::registry::ChainEndpoint;
use super::rpc::{ChainRpc, Connector, TxReceipt, TxStatus};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain endpoint
    endpoint: Arc<ChainEndpoint>,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Gas limit buffer and fee cap
    gas_policy: GasPolicy,
    /// Receipt polling interval
    poll_interval: Duration,
    /// Upper bound on waiting for a receipt
    receipt_timeout: Duration,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(
        endpoint: Arc<ChainEndpoint>,
        gas_policy: GasPolicy,
        poll_interval: Duration,
        receipt_timeout: Duration,
    ) -> OrchestratorResult<Self> {
        let mut http_providers = Vec::new();

        // Initialize HTTP providers
        for url in &endpoint.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(poll_interval);
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", endpoint.id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(OrchestratorError::ChainConnection {
                chain_id: endpoint.id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            endpoint,
            http_providers,
            current_provider: AtomicUsize::new(0),
            gas_policy,
            poll_interval,
            receipt_timeout,
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.endpoint.id, next);
    }

    /// Poll for a receipt until it is buried under enough blocks
    async fn poll_receipt(&self, tx_hash: H256, confirmations: u64) -> OrchestratorResult<TxReceipt> {
        loop {
            let receipt = self
                .http()
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| self.connection_error(e))?;

            if let Some(receipt) = receipt {
                if let Some(block) = receipt.block_number {
                    let block = block.as_u64();
                    let current = self.block_number().await?;
                    let depth = current.saturating_sub(block) + 1;

                    if depth >= confirmations {
                        let status = if receipt.status == Some(1.into()) {
                            TxStatus::Success
                        } else {
                            TxStatus::Reverted
                        };
                        return Ok(TxReceipt {
                            tx_hash,
                            block_number: block,
                            gas_used: receipt.gas_used.unwrap_or_default(),
                            status,
                            contract_address: receipt.contract_address,
                        });
                    }

                    debug!(
                        "Transaction {:?} has {} / {} confirmations on chain {}",
                        tx_hash, depth, confirmations, self.endpoint.id
                    );
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn connection_error(&self, e: impl std::fmt::Display) -> OrchestratorError {
        OrchestratorError::ChainConnection {
            chain_id: self.endpoint.id,
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl ChainRpc for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.endpoint.id
    }

    /// Get current block number with failover
    async fn block_number(&self) -> OrchestratorResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.endpoint.id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    /// Get balance with failover
    async fn get_balance(&self, address: Address) -> OrchestratorResult<U256> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_balance(address, None).await {
                Ok(balance) => return Ok(balance),
                Err(e) => {
                    warn!(
                        "Failed to get balance of {:?} from chain {}: {}",
                        address, self.endpoint.id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get balance"))
    }

    async fn transaction_count(&self, address: Address) -> OrchestratorResult<u64> {
        self.http()
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map(|n| n.as_u64())
            .map_err(|e| self.connection_error(e))
    }

    async fn fill_transaction(
        &self,
        tx: &mut TypedTransaction,
        from: Address,
    ) -> OrchestratorResult<()> {
        tx.set_from(from);
        self.http()
            .fill_transaction(tx, None)
            .await
            .map_err(|e| OrchestratorError::Transaction {
                chain_id: self.endpoint.id,
                message: format!("failed to fill transaction: {}", e),
            })?;
        self.gas_policy.apply(tx);
        Ok(())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> OrchestratorResult<H256> {
        let pending = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("insufficient funds") {
                    OrchestratorError::InsufficientBalance {
                        chain_id: self.endpoint.id,
                        have: "unknown".to_string(),
                        need: "unknown".to_string(),
                    }
                } else {
                    OrchestratorError::Transaction {
                        chain_id: self.endpoint.id,
                        message,
                    }
                }
            })?;

        Ok(pending.tx_hash())
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        confirmations: u64,
    ) -> OrchestratorResult<TxReceipt> {
        match tokio::time::timeout(
            self.receipt_timeout,
            self.poll_receipt(tx_hash, confirmations),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Timed out waiting for {:?} on chain {}",
                    tx_hash, self.endpoint.id
                );
                Err(OrchestratorError::Timeout {
                    operation: format!("receipt {:?} on chain {}", tx_hash, self.endpoint.id),
                })
            }
        }
    }
}

/// Connector producing ethers-backed providers
pub struct HttpConnector {
    gas_policy: GasPolicy,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl HttpConnector {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            gas_policy: GasPolicy::new(config.max_gas_price_gwei),
            poll_interval: Duration::from_millis(config.receipt_poll_ms),
            receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
        }
    }
}

impl Connector for HttpConnector {
    fn connect(&self, endpoint: &ChainEndpoint) -> OrchestratorResult<Arc<dyn ChainRpc>> {
        let provider = ChainProvider::new(
            Arc::new(endpoint.clone()),
            self.gas_policy.clone(),
            self.poll_interval,
            self.receipt_timeout,
        )?;
        Ok(Arc::new(provider))
    }
}
