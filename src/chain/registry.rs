//! Static chain registry
//!
//! Maps a chain ID to its RPC endpoints, explorer, native currency metadata and
//! the collaborator contracts the orchestrator talks to on that chain.

use crate::config::GasPriceStrategy;
use crate::error::{OrchestratorError, OrchestratorResult};

use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Largest token precision the amount conversions support
pub const MAX_DECIMALS: u32 = 18;

/// Immutable description of one chain endpoint
#[derive(Debug, Clone)]
pub struct ChainEndpoint {
    pub id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub explorer_url: String,
    pub currency_symbol: String,
    pub decimals: u32,
    pub confirmations: u64,
    pub gas_price_strategy: GasPriceStrategy,
    pub bridge_address: Address,
    pub dex_address: Option<Address>,
    pub lender_address: Option<Address>,
}

impl ChainEndpoint {
    /// Explorer link for a transaction
    pub fn explorer_tx_url(&self, tx_hash: &H256) -> String {
        format!("{}/tx/{:?}", self.explorer_url.trim_end_matches('/'), tx_hash)
    }

    /// Convert a whole-token amount into on-chain base units
    pub fn to_base_units(&self, amount: Decimal) -> OrchestratorResult<U256> {
        if amount.is_sign_negative() {
            return Err(OrchestratorError::InvalidTransfer(format!(
                "negative amount {} on chain {}",
                amount, self.id
            )));
        }

        let scale = Decimal::from(10u64.pow(self.decimals));
        let scaled = amount.checked_mul(scale).ok_or_else(|| {
            OrchestratorError::InvalidTransfer(format!(
                "amount {} overflows {} decimals",
                amount, self.decimals
            ))
        })?;

        U256::from_dec_str(&scaled.trunc().to_string())
            .map_err(|e| OrchestratorError::Internal(format!("amount conversion failed: {}", e)))
    }

    /// Convert on-chain base units into a whole-token amount
    pub fn from_base_units(&self, value: U256) -> OrchestratorResult<Decimal> {
        if value > U256::from(i128::MAX as u128) {
            return Err(OrchestratorError::Internal(format!(
                "value {} on chain {} is too large",
                value, self.id
            )));
        }

        Decimal::try_from_i128_with_scale(value.as_u128() as i128, self.decimals)
            .map(|d| d.normalize())
            .map_err(|e| OrchestratorError::Internal(format!("amount conversion failed: {}", e)))
    }
}

/// Registry of every chain the orchestrator may touch
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<u64, Arc<ChainEndpoint>>,
}

impl ChainRegistry {
    /// Build a registry, rejecting duplicate IDs
    pub fn new(endpoints: Vec<ChainEndpoint>) -> OrchestratorResult<Self> {
        let mut chains = BTreeMap::new();

        for endpoint in endpoints {
            if endpoint.decimals > MAX_DECIMALS {
                return Err(OrchestratorError::Config(format!(
                    "chain {} uses {} decimals, at most {} are supported",
                    endpoint.id, endpoint.decimals, MAX_DECIMALS
                )));
            }
            let id = endpoint.id;
            if chains.insert(id, Arc::new(endpoint)).is_some() {
                return Err(OrchestratorError::Config(format!(
                    "chain {} registered twice",
                    id
                )));
            }
        }

        Ok(Self { chains })
    }

    /// Look up a chain endpoint
    pub fn get(&self, chain_id: u64) -> OrchestratorResult<Arc<ChainEndpoint>> {
        self.chains
            .get(&chain_id)
            .cloned()
            .ok_or(OrchestratorError::UnknownChain { chain_id })
    }

    pub fn contains(&self, chain_id: u64) -> bool {
        self.chains.contains_key(&chain_id)
    }

    /// All registered chain IDs in ascending order
    pub fn chain_ids(&self) -> Vec<u64> {
        self.chains.keys().copied().collect()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Arc<ChainEndpoint>> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
