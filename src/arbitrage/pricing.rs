//! Price and cost collaborators for arbitrage

use crate::config::{ArbitrageConfig, PriceEntry};
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::Address;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Chain-local token price
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_price(&self, chain_id: u64, token: Address) -> OrchestratorResult<Decimal>;
}

/// Execution cost estimates, in the same unit as profit
#[cfg_attr(test, mockall::automock)]
pub trait CostModel: Send + Sync {
    fn tx_cost(&self, chain_id: u64) -> Decimal;

    fn transfer_cost(&self, from_chain: u64, to_chain: u64) -> Decimal;
}

/// Fixed price table, loaded from config and updatable at runtime
#[derive(Default)]
pub struct StaticPriceSource {
    prices: DashMap<(u64, Address), Decimal>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(entries: &[PriceEntry]) -> OrchestratorResult<Self> {
        let source = Self::new();
        for entry in entries {
            let token = entry.token.parse::<Address>().map_err(|e| {
                OrchestratorError::Config(format!("invalid token {}: {}", entry.token, e))
            })?;
            source.set_price(entry.chain_id, token, entry.price);
        }
        Ok(source)
    }

    pub fn set_price(&self, chain_id: u64, token: Address, price: Decimal) {
        self.prices.insert((chain_id, token), price);
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn get_price(&self, chain_id: u64, token: Address) -> OrchestratorResult<Decimal> {
        self.prices
            .get(&(chain_id, token))
            .map(|p| *p)
            .ok_or_else(|| OrchestratorError::PriceUnavailable {
                chain_id,
                token: format!("{:?}", token),
            })
    }
}

/// Per-chain transaction costs and per-route transfer costs with defaults
#[derive(Debug, Clone, Default)]
pub struct FixedCostModel {
    default_tx_cost: Decimal,
    default_transfer_cost: Decimal,
    tx_costs: HashMap<u64, Decimal>,
    transfer_costs: HashMap<(u64, u64), Decimal>,
}

impl FixedCostModel {
    pub fn from_config(config: &ArbitrageConfig) -> Self {
        Self {
            default_tx_cost: config.default_tx_cost,
            default_transfer_cost: config.default_transfer_cost,
            tx_costs: config.tx_costs.iter().map(|c| (c.chain_id, c.cost)).collect(),
            transfer_costs: config
                .transfer_costs
                .iter()
                .map(|c| ((c.from_chain, c.to_chain), c.cost))
                .collect(),
        }
    }
}

impl CostModel for FixedCostModel {
    fn tx_cost(&self, chain_id: u64) -> Decimal {
        self.tx_costs
            .get(&chain_id)
            .copied()
            .unwrap_or(self.default_tx_cost)
    }

    fn transfer_cost(&self, from_chain: u64, to_chain: u64) -> Decimal {
        self.transfer_costs
            .get(&(from_chain, to_chain))
            .copied()
            .unwrap_or(self.default_transfer_cost)
    }
}
