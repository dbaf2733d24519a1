//! Multi-chain balance aggregation

use crate::context::OrchestratorContext;
use crate::error::OrchestratorResult;
use crate::fanout::{fan_out, ChainOutcome};

use ethers::types::Address;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Native balance of one address on one chain, in whole tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub chain_id: u64,
    pub address: Address,
    pub amount: Decimal,
    pub currency_symbol: String,
}

/// Fans a balance query out to every registered chain
pub struct BalanceAggregator {
    ctx: Arc<OrchestratorContext>,
    per_chain_timeout: Option<Duration>,
}

impl BalanceAggregator {
    pub fn new(ctx: Arc<OrchestratorContext>, per_chain_timeout: Option<Duration>) -> Self {
        Self {
            ctx,
            per_chain_timeout,
        }
    }

    /// One outcome per registered chain, in chain id order; never fails as a whole
    pub async fn get_all_balances(&self, address: Address) -> Vec<ChainOutcome<Balance>> {
        let chain_ids = self.ctx.registry.chain_ids();
        debug!("Querying balance of {:?} on {} chains", address, chain_ids.len());

        fan_out("balance", &chain_ids, self.per_chain_timeout, |chain_id| {
            self.get_balance(chain_id, address)
        })
        .await
    }

    /// Balance on a single chain
    pub async fn get_balance(&self, chain_id: u64, address: Address) -> OrchestratorResult<Balance> {
        let endpoint = self.ctx.registry.get(chain_id)?;
        let conn = self.ctx.connections.get_connection(chain_id)?;
        let raw = conn.get_balance(address).await?;

        Ok(Balance {
            chain_id,
            address,
            amount: endpoint.from_base_units(raw)?,
            currency_symbol: endpoint.currency_symbol.clone(),
        })
    }

    /// Sum of the successful entries
    pub fn total(outcomes: &[ChainOutcome<Balance>]) -> Decimal {
        outcomes
            .iter()
            .filter_map(|o| o.ok())
            .map(|b| b.amount)
            .sum()
    }
}
