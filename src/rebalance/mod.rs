//! Portfolio rebalancing across chains
//!
//! Balances are read from every registered chain, compared against
//! percentage targets, and surpluses are bridged to deficits one transfer
//! at a time.

mod planner;

pub use planner::{compute_targets, plan, validate_targets, RebalancePlan};

use crate::balance::BalanceAggregator;
use crate::config::RebalanceConfig;
use crate::context::{OperationContext, OrchestratorContext};
use crate::error::{OrchestratorError, OrchestratorResult, Phase};
use crate::fanout::require_all;
use crate::transfer::{TransferIntent, TransferOrchestrator, TransferRecord};

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The transfer that stopped execution
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceFailure {
    pub intent: TransferIntent,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebalanceReport {
    pub plan: RebalancePlan,
    pub executed: Vec<TransferRecord>,
    pub failure: Option<RebalanceFailure>,
    /// Intents never attempted because an earlier one failed
    pub remaining: Vec<TransferIntent>,
}

impl RebalanceReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.remaining.is_empty()
    }
}

pub struct RebalancingPlanner {
    ctx: Arc<OrchestratorContext>,
    transfers: Arc<TransferOrchestrator>,
    balances: BalanceAggregator,
    config: RebalanceConfig,
}

impl RebalancingPlanner {
    pub fn new(
        transfers: Arc<TransferOrchestrator>,
        config: RebalanceConfig,
        per_chain_timeout: Option<Duration>,
    ) -> Self {
        let ctx = transfers.context().clone();
        Self {
            balances: BalanceAggregator::new(ctx.clone(), per_chain_timeout),
            ctx,
            transfers,
            config,
        }
    }

    /// Plan against live balances without sending anything
    pub async fn plan_rebalance(
        &self,
        percents: &BTreeMap<u64, Decimal>,
        total: Decimal,
    ) -> OrchestratorResult<RebalancePlan> {
        if total <= Decimal::ZERO {
            return Err(OrchestratorError::InvalidAllocation(format!(
                "portfolio total must be positive, got {}",
                total
            )));
        }
        validate_targets(&self.ctx.registry, percents, self.config.percent_epsilon)?;

        let address = self.ctx.wallet.address().await?;
        let balances = require_all(self.balances.get_all_balances(address).await)?;
        let current: BTreeMap<u64, Decimal> = balances
            .into_iter()
            .map(|(chain_id, balance)| (chain_id, balance.amount))
            .collect();

        let targets = compute_targets(&self.ctx.registry.chain_ids(), percents, total)?;
        plan(
            &self.ctx.registry,
            current,
            targets,
            self.config.dust_threshold,
            address,
        )
    }

    /// Plan, then execute the transfers in order, stopping at the first failure
    pub async fn rebalance_portfolio(
        &self,
        percents: &BTreeMap<u64, Decimal>,
        total: Decimal,
        op: &OperationContext,
    ) -> OrchestratorResult<RebalanceReport> {
        op.checkpoint(Phase::Transfer)?;
        let plan = self.plan_rebalance(percents, total).await?;

        info!(
            "Rebalancing {} across {} chains with {} transfers",
            total,
            plan.targets.len(),
            plan.intents.len()
        );
        for (chain_id, shortfall) in &plan.unfunded {
            warn!("Chain {} remains {} short of its target", chain_id, shortfall);
        }

        let mut executed = Vec::new();
        let mut failure = None;
        let mut remaining = Vec::new();

        for (index, intent) in plan.intents.iter().enumerate() {
            let result = match op.checkpoint(Phase::Transfer) {
                Ok(()) => self.transfers.cross_chain_transfer(intent.clone(), op).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(record) => executed.push(record),
                Err(e) => {
                    warn!(
                        "Rebalance transfer {} -> {} failed: {}",
                        intent.from_chain, intent.to_chain, e
                    );
                    failure = Some(RebalanceFailure {
                        intent: intent.clone(),
                        error: e.to_string(),
                    });
                    remaining = plan.intents[index + 1..].to_vec();
                    break;
                }
            }
        }

        Ok(RebalanceReport {
            plan,
            executed,
            failure,
            remaining,
        })
    }
}
