//! Cross-chain price arbitrage: buy low, bridge, sell high

use super::pricing::{CostModel, PriceSource};
use crate::context::{OperationContext, OrchestratorContext};
use crate::contracts::{BuyCall, SellCall, TxRequest};
use crate::error::{OrchestratorError, OrchestratorResult, Phase};
use crate::fanout::fan_out;
use crate::transfer::{TransferIntent, TransferOrchestrator, TransferRecord};

use ethers::types::{Address, H256};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Best buy/sell pair across the quoted chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArbitrageOpportunity {
    pub token: Address,
    pub amount: Decimal,
    pub buy_chain: u64,
    pub sell_chain: u64,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub gross_profit: Decimal,
    pub estimated_costs: Decimal,
    pub profit_margin: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArbitrageStep {
    Buy,
    Transfer,
    Sell,
}

impl ArbitrageStep {
    fn phase(&self) -> Phase {
        match self {
            ArbitrageStep::Buy => Phase::Buy,
            ArbitrageStep::Transfer => Phase::Transfer,
            ArbitrageStep::Sell => Phase::Sell,
        }
    }
}

/// Every step of an executed arbitrage
#[derive(Debug, Clone, Serialize)]
pub struct ArbitrageExecution {
    pub opportunity: ArbitrageOpportunity,
    pub buy_tx: H256,
    pub transfer: TransferRecord,
    pub sell_tx: H256,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArbitrageOutcome {
    /// Nothing was sent; `best` is the pair considered, if any
    BelowProfitThreshold {
        best: Option<ArbitrageOpportunity>,
        quotes: usize,
    },
    Executed(Box<ArbitrageExecution>),
}

pub struct ArbitrageEngine {
    ctx: Arc<OrchestratorContext>,
    transfers: Arc<TransferOrchestrator>,
    prices: Arc<dyn PriceSource>,
    costs: Arc<dyn CostModel>,
    min_profit: Decimal,
    per_chain_timeout: Option<Duration>,
}

impl ArbitrageEngine {
    pub fn new(
        transfers: Arc<TransferOrchestrator>,
        prices: Arc<dyn PriceSource>,
        costs: Arc<dyn CostModel>,
        min_profit: Decimal,
        per_chain_timeout: Option<Duration>,
    ) -> Self {
        Self {
            ctx: transfers.context().clone(),
            transfers,
            prices,
            costs,
            min_profit,
            per_chain_timeout,
        }
    }

    /// Quote `token` everywhere and pick the cheapest and dearest chains
    pub async fn find_opportunity(
        &self,
        token: Address,
        amount: Decimal,
    ) -> (Option<ArbitrageOpportunity>, usize) {
        let chain_ids = self.ctx.registry.chain_ids();
        let outcomes = fan_out("price", &chain_ids, self.per_chain_timeout, |chain_id| {
            self.prices.get_price(chain_id, token)
        })
        .await;

        let mut quotes: Vec<(u64, Decimal)> = outcomes
            .into_iter()
            .filter_map(|o| o.result.ok().map(|price| (o.chain_id, price)))
            .collect();
        let count = quotes.len();
        (self.select(token, amount, &mut quotes), count)
    }

    /// Execute buy → transfer → sell when the margin clears the threshold
    ///
    /// A failing step aborts the rest; completed steps are reported, not rolled back.
    pub async fn execute_arbitrage(
        &self,
        token: Address,
        amount: Decimal,
        op: &OperationContext,
    ) -> OrchestratorResult<ArbitrageOutcome> {
        if amount <= Decimal::ZERO {
            return Err(OrchestratorError::InvalidTransfer(format!(
                "arbitrage amount must be positive, got {}",
                amount
            )));
        }
        op.checkpoint(Phase::Buy)?;

        let (best, quotes) = self.find_opportunity(token, amount).await;
        let opportunity = match best {
            Some(opp) if self.is_profitable(&opp) => opp,
            best => {
                debug!(
                    "No profitable arbitrage for {:?} over {} quotes",
                    token, quotes
                );
                crate::metrics::record_arbitrage("below_threshold");
                return Ok(ArbitrageOutcome::BelowProfitThreshold { best, quotes });
            }
        };

        info!(
            "Arbitrage {:?}: buy on {} at {}, sell on {} at {}, margin {}",
            token,
            opportunity.buy_chain,
            opportunity.buy_price,
            opportunity.sell_chain,
            opportunity.sell_price,
            opportunity.profit_margin
        );

        let mut progress = Progress::default();

        let buy_tx = self
            .trade(ArbitrageStep::Buy, opportunity.buy_chain, token, amount)
            .await
            .map_err(|e| self.aborted(&progress, ArbitrageStep::Buy, opportunity.buy_chain, e))?;
        progress.completed.push(ArbitrageStep::Buy);
        progress.buy_tx = Some(buy_tx);

        let transfer = match self.bridge(&opportunity, op).await {
            Ok(transfer) => transfer,
            Err(e) => {
                if let OrchestratorError::ReconciliationRequired { record } = &e {
                    progress.transfer = Some(record.clone());
                }
                return Err(self.aborted(
                    &progress,
                    ArbitrageStep::Transfer,
                    opportunity.buy_chain,
                    e,
                ));
            }
        };
        progress.completed.push(ArbitrageStep::Transfer);
        progress.transfer = Some(Box::new(transfer.clone()));

        let sell = match op.checkpoint(Phase::Sell) {
            Ok(()) => {
                self.trade(ArbitrageStep::Sell, opportunity.sell_chain, token, amount)
                    .await
            }
            Err(e) => Err(e),
        };
        let sell_tx = sell.map_err(|e| {
            self.aborted(&progress, ArbitrageStep::Sell, opportunity.sell_chain, e)
        })?;

        crate::metrics::record_arbitrage("executed");
        Ok(ArbitrageOutcome::Executed(Box::new(ArbitrageExecution {
            opportunity,
            buy_tx,
            transfer,
            sell_tx,
        })))
    }

    fn select(
        &self,
        token: Address,
        amount: Decimal,
        quotes: &mut [(u64, Decimal)],
    ) -> Option<ArbitrageOpportunity> {
        if quotes.len() < 2 {
            return None;
        }
        quotes.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

        let (buy_chain, buy_price) = quotes[0];
        let (sell_chain, sell_price) = quotes[quotes.len() - 1];

        let gross_profit = (sell_price - buy_price) * amount;
        let estimated_costs = self.costs.tx_cost(buy_chain)
            + self.costs.tx_cost(sell_chain)
            + self.costs.transfer_cost(buy_chain, sell_chain);

        Some(ArbitrageOpportunity {
            token,
            amount,
            buy_chain,
            sell_chain,
            buy_price,
            sell_price,
            gross_profit,
            estimated_costs,
            profit_margin: gross_profit - estimated_costs,
        })
    }

    fn is_profitable(&self, opp: &ArbitrageOpportunity) -> bool {
        opp.buy_chain != opp.sell_chain
            && opp.sell_price > opp.buy_price
            && opp.profit_margin >= self.min_profit
    }

    async fn trade(
        &self,
        step: ArbitrageStep,
        chain_id: u64,
        token: Address,
        amount: Decimal,
    ) -> OrchestratorResult<H256> {
        let endpoint = self.ctx.registry.get(chain_id)?;
        let dex = endpoint.dex_address.ok_or_else(|| {
            OrchestratorError::Config(format!("chain {} has no DEX router", chain_id))
        })?;
        let amount = endpoint.to_base_units(amount)?;

        let request = match step {
            ArbitrageStep::Sell => TxRequest::call(dex, SellCall { token, amount }),
            _ => TxRequest::call(dex, BuyCall { token, amount }),
        };

        let signer = self.ctx.wallet.signer_for(chain_id).await?;
        let receipt = signer.send_and_confirm(request).await?;
        Ok(receipt.tx_hash)
    }

    /// Move the bought amount to our own address on the sell chain
    async fn bridge(
        &self,
        opportunity: &ArbitrageOpportunity,
        op: &OperationContext,
    ) -> OrchestratorResult<TransferRecord> {
        op.checkpoint(Phase::Transfer)?;
        let own_address = self.ctx.wallet.address().await?;
        let intent = TransferIntent::new(
            &self.ctx.registry,
            opportunity.buy_chain,
            opportunity.sell_chain,
            opportunity.amount,
            own_address,
        )?;
        self.transfers.cross_chain_transfer(intent, op).await
    }

    fn aborted(
        &self,
        progress: &Progress,
        failed_step: ArbitrageStep,
        chain_id: u64,
        cause: OrchestratorError,
    ) -> OrchestratorError {
        crate::metrics::record_arbitrage("aborted");
        if progress.completed.is_empty() {
            return match cause {
                OrchestratorError::Cancelled { .. } | OrchestratorError::Timeout { .. } => cause,
                other => OrchestratorError::PhaseFailure {
                    phase: failed_step.phase(),
                    chain_id,
                    cause: other.to_string(),
                },
            };
        }
        OrchestratorError::ArbitrageAborted {
            completed: progress.completed.clone(),
            failed_step,
            buy_tx: progress.buy_tx,
            transfer: progress.transfer.clone(),
            cause: Box::new(cause),
        }
    }
}

/// Steps finished so far in one run
#[derive(Default)]
struct Progress {
    completed: Vec<ArbitrageStep>,
    buy_tx: Option<H256>,
    transfer: Option<Box<TransferRecord>>,
}
