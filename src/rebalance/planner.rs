//! Pure rebalance planning: targets, deltas and greedy source/sink matching

use crate::chain::ChainRegistry;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::transfer::TransferIntent;

use ethers::types::Address;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Ordered transfers that move the portfolio toward its targets
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebalancePlan {
    pub current: BTreeMap<u64, Decimal>,
    pub targets: BTreeMap<u64, Decimal>,
    pub intents: Vec<TransferIntent>,
    /// Deficits no surplus could cover
    pub unfunded: BTreeMap<u64, Decimal>,
}

/// Percentages must be non-negative, name registered chains and sum to 100
pub fn validate_targets(
    registry: &ChainRegistry,
    percents: &BTreeMap<u64, Decimal>,
    epsilon: Decimal,
) -> OrchestratorResult<()> {
    for (&chain_id, &percent) in percents {
        if !registry.contains(chain_id) {
            return Err(OrchestratorError::InvalidAllocation(format!(
                "chain {} is not registered",
                chain_id
            )));
        }
        if percent.is_sign_negative() {
            return Err(OrchestratorError::InvalidAllocation(format!(
                "chain {} has negative target {}",
                chain_id, percent
            )));
        }
    }

    let sum: Decimal = percents.values().sum();
    if (sum - HUNDRED).abs() > epsilon {
        return Err(OrchestratorError::InvalidAllocation(format!(
            "target percentages sum to {}, expected 100",
            sum
        )));
    }

    Ok(())
}

/// Absolute target per registered chain; chains without a percentage get zero
pub fn compute_targets(
    chain_ids: &[u64],
    percents: &BTreeMap<u64, Decimal>,
    total: Decimal,
) -> OrchestratorResult<BTreeMap<u64, Decimal>> {
    chain_ids
        .iter()
        .map(|&chain_id| {
            let percent = percents.get(&chain_id).copied().unwrap_or_default();
            let target = percent.checked_mul(total).ok_or_else(|| {
                OrchestratorError::InvalidAllocation(format!(
                    "target {}% of {} for chain {} is out of range",
                    percent, total, chain_id
                ))
            })?;
            Ok((chain_id, target / HUNDRED))
        })
        .collect()
}

/// Greedy largest-surplus-first matching with partial fulfilment
///
/// Deficits are served largest first. Each deficit draws from whichever
/// surplus chain has the most left, splitting across chains when needed.
pub fn plan(
    registry: &ChainRegistry,
    current: BTreeMap<u64, Decimal>,
    targets: BTreeMap<u64, Decimal>,
    dust_threshold: Decimal,
    recipient: Address,
) -> OrchestratorResult<RebalancePlan> {
    let mut surpluses: Vec<(u64, Decimal)> = Vec::new();
    let mut deficits: Vec<(u64, Decimal)> = Vec::new();

    for (&chain_id, &target) in &targets {
        let have = current.get(&chain_id).copied().unwrap_or_default();
        let delta = target - have;
        if delta.abs() < dust_threshold || delta.is_zero() {
            continue;
        }
        if delta.is_sign_negative() {
            surpluses.push((chain_id, -delta));
        } else {
            deficits.push((chain_id, delta));
        }
    }

    let original: BTreeMap<u64, Decimal> = surpluses.iter().copied().collect();
    deficits.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut intents = Vec::new();
    let mut unfunded = BTreeMap::new();

    for (sink, need) in deficits {
        let mut remaining = need;

        while remaining > Decimal::ZERO {
            let source = surpluses
                .iter_mut()
                .filter(|(_, left)| *left > Decimal::ZERO)
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)));

            let Some((source_chain, left)) = source else {
                unfunded.insert(sink, remaining);
                break;
            };

            let take = remaining.min(*left);
            *left -= take;
            remaining -= take;
            intents.push(TransferIntent::new(registry, *source_chain, sink, take, recipient)?);
        }
    }

    verify_outflows(&intents, &original)?;

    Ok(RebalancePlan {
        current,
        targets,
        intents,
        unfunded,
    })
}

/// No source may send more than its surplus
fn verify_outflows(
    intents: &[TransferIntent],
    surpluses: &BTreeMap<u64, Decimal>,
) -> OrchestratorResult<()> {
    let mut outflows: BTreeMap<u64, Decimal> = BTreeMap::new();
    for intent in intents {
        *outflows.entry(intent.from_chain).or_default() += intent.amount;
    }

    for (chain_id, sent) in outflows {
        let surplus = surpluses.get(&chain_id).copied().unwrap_or_default();
        if sent > surplus {
            return Err(OrchestratorError::InvalidPlan(format!(
                "chain {} would send {} but only has a surplus of {}",
                chain_id, sent, surplus
            )));
        }
    }

    Ok(())
}
