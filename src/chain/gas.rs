//! Gas limit buffering and fee capping

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::debug;

const GWEI: u64 = 1_000_000_000;

/// Gas policy applied to every filled transaction
#[derive(Debug, Clone)]
pub struct GasPolicy {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    pub gas_limit_buffer_percent: u64,
    /// Hard cap for gas price / max fee per gas
    pub max_gas_price_gwei: u64,
}

impl GasPolicy {
    pub fn new(max_gas_price_gwei: u64) -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            max_gas_price_gwei,
        }
    }

    /// Add the gas limit buffer and clamp fees to the configured cap
    pub fn apply(&self, tx: &mut TypedTransaction) {
        if let Some(gas) = tx.gas().copied() {
            let buffered = gas + gas * self.gas_limit_buffer_percent / 100;
            tx.set_gas(buffered);
        }

        let cap = self.max_gas_price();
        match tx {
            TypedTransaction::Eip1559(inner) => {
                if let Some(max_fee) = inner.max_fee_per_gas {
                    inner.max_fee_per_gas = Some(std::cmp::min(max_fee, cap));
                }
                if let (Some(priority), Some(max_fee)) =
                    (inner.max_priority_fee_per_gas, inner.max_fee_per_gas)
                {
                    inner.max_priority_fee_per_gas = Some(std::cmp::min(priority, max_fee));
                }
            }
            _ => {
                if let Some(price) = tx.gas_price() {
                    if price > cap {
                        debug!("Capping gas price {} to {}", price, cap);
                        tx.set_gas_price(cap);
                    }
                }
            }
        }
    }

    pub fn max_gas_price(&self) -> U256 {
        U256::from(self.max_gas_price_gwei) * U256::from(GWEI)
    }
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self::new(500)
    }
}
