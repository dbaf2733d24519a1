//! Cross-chain arbitrage
//!
//! Prices are fanned out to every registered chain; the cheapest chain buys,
//! the dearest sells, and the lock/mint bridge moves the position between them.

mod engine;
mod pricing;

pub use engine::{
    ArbitrageEngine, ArbitrageExecution, ArbitrageOpportunity, ArbitrageOutcome, ArbitrageStep,
};
pub use pricing::{CostModel, FixedCostModel, PriceSource, StaticPriceSource};
