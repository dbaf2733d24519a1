//! Tesseract Orchestrator - multi-chain operation coordination
//!
//! Fans balance queries and deployments out to every registered chain,
//! sequences lock/mint transfers across chains that share no atomicity,
//! and builds arbitrage, rebalancing and flash-loan flows on top.

pub mod api;
pub mod arbitrage;
pub mod balance;
pub mod chain;
pub mod config;
pub mod context;
pub mod contracts;
pub mod deploy;
pub mod error;
pub mod fanout;
pub mod flash_loan;
pub mod metrics;
pub mod rebalance;
pub mod state;
pub mod transfer;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{OperationContext, OrchestratorContext};
pub use error::{OrchestratorError, OrchestratorResult, Phase};
