//! Error types for the orchestrator

use crate::arbitrage::ArbitrageStep;
use crate::flash_loan::FlashLoanSession;
use crate::transfer::{LockId, TransferRecord, TransferState};

use ethers::types::H256;
use std::fmt;
use thiserror::Error;

/// Phase of a multi-step operation, used to report where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lock,
    Mint,
    Deploy,
    Buy,
    Transfer,
    Sell,
    Borrow,
    Strategy,
    Repay,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Lock => "lock",
            Phase::Mint => "mint",
            Phase::Deploy => "deploy",
            Phase::Buy => "buy",
            Phase::Transfer => "transfer",
            Phase::Sell => "sell",
            Phase::Borrow => "borrow",
            Phase::Strategy => "strategy",
            Phase::Repay => "repay",
        };
        f.write_str(name)
    }
}

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Chain {chain_id} is not registered")]
    UnknownChain { chain_id: u64 },

    #[error("Wallet unavailable: {0}")]
    WalletUnavailable(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Transaction error on chain {chain_id}: {message}")]
    Transaction { chain_id: u64, message: String },

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Insufficient balance on chain {chain_id}: have {have}, need {need}")]
    InsufficientBalance {
        chain_id: u64,
        have: String,
        need: String,
    },

    #[error("No price for token {token} on chain {chain_id}")]
    PriceUnavailable { chain_id: u64, token: String },

    #[error("{phase} phase failed on chain {chain_id}: {cause}")]
    PhaseFailure {
        phase: Phase,
        chain_id: u64,
        cause: String,
    },

    #[error("Fan-out partially failed: {} succeeded, {} failed", .succeeded.len(), .failed.len())]
    PartialFanOutFailure {
        succeeded: Vec<u64>,
        failed: Vec<(u64, String)>,
    },

    #[error(
        "Transfer {} from chain {} to chain {} left {}; reconciliation required",
        .record.lock_id.map(|id| id.to_string()).unwrap_or_default(),
        .record.from_chain,
        .record.to_chain,
        .record.state
    )]
    ReconciliationRequired { record: Box<TransferRecord> },

    #[error("Mint for lock {lock_id} is already in flight")]
    MintInFlight { lock_id: LockId },

    #[error("Flash loan on chain {} of {} unrepaid: {cause}", .session.source_chain, .session.principal)]
    FlashLoanUnrepaid {
        session: Box<FlashLoanSession>,
        cause: String,
    },

    #[error("Arbitrage aborted at {failed_step:?} after {completed:?}: {cause}")]
    ArbitrageAborted {
        completed: Vec<ArbitrageStep>,
        failed_step: ArbitrageStep,
        /// Confirmed buy left on the buy chain
        buy_tx: Option<H256>,
        /// Bridge record as it stood when the run stopped, STUCK or MINTED
        transfer: Option<Box<TransferRecord>>,
        cause: Box<OrchestratorError>,
    },

    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),

    #[error("Invalid rebalance plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Transfer {0} not found")]
    TransferNotFound(String),

    #[error("Operation cancelled before {before_phase} phase")]
    Cancelled { before_phase: Phase },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ChainConnection { .. }
                | OrchestratorError::Timeout { .. }
                | OrchestratorError::MintInFlight { .. }
                | OrchestratorError::ReconciliationRequired { .. }
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            OrchestratorError::InsufficientBalance { .. }
                | OrchestratorError::FlashLoanUnrepaid { .. }
                | OrchestratorError::WalletUnavailable(_)
        )
    }

    /// Phase the error occurred in, when the error names one
    pub fn phase(&self) -> Option<Phase> {
        match self {
            OrchestratorError::PhaseFailure { phase, .. } => Some(*phase),
            OrchestratorError::ReconciliationRequired { record }
                if record.state == TransferState::LockPending =>
            {
                Some(Phase::Lock)
            }
            OrchestratorError::ReconciliationRequired { .. } => Some(Phase::Mint),
            OrchestratorError::Cancelled { before_phase } => Some(*before_phase),
            _ => None,
        }
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
