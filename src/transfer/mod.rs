//! Cross-chain transfers
//!
//! This module provides:
//! - Validated transfer intents and the lock/mint record state machine
//! - The two-phase transfer orchestrator with idempotent mint retry
//! - A background reconciler for transfers left STUCK after the lock

mod orchestrator;
mod reconciler;
mod record;

pub use crate::contracts::LockId;
pub use orchestrator::TransferOrchestrator;
pub use reconciler::{ReconcileSummary, Reconciler};
pub use record::{TransferIntent, TransferRecord, TransferState};
