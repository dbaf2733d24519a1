//! Transfer intents and the lock/mint record state machine

use crate::chain::ChainRegistry;
use crate::contracts::LockId;
use crate::error::{OrchestratorError, OrchestratorResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Validated request to move `amount` from one chain to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferIntent {
    pub from_chain: u64,
    pub to_chain: u64,
    pub amount: Decimal,
    pub recipient: Address,
}

impl TransferIntent {
    /// Both chains must be registered and distinct, and the amount positive
    pub fn new(
        registry: &ChainRegistry,
        from_chain: u64,
        to_chain: u64,
        amount: Decimal,
        recipient: Address,
    ) -> OrchestratorResult<Self> {
        if from_chain == to_chain {
            return Err(OrchestratorError::InvalidTransfer(format!(
                "source and destination are both chain {}",
                from_chain
            )));
        }
        if amount <= Decimal::ZERO {
            return Err(OrchestratorError::InvalidTransfer(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        registry.get(from_chain)?;
        registry.get(to_chain)?;

        Ok(Self {
            from_chain,
            to_chain,
            amount,
            recipient,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Initiated,
    /// Lock broadcast, confirmation outcome not yet known
    LockPending,
    Locked,
    Minted,
    /// Locked on the source chain, mint outstanding
    Stuck,
    /// Closed by an operator
    Resolved,
    Failed,
}

impl TransferState {
    pub const ALL: [TransferState; 7] = [
        TransferState::Initiated,
        TransferState::LockPending,
        TransferState::Locked,
        TransferState::Minted,
        TransferState::Stuck,
        TransferState::Resolved,
        TransferState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Initiated => "initiated",
            TransferState::LockPending => "lock_pending",
            TransferState::Locked => "locked",
            TransferState::Minted => "minted",
            TransferState::Stuck => "stuck",
            TransferState::Resolved => "resolved",
            TransferState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Minted | TransferState::Resolved | TransferState::Failed
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferState {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransferState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| OrchestratorError::Storage(format!("unknown transfer state {}", s)))
    }
}

/// Durable record of one lock/mint transfer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRecord {
    pub id: Uuid,
    pub lock_id: Option<LockId>,
    pub from_chain: u64,
    pub to_chain: u64,
    pub amount: Decimal,
    pub recipient: Address,
    pub state: TransferState,
    pub lock_tx: Option<H256>,
    pub mint_tx: Option<H256>,
    pub mint_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn new(intent: &TransferIntent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            lock_id: None,
            from_chain: intent.from_chain,
            to_chain: intent.to_chain,
            amount: intent.amount,
            recipient: intent.recipient,
            state: TransferState::Initiated,
            lock_tx: None,
            mint_tx: None,
            mint_attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn intent(&self) -> TransferIntent {
        TransferIntent {
            from_chain: self.from_chain,
            to_chain: self.to_chain,
            amount: self.amount,
            recipient: self.recipient,
        }
    }

    /// MINTED with both transaction references present
    pub fn is_success(&self) -> bool {
        self.state == TransferState::Minted && self.lock_tx.is_some() && self.mint_tx.is_some()
    }

    /// INITIATED → LOCK_PENDING once the lock transaction has a hash
    pub fn mark_lock_submitted(&mut self, lock_tx: H256) -> OrchestratorResult<()> {
        self.transition(TransferState::LockPending, &[TransferState::Initiated])?;
        self.set_lock_tx(lock_tx);
        Ok(())
    }

    /// INITIATED | LOCK_PENDING → LOCKED; derives the lock id from the confirmed lock transaction
    pub fn mark_locked(&mut self, lock_tx: H256) -> OrchestratorResult<()> {
        if self.lock_tx.is_some_and(|submitted| submitted != lock_tx) {
            return Err(self.rejected(TransferState::Locked));
        }
        self.transition(
            TransferState::Locked,
            &[TransferState::Initiated, TransferState::LockPending],
        )?;
        self.set_lock_tx(lock_tx);
        self.last_error = None;
        Ok(())
    }

    /// Confirmation of a pending lock could not be established; stays LOCK_PENDING
    pub fn record_lock_unconfirmed(&mut self, error: &OrchestratorError) -> OrchestratorResult<()> {
        self.transition(TransferState::LockPending, &[TransferState::LockPending])?;
        self.last_error = Some(error.to_string());
        Ok(())
    }

    /// INITIATED | LOCK_PENDING → FAILED: the broadcast was rejected or the lock reverted
    pub fn mark_failed(&mut self, error: &OrchestratorError) -> OrchestratorResult<()> {
        self.transition(
            TransferState::Failed,
            &[TransferState::Initiated, TransferState::LockPending],
        )?;
        self.last_error = Some(error.to_string());
        Ok(())
    }

    /// LOCKED | STUCK → MINTED
    pub fn mark_minted(&mut self, mint_tx: H256) -> OrchestratorResult<()> {
        if self.lock_tx.is_none() {
            return Err(self.rejected(TransferState::Minted));
        }
        self.transition(
            TransferState::Minted,
            &[TransferState::Locked, TransferState::Stuck],
        )?;
        self.mint_tx = Some(mint_tx);
        self.mint_attempts += 1;
        self.last_error = None;
        Ok(())
    }

    /// LOCKED → STUCK without a mint attempt (cancelled or timed out in between)
    pub fn mark_stuck(&mut self, reason: &OrchestratorError) -> OrchestratorResult<()> {
        self.transition(
            TransferState::Stuck,
            &[TransferState::Locked, TransferState::Stuck],
        )?;
        self.last_error = Some(reason.to_string());
        Ok(())
    }

    /// A mint attempt failed: LOCKED → STUCK, or stays STUCK
    pub fn record_mint_failure(&mut self, error: &OrchestratorError) -> OrchestratorResult<()> {
        self.mark_stuck(error)?;
        self.mint_attempts += 1;
        Ok(())
    }

    /// STUCK → RESOLVED by an operator
    pub fn resolve(&mut self, note: &str) -> OrchestratorResult<()> {
        self.transition(TransferState::Resolved, &[TransferState::Stuck])?;
        self.last_error = Some(format!("resolved manually: {}", note));
        Ok(())
    }

    fn set_lock_tx(&mut self, lock_tx: H256) {
        self.lock_tx = Some(lock_tx);
        self.lock_id = Some(LockId::derive(self.from_chain, lock_tx));
    }

    fn transition(&mut self, to: TransferState, from: &[TransferState]) -> OrchestratorResult<()> {
        if !from.contains(&self.state) {
            return Err(self.rejected(to));
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn rejected(&self, to: TransferState) -> OrchestratorError {
        OrchestratorError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }
}
