//! Flash loans: borrow on a source chain, run a strategy, repay with fee
//!
//! The three phases are separate transactions, so nothing rolls back a
//! borrow whose strategy or repay failed. Those loans surface as
//! `FlashLoanUnrepaid` for an external keeper to settle.

use crate::context::{OperationContext, OrchestratorContext};
use crate::contracts::{BorrowCall, RepayCall, TxRequest};
use crate::error::{OrchestratorError, OrchestratorResult, Phase};

use async_trait::async_trait;
use ethers::types::H256;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

const BPS_DENOMINATOR: u32 = 10_000;

/// What a strategy reports back to the coordinator
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyOutcome {
    pub description: String,
    pub profit: Decimal,
    /// Transactions the strategy sent, by chain
    pub transactions: Vec<(u64, H256)>,
}

/// Caller-supplied work done with borrowed funds
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FlashLoanStrategy: Send + Sync {
    async fn execute(
        &self,
        target_chains: Vec<u64>,
        amount: Decimal,
    ) -> OrchestratorResult<StrategyOutcome>;
}

#[derive(Debug, Clone, Serialize)]
pub struct FlashLoanSession {
    pub source_chain: u64,
    pub principal: Decimal,
    pub fee: Decimal,
    pub borrow_tx: H256,
    pub strategy_outcome: Option<StrategyOutcome>,
    pub repay_tx: Option<H256>,
    pub repaid: bool,
}

impl FlashLoanSession {
    pub fn amount_due(&self) -> Decimal {
        self.principal + self.fee
    }
}

pub struct FlashLoanCoordinator {
    ctx: Arc<OrchestratorContext>,
    fee_bps: u32,
}

impl FlashLoanCoordinator {
    pub fn new(ctx: Arc<OrchestratorContext>, fee_bps: u32) -> Self {
        Self { ctx, fee_bps }
    }

    /// Lender fee on `principal`; the principal plus fee must stay representable
    pub fn fee_for(&self, principal: Decimal) -> OrchestratorResult<Decimal> {
        principal
            .checked_mul(Decimal::from(self.fee_bps))
            .map(|scaled| scaled / Decimal::from(BPS_DENOMINATOR))
            .filter(|fee| principal.checked_add(*fee).is_some())
            .ok_or_else(|| {
                OrchestratorError::InvalidTransfer(format!(
                    "flash loan of {} at {} bps is out of range",
                    principal, self.fee_bps
                ))
            })
    }

    /// Borrow → strategy → repay
    ///
    /// Cancellation is honoured only before the borrow. Once funds are
    /// outstanding the strategy and repay always run.
    pub async fn execute_flash_loan(
        &self,
        source_chain: u64,
        target_chains: &[u64],
        amount: Decimal,
        strategy: &dyn FlashLoanStrategy,
        op: &OperationContext,
    ) -> OrchestratorResult<FlashLoanSession> {
        if amount <= Decimal::ZERO {
            return Err(OrchestratorError::InvalidTransfer(format!(
                "flash loan amount must be positive, got {}",
                amount
            )));
        }
        let fee = self.fee_for(amount)?;
        for &chain_id in target_chains {
            self.ctx.registry.get(chain_id)?;
        }
        let endpoint = self.ctx.registry.get(source_chain)?;
        let lender = endpoint.lender_address.ok_or_else(|| {
            OrchestratorError::Config(format!("chain {} has no flash lender", source_chain))
        })?;

        op.checkpoint(Phase::Borrow)?;

        let principal_units = endpoint.to_base_units(amount)?;
        let borrow_tx = self
            .send(source_chain, TxRequest::call(lender, BorrowCall { amount: principal_units }))
            .await
            .map_err(|e| OrchestratorError::PhaseFailure {
                phase: Phase::Borrow,
                chain_id: source_chain,
                cause: e.to_string(),
            })?;

        let mut session = FlashLoanSession {
            source_chain,
            principal: amount,
            fee,
            borrow_tx,
            strategy_outcome: None,
            repay_tx: None,
            repaid: false,
        };
        info!(
            "Borrowed {} on chain {} (fee {}), tx {:?}",
            amount, source_chain, session.fee, borrow_tx
        );

        match strategy.execute(target_chains.to_vec(), amount).await {
            Ok(outcome) => session.strategy_outcome = Some(outcome),
            Err(e) => return Err(self.unrepaid(session, Phase::Strategy, e)),
        }

        let due = match endpoint.to_base_units(session.amount_due()) {
            Ok(due) => due,
            Err(e) => return Err(self.unrepaid(session, Phase::Repay, e)),
        };
        let repay = TxRequest::call_with_value(lender, RepayCall { amount: due }, due);
        match self.send(source_chain, repay).await {
            Ok(tx) => {
                session.repay_tx = Some(tx);
                session.repaid = true;
            }
            Err(e) => return Err(self.unrepaid(session, Phase::Repay, e)),
        }

        info!(
            "Repaid {} on chain {}, tx {:?}",
            session.amount_due(),
            source_chain,
            session.repay_tx
        );
        Ok(session)
    }

    async fn send(&self, chain_id: u64, request: TxRequest) -> OrchestratorResult<H256> {
        let signer = self.ctx.wallet.signer_for(chain_id).await?;
        let receipt = signer.send_and_confirm(request).await?;
        Ok(receipt.tx_hash)
    }

    fn unrepaid(
        &self,
        session: FlashLoanSession,
        phase: Phase,
        cause: OrchestratorError,
    ) -> OrchestratorError {
        error!(
            "Flash loan of {} on chain {} left unrepaid after {} phase failed: {}",
            session.principal, session.source_chain, phase, cause
        );
        crate::metrics::record_flash_loan_unrepaid();
        OrchestratorError::FlashLoanUnrepaid {
            session: Box::new(session),
            cause: format!("{} phase: {}", phase, cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ContractCall;
    use crate::testing::FakeNetwork;
    use rust_decimal_macros::dec;
    use tokio_test::assert_ok;

    fn outcome() -> StrategyOutcome {
        StrategyOutcome {
            description: "noop".to_string(),
            profit: dec!(3),
            transactions: Vec::new(),
        }
    }

    fn succeeding_strategy(times: usize) -> MockFlashLoanStrategy {
        let mut strategy = MockFlashLoanStrategy::new();
        strategy
            .expect_execute()
            .withf(|targets, amount| targets == &vec![21, 22] && *amount == dec!(1000))
            .times(times)
            .returning(|_, _| Ok(outcome()));
        strategy
    }

    async fn coordinator(network: &Arc<FakeNetwork>) -> FlashLoanCoordinator {
        FlashLoanCoordinator::new(network.connected_context().await, 9)
    }

    #[test]
    fn test_fee_in_basis_points() {
        let network = FakeNetwork::new(&[20]);
        let coordinator = FlashLoanCoordinator::new(network.context(), 9);
        assert_eq!(coordinator.fee_for(dec!(1000)).unwrap(), dec!(0.9));
        assert_eq!(coordinator.fee_for(dec!(0)).unwrap(), dec!(0));
        assert!(matches!(
            coordinator.fee_for(Decimal::MAX),
            Err(OrchestratorError::InvalidTransfer(_))
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_principal_borrows_nothing() {
        let network = FakeNetwork::new(&[20, 21]);
        let coordinator = coordinator(&network).await;
        let mut strategy = MockFlashLoanStrategy::new();
        strategy.expect_execute().never();

        let err = coordinator
            .execute_flash_loan(20, &[21], Decimal::MAX, &strategy, &OperationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransfer(_)));
        assert_eq!(network.total_tx_count(), 0);
    }

    #[tokio::test]
    async fn test_borrow_strategy_repay() {
        let network = FakeNetwork::new(&[20, 21, 22]);
        let coordinator = coordinator(&network).await;

        let session = assert_ok!(
            coordinator
                .execute_flash_loan(
                    20,
                    &[21, 22],
                    dec!(1000),
                    &succeeding_strategy(1),
                    &OperationContext::new(),
                )
                .await
        );

        assert!(session.repaid);
        assert!(session.repay_tx.is_some());
        assert_eq!(session.fee, dec!(0.9));
        assert_eq!(session.strategy_outcome, Some(outcome()));

        let endpoint = network.endpoint(20);
        let calls = network.chain(20).calls();
        assert_eq!(calls.len(), 2);
        match (&calls[0], &calls[1]) {
            (ContractCall::Borrow(borrow), ContractCall::Repay(repay)) => {
                assert_eq!(borrow.amount, endpoint.to_base_units(dec!(1000)).unwrap());
                assert_eq!(repay.amount, endpoint.to_base_units(dec!(1000.9)).unwrap());
            }
            other => panic!("expected borrow then repay, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_borrow_failure_runs_nothing_else() {
        let network = FakeNetwork::new(&[20, 21, 22]);
        let coordinator = coordinator(&network).await;
        network.chain(20).fail_calls("borrow", 1);

        let err = coordinator
            .execute_flash_loan(
                20,
                &[21, 22],
                dec!(1000),
                &succeeding_strategy(0),
                &OperationContext::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::PhaseFailure {
                phase: Phase::Borrow,
                chain_id: 20,
                ..
            }
        ));
        assert_eq!(network.total_tx_count(), 0);
    }

    #[tokio::test]
    async fn test_strategy_failure_is_unrepaid() {
        let network = FakeNetwork::new(&[20, 21]);
        let coordinator = coordinator(&network).await;
        let mut strategy = MockFlashLoanStrategy::new();
        strategy.expect_execute().times(1).returning(|_, _| {
            Err(OrchestratorError::Internal("strategy blew up".to_string()))
        });

        let err = coordinator
            .execute_flash_loan(20, &[21], dec!(5), &strategy, &OperationContext::new())
            .await
            .unwrap_err();

        assert!(err.should_alert());
        match err {
            OrchestratorError::FlashLoanUnrepaid { session, cause } => {
                assert!(!session.repaid);
                assert!(session.strategy_outcome.is_none());
                assert!(session.repay_tx.is_none());
                assert!(cause.contains("strategy"));
            }
            other => panic!("expected unrepaid loan, got {:?}", other),
        }
        assert!(network.chain(20).calls_named("repay").is_empty());
    }

    #[tokio::test]
    async fn test_repay_failure_is_unrepaid() {
        let network = FakeNetwork::new(&[20, 21, 22]);
        let coordinator = coordinator(&network).await;
        network.chain(20).fail_calls("repay", 1);

        let err = coordinator
            .execute_flash_loan(
                20,
                &[21, 22],
                dec!(1000),
                &succeeding_strategy(1),
                &OperationContext::new(),
            )
            .await
            .unwrap_err();

        match err {
            OrchestratorError::FlashLoanUnrepaid { session, cause } => {
                assert!(!session.repaid);
                assert_eq!(session.strategy_outcome, Some(outcome()));
                assert_eq!(session.amount_due(), dec!(1000.9));
                assert!(cause.contains("repay"));
            }
            other => panic!("expected unrepaid loan, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_borrow() {
        let network = FakeNetwork::new(&[20, 21, 22]);
        let coordinator = coordinator(&network).await;
        let op = OperationContext::new();
        op.cancel();

        let err = coordinator
            .execute_flash_loan(20, &[21, 22], dec!(1000), &succeeding_strategy(0), &op)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Cancelled {
                before_phase: Phase::Borrow
            }
        ));
        assert_eq!(network.total_tx_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_target_chain() {
        let network = FakeNetwork::new(&[20, 21]);
        let coordinator = coordinator(&network).await;

        let err = coordinator
            .execute_flash_loan(
                20,
                &[99],
                dec!(1),
                &succeeding_strategy(0),
                &OperationContext::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownChain { chain_id: 99 }));
    }
}
