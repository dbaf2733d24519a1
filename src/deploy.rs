//! Contract deployment to a subset of chains

use crate::context::OrchestratorContext;
use crate::contracts::TxRequest;
use crate::error::{OrchestratorError, OrchestratorResult, Phase};
use crate::fanout::{fan_out, ChainOutcome};

use ethers::abi::Token;
use ethers::types::{Address, Bytes, H256};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Contract to deploy: creation bytecode plus a name for logs
#[derive(Debug, Clone)]
pub struct ContractSpec {
    pub name: String,
    pub bytecode: Bytes,
}

/// Successful deployment on one chain
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub chain_id: u64,
    pub address: Address,
    pub deploy_tx: H256,
    pub explorer_url: String,
}

pub struct DeploymentOrchestrator {
    ctx: Arc<OrchestratorContext>,
}

impl DeploymentOrchestrator {
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        Self { ctx }
    }

    /// Deploy `contract` to every chain in `chains` concurrently
    pub async fn deploy_to_chains(
        &self,
        chains: &[u64],
        contract: &ContractSpec,
        constructor_args: &[Token],
    ) -> Vec<ChainOutcome<Deployment>> {
        info!("Deploying {} to chains {:?}", contract.name, chains);

        let request = TxRequest::deploy(&contract.bytecode, constructor_args);
        fan_out("deploy", chains, None, |chain_id| {
            self.deploy_one(chain_id, contract, request.clone())
        })
        .await
    }

    async fn deploy_one(
        &self,
        chain_id: u64,
        contract: &ContractSpec,
        request: TxRequest,
    ) -> OrchestratorResult<Deployment> {
        let endpoint = self.ctx.registry.get(chain_id)?;
        let signer = self.ctx.wallet.signer_for(chain_id).await?;

        let receipt = signer
            .send_and_confirm(request)
            .await
            .map_err(|e| OrchestratorError::PhaseFailure {
                phase: Phase::Deploy,
                chain_id,
                cause: e.to_string(),
            })?;

        let address = receipt.contract_address.ok_or_else(|| OrchestratorError::PhaseFailure {
            phase: Phase::Deploy,
            chain_id,
            cause: "receipt carries no contract address".to_string(),
        })?;

        info!(
            "Deployed {} on chain {} at {:?}",
            contract.name, chain_id, address
        );

        Ok(Deployment {
            chain_id,
            address,
            deploy_tx: receipt.tx_hash,
            explorer_url: endpoint.explorer_tx_url(&receipt.tx_hash),
        })
    }
}
