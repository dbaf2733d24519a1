//! Wallet session - one signing identity shared across every chain
//!
//! This module provides:
//! - The `WalletProvider` seam and a local private-key implementation
//! - `WalletSession`, created by `connect` and torn down by `disconnect`
//! - Per-chain `ChainSigner`s that serialize submissions and own the nonce

mod provider;
mod signer;

pub use provider::{LocalWalletProvider, WalletProvider};
pub use signer::ChainSigner;

use crate::chain::ConnectionManager;
use crate::error::{OrchestratorError, OrchestratorResult};

use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// State that exists only while connected
struct SessionState {
    address: Address,
    signers: DashMap<u64, Arc<ChainSigner>>,
}

/// Authenticated signing identity, shared by `Arc` across orchestrators
pub struct WalletSession {
    provider: Option<Arc<dyn WalletProvider>>,
    connections: Arc<ConnectionManager>,
    state: RwLock<Option<SessionState>>,
}

impl WalletSession {
    pub fn new(
        provider: Option<Arc<dyn WalletProvider>>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            provider,
            connections,
            state: RwLock::new(None),
        }
    }

    /// Ask the provider for an account and open the session
    pub async fn connect(&self) -> OrchestratorResult<Address> {
        let provider = self.provider()?;
        let address = provider.request_account().await?;

        let mut state = self.state.write().await;
        if let Some(existing) = state.as_ref() {
            if existing.address == address {
                return Ok(address);
            }
            warn!(
                "Replacing wallet session {:?} with {:?}",
                existing.address, address
            );
        }

        *state = Some(SessionState {
            address,
            signers: DashMap::new(),
        });
        info!("Wallet session connected: {:?}", address);
        Ok(address)
    }

    /// Address of the connected identity
    pub async fn address(&self) -> OrchestratorResult<Address> {
        self.state
            .read()
            .await
            .as_ref()
            .map(|s| s.address)
            .ok_or_else(|| OrchestratorError::WalletUnavailable("wallet not connected".to_string()))
    }

    /// Signing capability for `chain_id`, bound to the session identity
    pub async fn signer_for(&self, chain_id: u64) -> OrchestratorResult<Arc<ChainSigner>> {
        let provider = self.provider()?;
        let state = self.state.read().await;
        let state = state.as_ref().ok_or_else(|| {
            OrchestratorError::WalletUnavailable("wallet not connected".to_string())
        })?;

        if let Some(signer) = state.signers.get(&chain_id) {
            return Ok(signer.clone());
        }

        let endpoint = self.connections.registry().get(chain_id)?;
        let rpc = self.connections.get_connection(chain_id)?;
        let signer = state
            .signers
            .entry(chain_id)
            .or_insert_with(|| {
                Arc::new(ChainSigner::new(
                    endpoint,
                    state.address,
                    rpc,
                    provider.clone(),
                ))
            })
            .clone();

        Ok(signer)
    }

    /// Drop the identity and every per-chain signer
    pub async fn disconnect(&self) {
        if self.state.write().await.take().is_some() {
            info!("Wallet session disconnected");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_some()
    }

    fn provider(&self) -> OrchestratorResult<&Arc<dyn WalletProvider>> {
        self.provider.as_ref().ok_or_else(|| {
            OrchestratorError::WalletUnavailable("no signing provider configured".to_string())
        })
    }
}
