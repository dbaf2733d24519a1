//! Orchestrator context and per-operation cancellation
//!
//! `OrchestratorContext` bundles the registry, the connection cache and the
//! wallet session. It is built once at startup and passed by `Arc` to every
//! orchestrator. `OperationContext` carries cancellation and a deadline for a
//! single multi-phase operation.

use crate::chain::{ChainRegistry, ConnectionManager, Connector};
use crate::error::{OrchestratorError, OrchestratorResult, Phase};
use crate::wallet::{WalletProvider, WalletSession};

use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Shared handles every orchestrator works through
pub struct OrchestratorContext {
    pub registry: Arc<ChainRegistry>,
    pub connections: Arc<ConnectionManager>,
    pub wallet: Arc<WalletSession>,
}

impl OrchestratorContext {
    /// Build the context; no chain is contacted until first use
    pub fn init(
        registry: Arc<ChainRegistry>,
        connector: Arc<dyn Connector>,
        wallet_provider: Option<Arc<dyn WalletProvider>>,
    ) -> Arc<Self> {
        let connections = Arc::new(ConnectionManager::new(registry.clone(), connector));
        let wallet = Arc::new(WalletSession::new(wallet_provider, connections.clone()));

        info!("Orchestrator context initialized with {} chains", registry.len());

        Arc::new(Self {
            registry,
            connections,
            wallet,
        })
    }

    /// Open the wallet session
    pub async fn connect(&self) -> OrchestratorResult<Address> {
        self.wallet.connect().await
    }

    /// Tear down the wallet session and drop cached connections
    pub async fn dispose(&self) {
        self.wallet.disconnect().await;
        self.connections.clear();
        info!("Orchestrator context disposed");
    }
}

/// Cancellation flag and optional deadline for one operation
#[derive(Clone)]
pub struct OperationContext {
    cancelled: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

impl OperationContext {
    pub fn new() -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            cancelled: Arc::new(cancelled),
            deadline: None,
        }
    }

    /// Operation that times out `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..Self::new()
        }
    }

    /// Request cancellation; observed at the next checkpoint
    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Called between phases; fails if the operation should not enter `next`
    pub fn checkpoint(&self, next: Phase) -> OrchestratorResult<()> {
        if self.is_cancelled() {
            debug!("Operation cancelled before {} phase", next);
            return Err(OrchestratorError::Cancelled { before_phase: next });
        }

        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(OrchestratorError::Timeout {
                    operation: format!("operation deadline before {} phase", next),
                });
            }
        }

        Ok(())
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}
