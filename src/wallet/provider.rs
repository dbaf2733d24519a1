//! Wallet providers: the source of the signing identity

use crate::config::WalletConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes};
use tracing::info;

/// Signing identity shared across every chain
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Request the account this provider signs for
    async fn request_account(&self) -> OrchestratorResult<Address>;

    /// Sign `tx` for `chain_id` and return the raw transaction bytes
    async fn sign_transaction(
        &self,
        chain_id: u64,
        tx: &TypedTransaction,
    ) -> OrchestratorResult<Bytes>;
}

/// Local private-key wallet
pub struct LocalWalletProvider {
    wallet: LocalWallet,
}

impl LocalWalletProvider {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    /// Load wallet from environment or keystore
    pub fn from_config(config: &WalletConfig) -> OrchestratorResult<Self> {
        // Try environment variable first (dev mode)
        if let Some(ref var) = config.private_key_env {
            if let Ok(key) = std::env::var(var) {
                let wallet = key.parse::<LocalWallet>().map_err(|e| {
                    OrchestratorError::WalletUnavailable(format!("Invalid private key: {}", e))
                })?;
                return Ok(Self::new(wallet));
            }
        }

        if let Some(ref path) = config.keystore_path {
            let password = config
                .keystore_password_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
                .ok_or_else(|| {
                    OrchestratorError::WalletUnavailable(
                        "Keystore configured without a password variable".to_string(),
                    )
                })?;
            let wallet = LocalWallet::decrypt_keystore(path, password).map_err(|e| {
                OrchestratorError::WalletUnavailable(format!("Failed to decrypt keystore: {}", e))
            })?;
            info!("Loaded keystore wallet from {}", path);
            return Ok(Self::new(wallet));
        }

        Err(OrchestratorError::WalletUnavailable(
            "No wallet configured. Set the private key variable or configure a keystore"
                .to_string(),
        ))
    }
}

#[async_trait]
impl WalletProvider for LocalWalletProvider {
    async fn request_account(&self) -> OrchestratorResult<Address> {
        Ok(self.wallet.address())
    }

    async fn sign_transaction(
        &self,
        chain_id: u64,
        tx: &TypedTransaction,
    ) -> OrchestratorResult<Bytes> {
        let wallet = self.wallet.clone().with_chain_id(chain_id);
        let signature = wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| OrchestratorError::WalletUnavailable(e.to_string()))?;
        Ok(tx.rlp_signed(&signature))
    }
}
