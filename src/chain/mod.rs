//! Chain module - registry, connection handles and RPC access
//!
//! This module provides:
//! - Static chain registry with endpoint metadata
//! - Lazily created, cached connection handles (one per chain)
//! - Multi-RPC provider management with automatic failover

pub mod gas;
pub mod provider;
pub mod registry;
pub mod rpc;

pub use gas::GasPolicy;
pub use provider::{ChainProvider, HttpConnector};
pub use registry::{ChainEndpoint, ChainRegistry};
pub use rpc::{ChainRpc, Connector, TxReceipt, TxStatus};

use crate::error::OrchestratorResult;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Lazily creates and caches one connection handle per chain
pub struct ConnectionManager {
    /// Chain registry
    registry: Arc<ChainRegistry>,
    /// Creates handles on first use
    connector: Arc<dyn Connector>,
    /// Connection handles indexed by chain ID
    connections: DashMap<u64, Arc<dyn ChainRpc>>,
}

impl ConnectionManager {
    pub fn new(registry: Arc<ChainRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            connector,
            connections: DashMap::new(),
        }
    }

    /// Get the cached connection for a chain, creating it on first use
    pub fn get_connection(&self, chain_id: u64) -> OrchestratorResult<Arc<dyn ChainRpc>> {
        if let Some(conn) = self.connections.get(&chain_id) {
            return Ok(conn.clone());
        }

        let endpoint = self.registry.get(chain_id)?;

        match self.connections.entry(chain_id) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let conn = self.connector.connect(&endpoint)?;
                entry.insert(conn.clone());
                info!("Connected to chain {} ({})", endpoint.name, chain_id);
                Ok(conn)
            }
        }
    }

    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = self.connections.iter().map(|e| *e.key()).collect();
        chains.sort_unstable();
        chains
    }

    /// Health check for every registered chain
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let checks = self.registry.chain_ids().into_iter().map(|chain_id| async move {
            let healthy = match self.get_connection(chain_id) {
                Ok(conn) => conn.health_check().await,
                Err(_) => false,
            };
            crate::metrics::record_chain_health(chain_id, healthy);
            (chain_id, healthy)
        });

        futures::future::join_all(checks).await
    }

    /// Drop every cached connection
    pub fn clear(&self) {
        self.connections.clear();
        info!("Connection cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use crate::testing::FakeNetwork;

    #[test]
    fn test_connection_is_cached() {
        let network = FakeNetwork::new(&[20, 21]);
        let manager = ConnectionManager::new(network.registry(), network.clone());

        let first = manager.get_connection(20).unwrap();
        let second = manager.get_connection(20).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(network.connect_count(), 1);
        assert_eq!(manager.connected_chains(), vec![20]);
    }

    #[test]
    fn test_unknown_chain() {
        let network = FakeNetwork::new(&[20]);
        let manager = ConnectionManager::new(network.registry(), network.clone());

        assert!(matches!(
            manager.get_connection(42),
            Err(OrchestratorError::UnknownChain { chain_id: 42 })
        ));
        assert_eq!(network.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_connections_for_different_chains() {
        let network = FakeNetwork::new(&[20, 21, 22]);
        let manager = Arc::new(ConnectionManager::new(network.registry(), network.clone()));

        let handles: Vec<_> = [20u64, 21, 22, 20, 21, 22]
            .into_iter()
            .map(|id| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_connection(id).map(|c| c.chain_id()) })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(network.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_health_check_covers_registry() {
        let network = FakeNetwork::new(&[20, 21]);
        network.chain(21).set_down(true);
        let manager = ConnectionManager::new(network.registry(), network.clone());

        let mut health = manager.health_check().await;
        health.sort();
        assert_eq!(health, vec![(20, true), (21, false)]);
    }
}
