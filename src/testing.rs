//! In-process fake chain network for unit tests
//!
//! `FakeChain` executes typed bridge, DEX and lender calls deterministically.
//! `FakeWallet` signs by handing out opaque raw bytes that the fake chains
//! resolve back to the original typed transaction.

use crate::chain::{ChainEndpoint, ChainRegistry, ChainRpc, Connector, TxReceipt, TxStatus};
use crate::config::GasPriceStrategy;
use crate::context::OrchestratorContext;
use crate::contracts::ContractCall;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::wallet::WalletProvider;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Signed transactions by their opaque raw encoding
type SignedPool = Arc<DashMap<Vec<u8>, (u64, TypedTransaction)>>;

/// Registry entry with predictable addresses for chain `id`
pub fn test_endpoint(id: u64) -> ChainEndpoint {
    ChainEndpoint {
        id,
        name: format!("chain-{}", id),
        rpc_urls: vec![format!("http://localhost:{}", 8500 + id)],
        explorer_url: format!("https://explorer-{}.example", id),
        currency_symbol: "ETH".to_string(),
        decimals: 18,
        confirmations: 1,
        gas_price_strategy: GasPriceStrategy::Legacy,
        bridge_address: Address::from_low_u64_be(0xB000 + id),
        dex_address: Some(Address::from_low_u64_be(0xD000 + id)),
        lender_address: Some(Address::from_low_u64_be(0x1000 + id)),
    }
}

/// Mutable ledger of one fake chain
#[derive(Default)]
struct ChainState {
    block: u64,
    next_nonce: u64,
    balances: HashMap<Address, U256>,
    sent_nonces: Vec<u64>,
    calls: Vec<ContractCall>,
    deployments: Vec<Address>,
    receipts: HashMap<H256, TxReceipt>,
    fail_next: HashMap<&'static str, usize>,
    revert_next: HashMap<&'static str, usize>,
    /// Confirmation waits that time out before the receipt is returned
    lost_receipts: usize,
}

/// One deterministic chain
pub struct FakeChain {
    endpoint: Arc<ChainEndpoint>,
    signed: SignedPool,
    down: AtomicBool,
    receipt_delay_ms: AtomicU64,
    state: Mutex<ChainState>,
}

impl FakeChain {
    fn new(endpoint: ChainEndpoint, signed: SignedPool) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            signed,
            down: AtomicBool::new(false),
            receipt_delay_ms: AtomicU64::new(0),
            state: Mutex::new(ChainState::default()),
        }
    }

    /// Every RPC call fails while down
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Delay every confirmation wait by `delay`
    pub fn set_receipt_delay(&self, delay: Duration) {
        self.receipt_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Native balance in whole tokens
    pub fn set_balance(&self, address: Address, amount: Decimal) {
        let value = self.endpoint.to_base_units(amount).unwrap();
        self.state.lock().unwrap().balances.insert(address, value);
    }

    /// Reject the next `count` broadcasts of `call` ("deploy" for creations)
    pub fn fail_calls(&self, call: &'static str, count: usize) {
        self.state.lock().unwrap().fail_next.insert(call, count);
    }

    /// Mine the next `count` transactions of `call` as reverted
    pub fn revert_calls(&self, call: &'static str, count: usize) {
        self.state.lock().unwrap().revert_next.insert(call, count);
    }

    /// Time out the next `count` confirmation waits; the transactions still land
    pub fn time_out_receipts(&self, count: usize) {
        self.state.lock().unwrap().lost_receipts = count;
    }

    pub fn sent_nonces(&self) -> Vec<u64> {
        self.state.lock().unwrap().sent_nonces.clone()
    }

    /// Contract calls accepted by this chain, in broadcast order
    pub fn calls(&self) -> Vec<ContractCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_named(&self, name: &str) -> Vec<ContractCall> {
        self.calls().into_iter().filter(|c| c.name() == name).collect()
    }

    pub fn deployments(&self) -> Vec<Address> {
        self.state.lock().unwrap().deployments.clone()
    }

    pub fn tx_count(&self) -> usize {
        self.state.lock().unwrap().sent_nonces.len()
    }

    fn ensure_up(&self) -> OrchestratorResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ChainConnection {
                chain_id: self.endpoint.id,
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn execute(&self, raw: &[u8], tx: &TypedTransaction) -> OrchestratorResult<H256> {
        let chain_id = self.endpoint.id;
        let mut state = self.state.lock().unwrap();

        let nonce = tx.nonce().map(|n| n.as_u64()).unwrap_or_default();
        if nonce != state.next_nonce {
            return Err(OrchestratorError::Transaction {
                chain_id,
                message: format!("nonce {} does not match expected {}", nonce, state.next_nonce),
            });
        }

        let call = match tx.to() {
            None => None,
            Some(_) => {
                let data = tx.data().cloned().unwrap_or_default();
                Some(ContractCall::decode(&data)?)
            }
        };
        let name = call.as_ref().map(ContractCall::name).unwrap_or("deploy");

        if let Some(remaining) = state.fail_next.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(OrchestratorError::Transaction {
                    chain_id,
                    message: format!("execution reverted: {} rejected", name),
                });
            }
        }

        let reverted = match state.revert_next.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };

        state.next_nonce += 1;
        state.block += 1;
        state.sent_nonces.push(nonce);

        let tx_hash = H256::from(ethers::utils::keccak256(raw));
        let from = tx.from().copied().unwrap_or_default();
        let contract_address = match call {
            Some(call) => {
                state.calls.push(call);
                None
            }
            None if !reverted => {
                let address = ethers::utils::get_contract_address(from, nonce);
                state.deployments.push(address);
                Some(address)
            }
            None => None,
        };

        let receipt = TxReceipt {
            tx_hash,
            block_number: state.block,
            gas_used: U256::from(21_000u64),
            status: if reverted {
                TxStatus::Reverted
            } else {
                TxStatus::Success
            },
            contract_address,
        };
        state.receipts.insert(tx_hash, receipt);

        Ok(tx_hash)
    }
}

#[async_trait]
impl ChainRpc for FakeChain {
    fn chain_id(&self) -> u64 {
        self.endpoint.id
    }

    async fn block_number(&self) -> OrchestratorResult<u64> {
        self.ensure_up()?;
        Ok(self.state.lock().unwrap().block)
    }

    async fn get_balance(&self, address: Address) -> OrchestratorResult<U256> {
        self.ensure_up()?;
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }

    async fn transaction_count(&self, _address: Address) -> OrchestratorResult<u64> {
        self.ensure_up()?;
        Ok(self.state.lock().unwrap().next_nonce)
    }

    async fn fill_transaction(
        &self,
        tx: &mut TypedTransaction,
        from: Address,
    ) -> OrchestratorResult<()> {
        self.ensure_up()?;
        tx.set_from(from);
        if tx.gas().is_none() {
            tx.set_gas(21_000u64);
        }
        if tx.gas_price().is_none() {
            tx.set_gas_price(1u64);
        }
        Ok(())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> OrchestratorResult<H256> {
        self.ensure_up()?;
        tokio::task::yield_now().await;

        let raw = raw.to_vec();
        let (signed_for, tx) = self
            .signed
            .get(&raw)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrchestratorError::Transaction {
                chain_id: self.endpoint.id,
                message: "unknown raw transaction".to_string(),
            })?;

        if signed_for != self.endpoint.id {
            return Err(OrchestratorError::Transaction {
                chain_id: self.endpoint.id,
                message: format!("transaction signed for chain {}", signed_for),
            });
        }

        self.execute(&raw, &tx)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        _confirmations: u64,
    ) -> OrchestratorResult<TxReceipt> {
        self.ensure_up()?;
        let delay = self.receipt_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        } else {
            tokio::task::yield_now().await;
        }
        let mut state = self.state.lock().unwrap();
        if state.lost_receipts > 0 {
            state.lost_receipts -= 1;
            return Err(OrchestratorError::Timeout {
                operation: format!("receipt {:?}", tx_hash),
            });
        }
        state
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| OrchestratorError::Transaction {
                chain_id: self.endpoint.id,
                message: format!("no receipt for {:?}", tx_hash),
            })
    }
}

/// Wallet whose "signatures" are lookup keys into the shared pool
pub struct FakeWallet {
    address: Address,
    signed: SignedPool,
    counter: AtomicU64,
    unavailable: AtomicBool,
}

impl FakeWallet {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletProvider for FakeWallet {
    async fn request_account(&self) -> OrchestratorResult<Address> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OrchestratorError::WalletUnavailable(
                "user rejected the request".to_string(),
            ));
        }
        Ok(self.address)
    }

    async fn sign_transaction(
        &self,
        chain_id: u64,
        tx: &TypedTransaction,
    ) -> OrchestratorResult<Bytes> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut raw = b"signed:".to_vec();
        raw.extend_from_slice(&chain_id.to_be_bytes());
        raw.extend_from_slice(&n.to_be_bytes());
        self.signed.insert(raw.clone(), (chain_id, tx.clone()));
        Ok(Bytes::from(raw))
    }
}

/// A set of fake chains sharing one wallet
pub struct FakeNetwork {
    chains: BTreeMap<u64, Arc<FakeChain>>,
    wallet: Arc<FakeWallet>,
    connects: AtomicUsize,
}

impl FakeNetwork {
    pub fn new(chain_ids: &[u64]) -> Arc<Self> {
        let signed: SignedPool = Arc::new(DashMap::new());
        let chains = chain_ids
            .iter()
            .map(|&id| (id, Arc::new(FakeChain::new(test_endpoint(id), signed.clone()))))
            .collect();
        let wallet = Arc::new(FakeWallet {
            address: Address::repeat_byte(0xAA),
            signed,
            counter: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        });

        Arc::new(Self {
            chains,
            wallet,
            connects: AtomicUsize::new(0),
        })
    }

    pub fn registry(&self) -> Arc<ChainRegistry> {
        let endpoints = self.chains.values().map(|c| (*c.endpoint).clone()).collect();
        Arc::new(ChainRegistry::new(endpoints).unwrap())
    }

    pub fn chain(&self, chain_id: u64) -> Arc<FakeChain> {
        self.chains[&chain_id].clone()
    }

    pub fn endpoint(&self, chain_id: u64) -> Arc<ChainEndpoint> {
        self.chains[&chain_id].endpoint.clone()
    }

    pub fn wallet(&self) -> Arc<FakeWallet> {
        self.wallet.clone()
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet.address
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Total broadcasts accepted across every chain
    pub fn total_tx_count(&self) -> usize {
        self.chains.values().map(|c| c.tx_count()).sum()
    }

    /// Context over this network; the wallet session is not connected yet
    pub fn context(self: &Arc<Self>) -> Arc<OrchestratorContext> {
        OrchestratorContext::init(
            self.registry(),
            self.clone(),
            Some(self.wallet.clone() as Arc<dyn WalletProvider>),
        )
    }

    pub async fn connected_context(self: &Arc<Self>) -> Arc<OrchestratorContext> {
        let ctx = self.context();
        ctx.connect().await.unwrap();
        ctx
    }
}

impl Connector for FakeNetwork {
    fn connect(&self, endpoint: &ChainEndpoint) -> OrchestratorResult<Arc<dyn ChainRpc>> {
        let chain = self
            .chains
            .get(&endpoint.id)
            .cloned()
            .ok_or(OrchestratorError::UnknownChain { chain_id: endpoint.id })?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(chain)
    }
}
