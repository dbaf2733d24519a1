//! Typed contract calls for the on-chain collaborators
//!
//! Bridge, DEX router and flash lender calls are plain structs encoded with
//! the ethers ABI codec. Nothing here concatenates call data by hand.

use crate::error::{OrchestratorError, OrchestratorResult};

use ethers::abi::{AbiDecode, AbiEncode, Token};
use ethers::contract::EthCall;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// `lock(uint256 destinationChainId, address recipient, uint256 amount)`
#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "lock", abi = "lock(uint256,address,uint256)")]
pub struct LockCall {
    pub destination_chain_id: U256,
    pub recipient: Address,
    pub amount: U256,
}

/// `mint(bytes32 lockId, address recipient, uint256 amount)`, idempotent per lock id
#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "mint", abi = "mint(bytes32,address,uint256)")]
pub struct MintCall {
    pub lock_id: [u8; 32],
    pub recipient: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "buy", abi = "buy(address,uint256)")]
pub struct BuyCall {
    pub token: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "sell", abi = "sell(address,uint256)")]
pub struct SellCall {
    pub token: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "borrow", abi = "borrow(uint256)")]
pub struct BorrowCall {
    pub amount: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "repay", abi = "repay(uint256)")]
pub struct RepayCall {
    pub amount: U256,
}

/// Any call the orchestrator sends to a collaborator contract
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractCall {
    Lock(LockCall),
    Mint(MintCall),
    Buy(BuyCall),
    Sell(SellCall),
    Borrow(BorrowCall),
    Repay(RepayCall),
}

impl ContractCall {
    /// Decode call data by its selector
    pub fn decode(data: &[u8]) -> OrchestratorResult<Self> {
        if data.len() < 4 {
            return Err(OrchestratorError::Contract(
                "call data shorter than a selector".to_string(),
            ));
        }
        let selector = [data[0], data[1], data[2], data[3]];

        let decoded = if selector == LockCall::selector() {
            LockCall::decode(data).map(ContractCall::Lock)
        } else if selector == MintCall::selector() {
            MintCall::decode(data).map(ContractCall::Mint)
        } else if selector == BuyCall::selector() {
            BuyCall::decode(data).map(ContractCall::Buy)
        } else if selector == SellCall::selector() {
            SellCall::decode(data).map(ContractCall::Sell)
        } else if selector == BorrowCall::selector() {
            BorrowCall::decode(data).map(ContractCall::Borrow)
        } else if selector == RepayCall::selector() {
            RepayCall::decode(data).map(ContractCall::Repay)
        } else {
            return Err(OrchestratorError::Contract(format!(
                "unknown selector 0x{}",
                hex::encode(selector)
            )));
        };

        decoded.map_err(|e| OrchestratorError::Contract(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::Lock(_) => "lock",
            ContractCall::Mint(_) => "mint",
            ContractCall::Buy(_) => "buy",
            ContractCall::Sell(_) => "sell",
            ContractCall::Borrow(_) => "borrow",
            ContractCall::Repay(_) => "repay",
        }
    }
}

/// Transaction request handed to a chain signer
#[derive(Debug, Clone, Default)]
pub struct TxRequest {
    /// `None` deploys a contract
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

impl TxRequest {
    /// Call a contract with an encoded typed call
    pub fn call<C: AbiEncode>(to: Address, call: C) -> Self {
        Self {
            to: Some(to),
            value: U256::zero(),
            data: Bytes::from(call.encode()),
        }
    }

    /// Call a contract and attach native value
    pub fn call_with_value<C: AbiEncode>(to: Address, call: C, value: U256) -> Self {
        Self {
            value,
            ..Self::call(to, call)
        }
    }

    /// Contract creation: bytecode followed by ABI-encoded constructor args
    pub fn deploy(bytecode: &Bytes, constructor_args: &[Token]) -> Self {
        let mut data = bytecode.to_vec();
        if !constructor_args.is_empty() {
            data.extend(ethers::abi::encode(constructor_args));
        }
        Self {
            to: None,
            value: U256::zero(),
            data: Bytes::from(data),
        }
    }
}

/// Stable identifier of a bridge lock, derived from the lock transaction
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(pub [u8; 32]);

impl LockId {
    /// `keccak256(abi.encode(sourceChainId, lockTxHash))`
    pub fn derive(source_chain: u64, lock_tx_hash: H256) -> Self {
        let encoded = ethers::abi::encode(&[
            Token::Uint(U256::from(source_chain)),
            Token::FixedBytes(lock_tx_hash.as_bytes().to_vec()),
        ]);
        let mut hasher = Keccak256::new();
        hasher.update(&encoded);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockId({})", self)
    }
}

impl FromStr for LockId {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| OrchestratorError::InvalidTransfer(format!("bad lock id: {}", e)))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            OrchestratorError::InvalidTransfer("lock id must be 32 bytes".to_string())
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for LockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
