//! Configuration management for the orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::chain::{ChainEndpoint, ChainRegistry};

use anyhow::{Context, Result};
use ethers::types::Address;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    /// Absent means records are kept in memory only
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub arbitrage: ArbitrageConfig,
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    #[serde(default)]
    pub prices: Vec<PriceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub instance_id: String,
    /// Upper bound for one chain's part of a fan-out
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_max_mint_attempts")]
    pub max_mint_attempts: u32,
    /// LOCKED records untouched this long are picked up by the reconciler
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_receipt_timeout_secs() -> u64 {
    300
}

fn default_receipt_poll_ms() -> u64 {
    2_000
}

fn default_max_gas_price_gwei() -> u64 {
    500
}

fn default_reconcile_interval_secs() -> u64 {
    60
}

fn default_max_mint_attempts() -> u32 {
    10
}

fn default_stale_lock_secs() -> u64 {
    300
}

fn default_health_check_interval_secs() -> u64 {
    30
}

impl OrchestratorConfig {
    pub fn per_chain_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub explorer_url: String,
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    pub confirmation_blocks: u64,
    pub gas_price_strategy: GasPriceStrategy,
    pub bridge_address: String,
    pub dex_address: Option<String>,
    pub lender_address: Option<String>,
    pub enabled: bool,
}

fn default_currency_symbol() -> String {
    "ETH".to_string()
}

fn default_decimals() -> u32 {
    18
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: Option<String>,
    pub keystore_path: Option<String>,
    pub keystore_password_env: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArbitrageConfig {
    /// Minimum profit after costs, in token units
    #[serde(default)]
    pub min_profit: Decimal,
    #[serde(default)]
    pub default_tx_cost: Decimal,
    #[serde(default)]
    pub default_transfer_cost: Decimal,
    #[serde(default)]
    pub tx_costs: Vec<TxCostEntry>,
    #[serde(default)]
    pub transfer_costs: Vec<TransferCostEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxCostEntry {
    pub chain_id: u64,
    pub cost: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferCostEntry {
    pub from_chain: u64,
    pub to_chain: u64,
    pub cost: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceConfig {
    /// Deltas smaller than this are left alone
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: Decimal,
    /// Tolerance on the percentage sum
    #[serde(default = "default_percent_epsilon")]
    pub percent_epsilon: Decimal,
}

fn default_dust_threshold() -> Decimal {
    Decimal::new(1, 4)
}

fn default_percent_epsilon() -> Decimal {
    Decimal::new(1, 6)
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            dust_threshold: default_dust_threshold(),
            percent_epsilon: default_percent_epsilon(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceEntry {
    pub chain_id: u64,
    pub token: String,
    pub price: Decimal,
}

impl Settings {
    /// Load settings from the file named by `ORCHESTRATOR_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("ORCHESTRATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        // At least one chain must be enabled
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in self.enabled_chains() {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            parse_address(&chain.bridge_address)
                .with_context(|| format!("Chain {} has an invalid bridge address", name))?;
        }

        if self.arbitrage.min_profit.is_sign_negative() {
            anyhow::bail!("arbitrage.min_profit must not be negative");
        }
        if self.rebalance.dust_threshold.is_sign_negative() {
            anyhow::bail!("rebalance.dust_threshold must not be negative");
        }
        if self.orchestrator.max_mint_attempts == 0 {
            anyhow::bail!("orchestrator.max_mint_attempts must be at least 1");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Build the chain registry from the enabled chains
    pub fn registry(&self) -> Result<ChainRegistry> {
        let endpoints = self
            .enabled_chains()
            .into_iter()
            .map(|(name, chain)| chain.endpoint().with_context(|| format!("chain {}", name)))
            .collect::<Result<Vec<_>>>()?;

        Ok(ChainRegistry::new(endpoints)?)
    }
}

impl ChainConfig {
    /// Registry entry for this chain
    pub fn endpoint(&self) -> Result<ChainEndpoint> {
        Ok(ChainEndpoint {
            id: self.chain_id,
            name: self.name.clone(),
            rpc_urls: self.rpc_urls.clone(),
            explorer_url: self.explorer_url.clone(),
            currency_symbol: self.currency_symbol.clone(),
            decimals: self.decimals,
            confirmations: self.confirmation_blocks,
            gas_price_strategy: self.gas_price_strategy,
            bridge_address: parse_address(&self.bridge_address)?,
            dex_address: self.dex_address.as_deref().map(parse_address).transpose()?,
            lender_address: self.lender_address.as_deref().map(parse_address).transpose()?,
        })
    }
}

/// Parse a hex address
pub fn parse_address(value: &str) -> Result<Address> {
    value
        .parse::<Address>()
        .with_context(|| format!("Invalid address: {}", value))
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
