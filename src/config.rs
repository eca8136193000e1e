//! Configuration management for the settlement engine
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub gas: GasConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub instance_id: String,
    pub poll_interval_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub health_check_interval_secs: u64,
    #[serde(default)]
    pub timelock_mode: TimelockMode,
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    #[serde(default = "default_reverification_attempts")]
    pub max_reverification_attempts: u32,
    #[serde(default = "default_true")]
    pub refund_on_failure: bool,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
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

/// Longest fee horizon a quote may project the base fee over
pub const MAX_TARGET_BLOCKS: u32 = 256;

/// Gas quoting parameters shared by all chains
#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    pub gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    pub gas_price_buffer_percent: u64,
    /// Blocks within which an optimized quote should still confirm
    pub target_blocks: u32,
    /// Number of bridge operations sharing one transaction's fixed cost
    pub batch_size: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
            target_blocks: 3,
            batch_size: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub bridge_address: String,
    /// Current gas price in wei
    pub gas_price_wei: u64,
    /// Average block time in milliseconds
    pub block_time_ms: u64,
    pub native_currency: NativeCurrency,
    pub confirmation_blocks: u64,
    /// Proofs older than this many blocks behind the head are expired
    pub proof_validity_blocks: u64,
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default)]
    pub base_fee_wei: Option<u64>,
    #[serde(default)]
    pub priority_fee_wei: Option<u64>,
    pub max_gas_price_gwei: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

/// Unit of an atomic swap's timelock, fixed per deployment
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimelockMode {
    /// Timelock is an absolute unix timestamp in seconds
    #[default]
    Timestamp,
    /// Timelock is an absolute block height on the initiator chain
    BlockHeight,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Keccak256,
    Sha3_256,
    Sha256,
}

fn default_reverification_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_confirmation_timeout() -> u64 {
    600
}

fn default_event_capacity() -> usize {
    10_000
}

impl Settings {
    /// Load settings from the configured file
    pub fn load() -> Result<Self> {
        let config_path = env::var("SETTLEMENT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

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

        let mut seen = HashSet::new();
        for (name, chain) in &self.chains {
            if !seen.insert(chain.chain_id) {
                anyhow::bail!("Chain id {} is configured more than once", chain.chain_id);
            }
            if chain.enabled && chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.proof_validity_blocks < chain.confirmation_blocks {
                anyhow::bail!(
                    "Chain {}: proof validity window ({}) is shorter than confirmation depth ({})",
                    name,
                    chain.proof_validity_blocks,
                    chain.confirmation_blocks
                );
            }
            if chain.block_time_ms == 0 {
                anyhow::bail!("Chain {} has a zero block time", name);
            }
            if chain.bridge_address.is_empty() {
                tracing::warn!("Chain {} has no bridge address - quotes only", name);
            }
        }

        if self.engine.max_retries == 0 {
            anyhow::bail!("engine.max_retries must be at least 1");
        }
        if self.gas.batch_size == 0 {
            anyhow::bail!("gas.batch_size must be at least 1");
        }
        if self.gas.target_blocks > MAX_TARGET_BLOCKS {
            anyhow::bail!(
                "gas.target_blocks must be at most {}, got {}",
                MAX_TARGET_BLOCKS,
                self.gas.target_blocks
            );
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

lazy_static! {
    static ref ENV_VAR: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid");
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
