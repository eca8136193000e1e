//! Chain provider with multi-RPC support and automatic failover

use super::oracle::{read_error, AccountState, TxReceipt};
use crate::config::ChainConfig;
use crate::error::{SettlementError, SettlementResult};
use crate::types::Amount;

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider; no request is made until first use
    pub fn new(config: ChainConfig) -> SettlementResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}", config.chain_id);
                }
                Err(e) => {
                    warn!(
                        "Failed to create provider for chain {}: {}",
                        config.chain_id, e
                    );
                }
            }
        }

        if http_providers.is_empty() {
            return Err(read_error(config.chain_id, "no valid RPC providers"));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> SettlementResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(read_error(self.config.chain_id, "all providers failed"))
    }

    /// Get transaction receipt with failover
    pub async fn get_transaction_receipt(&self, tx_hash: &str) -> SettlementResult<Option<TxReceipt>> {
        let hash = H256::from_str(tx_hash).map_err(|e| {
            SettlementError::Validation(format!("invalid transaction hash {}: {}", tx_hash, e))
        })?;

        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_receipt(hash).await {
                Ok(receipt) => return Ok(receipt.and_then(|r| Self::convert_receipt(tx_hash, r))),
                Err(e) => {
                    warn!(
                        "Failed to get receipt {} from chain {}: {}",
                        tx_hash, self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(read_error(self.config.chain_id, "all providers failed to get receipt"))
    }

    /// Pending receipts carry no block number and count as not mined
    fn convert_receipt(tx_hash: &str, receipt: TransactionReceipt) -> Option<TxReceipt> {
        let block_number = receipt.block_number?.as_u64();
        Some(TxReceipt {
            tx_hash: tx_hash.to_string(),
            block_number,
            success: receipt.status == Some(1.into()),
            gas_used: receipt.gas_used.map(|g| g.low_u64()).unwrap_or(0),
            effective_gas_price: receipt
                .effective_gas_price
                .map(Amount::from)
                .unwrap_or_default(),
        })
    }

    /// Balance and nonce of an address at the latest block
    pub async fn get_account(&self, address: &str) -> SettlementResult<AccountState> {
        let address = Address::from_str(address).map_err(|e| {
            SettlementError::Validation(format!("invalid address {}: {}", address, e))
        })?;

        let balance = self
            .http()
            .get_balance(address, None)
            .await
            .map_err(|e| read_error(self.config.chain_id, e))?;
        let nonce = self
            .http()
            .get_transaction_count(address, None)
            .await
            .map_err(|e| read_error(self.config.chain_id, e))?;

        Ok(AccountState {
            balance: balance.into(),
            nonce: nonce.low_u64(),
        })
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }
}
